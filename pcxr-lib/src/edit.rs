use crate::buffer::ResidentBuffer;
use crate::common::CLASS_COUNT;
use crate::error::PcxrError;
use crate::kernels::{CompactionKernel, EditKernel, RecordFilter};
use crate::structures::Header;
use crate::writer::PcxrWriter;
use foldhash::{HashMap, HashMapExt};
use log::info;
use std::path::Path;

/// Little-endian record bytes of every record passing `filter`, in buffer order.
fn compact_bytes<B, K>(buffer: &B, kernels: &K, filter: RecordFilter) -> Vec<u8>
where
    B: ResidentBuffer,
    K: CompactionKernel<B>,
{
    let kept = kernels.compact(buffer, filter);
    let floats = &kept.records[..kept.count * buffer.stride()];
    floats.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Record bytes of every record not flagged deleted.
pub fn prune<B, K>(buffer: &B, kernels: &K) -> Vec<u8>
where
    B: ResidentBuffer,
    K: CompactionKernel<B>,
{
    compact_bytes(buffer, kernels, RecordFilter::NotDeleted)
}

/// Record bytes of every selected record.
pub fn export_selected<B, K>(buffer: &B, kernels: &K) -> Vec<u8>
where
    B: ResidentBuffer,
    K: CompactionKernel<B>,
{
    compact_bytes(buffer, kernels, RecordFilter::Selected)
}

/// Compacts away deleted records and replaces `path` with the survivors.
pub fn save_pruned<P, B, K>(
    path: P,
    header: &Header,
    buffer: &B,
    kernels: &K,
) -> Result<Header, PcxrError>
where
    P: AsRef<Path>,
    B: ResidentBuffer,
    K: CompactionKernel<B>,
{
    let blob = prune(buffer, kernels);
    let written = PcxrWriter::write_point_array(path, header, &blob)?;
    info!(
        "Pruned {} deleted points",
        buffer.point_count().saturating_sub(written.point_count as usize)
    );
    Ok(written)
}

/// Replaces `path` with only the selected records.
pub fn save_selected<P, B, K>(
    path: P,
    header: &Header,
    buffer: &B,
    kernels: &K,
) -> Result<Header, PcxrError>
where
    P: AsRef<Path>,
    B: ResidentBuffer,
    K: CompactionKernel<B>,
{
    let blob = export_selected(buffer, kernels);
    let written = PcxrWriter::write_point_array(path, header, &blob)?;
    info!(
        "Exported {} of {} points",
        written.point_count,
        buffer.point_count()
    );
    Ok(written)
}

/// Non-empty classes of the live records.
pub fn class_histogram<B, K>(buffer: &B, kernels: &K) -> HashMap<u8, u64>
where
    B: ResidentBuffer,
    K: EditKernel<B>,
{
    let counts = kernels.count_classes(buffer);
    let mut histogram = HashMap::with_capacity(CLASS_COUNT);
    for (class, &count) in counts.iter().enumerate() {
        if count > 0 {
            histogram.insert(class as u8, count);
        }
    }
    histogram
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::HostBuffer;
    use crate::kernels::{EditOp, HostKernels};
    use crate::reader::read_cloud;
    use crate::structures::{Point, POINT_STRIDE};

    fn buffer_of(points: &[Point]) -> HostBuffer {
        let mut buffer = HostBuffer::new(points.len());
        for (i, p) in points.iter().enumerate() {
            buffer.write(i * POINT_STRIDE, &p.to_floats()).unwrap();
        }
        buffer
    }

    fn sample() -> HostBuffer {
        buffer_of(&[
            Point::at(0.0, 0.0, 0.0, 0).with_class(2),
            Point::at(1.0, 0.0, 0.0, 1).with_class(3),
            Point::at(2.0, 0.0, 0.0, 2).with_class(2),
            Point::at(3.0, 0.0, 0.0, 3).with_class(5),
        ])
    }

    #[test]
    fn test_select_class_and_delete() {
        let mut buffer = sample();
        HostKernels.apply(&mut buffer, &EditOp::SelectClass(2));
        HostKernels.apply(&mut buffer, &EditOp::DeleteSelected);

        let histogram = class_histogram(&buffer, &HostKernels);
        assert_eq!(histogram.get(&2), None);
        assert_eq!(histogram.get(&3), Some(&1));
        assert_eq!(histogram.get(&5), Some(&1));

        HostKernels.apply(&mut buffer, &EditOp::UndoDelete);
        assert_eq!(class_histogram(&buffer, &HostKernels).get(&2), Some(&2));
    }

    #[test]
    fn test_reclassify_inverse_selection() {
        let mut buffer = sample();
        HostKernels.apply(&mut buffer, &EditOp::SelectClass(5));
        HostKernels.apply(&mut buffer, &EditOp::SelectInverse);
        HostKernels.apply(&mut buffer, &EditOp::SetSelectedClass(9));
        HostKernels.apply(&mut buffer, &EditOp::SelectNone);

        let histogram = class_histogram(&buffer, &HostKernels);
        assert_eq!(histogram.len(), 2);
        assert_eq!(histogram[&9], 3);
        assert_eq!(histogram[&5], 1);
        assert!(buffer
            .records()
            .chunks_exact(POINT_STRIDE)
            .all(|r| r[crate::structures::FIELD_SELECTED] == 0.0));
    }

    #[test]
    fn test_prune_drops_deleted_records() {
        let mut buffer = sample();
        HostKernels.apply(&mut buffer, &EditOp::SelectClass(3));
        HostKernels.apply(&mut buffer, &EditOp::DeleteSelected);

        let file = tempfile::NamedTempFile::new().expect("tempfile");
        let written = save_pruned(file.path(), &Header::new(4), &buffer, &HostKernels).unwrap();
        assert_eq!(written.point_count, 3);

        let (header, cloud) = read_cloud(file.path(), 2).unwrap();
        assert_eq!(header.point_count, 3);
        let ids: Vec<u32> = (0..cloud.len())
            .map(|i| cloud.point(i).unwrap().point_id())
            .collect();
        assert_eq!(ids, vec![0, 2, 3]);
    }

    #[test]
    fn test_save_selected_by_ids() {
        let mut buffer = sample();
        HostKernels.apply(&mut buffer, &EditOp::SelectIds(vec![3, 1]));
        assert_eq!(HostKernels.selected_indices(&buffer), vec![1, 3]);

        let file = tempfile::NamedTempFile::new().expect("tempfile");
        let written = save_selected(file.path(), &Header::new(4), &buffer, &HostKernels).unwrap();
        assert_eq!(written.point_count, 2);

        let (_, cloud) = read_cloud(file.path(), 8).unwrap();
        let exported: Vec<(u32, u8)> = (0..cloud.len())
            .map(|i| cloud.point(i).unwrap())
            .map(|p| (p.point_id(), p.class_code()))
            .collect();
        assert_eq!(exported, vec![(1, 3), (3, 5)]);
    }

    #[test]
    fn test_export_without_selection_is_empty() {
        let buffer = sample();
        assert!(export_selected(&buffer, &HostKernels).is_empty());
    }

    #[test]
    fn test_prune_everything_deleted() {
        let mut buffer = sample();
        HostKernels.apply(&mut buffer, &EditOp::SelectInverse);
        HostKernels.apply(&mut buffer, &EditOp::DeleteSelected);
        assert!(prune(&buffer, &HostKernels).is_empty());
        assert!(class_histogram(&buffer, &HostKernels).is_empty());
    }
}
