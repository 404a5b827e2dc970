//! Contracts of the parallel kernels the query and edit paths dispatch, plus a
//! sequential host implementation of each.
//!
//! A device backend implements the same traits over its own [`ResidentBuffer`]; the
//! orchestrators only stage inputs and relay counts between them.

use crate::buffer::{HostBuffer, ResidentBuffer};
use crate::common::{distance, height_ramp, palette, CLASS_COUNT};
use crate::structures::{
    flag, FIELD_CLASSIFICATION, FIELD_DELETED, FIELD_ID, FIELD_INTENSITY, FIELD_POINT_SOURCE_ID,
    FIELD_RED, FIELD_SELECTED, FIELD_USER_RED, FIELD_X, POINT_STRIDE,
};
use foldhash::{HashSet, HashSetExt};

/// Compact (position, id) pair projected out of a wide record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionId {
    pub position: [f32; 3],
    pub id: u32,
}

/// Distance paired with the index of its [`PositionId`] in the working population.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceIndex {
    pub distance: f32,
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    pub position: [f32; 3],
    pub id: u32,
    pub distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFilter {
    Selected,
    NotDeleted,
}

impl RecordFilter {
    #[inline]
    fn matches(self, record: &[f32]) -> bool {
        match self {
            RecordFilter::Selected => record[FIELD_SELECTED] != 0.0,
            RecordFilter::NotDeleted => record[FIELD_DELETED] == 0.0,
        }
    }
}

/// Output of a compaction: an append buffer and its counter, read back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Compacted {
    pub records: Vec<f32>,
    pub count: usize,
}

/// Partition of a population into reduction groups.
///
/// Every group spans `span` candidates except the last, which also takes the remainder.
/// A population smaller than one full span is reduced as a single group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReducePlan {
    pub population: usize,
    pub groups: usize,
    pub span: usize,
}

impl ReducePlan {
    pub fn new(population: usize, threads_per_group: usize) -> Self {
        let span = threads_per_group.max(1) * 2;
        let groups = population / span;
        if groups == 0 {
            ReducePlan {
                population,
                groups: usize::from(population > 0),
                span: population,
            }
        } else {
            ReducePlan {
                population,
                groups,
                span,
            }
        }
    }

    pub fn range(&self, group: usize) -> std::ops::Range<usize> {
        let start = group * self.span;
        let end = if group + 1 == self.groups {
            self.population
        } else {
            start + self.span
        };
        start..end
    }
}

pub trait CompactionKernel<B: ResidentBuffer> {
    fn compact(&self, points: &B, filter: RecordFilter) -> Compacted;
}

pub trait PositionKernel<B: ResidentBuffer> {
    fn extract(&self, points: &B) -> Vec<PositionId>;
    fn extract_compacted(&self, compacted: &Compacted) -> Vec<PositionId>;
}

pub trait DistanceKernel {
    fn distances(&self, from: [f32; 3], positions: &[PositionId]) -> Vec<DistanceIndex>;
}

pub trait ReduceKernel {
    /// One minimal candidate per group of `plan`.
    fn reduce(&self, distances: &[DistanceIndex], plan: &ReducePlan) -> Vec<DistanceIndex>;

    /// Single-invocation scan of the group candidates.
    fn resolve(&self, candidates: &[DistanceIndex], positions: &[PositionId]) -> Option<Nearest>;
}

/// Everything a nearest-point query dispatches.
pub trait NearestPointKernels<B: ResidentBuffer>:
    CompactionKernel<B> + PositionKernel<B> + DistanceKernel + ReduceKernel
{
}

impl<B, K> NearestPointKernels<B> for K
where
    B: ResidentBuffer,
    K: CompactionKernel<B> + PositionKernel<B> + DistanceKernel + ReduceKernel,
{
}

/// Source of the derived user colour channels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColorMode {
    /// Copies the record's own colour.
    None,
    Class,
    /// Height ramp over `[min, max]` along `axis` (0 = x, 1 = y, 2 = z).
    Height { axis: usize, min: f32, max: f32 },
    /// Grey level from the normalized intensity.
    Intensity,
    PointSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EditOp {
    SelectNone,
    SelectInverse,
    SelectClass(u8),
    /// Adds every record whose stable id is listed to the selection.
    SelectIds(Vec<u32>),
    DeleteSelected,
    UndoDelete,
    SetSelectedClass(u8),
    ColorBy(ColorMode),
}

pub trait EditKernel<B: ResidentBuffer> {
    fn apply(&self, points: &mut B, op: &EditOp);
    fn count_classes(&self, points: &B) -> [u64; CLASS_COUNT];
    /// Buffer indices of the selected records, in buffer order.
    fn selected_indices(&self, points: &B) -> Vec<u32>;
}

/// Sequential kernels over a [`HostBuffer`]. Ties resolve to the lowest index.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostKernels;

/// NaN distances never win; a slice of only NaN yields `None`.
#[inline]
fn min_of(candidates: &[DistanceIndex]) -> Option<DistanceIndex> {
    candidates
        .iter()
        .copied()
        .filter(|c| !c.distance.is_nan())
        .fold(None, |best, c| match best {
            Some(b) if b.distance <= c.distance => Some(b),
            _ => Some(c),
        })
}

#[inline]
fn position_id(record: &[f32]) -> PositionId {
    PositionId {
        position: [record[FIELD_X], record[FIELD_X + 1], record[FIELD_X + 2]],
        id: record[FIELD_ID] as u32,
    }
}

impl CompactionKernel<HostBuffer> for HostKernels {
    fn compact(&self, points: &HostBuffer, filter: RecordFilter) -> Compacted {
        let mut out = Compacted::default();
        for record in points.records().chunks_exact(POINT_STRIDE) {
            if filter.matches(record) {
                out.records.extend_from_slice(record);
                out.count += 1;
            }
        }
        out
    }
}

impl PositionKernel<HostBuffer> for HostKernels {
    fn extract(&self, points: &HostBuffer) -> Vec<PositionId> {
        points
            .records()
            .chunks_exact(POINT_STRIDE)
            .map(position_id)
            .collect()
    }

    fn extract_compacted(&self, compacted: &Compacted) -> Vec<PositionId> {
        compacted
            .records
            .chunks_exact(POINT_STRIDE)
            .take(compacted.count)
            .map(position_id)
            .collect()
    }
}

impl DistanceKernel for HostKernels {
    fn distances(&self, from: [f32; 3], positions: &[PositionId]) -> Vec<DistanceIndex> {
        positions
            .iter()
            .enumerate()
            .map(|(i, p)| DistanceIndex {
                distance: distance(from, p.position),
                index: i as u32,
            })
            .collect()
    }
}

impl ReduceKernel for HostKernels {
    fn reduce(&self, distances: &[DistanceIndex], plan: &ReducePlan) -> Vec<DistanceIndex> {
        (0..plan.groups)
            .filter_map(|g| min_of(&distances[plan.range(g)]))
            .collect()
    }

    fn resolve(&self, candidates: &[DistanceIndex], positions: &[PositionId]) -> Option<Nearest> {
        let best = min_of(candidates)?;
        let hit = positions.get(best.index as usize)?;
        Some(Nearest {
            position: hit.position,
            id: hit.id,
            distance: best.distance,
        })
    }
}

fn user_color(record: &[f32], mode: ColorMode) -> [f32; 3] {
    match mode {
        ColorMode::None => [
            record[FIELD_RED],
            record[FIELD_RED + 1],
            record[FIELD_RED + 2],
        ],
        ColorMode::Class => palette(record[FIELD_CLASSIFICATION] as u32),
        ColorMode::Height { axis, min, max } => {
            height_ramp(record[FIELD_X + axis.min(2)] - min, max - min)
        }
        ColorMode::Intensity => [record[FIELD_INTENSITY]; 3],
        ColorMode::PointSource => palette(record[FIELD_POINT_SOURCE_ID] as u32),
    }
}

impl EditKernel<HostBuffer> for HostKernels {
    fn apply(&self, points: &mut HostBuffer, op: &EditOp) {
        let ids: HashSet<u32> = match op {
            EditOp::SelectIds(list) => list.iter().copied().collect(),
            _ => HashSet::new(),
        };
        for record in points.records_mut().chunks_exact_mut(POINT_STRIDE) {
            let selected = record[FIELD_SELECTED] != 0.0;
            match *op {
                EditOp::SelectNone => record[FIELD_SELECTED] = 0.0,
                EditOp::SelectInverse => record[FIELD_SELECTED] = flag(!selected),
                EditOp::SelectClass(class) => {
                    if record[FIELD_CLASSIFICATION] == class as f32 {
                        record[FIELD_SELECTED] = 1.0;
                    }
                }
                EditOp::SelectIds(_) => {
                    if ids.contains(&(record[FIELD_ID] as u32)) {
                        record[FIELD_SELECTED] = 1.0;
                    }
                }
                EditOp::DeleteSelected => {
                    if selected {
                        record[FIELD_DELETED] = 1.0;
                        record[FIELD_SELECTED] = 0.0;
                    }
                }
                EditOp::UndoDelete => record[FIELD_DELETED] = 0.0,
                EditOp::SetSelectedClass(class) => {
                    if selected {
                        record[FIELD_CLASSIFICATION] = class as f32;
                    }
                }
                EditOp::ColorBy(mode) => {
                    let [r, g, b] = user_color(record, mode);
                    record[FIELD_USER_RED..FIELD_USER_RED + 4].copy_from_slice(&[r, g, b, 1.0]);
                }
            }
        }
    }

    fn count_classes(&self, points: &HostBuffer) -> [u64; CLASS_COUNT] {
        let mut counts = [0u64; CLASS_COUNT];
        for record in points.records().chunks_exact(POINT_STRIDE) {
            if record[FIELD_DELETED] == 0.0 {
                let class = record[FIELD_CLASSIFICATION].clamp(0.0, 255.0) as usize;
                counts[class] += 1;
            }
        }
        counts
    }

    fn selected_indices(&self, points: &HostBuffer) -> Vec<u32> {
        points
            .records()
            .chunks_exact(POINT_STRIDE)
            .enumerate()
            .filter(|(_, record)| record[FIELD_SELECTED] != 0.0)
            .map(|(i, _)| i as u32)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_plan_folds_remainder() {
        let plan = ReducePlan::new(1000, 128);
        assert_eq!(plan.groups, 3);
        assert_eq!(plan.range(0), 0..256);
        assert_eq!(plan.range(2), 512..1000);
    }

    #[test]
    fn test_reduce_plan_small_population() {
        let plan = ReducePlan::new(5, 256);
        assert_eq!(plan.groups, 1);
        assert_eq!(plan.range(0), 0..5);
        assert_eq!(ReducePlan::new(0, 256).groups, 0);
    }

    #[test]
    fn test_reduce_covers_every_candidate() {
        // The smallest distance sits in the remainder of the last group.
        let distances: Vec<DistanceIndex> = (0..11)
            .map(|i| DistanceIndex {
                distance: if i == 10 { 0.5 } else { 10.0 + i as f32 },
                index: i,
            })
            .collect();
        let plan = ReducePlan::new(11, 2);
        let candidates = HostKernels.reduce(&distances, &plan);
        assert_eq!(candidates.len(), 2);
        assert_eq!(min_of(&candidates).unwrap().index, 10);
    }

    #[test]
    fn test_nan_distance_never_wins() {
        let distances: Vec<DistanceIndex> = [1.0, f32::NAN, 50.0]
            .into_iter()
            .enumerate()
            .map(|(i, distance)| DistanceIndex {
                distance,
                index: i as u32,
            })
            .collect();
        assert_eq!(min_of(&distances).unwrap().index, 0);
        assert_eq!(min_of(&distances[1..]).unwrap().index, 2);
        assert!(min_of(&distances[1..2]).is_none());
    }

    fn host_buffer(points: &[crate::structures::Point]) -> HostBuffer {
        let mut buffer = HostBuffer::new(points.len());
        for (i, p) in points.iter().enumerate() {
            buffer.write(i * POINT_STRIDE, &p.to_floats()).unwrap();
        }
        buffer
    }

    #[test]
    fn test_select_ids_and_selected_indices() {
        use crate::structures::Point;
        let mut buffer = host_buffer(&[
            Point::at(0.0, 0.0, 0.0, 40),
            Point::at(1.0, 0.0, 0.0, 41),
            Point::at(2.0, 0.0, 0.0, 42).with_selected(true),
            Point::at(3.0, 0.0, 0.0, 43),
        ]);
        HostKernels.apply(&mut buffer, &EditOp::SelectIds(vec![43, 40, 999]));
        assert_eq!(HostKernels.selected_indices(&buffer), vec![0, 2, 3]);

        HostKernels.apply(&mut buffer, &EditOp::SelectIds(Vec::new()));
        assert_eq!(HostKernels.selected_indices(&buffer), vec![0, 2, 3]);
        HostKernels.apply(&mut buffer, &EditOp::SelectNone);
        assert!(HostKernels.selected_indices(&buffer).is_empty());
    }

    #[test]
    fn test_color_by_fills_user_channels() {
        use crate::structures::Point;
        let mut base = Point::at(0.0, 5.0, 0.0, 0).with_class(2);
        base.red = 0.2;
        base.green = 0.4;
        base.blue = 0.6;
        base.intensity_normalized = 0.25;
        base.point_source_id = 7.0;
        let mut buffer = host_buffer(&[base]);
        let user = |buffer: &HostBuffer| {
            let r = &buffer.records()[FIELD_USER_RED..FIELD_USER_RED + 4];
            [r[0], r[1], r[2], r[3]]
        };

        HostKernels.apply(&mut buffer, &EditOp::ColorBy(ColorMode::None));
        assert_eq!(user(&buffer), [0.2, 0.4, 0.6, 1.0]);

        HostKernels.apply(&mut buffer, &EditOp::ColorBy(ColorMode::Intensity));
        assert_eq!(user(&buffer), [0.25, 0.25, 0.25, 1.0]);

        HostKernels.apply(&mut buffer, &EditOp::ColorBy(ColorMode::Class));
        let [r, g, b] = palette(2);
        assert_eq!(user(&buffer), [r, g, b, 1.0]);

        HostKernels.apply(&mut buffer, &EditOp::ColorBy(ColorMode::PointSource));
        let [r, g, b] = palette(7);
        assert_eq!(user(&buffer), [r, g, b, 1.0]);

        HostKernels.apply(
            &mut buffer,
            &EditOp::ColorBy(ColorMode::Height {
                axis: 1,
                min: 5.0,
                max: 105.0,
            }),
        );
        assert_eq!(user(&buffer), [0.0, 0.0, 1.0, 1.0]);

        // the record's own colour is untouched
        assert_eq!(&buffer.records()[FIELD_RED..FIELD_RED + 3], &[0.2, 0.4, 0.6]);
    }

    #[test]
    fn test_ties_resolve_to_lowest_index() {
        let distances = [
            DistanceIndex {
                distance: 1.0,
                index: 0,
            },
            DistanceIndex {
                distance: 1.0,
                index: 1,
            },
        ];
        assert_eq!(min_of(&distances).unwrap().index, 0);
    }
}
