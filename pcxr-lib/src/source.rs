//! Conversion from an interchange-format source (LAS and friends) into PCXR records.
//!
//! The engine only needs a record count, per-record XYZ/intensity/classification and the
//! source's scale, offset and bounding box. Anything that can yield those implements
//! [`SourceAdapter`].

use crate::common::{height_ramp, rgb8};
use crate::error::PcxrError;
use crate::structures::{Header, Point, PointCloud, POINT_STRIDE};
use log::{debug, info};
use std::time::Instant;

const CLASS_GROUND: u8 = 2;
const CLASS_LOW_VEGETATION: u8 = 3;
const MIN_INTENSITY: f32 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SourceHeader {
    pub point_count: u64,
    pub scale: [f64; 3],
    pub offset: [f64; 3],
    pub min: [f64; 3],
    pub max: [f64; 3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceRecord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub intensity: u16,
    pub classification: u8,
}

pub trait SourceAdapter {
    fn header(&self) -> SourceHeader;

    /// `Ok(None)` once the source is exhausted.
    fn next_record(&mut self) -> Result<Option<SourceRecord>, PcxrError>;
}

/// In-memory source over already decoded records.
#[derive(Debug)]
pub struct VecSource {
    header: SourceHeader,
    records: std::vec::IntoIter<SourceRecord>,
}

impl VecSource {
    /// Bounding box is derived from the records; scale is 1 and offset 0.
    pub fn new(records: Vec<SourceRecord>) -> Self {
        let mut min = [f64::INFINITY; 3];
        let mut max = [f64::NEG_INFINITY; 3];
        for r in &records {
            for (axis, v) in [r.x, r.y, r.z].into_iter().enumerate() {
                min[axis] = min[axis].min(v);
                max[axis] = max[axis].max(v);
            }
        }
        if records.is_empty() {
            min = [0.0; 3];
            max = [0.0; 3];
        }
        VecSource {
            header: SourceHeader {
                point_count: records.len() as u64,
                scale: [1.0; 3],
                offset: [0.0; 3],
                min,
                max,
            },
            records: records.into_iter(),
        }
    }
}

impl SourceAdapter for VecSource {
    fn header(&self) -> SourceHeader {
        self.header
    }

    fn next_record(&mut self) -> Result<Option<SourceRecord>, PcxrError> {
        Ok(self.records.next())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportOptions {
    /// Store the source Z axis as Y (Y-up viewers).
    pub invert_yz: bool,
    pub scale: f32,
}

impl Default for ImportOptions {
    fn default() -> Self {
        ImportOptions {
            invert_yz: false,
            scale: 1.0,
        }
    }
}

/// Converts every source record into a PCXR record.
///
/// XY are centered on the bounding-box centroid and the vertical axis is shifted so the
/// lowest point sits at zero. Records get ids `0..n` in source order.
pub fn import_source<S: SourceAdapter>(
    source: &mut S,
    options: &ImportOptions,
) -> Result<(Header, PointCloud), PcxrError> {
    let start = Instant::now();
    let src = source.header();

    let mut records = Vec::with_capacity(src.point_count as usize);
    let mut intensity_min = f32::MAX;
    let mut intensity_max = f32::MIN;
    while let Some(record) = source.next_record()? {
        let i = record.intensity as f32;
        intensity_min = intensity_min.min(i);
        intensity_max = intensity_max.max(i);
        records.push(record);
    }
    debug!(
        "Read {} source records, intensity {}..{}",
        records.len(),
        intensity_min,
        intensity_max
    );

    let centroid_x = (src.max[0] - src.min[0]) / 2.0 + src.min[0];
    let centroid_y = (src.max[1] - src.min[1]) / 2.0 + src.min[1];
    let height_interval = (src.max[2] - src.min[2]) as f32 * options.scale;
    let intensity_range = intensity_max - intensity_min;

    let mut floats = Vec::with_capacity(records.len() * POINT_STRIDE);
    for (id, r) in records.iter().enumerate() {
        let east = (r.x - centroid_x) as f32 * options.scale;
        let north = (r.y - centroid_y) as f32 * options.scale;
        let up = (r.z - src.min[2]) as f32 * options.scale;
        let (y, z) = if options.invert_yz {
            (up, north)
        } else {
            (north, up)
        };

        let [red, green, blue] = match r.classification {
            CLASS_GROUND => rgb8(139, 69, 19),
            CLASS_LOW_VEGETATION => rgb8(34, 139, 34),
            _ => height_ramp(up, height_interval),
        };

        let mut intensity = if intensity_range > 0.0 {
            (r.intensity as f32 - intensity_min) / intensity_range
        } else {
            1.0
        };
        if intensity == 0.0 {
            intensity = MIN_INTENSITY;
        }

        let point = Point {
            red,
            green,
            blue,
            intensity_normalized: intensity,
            ..Point::at(east, y, z, id as u32).with_class(r.classification)
        };
        floats.extend_from_slice(&point.to_floats());
    }

    let mut header = Header::new(records.len() as u32);
    header.bounds_min = src.min.map(|v| v as f32);
    header.bounds_max = src.max.map(|v| v as f32);
    header.scale = src.scale;
    header.offset = src.offset;

    info!(
        "Imported {} points in {} ms",
        records.len(),
        start.elapsed().as_millis()
    );
    Ok((header, PointCloud::Floats(floats)))
}

#[cfg(feature = "las")]
pub use self::las_source::LasSource;

#[cfg(feature = "las")]
mod las_source {
    use super::{SourceAdapter, SourceHeader, SourceRecord};
    use crate::error::PcxrError;
    use std::fs::File;
    use std::io::BufReader;
    use std::path::Path;

    /// LAS/LAZ file source.
    pub struct LasSource {
        reader: las::Reader,
        header: SourceHeader,
    }

    fn las_error(e: las::Error) -> PcxrError {
        PcxrError::InvalidHeader(format!("LAS: {}", e))
    }

    impl LasSource {
        pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PcxrError> {
            let path = path.as_ref();
            let file = File::open(path).map_err(|e| PcxrError::from_open(path, e))?;
            let reader = las::Reader::new(BufReader::new(file)).map_err(las_error)?;
            let h = reader.header();
            let t = h.transforms();
            let b = h.bounds();
            let header = SourceHeader {
                point_count: h.number_of_points(),
                scale: [t.x.scale, t.y.scale, t.z.scale],
                offset: [t.x.offset, t.y.offset, t.z.offset],
                min: [b.min.x, b.min.y, b.min.z],
                max: [b.max.x, b.max.y, b.max.z],
            };
            Ok(LasSource { reader, header })
        }
    }

    impl SourceAdapter for LasSource {
        fn header(&self) -> SourceHeader {
            self.header
        }

        fn next_record(&mut self) -> Result<Option<SourceRecord>, PcxrError> {
            let point = self.reader.read_point().map_err(las_error)?;
            Ok(point.map(|p| SourceRecord {
                x: p.x,
                y: p.y,
                z: p.z,
                intensity: p.intensity,
                classification: u8::from(p.classification),
            }))
        }
    }
}
