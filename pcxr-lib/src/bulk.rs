use crate::codec::validate_header;
use crate::error::PcxrError;
use crate::structures::{Header, PointCloud};
use log::info;
use std::fs;
use std::path::Path;
use std::time::Instant;

/// Whole-file read that keeps only the point-data region as a raw byte blob.
#[derive(Debug)]
pub struct BulkReader {
    header: Header,
    points: Vec<u8>,
}

impl BulkReader {
    pub fn open<P: AsRef<Path>>(path: P, header: &Header) -> Result<Self, PcxrError> {
        let path = path.as_ref();
        validate_header(header)?;
        let start = Instant::now();

        let raw = fs::read(path).map_err(|e| PcxrError::from_open(path, e))?;
        let begin = header.offset_to_point_data as usize;
        let end = begin + header.data_len();
        if raw.len() < end {
            return Err(PcxrError::TruncatedRecord {
                needed: end - begin,
                available: raw.len().saturating_sub(begin),
            });
        }
        let points = raw[begin..end].to_vec();

        info!(
            "Bulk read {} points ({} bytes) from {} in {} ms",
            header.point_count,
            points.len(),
            path.display(),
            start.elapsed().as_millis()
        );
        Ok(BulkReader {
            header: *header,
            points,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn bytes(&self) -> &[u8] {
        &self.points
    }

    pub fn into_cloud(self) -> PointCloud {
        PointCloud::Bytes(self.points)
    }
}
