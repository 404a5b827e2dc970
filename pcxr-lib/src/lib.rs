pub mod buffer;
pub mod bulk;
pub mod codec;
pub mod common;
pub mod edit;
pub mod error;
pub mod kernels;
pub mod query;
pub mod reader;
pub mod source;
mod structures;
pub mod upload;
pub mod writer;

use buffer::ResidentBuffer;
use bulk::BulkReader;
use codec::decode_header;
use common::EngineConfig;
use error::PcxrError;
use log::info;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Instant;
use upload::{ChunkedUpload, UploadReady};
use writer::PcxrWriter;

pub use structures::{
    Header, Point, PointCloud, HEADER_SIZE, POINT_STRIDE, POINT_STRIDE_BYTES, VERSION,
};

/// Decodes the header at the start of `path` without touching the point data.
pub fn read_header<P: AsRef<Path>>(path: P) -> Result<Header, PcxrError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| PcxrError::from_open(path, e))?;
    let mut buf = Vec::with_capacity(HEADER_SIZE);
    file.take(HEADER_SIZE as u64).read_to_end(&mut buf)?;
    decode_header(&buf)
}

/// Header read followed by a bulk read of the point-data region.
pub fn load_bytes<P: AsRef<Path>>(path: P) -> Result<(Header, PointCloud), PcxrError> {
    let header = read_header(path.as_ref())?;
    let bulk = BulkReader::open(path, &header)?;
    Ok((*bulk.header(), bulk.into_cloud()))
}

/// Writes every record of `cloud` through a buffered writer. The stored point count is the
/// cloud's length, whatever `header` declares.
pub fn save_cloud<P: AsRef<Path>>(
    path: P,
    header: &Header,
    cloud: &PointCloud,
    capacity: Option<usize>,
) -> Result<Header, PcxrError> {
    let start = Instant::now();
    let header = Header {
        point_count: cloud.len() as u32,
        ..*header
    };
    let mut writer = PcxrWriter::create(path.as_ref(), &header, capacity)?;
    let floats = cloud.as_floats();
    for record in floats.chunks_exact(POINT_STRIDE) {
        let record: &[f32; POINT_STRIDE] =
            record.try_into().map_err(|_| PcxrError::TruncatedRecord {
                needed: POINT_STRIDE,
                available: record.len(),
            })?;
        writer.write_point(&Point::from_floats(record))?;
    }
    let written = *writer.header();
    writer.close()?;
    info!(
        "Saved {} points to {} in {} ms",
        written.point_count,
        path.as_ref().display(),
        start.elapsed().as_millis()
    );
    Ok(written)
}

/// Uploads `cloud` into `buffer` in chunks of `config.upload_chunk_size` records.
pub fn upload_cloud<B: ResidentBuffer>(
    cloud: &PointCloud,
    buffer: &mut B,
    config: &EngineConfig,
) -> Result<UploadReady, PcxrError> {
    let floats = cloud.as_floats();
    ChunkedUpload::new(&floats, buffer, config.upload_chunk_size)?.run()
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    pub mod worker;

    /// Same as [`upload_cloud`], yielding to the runtime between chunks.
    pub async fn upload_cloud_async<B: ResidentBuffer>(
        cloud: &PointCloud,
        buffer: &mut B,
        config: &EngineConfig,
    ) -> Result<UploadReady, PcxrError> {
        let floats = cloud.as_floats();
        ChunkedUpload::new(&floats, buffer, config.upload_chunk_size)?
            .run_async()
            .await
    }
}
}
