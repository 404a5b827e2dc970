//! Sequential decode of PCXR files too large to buffer in one piece.

use crate::codec::{decode_header, decode_point, validate_header};
use crate::error::PcxrError;
use crate::structures::{Header, Point, PointCloud, HEADER_SIZE, POINT_STRIDE};
use log::{debug, info};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Instant;

/// Streaming reader with a bounded refill buffer of `read_ahead` records.
///
/// [`PcxrReader::close`] consumes the reader, so no record can be requested after the
/// file handle has been released.
#[derive(Debug)]
pub struct PcxrReader {
    file: File,
    header: Header,
    read_ahead: usize,
    buffer: Vec<u8>,
    /// Valid bytes in `buffer` after the last fill.
    filled: usize,
    buffer_index: usize,
    points_read: u64,
}

impl PcxrReader {
    pub fn open<P: AsRef<Path>>(path: P, read_ahead: usize) -> Result<Self, PcxrError> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| PcxrError::from_open(path, e))?;

        let mut header_bytes = [0u8; HEADER_SIZE];
        let got = read_full(&mut file, &mut header_bytes)?;
        let header = decode_header(&header_bytes[..got])?;
        validate_header(&header)?;

        let read_ahead = read_ahead.max(1);
        file.seek(SeekFrom::Start(header.offset_to_point_data as u64))?;

        let mut reader = PcxrReader {
            file,
            header,
            read_ahead,
            buffer: vec![0u8; read_ahead * header.stride_bytes()],
            filled: 0,
            buffer_index: 0,
            points_read: 0,
        };
        if header.point_count > 0 {
            reader.fill()?;
        }
        debug!(
            "Opened {} ({} points, read-ahead {})",
            path.display(),
            header.point_count,
            read_ahead
        );
        Ok(reader)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn points_read(&self) -> u64 {
        self.points_read
    }

    pub fn next_point(&mut self) -> Result<Point, PcxrError> {
        if self.points_read >= self.header.point_count as u64 {
            return Err(PcxrError::EndOfStream);
        }
        let stride_bytes = self.header.stride_bytes();
        if (self.buffer_index + 1) * stride_bytes > self.filled {
            // A partial record left in the current fill means the file ended mid-record.
            if self.buffer_index * stride_bytes < self.filled {
                return Err(PcxrError::TruncatedRecord {
                    needed: stride_bytes,
                    available: self.filled - self.buffer_index * stride_bytes,
                });
            }
            self.fill()?;
        }
        let point = decode_point(&self.buffer[..self.filled], self.buffer_index * stride_bytes)?;
        self.buffer_index += 1;
        self.points_read += 1;
        Ok(point)
    }

    /// One bounded read from the current position; short fills at EOF are accepted.
    fn fill(&mut self) -> Result<(), PcxrError> {
        self.filled = read_full(&mut self.file, &mut self.buffer)?;
        self.buffer_index = 0;
        debug!("Refilled {} bytes", self.filled);
        if self.filled == 0 {
            return Err(PcxrError::TruncatedRecord {
                needed: self.header.stride_bytes(),
                available: 0,
            });
        }
        Ok(())
    }

    pub fn close(self) {
        drop(self.file);
    }
}

impl Iterator for PcxrReader {
    type Item = Result<Point, PcxrError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_point() {
            Err(PcxrError::EndOfStream) => None,
            other => Some(other),
        }
    }
}

/// Reads until `buf` is full or the stream ends.
fn read_full<R: Read>(src: &mut R, buf: &mut [u8]) -> Result<usize, PcxrError> {
    let mut got = 0;
    while got < buf.len() {
        match src.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(PcxrError::IoError(e)),
        }
    }
    Ok(got)
}

/// Decodes a whole file into a flat float array.
pub fn read_cloud<P: AsRef<Path>>(
    path: P,
    read_ahead: usize,
) -> Result<(Header, PointCloud), PcxrError> {
    let start = Instant::now();
    let mut reader = PcxrReader::open(path.as_ref(), read_ahead)?;
    let header = *reader.header();
    let mut floats = Vec::with_capacity(header.point_count as usize * POINT_STRIDE);
    for point in reader.by_ref() {
        floats.extend_from_slice(&point?.to_floats());
    }
    reader.close();
    info!(
        "Loaded {} points from {} in {} ms",
        header.point_count,
        path.as_ref().display(),
        start.elapsed().as_millis()
    );
    Ok((header, PointCloud::Floats(floats)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_header, encode_point};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(count: u32, declared: u32) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("tempfile");
        file.write_all(&encode_header(&Header::new(declared))).unwrap();
        for i in 0..count {
            let p = Point::at(i as f32, 0.5 * i as f32, -(i as f32), i);
            file.write_all(&encode_point(&p)).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn read_all(file: &NamedTempFile, read_ahead: usize) -> Vec<Point> {
        let mut reader = PcxrReader::open(file.path(), read_ahead).expect("open failed");
        let mut points = Vec::new();
        loop {
            match reader.next_point() {
                Ok(p) => points.push(p),
                Err(PcxrError::EndOfStream) => break,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(reader.points_read(), points.len() as u64);
        points
    }

    #[test]
    fn test_counts_around_read_ahead() {
        // less than one fill, an exact multiple, and a partial final fill
        for (count, read_ahead) in [(3u32, 10usize), (20, 10), (23, 10), (1, 1)] {
            let file = write_file(count, count);
            let points = read_all(&file, read_ahead);
            assert_eq!(points.len(), count as usize);
            for (i, p) in points.iter().enumerate() {
                assert_eq!(p.point_id(), i as u32);
                assert_eq!(p.x, i as f32);
            }
        }
    }

    #[test]
    fn test_zero_points_yields_nothing() {
        let file = write_file(0, 0);
        let mut reader = PcxrReader::open(file.path(), 4).unwrap();
        assert!(matches!(reader.next_point(), Err(PcxrError::EndOfStream)));
    }

    #[test]
    fn test_trailing_bytes_are_not_read_as_points() {
        let file = write_file(5, 3);
        assert_eq!(read_all(&file, 2).len(), 3);
    }

    #[test]
    fn test_missing_records_are_truncated() {
        let file = write_file(2, 4);
        let mut reader = PcxrReader::open(file.path(), 3).unwrap();
        assert!(reader.next_point().is_ok());
        assert!(reader.next_point().is_ok());
        assert!(matches!(
            reader.next_point(),
            Err(PcxrError::TruncatedRecord { .. })
        ));
    }

    #[test]
    fn test_partial_record_is_truncated() {
        let mut file = write_file(1, 2);
        file.write_all(&[0u8; 10]).unwrap();
        file.flush().unwrap();
        let mut reader = PcxrReader::open(file.path(), 8).unwrap();
        assert!(reader.next_point().is_ok());
        match reader.next_point() {
            Err(PcxrError::TruncatedRecord { available, .. }) => assert_eq!(available, 10),
            other => panic!("expected TruncatedRecord, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = PcxrReader::open(dir.path().join("absent.pcxr"), 10).unwrap_err();
        assert!(matches!(err, PcxrError::NotFound(_)));
    }

    #[test]
    fn test_read_cloud_and_iterator() {
        let file = write_file(7, 7);
        let (header, cloud) = read_cloud(file.path(), 3).unwrap();
        assert_eq!(header.point_count, 7);
        assert_eq!(cloud.len(), 7);
        assert_eq!(cloud.point(6).unwrap().point_id(), 6);

        let reader = PcxrReader::open(file.path(), 2).unwrap();
        let ids: Vec<u32> = reader.map(|p| p.unwrap().point_id()).collect();
        assert_eq!(ids, (0..7).collect::<Vec<_>>());
    }
}
