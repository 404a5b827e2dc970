//! Sequential PCXR encoding with a bounded batch buffer.
//!
//! The writer moves through three phases:
//!
//! 1. the header is written once on construction,
//! 2. records are batched into a buffer of `capacity` records and flushed whole,
//! 3. once `points_written == declared - spill` the remaining tail is written record by record,
//!    so no partial batch is ever left behind at end of stream.
//!
//! A cloud that fits in a single batch skips phase 2 entirely.
//!
//! Tail records are staged in the same buffer, one at a time, so a failed write in either phase
//! leaves the record accepted and pending. Flushes track how many staged bytes already reached
//! the stream and resume from there.

use crate::codec::{encode_header, encode_point_into, validate_header};
use crate::error::PcxrError;
use crate::structures::{Header, Point, HEADER_SIZE, POINT_STRIDE_BYTES};
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

#[derive(Debug)]
pub struct PcxrWriter<W: Write> {
    out: W,
    header: Header,
    buffer: Vec<u8>,
    capacity: usize,
    points_written: u64,
    points_buffered: usize,
    /// Bytes of the staged batch already written to `out`.
    flushed_bytes: usize,
    spill: u64,
    use_buffer: bool,
}

impl PcxrWriter<File> {
    /// Creates (or truncates) `path`. `capacity` defaults to `declared_point_count - 1` records.
    pub fn create<P: AsRef<Path>>(
        path: P,
        header: &Header,
        capacity: Option<usize>,
    ) -> Result<Self, PcxrError> {
        let file = File::create(path.as_ref())?;
        PcxrWriter::new(file, header, capacity)
    }

    /// Writes `header` followed by an already-encoded record blob in two block transfers,
    /// replacing any existing file. The point count is taken from the blob length.
    pub fn write_point_array<P: AsRef<Path>>(
        path: P,
        header: &Header,
        points: &[u8],
    ) -> Result<Header, PcxrError> {
        let path = path.as_ref();
        let remainder = points.len() % POINT_STRIDE_BYTES;
        if remainder != 0 {
            return Err(PcxrError::TruncatedRecord {
                needed: POINT_STRIDE_BYTES,
                available: remainder,
            });
        }
        let mut header = *header;
        let count = (points.len() / POINT_STRIDE_BYTES) as u32;
        if header.point_count != count {
            debug!(
                "Header declared {} points, blob holds {}",
                header.point_count, count
            );
            header.point_count = count;
        }
        header.offset_to_point_data = HEADER_SIZE as u16;

        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(PcxrError::IoError(e)),
        }
        let mut file = File::create(path)?;
        file.write_all(&encode_header(&header))?;
        file.write_all(points)?;
        file.sync_all()?;

        info!("Wrote {} points to {}", count, path.display());
        Ok(header)
    }
}

impl<W: Write> PcxrWriter<W> {
    pub fn new(mut out: W, header: &Header, capacity: Option<usize>) -> Result<Self, PcxrError> {
        let header = Header {
            offset_to_point_data: HEADER_SIZE as u16,
            ..*header
        };
        validate_header(&header)?;

        let declared = header.point_count as u64;
        let capacity = capacity
            .unwrap_or(declared.saturating_sub(1) as usize)
            .max(1);
        let spill = declared % capacity as u64;
        let use_buffer = declared > capacity as u64;
        let staged = if use_buffer { capacity } else { 1 };
        let buffer = vec![0u8; staged * POINT_STRIDE_BYTES];

        out.write_all(&encode_header(&header))?;
        debug!(
            "Writer ready: {} points, batch {}, spill {}, buffered {}",
            declared, capacity, spill, use_buffer
        );

        Ok(PcxrWriter {
            out,
            header,
            buffer,
            capacity,
            points_written: 0,
            points_buffered: 0,
            flushed_bytes: 0,
            spill,
            use_buffer,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn points_written(&self) -> u64 {
        self.points_written
    }

    pub fn points_buffered(&self) -> usize {
        self.points_buffered
    }

    /// Accepts one record.
    ///
    /// If a write fails the record stays accepted and pending and the error is returned; call
    /// [`PcxrWriter::flush_pending`] to retry instead of resending it. The retry continues after
    /// the bytes that already reached the stream. When a still-pending batch fails again on
    /// entry, `point` is not accepted.
    pub fn write_point(&mut self, point: &Point) -> Result<(), PcxrError> {
        let declared = self.header.point_count as u64;
        if self.points_written + self.points_buffered as u64 >= declared {
            return Err(PcxrError::PointCountExceeded {
                declared: self.header.point_count,
            });
        }
        if self.points_buffered == self.capacity || (!self.use_buffer && self.points_buffered > 0)
        {
            self.flush_pending()?;
        }

        if self.use_buffer && self.points_written == declared - self.spill {
            debug!("Switching to unbuffered writes for {} points", self.spill);
            self.use_buffer = false;
        }

        let at = self.points_buffered * POINT_STRIDE_BYTES;
        encode_point_into(point, &mut self.buffer[at..]);
        self.points_buffered += 1;
        if !self.use_buffer || self.points_buffered == self.capacity {
            self.flush_pending()?;
        }
        Ok(())
    }

    /// Writes whatever is staged. A no-op when nothing is pending.
    pub fn flush_pending(&mut self) -> Result<(), PcxrError> {
        if self.points_buffered == 0 {
            return Ok(());
        }
        let len = self.points_buffered * POINT_STRIDE_BYTES;
        while self.flushed_bytes < len {
            match self.out.write(&self.buffer[self.flushed_bytes..len]) {
                Ok(0) => {
                    return Err(PcxrError::IoError(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "stream accepted no bytes",
                    )))
                }
                Ok(n) => self.flushed_bytes += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(
                        "Flush stopped after {} of {} bytes",
                        self.flushed_bytes, len
                    );
                    return Err(PcxrError::IoError(e));
                }
            }
        }
        self.points_written += self.points_buffered as u64;
        if self.points_buffered > 1 {
            debug!(
                "Flushed {} points ({} of {})",
                self.points_buffered, self.points_written, self.header.point_count
            );
        }
        self.points_buffered = 0;
        self.flushed_bytes = 0;
        Ok(())
    }

    /// Flushes everything and hands back the underlying stream.
    pub fn finish(mut self) -> Result<W, PcxrError> {
        self.flush_pending()?;
        self.out.flush()?;
        if self.points_written != self.header.point_count as u64 {
            warn!(
                "Writer closed after {} of {} declared points",
                self.points_written, self.header.point_count
            );
        }
        Ok(self.out)
    }

    pub fn close(self) -> Result<(), PcxrError> {
        self.finish().map(drop)
    }
}
