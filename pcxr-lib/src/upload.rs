//! Moves a host record array into a resident buffer in bounded transfers, one per step, so
//! the calling thread is never blocked for the whole cloud. There is no cancellation: the
//! buffer is only valid for queries and edits once the upload has reported ready.

use crate::buffer::ResidentBuffer;
use crate::error::PcxrError;
use log::{debug, info};

/// Completion signal of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadReady {
    pub points: usize,
    pub transfers: usize,
}

pub struct ChunkedUpload<'a, B: ResidentBuffer> {
    source: &'a [f32],
    buffer: &'a mut B,
    chunk_len: usize,
    cursor: usize,
    transfers: usize,
}

impl<'a, B: ResidentBuffer> ChunkedUpload<'a, B> {
    /// `chunk_size` is in records. The source must fill the buffer exactly with whole records.
    pub fn new(source: &'a [f32], buffer: &'a mut B, chunk_size: usize) -> Result<Self, PcxrError> {
        if source.len() > buffer.capacity() {
            return Err(PcxrError::BufferOverflow {
                offset: 0,
                len: source.len(),
                capacity: buffer.capacity(),
            });
        }
        if source.len() != buffer.capacity() || source.len() % buffer.stride() != 0 {
            return Err(PcxrError::UploadSizeMismatch {
                len: source.len(),
                capacity: buffer.capacity(),
            });
        }
        let chunk_len = chunk_size.max(1) * buffer.stride();
        Ok(ChunkedUpload {
            source,
            buffer,
            chunk_len,
            cursor: 0,
            transfers: 0,
        })
    }

    pub fn is_ready(&self) -> bool {
        self.cursor >= self.source.len()
    }

    /// Performs at most one transfer. Returns the ready signal on the step that completes
    /// the upload; steps after that transfer nothing and repeat it.
    pub fn step(&mut self) -> Result<Option<UploadReady>, PcxrError> {
        if !self.is_ready() {
            let remaining = self.source.len() - self.cursor;
            let len = remaining.min(self.chunk_len);
            let chunk = &self.source[self.cursor..self.cursor + len];
            self.buffer.write(self.cursor, chunk)?;
            debug!("Uploaded {} floats at offset {}", len, self.cursor);
            self.cursor += len;
            self.transfers += 1;
        }
        if self.is_ready() {
            Ok(Some(UploadReady {
                points: self.source.len() / self.buffer.stride(),
                transfers: self.transfers,
            }))
        } else {
            Ok(None)
        }
    }

    /// Drives every step back to back.
    pub fn run(mut self) -> Result<UploadReady, PcxrError> {
        loop {
            if let Some(ready) = self.step()? {
                info!(
                    "Upload ready: {} points in {} transfers",
                    ready.points, ready.transfers
                );
                return Ok(ready);
            }
        }
    }

    /// Yields to the scheduler between transfers.
    #[cfg(feature = "async")]
    pub async fn run_async(mut self) -> Result<UploadReady, PcxrError> {
        loop {
            if let Some(ready) = self.step()? {
                info!(
                    "Upload ready: {} points in {} transfers",
                    ready.points, ready.transfers
                );
                return Ok(ready);
            }
            tokio::task::yield_now().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::HostBuffer;
    use crate::structures::POINT_STRIDE;

    /// Records every transfer it receives.
    struct RecordingBuffer {
        inner: HostBuffer,
        transfers: Vec<(usize, Vec<f32>)>,
    }

    impl ResidentBuffer for RecordingBuffer {
        fn capacity(&self) -> usize {
            self.inner.capacity()
        }

        fn stride(&self) -> usize {
            self.inner.stride()
        }

        fn write(&mut self, offset: usize, data: &[f32]) -> Result<(), PcxrError> {
            self.transfers.push((offset, data.to_vec()));
            self.inner.write(offset, data)
        }

        fn read_back(&self) -> Vec<f32> {
            self.inner.read_back()
        }
    }

    fn source(points: usize) -> Vec<f32> {
        (0..points * POINT_STRIDE).map(|i| i as f32).collect()
    }

    #[test]
    fn test_chunks_concatenate_to_source() {
        let chunk = 5;
        for points in [0, chunk - 1, chunk, 3 * chunk + 7] {
            let data = source(points);
            let mut buffer = RecordingBuffer {
                inner: HostBuffer::new(points),
                transfers: Vec::new(),
            };
            let ready = ChunkedUpload::new(&data, &mut buffer, chunk)
                .unwrap()
                .run()
                .unwrap();
            assert_eq!(ready.points, points);

            let mut joined = Vec::new();
            for (offset, chunk_data) in &buffer.transfers {
                assert_eq!(*offset, joined.len());
                assert!(chunk_data.len() <= chunk * POINT_STRIDE);
                joined.extend_from_slice(chunk_data);
            }
            assert_eq!(joined, data);
            assert_eq!(buffer.read_back(), data);
            assert_eq!(ready.transfers, buffer.transfers.len());
        }
    }

    #[test]
    fn test_one_transfer_per_step() {
        let data = source(12);
        let mut buffer = HostBuffer::new(12);
        let mut upload = ChunkedUpload::new(&data, &mut buffer, 5).unwrap();
        assert_eq!(upload.step().unwrap(), None);
        assert_eq!(upload.step().unwrap(), None);
        assert_eq!(
            upload.step().unwrap(),
            Some(UploadReady {
                points: 12,
                transfers: 3
            })
        );
        assert!(upload.is_ready());
    }

    #[test]
    fn test_source_larger_than_buffer() {
        let data = source(3);
        let mut buffer = HostBuffer::new(2);
        assert!(matches!(
            ChunkedUpload::new(&data, &mut buffer, 1),
            Err(PcxrError::BufferOverflow { .. })
        ));
    }

    #[test]
    fn test_source_smaller_than_buffer() {
        let data = source(1);
        let mut buffer = HostBuffer::new(3);
        assert!(matches!(
            ChunkedUpload::new(&data, &mut buffer, 1),
            Err(PcxrError::UploadSizeMismatch {
                len: 24,
                capacity: 72
            })
        ));
        // Nothing was transferred, the buffer still holds only zeroed records.
        assert!(buffer.records().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_partial_record_source() {
        let data = vec![1.0f32; POINT_STRIDE + 5];
        let mut buffer = HostBuffer::new(1);
        assert!(matches!(
            ChunkedUpload::new(&data, &mut buffer, 1),
            Err(PcxrError::BufferOverflow { .. })
        ));
        let short = vec![1.0f32; POINT_STRIDE - 5];
        assert!(matches!(
            ChunkedUpload::new(&short, &mut buffer, 1),
            Err(PcxrError::UploadSizeMismatch { .. })
        ));
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_run_async_uploads_everything() {
        let data = source(11);
        let mut buffer = HostBuffer::new(11);
        let ready = ChunkedUpload::new(&data, &mut buffer, 4)
            .unwrap()
            .run_async()
            .await
            .unwrap();
        assert_eq!(ready.transfers, 3);
        assert_eq!(buffer.records(), data.as_slice());
    }
}
