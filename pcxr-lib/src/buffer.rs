use crate::error::PcxrError;
use crate::structures::POINT_STRIDE;

/// Fixed-capacity store the kernels run against.
///
/// Offsets and lengths are in floats. Record indices are only stable between compactions.
pub trait ResidentBuffer {
    /// Capacity in floats.
    fn capacity(&self) -> usize;

    /// Floats per record.
    fn stride(&self) -> usize;

    fn write(&mut self, offset: usize, data: &[f32]) -> Result<(), PcxrError>;

    fn read_back(&self) -> Vec<f32>;

    fn point_count(&self) -> usize {
        self.capacity() / self.stride()
    }
}

/// Host-memory resident buffer backing the sequential kernels.
#[derive(Debug, Clone, PartialEq)]
pub struct HostBuffer {
    data: Vec<f32>,
}

impl HostBuffer {
    pub fn new(point_count: usize) -> Self {
        HostBuffer {
            data: vec![0.0; point_count * POINT_STRIDE],
        }
    }

    pub fn records(&self) -> &[f32] {
        &self.data
    }

    pub fn records_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

impl ResidentBuffer for HostBuffer {
    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn stride(&self) -> usize {
        POINT_STRIDE
    }

    fn write(&mut self, offset: usize, data: &[f32]) -> Result<(), PcxrError> {
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= self.data.len())
            .ok_or(PcxrError::BufferOverflow {
                offset,
                len: data.len(),
                capacity: self.data.len(),
            })?;
        self.data[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn read_back(&self) -> Vec<f32> {
        self.data.clone()
    }
}
