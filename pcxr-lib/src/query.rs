//! Nearest-point queries staged through compaction, position extraction, distance and
//! tree-reduction kernels.
//!
//! Queries read the resident buffer synchronously. They must not overlap an upload or an
//! edit pass on the same buffer; the borrow held by [`NearestPointQuery`] enforces this for
//! in-process callers, device backends rely on caller-side sequencing.

use crate::buffer::ResidentBuffer;
use crate::error::PcxrError;
use crate::kernels::{Nearest, NearestPointKernels, ReducePlan, RecordFilter};
use log::debug;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryScope {
    All,
    Selected,
}

pub struct NearestPointQuery<'a, B, K> {
    buffer: &'a B,
    kernels: &'a K,
    threads_per_group: usize,
}

impl<'a, B, K> NearestPointQuery<'a, B, K>
where
    B: ResidentBuffer,
    K: NearestPointKernels<B>,
{
    pub fn new(buffer: &'a B, kernels: &'a K, threads_per_group: usize) -> Self {
        NearestPointQuery {
            buffer,
            kernels,
            threads_per_group: threads_per_group.max(1),
        }
    }

    /// Closest record to `from`. All intermediate buffers are dropped before returning.
    pub fn find(&self, from: [f32; 3], scope: QueryScope) -> Result<Nearest, PcxrError> {
        let start = Instant::now();

        let positions = match scope {
            QueryScope::All => {
                let population = self.buffer.point_count();
                if population == 0 {
                    return Err(PcxrError::DegeneratePopulation { population });
                }
                self.kernels.extract(self.buffer)
            }
            QueryScope::Selected => {
                let compacted = self.kernels.compact(self.buffer, RecordFilter::Selected);
                debug!("{} selected points", compacted.count);
                if compacted.count == 0 {
                    return Err(PcxrError::DegeneratePopulation { population: 0 });
                }
                self.kernels.extract_compacted(&compacted)
            }
        };
        let population = positions.len();
        if population == 0 {
            return Err(PcxrError::DegeneratePopulation { population });
        }

        let distances = self.kernels.distances(from, &positions);
        if population == 1 {
            return Ok(Nearest {
                position: positions[0].position,
                id: positions[0].id,
                distance: distances
                    .first()
                    .map(|d| d.distance)
                    .unwrap_or_else(|| crate::common::distance(from, positions[0].position)),
            });
        }

        let plan = ReducePlan::new(population, self.threads_per_group);
        let candidates = self.kernels.reduce(&distances, &plan);
        let nearest = self
            .kernels
            .resolve(&candidates, &positions)
            .ok_or(PcxrError::DegeneratePopulation { population })?;

        debug!(
            "Nearest point {} at {:?} over {} points in {} groups ({} us)",
            nearest.id,
            nearest.position,
            population,
            plan.groups,
            start.elapsed().as_micros()
        );
        Ok(nearest)
    }

    /// Approximate extents from six queries at `±far` along each axis.
    pub fn estimate_bounds(
        &self,
        far: f32,
        scope: QueryScope,
    ) -> Result<([f32; 3], [f32; 3]), PcxrError> {
        let mut min = [0.0f32; 3];
        let mut max = [0.0f32; 3];
        for axis in 0..3 {
            let mut target = [0.0f32; 3];
            target[axis] = far;
            max[axis] = self.find(target, scope)?.position[axis];
            target[axis] = -far;
            min[axis] = self.find(target, scope)?.position[axis];
        }
        Ok((min, max))
    }
}
