//! CPU compute backend
//!
//! Rayon-parallel kernels. Always compiled, and the reference the GPU
//! backend is checked against. Droplet runs are deterministic per seed.

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::Result;
use crate::field::Field;

use super::droplet::run_droplets;
use super::lattice::{Lattice, NeighborTable};
use super::params::{DropletJob, PipeJob, RelaxJob, RelaxStep};
use super::pipe::run_pipe;
use super::relax::{grant, post_requests};
use super::ComputeBackend;

/// CPU backend using Rayon's parallel iterators
pub struct CpuBackend {
    name: String,
}

impl CpuBackend {
    /// Create a CPU backend on the global Rayon pool
    #[must_use]
    pub fn new() -> Self {
        Self {
            name: format!("CPU ({} threads)", rayon::current_num_threads()),
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_gpu_accelerated(&self) -> bool {
        false
    }

    fn run_droplets(&mut self, mut job: DropletJob<'_>) -> Result<()> {
        run_droplets(&mut job);
        Ok(())
    }

    fn relax(&mut self, job: RelaxJob<'_>) -> Result<()> {
        let cells = job.topology.cell_count();
        let mut requests = vec![0.0f32; cells * 4];
        // Materialized tables are only needed off the regular grid
        let mut tables: FxHashMap<RelaxStep, NeighborTable> = FxHashMap::default();
        let offset = if job.params.use_offset != 0 {
            job.offset.map(Field::as_slice)
        } else {
            None
        };

        for step in job.schedule {
            let grid;
            let lattice: &dyn Lattice = if let Some(g) = job.topology.grid(step.diagonal, step.stride) {
                grid = g;
                &grid
            } else {
                tables.entry(*step).or_insert_with(|| {
                    debug!(
                        "Building neighbor table (diagonal: {}, stride: {})",
                        step.diagonal, step.stride
                    );
                    job.topology.table(step.diagonal, step.stride)
                })
            };

            {
                let (current, next) = job.material.pair_mut();
                post_requests(current.as_slice(), offset, lattice, &job.params, &mut requests);
                grant(current.as_slice(), &requests, lattice, next.as_mut_slice());
            }
            job.material.swap();
        }
        Ok(())
    }

    fn run_pipe(&mut self, mut job: PipeJob<'_>) -> Result<()> {
        run_pipe(&mut job);
        Ok(())
    }
}
