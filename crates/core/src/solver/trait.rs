//! The seam between erosion solvers and the hardware they run on

use crate::error::Result;

use super::params::{DropletJob, PipeJob, RelaxJob};

/// Backend-agnostic interface for the heavy erosion kernels
///
/// Solvers prepare fields on the host and hand them over as jobs. A backend
/// may stage them into device memory, but results are always written back
/// into the job's fields before the call returns.
pub trait ComputeBackend: Send {
    /// Human-readable backend name for logging
    fn name(&self) -> &str;

    /// Check if this is the GPU backend
    ///
    /// # Returns
    ///
    /// `true` if GPU-accelerated, `false` if CPU-only
    fn is_gpu_accelerated(&self) -> bool;

    /// Trace droplets over a height field
    ///
    /// Depending on the job mode this erodes the height in place, counts
    /// pass-through visits, or smears colors along droplet paths.
    fn run_droplets(&mut self, job: DropletJob<'_>) -> Result<()>;

    /// Run a request/grant relaxation schedule
    ///
    /// On return the material's current buffer holds the relaxed layer.
    fn relax(&mut self, job: RelaxJob<'_>) -> Result<()>;

    /// Run a pipe-model schedule on a persistent state
    fn run_pipe(&mut self, job: PipeJob<'_>) -> Result<()>;
}
