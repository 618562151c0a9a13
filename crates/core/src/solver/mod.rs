//! Compute backends for the erosion kernels
//!
//! Solvers never touch wgpu or rayon directly. They describe a droplet,
//! relaxation or pipe-model job and hand it to a [`ComputeBackend`]. The
//! CPU backend is always compiled; the GPU backend needs the default `gpu`
//! feature (build with `--no-default-features` on machines without drivers).
//!
//! [`create_backend`] honors [`BackendPreference`]: `Cpu` is taken as is,
//! while `Auto` and `Gpu` look for an adapter and quietly settle for the
//! CPU when none comes up.
//!
//! ```rust,ignore
//! let backend = hydra_core::create_backend(BackendPreference::Auto);
//! tracing::info!("eroding on {}", backend.name());
//! ```

mod context;
mod cpu;
pub mod droplet;
pub mod lattice;
pub mod params;
pub mod pipe;
pub mod relax;
#[allow(clippy::module_name_repetitions)]
mod r#trait;

#[cfg(feature = "gpu")]
mod gpu;

pub use context::GpuInitResult;
pub use cpu::CpuBackend;
pub use lattice::{GridLattice, Lattice, Link, NeighborTable, Topology};
pub use params::{
    DropletJob, DropletParams, PipeJob, PipeParams, PipeState, PipeStep, RelaxJob, RelaxParams,
    RelaxStep, DROPLET_COLOR, DROPLET_ERODE, DROPLET_FLOW,
};
pub use r#trait::ComputeBackend;

#[cfg(feature = "gpu")]
pub use context::GpuContext;
#[cfg(feature = "gpu")]
pub use gpu::GpuBackend;

use crate::config::BackendPreference;
use tracing::info;

#[cfg(feature = "gpu")]
use tracing::warn;

/// Create a compute backend according to `preference`
///
/// `Auto` and `Gpu` both try the GPU first. A missing adapter is not an
/// error: the CPU backend is returned instead, with a warning when the GPU
/// was explicitly requested or when an adapter failed to initialize.
pub fn create_backend(preference: BackendPreference) -> Box<dyn ComputeBackend> {
    if preference == BackendPreference::Cpu {
        info!("CPU backend requested");
        return Box::new(CpuBackend::new());
    }

    #[cfg(feature = "gpu")]
    {
        match GpuContext::new() {
            GpuInitResult::Success(gpu_context) => {
                info!("Using GPU backend: {}", gpu_context.adapter_name());
                return Box::new(GpuBackend::new(gpu_context));
            }
            GpuInitResult::NoGpuFound => {
                if preference == BackendPreference::Gpu {
                    warn!("GPU backend requested but no adapter found, using CPU backend");
                } else {
                    info!("No GPU found, using CPU backend");
                }
            }
            GpuInitResult::InitFailed {
                adapter_name,
                error,
            } => {
                warn!(adapter = %adapter_name, "GPU device creation failed, eroding on the CPU: {error}");
            }
        }
    }

    #[cfg(not(feature = "gpu"))]
    info!("GPU feature disabled, using CPU backend");

    Box::new(CpuBackend::new())
}
