//! Hydra Terrain Erosion Core Library
//!
//! Heightmap erosion on 2D height fields: particle (droplet) and pipe-model
//! hydraulic erosion, thermal erosion, snow accumulation, flow maps and
//! color transport. Planets are simulated on equirectangular maps with a
//! cube-atlas remap where polar distortion matters.
//!
//! ## Layout
//!
//! - [`EngineContext`] owns the backend, texture manager, map cache, image
//!   library and pending messages. Every operation goes through it.
//! - Targets ([`SurfaceTarget`], [`ImageTarget`]) carry settings and the
//!   Base/Source/Result map slots.
//! - Kernels run on a [`ComputeBackend`]: wgpu compute shaders with the
//!   `gpu` feature, or a rayon CPU fallback.

// Engine configuration and state
pub mod config;
pub mod engine;
pub mod error;
pub mod messages;
pub mod settings;

// Data
pub mod field;
pub mod heightmap;
pub mod image;
pub mod planet;

// Simulation
pub mod erosion;
pub mod solver;

// Re-export engine types
pub use config::{BackendPreference, EngineConfig};
pub use engine::EngineContext;
pub use error::{ErosionError, Result};
pub use messages::{MessageLog, Report};
pub use settings::ErosionSettings;

// Re-export data types
pub use field::{DoubleBuffer, Field, TextureManager, Tiling};
pub use heightmap::{ErosionTarget, ImageTarget, MapCache, MapId, Surface, SurfaceTarget};
pub use image::{ColorSpace, ExternalImage, ImageLibrary, ImageSink};

// Re-export backends
pub use solver::{create_backend, ComputeBackend, CpuBackend};
