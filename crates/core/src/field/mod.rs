//! Field storage and the texture resource manager
//!
//! Every grid the engine touches is a [`Field`]. Fields are allocated,
//! copied and resampled by the [`TextureManager`], which also enforces the
//! optional memory budget.

mod data;
mod double_buffer;
mod manager;
pub mod ops;
pub mod sampling;

pub use data::Field;
pub use double_buffer::DoubleBuffer;
pub use manager::TextureManager;
pub use sampling::{Footprint, Tiling};
