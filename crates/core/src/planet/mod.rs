//! Planet (equirectangular) support
//!
//! Equirectangular pixels shrink toward the poles, so grid solvers that
//! assume uniform spacing become anisotropic there. Thermal erosion runs on
//! a cube atlas instead; flow maps are accumulated twice, once on a
//! pole-swapped copy of the map.

pub mod cube;
pub mod remap;

pub use cube::{face_uv_to_cube, CubeAtlas, CubeFace};
pub use remap::{atlas_to_equirect, equirect_to_atlas, pole_swap, rotate_equirect};
