//! Heightmap generation, caching and the Base/Source/Result lifecycle

pub mod cache;
pub mod pipeline;
pub mod raster;
pub mod target;

pub use cache::{Heightmap, MapCache, MapId};
pub use pipeline::{
    commit_result_as_source, displacement, increment_layer, prepare_base, recalculate_base,
    result_or_source, scaled_difference, source_map, store_result, BASE_MAP_NAME,
};
pub use raster::{rasterize, Bounds, Surface};
pub use target::{ErosionTarget, ImageTarget, MapSlots, SurfaceTarget};
