//! Kernel parameter blocks and job descriptions
//!
//! Parameter structs are `#[repr(C)]` and, with the `gpu` feature, `Pod` so
//! they can be uploaded as uniforms unchanged. Their layouts must match the
//! WGSL structs in `shaders/`.

use crate::field::{DoubleBuffer, Field, Tiling};

use super::lattice::Topology;

#[cfg(feature = "gpu")]
use bytemuck::{Pod, Zeroable};

/// Droplet kernel mode: erode terrain
pub const DROPLET_ERODE: u32 = 0;
/// Droplet kernel mode: accumulate pass-through counts
pub const DROPLET_FLOW: u32 = 1;
/// Droplet kernel mode: smear colors along paths
pub const DROPLET_COLOR: u32 = 2;

/// Parameters of the droplet integrator
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "gpu", derive(Pod, Zeroable))]
pub struct DropletParams {
    pub width: u32,
    pub height: u32,
    pub wrap_x: u32,
    pub wrap_y: u32,

    /// Lanes along each axis; lane tiles split the grid evenly
    pub lanes_x: u32,
    pub lanes_y: u32,

    /// Droplets per lane
    pub rounds: u32,
    /// Maximum steps per droplet
    pub lifetime: u32,
    pub seed: u32,
    /// One of `DROPLET_ERODE`, `DROPLET_FLOW`, `DROPLET_COLOR`
    pub mode: u32,

    pub acceleration: f32,
    /// Scale of the acceleration component perpendicular to the velocity
    pub lateral: f32,
    /// Velocity multiplier per step
    pub drag: f32,
    /// Speed limit in pixels per step
    pub max_velocity: f32,

    pub erosion: f32,
    pub deposition: f32,
    pub capacity: f32,
    /// Per-step height exchange limit
    pub max_change: f32,

    /// Converts per-pixel gradients into physical slopes
    pub slope_scale: f32,
    /// Flow: count added per visit. Color: blend weight per visit.
    pub strength: f32,
    /// Color: fraction of the cell color picked up per step
    pub pickup: f32,
    pub use_hardness: u32,

    pub invert_hardness: u32,
    /// Carry colors while eroding
    pub use_color: u32,
    /// First round of the current dispatch
    pub round_offset: u32,
    pub _pad: [u32; 3],
}

impl DropletParams {
    /// Tiling equivalent of the wrap flags
    pub fn tiling(&self) -> Tiling {
        match (self.wrap_x != 0, self.wrap_y != 0) {
            (false, false) => Tiling::None,
            (true, false) => Tiling::X,
            (false, true) => Tiling::Y,
            (true, true) => Tiling::Xy,
        }
    }

    /// Total lanes
    pub fn lane_count(&self) -> u32 {
        self.lanes_x * self.lanes_y
    }
}

/// Parameters of one request/grant relaxation
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "gpu", derive(Pod, Zeroable))]
pub struct RelaxParams {
    /// Fraction of the largest excess moved per iteration, halved
    pub ks: f32,
    /// Tangent of the critical angle
    pub tan_angle: f32,
    /// Measure slopes on `offset + material`
    pub use_offset: u32,
    /// Cap outflow at the material present in the cell
    pub limit_to_material: u32,
}

/// Parameters of the pipe-model stages
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "gpu", derive(Pod, Zeroable))]
pub struct PipeParams {
    pub width: u32,
    pub height: u32,
    pub wrap_x: u32,
    pub wrap_y: u32,

    pub dt: f32,
    pub rain: f32,
    pub evaporation: f32,
    pub gravity: f32,

    pub lx: f32,
    pub ly: f32,
    /// Sediment capacity constant
    pub kc: f32,
    /// Dissolving constant
    pub ks: f32,

    /// Deposition constant
    pub kd: f32,
    pub min_alpha: f32,
    pub random_rain: u32,
    pub seed: u32,

    pub use_source: u32,
    pub use_hardness: u32,
    pub invert_hardness: u32,
    pub advect_color: u32,

    /// Current iteration, drives random rain
    pub iteration: u32,
    /// Active neighborhood, 1 for diagonal
    pub diagonal: u32,
    pub _pad: [u32; 2],
}

impl PipeParams {
    /// Tiling equivalent of the wrap flags
    pub fn tiling(&self) -> Tiling {
        match (self.wrap_x != 0, self.wrap_y != 0) {
            (false, false) => Tiling::None,
            (true, false) => Tiling::X,
            (false, true) => Tiling::Y,
            (true, true) => Tiling::Xy,
        }
    }
}

/// Droplet run over a height field
pub struct DropletJob<'a> {
    pub params: DropletParams,
    /// Eroded in place in erode mode, read-only otherwise
    pub height: &'a mut Field,
    /// Single-channel hardness at the grid resolution
    pub hardness: Option<&'a Field>,
    /// Accumulated deposition
    pub sediment: Option<&'a mut Field>,
    /// Accumulated erosion
    pub depth: Option<&'a mut Field>,
    /// RGBA colors, transported in place
    pub color: Option<&'a mut Field>,
    /// Pass-through counts in flow mode
    pub flow: Option<&'a mut Field>,
}

/// One iteration of a relaxation schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelaxStep {
    pub diagonal: bool,
    pub stride: u32,
}

/// Request/grant relaxation of a material layer
pub struct RelaxJob<'a> {
    pub params: RelaxParams,
    /// Material being moved
    pub material: &'a mut DoubleBuffer<Field>,
    /// Static terrain under the material
    pub offset: Option<&'a Field>,
    pub topology: Topology,
    pub schedule: &'a [RelaxStep],
}

/// One iteration of a pipe-model schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeStep {
    pub diagonal: bool,
    /// Zero the flux before this iteration
    pub erase_flux: bool,
}

/// Persistent pipe-model state
pub struct PipeState {
    /// Terrain height in model units
    pub height: Field,
    /// Outflow per slot, 4 channels
    pub flux: Field,
    /// Velocity, 2 channels
    pub velocity: Field,
    /// Water depth
    pub water: Field,
    pub sediment: DoubleBuffer<Field>,
    /// Mean of the water depth before and after the flux update
    pub mean_depth: Field,
    /// Transport capacity scratch
    pub capacity: Field,
    /// RGBA colors advected with the water
    pub color: Option<DoubleBuffer<Field>>,
}

/// Pipe-model run
pub struct PipeJob<'a> {
    pub params: PipeParams,
    pub state: &'a mut PipeState,
    /// Per-cell rain multiplier
    pub water_source: Option<&'a Field>,
    pub hardness: Option<&'a Field>,
    pub schedule: &'a [PipeStep],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_sizes_are_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<DropletParams>() % 16, 0);
        assert_eq!(std::mem::size_of::<RelaxParams>() % 16, 0);
        assert_eq!(std::mem::size_of::<PipeParams>() % 16, 0);
    }

    #[test]
    fn test_tiling_from_flags() {
        let params = DropletParams {
            wrap_x: 1,
            ..Default::default()
        };
        assert_eq!(params.tiling(), Tiling::X);
    }
}
