//! Per-target simulation settings
//!
//! One flat record per solver family, all percentage-style where the host UI
//! exposes them that way. Settings are read-only during a solver call; the
//! host is responsible for clamping to the documented ranges.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::field::Tiling;

/// Post-multiply applied to rasterized mesh heights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    /// Raw normalized-device depth in `[0, 1]`
    Normalized,
    /// Proportional to the object's world-space z scale
    World,
    /// Proportional to the surface width (true slope angles)
    Local,
    /// User height scale from the settings
    #[default]
    AsStored,
}

/// Neighbor set used by grid solvers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Neighborhood {
    /// Four axis-aligned neighbors
    Cardinal,
    /// Four diagonal neighbors
    Diagonal,
    /// Alternate between the two
    #[default]
    Both,
}

/// What the snow solver produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnowOutput {
    /// Snow depth image and snow-covered result heightmap
    #[default]
    Both,
    /// Snow depth image only
    Texture,
    /// Snow-covered result heightmap only
    Displacement,
}

/// Solver used for color transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSolver {
    /// Droplets paint streaks along their paths
    #[default]
    Particle,
    /// Shallow water advects colors into even blotches
    Pipe,
}

/// Particle (droplet) erosion settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleSettings {
    /// Droplet rounds per lane, multiplied by the particle multiplier
    pub iterations: u32,
    /// Maximum steps per droplet
    pub lifetime: u32,
    /// Downhill acceleration, percent
    pub acceleration: f32,
    /// Turning toward steepest descent, percent
    pub lateral_acceleration: f32,
    /// Velocity loss per step, percent
    pub drag: f32,
    /// Erosion strength, percent
    pub fineness: f32,
    /// Deposition strength, percent
    pub deposition: f32,
    /// Sediment capacity factor, percent
    pub capacity: f32,
    /// Per-step height change limit, percent of 0.01 height units
    pub max_change: f32,
    /// Write accumulated deposition as `HYD_<target>_Sediment`
    pub output_sediment: bool,
    /// Write accumulated erosion as `HYD_<target>_Depth`
    pub output_depth: bool,
    /// Transport the color image along with sediment into `HYD_<target>_Color`
    pub output_color: bool,
}

impl Default for ParticleSettings {
    fn default() -> Self {
        Self {
            iterations: 50,
            lifetime: 25,
            acceleration: 50.0,
            lateral_acceleration: 100.0,
            drag: 25.0,
            fineness: 10.0,
            deposition: 75.0,
            capacity: 25.0,
            max_change: 100.0,
            output_sediment: false,
            output_depth: false,
            output_color: false,
        }
    }
}

/// Pipe-model (shallow water) erosion settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipeSettings {
    /// Solver iterations
    pub iterations: u32,
    /// Time step subdivision (1-7); larger values take smaller steps
    pub time_subdivision: f32,
    /// Rainfall, percent (0-500)
    pub rain: f32,
    /// Evaporation per iteration, percent
    pub evaporation: f32,
    /// Sediment capacity, percent
    pub capacity: f32,
    /// Deposition rate, percent
    pub deposition: f32,
    /// Erosion rate, percent
    pub erosion: f32,
    /// Height of a unit-height terrain in meters during the solve
    pub model_scale: f32,
    /// Virtual pipe lengths `(lx, ly)`
    pub pipe_length: (f32, f32),
    /// Lower bound on the local slope sine
    pub min_alpha: f32,
    /// Gravitational acceleration
    pub gravity: f32,
    /// Pipe directions
    pub neighborhood: Neighborhood,
    /// Optional per-cell rain multiplier image
    pub water_source_image: Option<String>,
    /// Randomize rainfall per cell
    pub random_rain: bool,
    /// Write the final water depth as `HYD_<target>_Water`
    pub output_water: bool,
    /// Write the suspended sediment as `HYD_<target>_Sediment`
    pub output_sediment: bool,
}

impl Default for PipeSettings {
    fn default() -> Self {
        Self {
            iterations: 100,
            time_subdivision: 3.25,
            rain: 50.0,
            evaporation: 30.0,
            capacity: 10.0,
            deposition: 25.0,
            erosion: 25.0,
            model_scale: 200.0,
            pipe_length: (1.0, 1.0),
            min_alpha: 0.001,
            gravity: 9.81,
            neighborhood: Neighborhood::Both,
            water_source_image: None,
            random_rain: false,
            output_water: false,
            output_sediment: false,
        }
    }
}

/// Thermal (angle of repose) erosion settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalSettings {
    /// Request/grant iterations
    pub iterations: u32,
    /// Critical slope angle in radians
    pub max_angle: f32,
    /// Transfer strength, percent (0-200)
    pub strength: f32,
    /// Neighbor set
    pub neighborhood: Neighborhood,
    /// Enable neighbor stride
    pub use_stride: bool,
    /// Initial stride in cells (1-10)
    pub stride: u32,
    /// Halve the stride at checkpoints through the run
    pub stride_gradient: bool,
}

impl Default for ThermalSettings {
    fn default() -> Self {
        Self {
            iterations: 100,
            max_angle: 1.047198,
            strength: 100.0,
            neighborhood: Neighborhood::Both,
            use_stride: false,
            stride: 1,
            stride_gradient: false,
        }
    }
}

/// Snow accumulation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnowSettings {
    /// Snowfall, percent
    pub add: f32,
    /// Relaxation iterations
    pub iterations: u32,
    /// Snow angle of repose in radians
    pub angle: f32,
    /// Produced outputs
    pub output: SnowOutput,
}

impl Default for SnowSettings {
    fn default() -> Self {
        Self {
            add: 50.0,
            iterations: 500,
            angle: 0.663225,
            output: SnowOutput::Both,
        }
    }
}

/// Flow map settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowSettings {
    /// Droplets per lane
    pub iterations: u32,
    /// Contrast of the resulting map, percent
    pub brightness: f32,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            iterations: 200,
            brightness: 50.0,
        }
    }
}

/// Color transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorSettings {
    /// Name of the source color image in the library
    pub color_image: Option<String>,
    /// How strongly carried color blends into cells, percent
    pub mixing: f32,
    /// Detail preservation, percent; higher values shorten streaks
    pub detail: f32,
    /// Droplets per lane for the particle solver
    pub iterations: u32,
    /// Transport model
    pub solver: ColorSolver,
}

impl Default for ColorSettings {
    fn default() -> Self {
        Self {
            color_image: None,
            mixing: 50.0,
            detail: 50.0,
            iterations: 50,
            solver: ColorSolver::Particle,
        }
    }
}

/// All settings attached to one erosion target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErosionSettings {
    /// Heightmap resolution for surface targets (32-4096 per axis)
    pub resolution: (u32, u32),
    /// Boundary handling
    pub tiling: Tiling,
    /// Model y/x aspect used for neighbor distances
    pub scale_ratio: f32,
    /// Simulation resolution relative to the target, percent (10-200)
    pub simulation_scale: f32,
    /// Optional hardness image name
    pub hardness_image: Option<String>,
    /// Treat dark hardness values as hard
    pub invert_hardness: bool,
    /// Mesh height post-multiply
    pub scale_mode: ScaleMode,
    /// User height scale for [`ScaleMode::AsStored`]
    pub height_scale: f32,
    /// Particle erosion
    pub particle: ParticleSettings,
    /// Pipe-model erosion
    pub pipe: PipeSettings,
    /// Thermal erosion
    pub thermal: ThermalSettings,
    /// Snow accumulation
    pub snow: SnowSettings,
    /// Flow map
    pub flow: FlowSettings,
    /// Color transport
    pub color: ColorSettings,
}

impl Default for ErosionSettings {
    fn default() -> Self {
        Self {
            resolution: (1024, 1024),
            tiling: Tiling::None,
            scale_ratio: 1.0,
            simulation_scale: 50.0,
            hardness_image: None,
            invert_hardness: false,
            scale_mode: ScaleMode::AsStored,
            height_scale: 1.0,
            particle: ParticleSettings::default(),
            pipe: PipeSettings::default(),
            thermal: ThermalSettings::default(),
            snow: SnowSettings::default(),
            flow: FlowSettings::default(),
            color: ColorSettings::default(),
        }
    }
}

impl ErosionSettings {
    /// Parse settings from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let settings = ErosionSettings::from_json(
            r#"{ "tiling": "xy", "thermal": { "iterations": 7, "neighborhood": "diagonal" } }"#,
        )
        .unwrap();
        assert_eq!(settings.tiling, Tiling::Xy);
        assert_eq!(settings.thermal.iterations, 7);
        assert_eq!(settings.thermal.neighborhood, Neighborhood::Diagonal);
        assert_eq!(settings.thermal.strength, 100.0);
        assert_eq!(settings.particle, ParticleSettings::default());
    }

    #[test]
    fn test_json_round_trip() {
        let mut settings = ErosionSettings::default();
        settings.hardness_image = Some("rock".into());
        settings.snow.output = SnowOutput::Texture;
        let json = settings.to_json().unwrap();
        assert_eq!(ErosionSettings::from_json(&json).unwrap(), settings);
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = ErosionSettings::from_json("{ tiling: ").unwrap_err();
        assert!(matches!(err, crate::error::ErosionError::Config(_)));
    }
}
