//! Color transport
//!
//! Moves the colors of a texture the way water would move sediment over
//! the latest heightmap. The particle solver smears colors along droplet
//! paths into streaks; the pipe solver advects them with shallow water into
//! softer blotches.

use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info};

use super::pipe::{new_state, pipe_params, schedule};
use super::{output_name, wrap_flags, SolverContext};
use crate::error::Result;
use crate::field::ops::scale_offset_in_place;
use crate::field::Field;
use crate::heightmap::{result_or_source, ErosionTarget};
use crate::settings::{ColorSolver, ErosionSettings};
use crate::solver::{DropletJob, DropletParams, PipeJob, DROPLET_COLOR};

/// Side of the square spawn tile of one color lane, in pixels
pub const SQUARE_SIZE: u32 = 4;

/// Lower bound of drag and pickup so droplets always move and pick up
const MIN_FACTOR: f32 = 0.01;

/// Droplet parameters of the particle color solver
pub fn color_params(settings: &ErosionSettings, width: u32, height: u32, seed: u32) -> DropletParams {
    let acceleration = settings.particle.acceleration / 100.0;
    let (wrap_x, wrap_y) = wrap_flags(settings.tiling);
    DropletParams {
        width,
        height,
        wrap_x,
        wrap_y,
        lanes_x: width.div_ceil(SQUARE_SIZE),
        lanes_y: height.div_ceil(SQUARE_SIZE),
        rounds: settings.color.iterations,
        lifetime: settings.particle.lifetime,
        seed,
        mode: DROPLET_COLOR,
        acceleration,
        lateral: 1.0,
        drag: (1.0 - settings.color.detail / 100.0).max(MIN_FACTOR),
        max_velocity: super::particle::MAX_VELOCITY,
        slope_scale: width as f32 / 2.0,
        strength: settings.color.mixing / 100.0,
        pickup: acceleration.max(MIN_FACTOR),
        ..Default::default()
    }
}

/// `original + (moved - original) * mixing`, per channel
fn mix_into(original: &Field, moved: &mut Field, mixing: f32) {
    moved
        .as_mut_slice()
        .par_iter_mut()
        .zip(original.as_slice().par_iter())
        .for_each(|(m, &o)| *m = o + (*m - o) * mixing);
}

/// Transport the target's color image and write `HYD_<target>_Color`
///
/// # Errors
///
/// `ExternalAssetMissing` when the color image is not set or not found.
pub fn simulate(ctx: &mut SolverContext<'_>, target: &mut dyn ErosionTarget) -> Result<String> {
    ctx.require_base(target)?;
    let settings = target.settings().clone();
    let started = Instant::now();
    info!(target = target.name(), solver = ?settings.color.solver, "Starting color transport");

    let mut height = ctx.manager.clone_field(&result_or_source(ctx.cache, target)?.field)?;
    let (w, h) = height.size();
    let mut color = ctx.auxiliary_rgba(settings.color.color_image.as_deref(), w, h)?;
    let seed = ctx.seed;

    match settings.color.solver {
        ColorSolver::Particle => {
            let params = color_params(&settings, w, h, seed);
            debug!(lanes = params.lane_count(), rounds = params.rounds, "Color droplets");
            ctx.backend.run_droplets(DropletJob {
                params,
                height: &mut height,
                hardness: None,
                sediment: None,
                depth: None,
                color: Some(&mut color),
                flow: None,
            })?;
        }
        ColorSolver::Pipe => {
            let model_scale = settings.pipe.model_scale.max(f32::EPSILON);
            scale_offset_in_place(&mut height, model_scale, 0.0);
            let original = ctx.manager.clone_field(&color)?;
            let mut state = new_state(ctx.manager, height, Some(color))?;

            let mut params = pipe_params(&settings, w, h, seed);
            params.ks = 0.0;
            params.kd = 0.0;
            params.advect_color = 1;
            let steps = schedule(settings.pipe.neighborhood, settings.pipe.iterations);
            ctx.backend.run_pipe(PipeJob {
                params,
                state: &mut state,
                water_source: None,
                hardness: None,
                schedule: &steps,
            })?;

            let mut moved = match state.color {
                Some(buffers) => buffers.into_current(),
                None => ctx.manager.clone_field(&original)?,
            };
            mix_into(&original, &mut moved, settings.color.mixing / 100.0);
            color = moved;
        }
    }

    let name = output_name(target, "Color");
    ctx.write_image(&color, &name)?;
    ctx.report_time("Color transport", started);
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_use_small_square_lanes() {
        let settings = ErosionSettings::default();
        let p = color_params(&settings, 64, 30, 0);
        assert_eq!((p.lanes_x, p.lanes_y), (16, 8));
        assert!((p.strength - 0.5).abs() < 1e-6);
        assert!((p.drag - 0.5).abs() < 1e-6);
        assert!((p.pickup - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_full_detail_keeps_minimum_drag() {
        let mut settings = ErosionSettings::default();
        settings.color.detail = 100.0;
        settings.particle.acceleration = 0.0;
        let p = color_params(&settings, 8, 8, 0);
        assert!((p.drag - MIN_FACTOR).abs() < 1e-6);
        assert!((p.pickup - MIN_FACTOR).abs() < 1e-6);
    }
}
