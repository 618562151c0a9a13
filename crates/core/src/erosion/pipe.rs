//! Pipe-model (shallow water) hydraulic erosion
//!
//! Heights are scaled to model meters for the duration of the solve, water
//! is routed through virtual pipes between neighboring cells and sediment is
//! dissolved, deposited and advected with the water velocity.
//!
//! Percent settings are remapped onto the physical constants below. Only the
//! end points are meaningful: 0% disables a process, 100% reaches the tuned
//! maximum.

use std::time::Instant;

use tracing::{debug, info};

use super::{output_name, wrap_flags, SolverContext};
use crate::error::Result;
use crate::field::ops::scale_offset_in_place;
use crate::field::{DoubleBuffer, Field, TextureManager};
use crate::heightmap::{source_map, store_result, ErosionTarget, MapId};
use crate::settings::{ErosionSettings, Neighborhood};
use crate::solver::{PipeJob, PipeParams, PipeState, PipeStep};

/// Default name of pipe-model results
pub const RESULT_NAME: &str = "Mei 1";

/// Time step at a subdivision of 1
pub const DT_SCALE: f32 = 0.5;
/// Rain rate at 100%
pub const RAIN_MAX: f32 = 1.0;
/// Evaporated fraction per iteration at 100%
pub const EVAPORATION_MAX: f32 = 0.5;
/// Capacity constant at 100%
pub const CAPACITY_MAX: f32 = 1.0;
/// Dissolving constant at 100%
pub const EROSION_MAX: f32 = 0.5;
/// Deposition constant at 100%
pub const DEPOSITION_MAX: f32 = 1.0;

/// Iterations between neighborhood flips in `both` mode
pub const FLIP_PERIOD: u32 = 64;

/// Rain per unit time for a rain percentage
///
/// Eases in below 100% and grows linearly above it.
pub fn rain_rate(percent: f32) -> f32 {
    let p = (percent / 100.0).max(0.0);
    let low = p.min(1.0);
    RAIN_MAX * (1.0 - (1.0 - low * low).powi(4)) * p.max(1.0)
}

/// Time step for a subdivision factor
pub fn time_step(subdivision: f32) -> f32 {
    DT_SCALE / subdivision.max(1.0)
}

/// Kernel parameters for a `width`x`height` run
pub fn pipe_params(settings: &ErosionSettings, width: u32, height: u32, seed: u32) -> PipeParams {
    let p = &settings.pipe;
    let (wrap_x, wrap_y) = wrap_flags(settings.tiling);
    PipeParams {
        width,
        height,
        wrap_x,
        wrap_y,
        dt: time_step(p.time_subdivision),
        rain: rain_rate(p.rain),
        evaporation: (EVAPORATION_MAX * p.evaporation / 100.0).clamp(0.0, 1.0),
        gravity: p.gravity,
        lx: p.pipe_length.0,
        ly: p.pipe_length.1,
        kc: CAPACITY_MAX * p.capacity / 100.0,
        ks: EROSION_MAX * p.erosion / 100.0,
        kd: DEPOSITION_MAX * p.deposition / 100.0,
        min_alpha: p.min_alpha,
        random_rain: u32::from(p.random_rain),
        seed,
        invert_hardness: u32::from(settings.invert_hardness),
        ..Default::default()
    }
}

/// Iteration schedule for a neighborhood
///
/// `Both` flips every [`FLIP_PERIOD`] iterations and erases the flux on
/// each flip, since pipe slots change meaning.
pub fn schedule(neighborhood: Neighborhood, iterations: u32) -> Vec<PipeStep> {
    let diagonal_at = |i: u32| match neighborhood {
        Neighborhood::Cardinal => false,
        Neighborhood::Diagonal => true,
        Neighborhood::Both => (i / FLIP_PERIOD) % 2 == 1,
    };
    (0..iterations)
        .map(|i| PipeStep {
            diagonal: diagonal_at(i),
            erase_flux: i > 0 && diagonal_at(i) != diagonal_at(i - 1),
        })
        .collect()
}

/// Fresh simulation state over `height`
pub fn new_state(manager: &TextureManager, height: Field, color: Option<Field>) -> Result<PipeState> {
    let (w, h) = height.size();
    let color = match color {
        Some(field) => {
            let scratch = manager.clone_field(&field)?;
            Some(DoubleBuffer::new(field, scratch))
        }
        None => None,
    };
    Ok(PipeState {
        flux: manager.create(w, h, 4)?,
        velocity: manager.create(w, h, 2)?,
        water: manager.create(w, h, 1)?,
        sediment: DoubleBuffer::new(manager.create(w, h, 1)?, manager.create(w, h, 1)?),
        mean_depth: manager.create(w, h, 1)?,
        capacity: manager.create(w, h, 1)?,
        height,
        color,
    })
}

/// Erode the target's Source with the pipe model and store the Result
pub fn erode(ctx: &mut SolverContext<'_>, target: &mut dyn ErosionTarget) -> Result<MapId> {
    ctx.require_base(target)?;
    let settings = target.settings().clone();
    let started = Instant::now();
    info!(target = target.name(), "Starting pipe-model erosion");

    let mut height = ctx.manager.clone_field(&source_map(ctx.cache, target)?.field)?;
    let (width, rows) = height.size();
    let model_scale = settings.pipe.model_scale.max(f32::EPSILON);
    scale_offset_in_place(&mut height, model_scale, 0.0);

    let water_source = ctx.optional_gray(
        "Water source",
        settings.pipe.water_source_image.as_deref(),
        width,
        rows,
    )?;
    let hardness = ctx.optional_gray("Hardness", settings.hardness_image.as_deref(), width, rows)?;
    let mut state = new_state(ctx.manager, height, None)?;

    let mut params = pipe_params(&settings, width, rows, ctx.seed);
    params.use_source = u32::from(water_source.is_some());
    params.use_hardness = u32::from(hardness.is_some());
    let steps = schedule(settings.pipe.neighborhood, settings.pipe.iterations);
    debug!(
        iterations = steps.len(),
        dt = params.dt,
        rain = params.rain,
        "Pipe schedule"
    );

    ctx.backend.run_pipe(PipeJob {
        params,
        state: &mut state,
        water_source: water_source.as_ref(),
        hardness: hardness.as_ref(),
        schedule: &steps,
    })?;

    let inverse = 1.0 / model_scale;
    let PipeState {
        mut height,
        mut water,
        sediment,
        ..
    } = state;
    scale_offset_in_place(&mut height, inverse, 0.0);
    if settings.pipe.output_water {
        scale_offset_in_place(&mut water, inverse, 0.0);
        ctx.write_image(&water, &output_name(target, "Water"))?;
    }
    if settings.pipe.output_sediment {
        let mut sediment = sediment.into_current();
        scale_offset_in_place(&mut sediment, inverse, 0.0);
        ctx.write_image(&sediment, &output_name(target, "Sediment"))?;
    }

    let id = store_result(ctx.cache, target, RESULT_NAME, height, false)?;
    ctx.report_time("Pipe-model erosion", started);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rain_remap_end_points() {
        assert_eq!(rain_rate(0.0), 0.0);
        assert_relative_eq!(rain_rate(100.0), RAIN_MAX);
        assert_relative_eq!(rain_rate(200.0), 2.0 * RAIN_MAX);
        assert!(rain_rate(50.0) > 0.0 && rain_rate(50.0) < RAIN_MAX);
    }

    #[test]
    fn test_default_time_step() {
        assert_relative_eq!(time_step(3.25), 0.5 / 3.25);
    }

    #[test]
    fn test_zero_percent_disables() {
        let mut settings = ErosionSettings::default();
        settings.pipe.erosion = 0.0;
        settings.pipe.deposition = 0.0;
        settings.pipe.evaporation = 0.0;
        let p = pipe_params(&settings, 8, 8, 0);
        assert_eq!(p.ks, 0.0);
        assert_eq!(p.kd, 0.0);
        assert_eq!(p.evaporation, 0.0);
    }

    #[test]
    fn test_both_schedule_flips_every_period() {
        let steps = schedule(Neighborhood::Both, 200);
        assert!(!steps[0].diagonal && !steps[0].erase_flux);
        assert!(!steps[63].diagonal);
        assert!(steps[64].diagonal && steps[64].erase_flux);
        assert!(!steps[65].erase_flux);
        assert!(!steps[128].diagonal && steps[128].erase_flux);
        assert_eq!(steps.iter().filter(|s| s.erase_flux).count(), 3);

        let fixed = schedule(Neighborhood::Diagonal, 100);
        assert!(fixed.iter().all(|s| s.diagonal && !s.erase_flux));
    }
}
