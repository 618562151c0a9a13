//! Particle-based hydraulic erosion
//!
//! Droplets are traced over the Source heightmap, optionally at a reduced
//! simulation resolution. In that case only the change is resampled back up
//! and added onto the full-resolution Source, so detail the simulation
//! cannot see is preserved.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::{output_name, wrap_flags, SolverContext, LANE_GRID, PARTICLE_MULTIPLIER};
use crate::error::{ErosionError, Result};
use crate::field::ops::combine_in_place;
use crate::field::Field;
use crate::heightmap::{source_map, store_result, ErosionTarget, MapId};
use crate::settings::ErosionSettings;
use crate::solver::{DropletJob, DropletParams, DROPLET_ERODE};

/// Default name of particle results
pub const RESULT_NAME: &str = "Particle 1";

/// Droplet speed limit in pixels per step
pub const MAX_VELOCITY: f32 = 2.0;

/// Height change per step at 100% max change
const MAX_CHANGE_SCALE: f32 = 0.01;

/// Droplet parameters for a `width`x`height` erosion run
pub fn droplet_params(settings: &ErosionSettings, width: u32, height: u32, seed: u32) -> DropletParams {
    let p = &settings.particle;
    let (wrap_x, wrap_y) = wrap_flags(settings.tiling);
    DropletParams {
        width,
        height,
        wrap_x,
        wrap_y,
        lanes_x: LANE_GRID,
        lanes_y: LANE_GRID,
        rounds: p.iterations * PARTICLE_MULTIPLIER,
        lifetime: p.lifetime,
        seed,
        mode: DROPLET_ERODE,
        acceleration: p.acceleration / 100.0,
        lateral: p.lateral_acceleration / 100.0,
        drag: 1.0 - p.drag / 100.0,
        max_velocity: MAX_VELOCITY,
        erosion: p.fineness / 100.0,
        deposition: p.deposition / 100.0,
        capacity: p.capacity / 100.0,
        max_change: p.max_change / 100.0 * MAX_CHANGE_SCALE,
        // The grid width spans 2 height units
        slope_scale: width as f32 / 2.0,
        invert_hardness: u32::from(settings.invert_hardness),
        ..Default::default()
    }
}

/// Side outputs allocated for one run
struct SideChannels {
    sediment: Option<Field>,
    depth: Option<Field>,
    color: Option<Field>,
}

/// Erode the target's Source with droplets and store the Result
pub fn erode(ctx: &mut SolverContext<'_>, target: &mut dyn ErosionTarget) -> Result<MapId> {
    ctx.require_base(target)?;
    let settings = target.settings().clone();
    let started = Instant::now();
    info!(target = target.name(), "Starting particle erosion");

    let source = ctx.manager.clone_field(&source_map(ctx.cache, target)?.field)?;
    let (width, height) = source.size();

    if settings.particle.iterations == 0 || settings.particle.lifetime == 0 {
        debug!("Nothing to simulate, copying source");
        return store_result(ctx.cache, target, RESULT_NAME, source, false);
    }

    let reduced = super::sub_resolution((width, height), settings.simulation_scale);
    let (sim_w, sim_h) = reduced.unwrap_or((width, height));
    let mut heights = ctx.manager.resize(&source, sim_w, sim_h)?;
    let prior = match reduced {
        Some(_) => Some(ctx.manager.clone_field(&heights)?),
        None => None,
    };
    debug!(sim_w, sim_h, "Particle simulation size");

    let hardness = ctx.optional_gray(
        "Hardness",
        settings.hardness_image.as_deref(),
        sim_w,
        sim_h,
    )?;
    let p = &settings.particle;
    let mut side = SideChannels {
        sediment: p
            .output_sediment
            .then(|| ctx.manager.create(sim_w, sim_h, 1))
            .transpose()?,
        depth: p
            .output_depth
            .then(|| ctx.manager.create(sim_w, sim_h, 1))
            .transpose()?,
        color: None,
    };
    if p.output_color {
        side.color = match ctx.auxiliary_rgba(settings.color.color_image.as_deref(), sim_w, sim_h) {
            Ok(field) => Some(field),
            Err(ErosionError::ExternalAssetMissing(reason)) => {
                warn!("Color transport skipped: {}", reason);
                ctx.messages
                    .info("Color image missing, sediment colors not transported.");
                None
            }
            Err(e) => return Err(e),
        };
    }

    let mut params = droplet_params(&settings, sim_w, sim_h, ctx.seed);
    params.use_hardness = u32::from(hardness.is_some());
    params.use_color = u32::from(side.color.is_some());

    ctx.backend.run_droplets(DropletJob {
        params,
        height: &mut heights,
        hardness: hardness.as_ref(),
        sediment: side.sediment.as_mut(),
        depth: side.depth.as_mut(),
        color: side.color.as_mut(),
        flow: None,
    })?;

    let result = match prior {
        Some(prior) => {
            combine_in_place(&mut heights, &prior, 1.0, 1.0);
            let delta = ctx.manager.resize(&heights, width, height)?;
            let mut result = source;
            combine_in_place(&mut result, &delta, -1.0, 1.0);
            result
        }
        None => heights,
    };

    let outputs = [
        (side.sediment, "Sediment"),
        (side.depth, "Depth"),
        (side.color, "Color"),
    ];
    for (field, suffix) in outputs {
        if let Some(field) = field {
            let full = ctx.manager.resize(&field, width, height)?;
            ctx.write_image(&full, &output_name(target, suffix))?;
        }
    }

    let id = store_result(ctx.cache, target, RESULT_NAME, result, false)?;
    ctx.report_time("Particle erosion", started);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_from_defaults() {
        let settings = ErosionSettings::default();
        let p = droplet_params(&settings, 1024, 512, 3);
        assert_eq!(p.rounds, 50 * PARTICLE_MULTIPLIER);
        assert_eq!((p.lanes_x, p.lanes_y), (LANE_GRID, LANE_GRID));
        assert!((p.drag - 0.75).abs() < 1e-6);
        assert!((p.max_change - 0.01).abs() < 1e-6);
        assert!((p.slope_scale - 512.0).abs() < 1e-6);
        assert_eq!(p.wrap_x, 0);
    }
}
