//! Flow map generation
//!
//! Droplets are released over the latest heightmap without eroding it and
//! every visited cell is counted. The counts are clamped into a displayable
//! `[0, 1]` map.

use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info};

use super::{output_name, SolverContext, LANE_GRID};
use crate::error::Result;
use crate::field::ops::combine_in_place;
use crate::field::Field;
use crate::heightmap::{result_or_source, ErosionTarget};
use crate::planet::{pole_swap, rotate_equirect};
use crate::settings::ErosionSettings;
use crate::solver::{DropletJob, DropletParams, DROPLET_FLOW};

/// Count added per visit for a brightness percentage
///
/// Maps 0-100% onto roughly 0.0003-0.2.
pub fn flow_strength(brightness: f32) -> f32 {
    0.2 * (-6.61 * (1.0 - brightness / 100.0)).exp()
}

/// Droplet parameters of a flow run with `rounds` droplets per lane
pub fn flow_params(settings: &ErosionSettings, width: u32, height: u32, rounds: u32, seed: u32) -> DropletParams {
    let p = &settings.particle;
    let planet = settings.tiling.is_planet();
    DropletParams {
        width,
        height,
        wrap_x: u32::from(settings.tiling.wraps_x()),
        // Droplets never cross a pole
        wrap_y: u32::from(settings.tiling.wraps_y() && !planet),
        lanes_x: LANE_GRID,
        lanes_y: LANE_GRID,
        rounds,
        lifetime: p.lifetime,
        seed,
        mode: DROPLET_FLOW,
        acceleration: p.acceleration / 100.0,
        lateral: 1.0,
        drag: 1.0 - p.drag / 100.0,
        max_velocity: super::particle::MAX_VELOCITY,
        slope_scale: width as f32 / 2.0,
        strength: flow_strength(settings.flow.brightness),
        ..Default::default()
    }
}

/// Clamp to `[0, 1]`, replacing non-finite values by zero
pub fn plug_in_place(field: &mut Field) {
    field.as_mut_slice().par_iter_mut().for_each(|v| {
        *v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
    });
}

fn accumulate(ctx: &mut SolverContext<'_>, height: &mut Field, params: DropletParams) -> Result<Field> {
    let (w, h) = height.size();
    let mut flow = ctx.manager.create(w, h, 1)?;
    if params.rounds > 0 {
        ctx.backend.run_droplets(DropletJob {
            params,
            height,
            hardness: None,
            sediment: None,
            depth: None,
            color: None,
            flow: Some(&mut flow),
        })?;
    }
    Ok(flow)
}

/// Generate `HYD_<target>_Flow` from the target's latest heightmap
pub fn generate(ctx: &mut SolverContext<'_>, target: &mut dyn ErosionTarget) -> Result<String> {
    ctx.require_base(target)?;
    let settings = target.settings().clone();
    let started = Instant::now();
    info!(target = target.name(), "Starting flow map generation");

    let mut height = ctx.manager.clone_field(&result_or_source(ctx.cache, target)?.field)?;
    let (w, h) = height.size();
    let iterations = settings.flow.iterations;
    let seed = ctx.seed;

    let mut flow = if settings.tiling.is_planet() {
        let equatorial = iterations / 2;
        let swapped = iterations - equatorial;
        debug!(equatorial, swapped, "Splitting planet flow between parameterizations");

        let mut flow = accumulate(ctx, &mut height, flow_params(&settings, w, h, equatorial, seed))?;
        let rotation = pole_swap();
        let mut rotated = rotate_equirect(ctx.manager, &height, &rotation)?;
        let rotated_flow = accumulate(
            ctx,
            &mut rotated,
            flow_params(&settings, w, h, swapped, seed.wrapping_add(1)),
        )?;
        let back = rotate_equirect(ctx.manager, &rotated_flow, &rotation.inverse())?;
        combine_in_place(&mut flow, &back, -1.0, 1.0);
        flow
    } else {
        accumulate(ctx, &mut height, flow_params(&settings, w, h, iterations, seed))?
    };
    plug_in_place(&mut flow);

    let name = output_name(target, "Flow");
    ctx.write_image(&flow, &name)?;
    ctx.report_time("Flow map", started);
    Ok(name)
}
