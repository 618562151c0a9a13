//! Snow accumulation
//!
//! A uniform snow layer is dropped on the terrain and relaxed until it sits
//! at its angle of repose. Only snow moves: the terrain acts as a fixed
//! offset under it.

use std::time::Instant;

use tracing::{debug, info};

use super::{output_name, SolverContext};
use crate::error::Result;
use crate::field::ops::{combine_in_place, scale_offset_in_place};
use crate::field::DoubleBuffer;
use crate::heightmap::{result_or_source, source_map, store_result, ErosionTarget};
use crate::settings::{ErosionSettings, SnowOutput};
use crate::solver::{RelaxJob, RelaxParams, RelaxStep, Topology};

/// Default name of snow results
pub const RESULT_NAME: &str = "Snow 1";

/// Snow depth at 100% snowfall, in height units
pub const SNOW_SCALE: f32 = 0.01;

/// Relaxation strength of snow
const SNOW_KS: f32 = 0.5;

/// Neighbor topology of the snow relaxation
///
/// Planets use the latitude-corrected equirect lattice with a fixed aspect.
pub fn topology(settings: &ErosionSettings, width: u32, height: u32) -> Topology {
    let planet = settings.tiling.is_planet();
    Topology::Grid {
        width,
        height,
        wrap_x: settings.tiling.wraps_x(),
        wrap_y: settings.tiling.wraps_y() && !planet,
        by: if planet {
            1.0
        } else {
            settings.scale_ratio * width as f32 / height as f32
        },
        latitude_scaled: planet,
    }
}

/// Alternating neighborhoods at unit stride
pub fn schedule(iterations: u32) -> Vec<RelaxStep> {
    (0..iterations)
        .map(|i| RelaxStep {
            diagonal: i % 2 == 1,
            stride: 1,
        })
        .collect()
}

/// Relaxation constants for a snow angle
pub fn relax_params(angle: f32) -> RelaxParams {
    RelaxParams {
        ks: SNOW_KS,
        tan_angle: angle.tan(),
        use_offset: 1,
        limit_to_material: 1,
    }
}

/// Simulate snow on the target
///
/// Depending on the output setting, writes the normalized snow depth as
/// `HYD_<target>_Snow` and/or stores the snow-covered terrain as Result.
pub fn simulate(ctx: &mut SolverContext<'_>, target: &mut dyn ErosionTarget) -> Result<()> {
    ctx.require_base(target)?;
    let settings = target.settings().clone();
    let snow = &settings.snow;
    let started = Instant::now();
    info!(target = target.name(), "Starting snow simulation");

    let offset = if snow.output == SnowOutput::Texture {
        ctx.manager.clone_field(&result_or_source(ctx.cache, target)?.field)?
    } else {
        ctx.manager.clone_field(&source_map(ctx.cache, target)?.field)?
    };
    let (w, h) = offset.size();

    let amount = snow.add / 100.0;
    let layer = ctx.manager.create_filled(w, h, 1, amount * SNOW_SCALE)?;
    let scratch = ctx.manager.create(w, h, 1)?;
    let mut material = DoubleBuffer::new(layer, scratch);

    let steps = schedule(snow.iterations);
    let topology = topology(&settings, w, h);
    debug!(iterations = steps.len(), ?topology, "Snow schedule");
    ctx.backend.relax(RelaxJob {
        params: relax_params(snow.angle),
        material: &mut material,
        offset: Some(&offset),
        topology,
        schedule: &steps,
    })?;
    let depth = material.into_current();

    let covered = if snow.output == SnowOutput::Texture {
        None
    } else {
        let mut covered = ctx.manager.clone_field(&depth)?;
        combine_in_place(&mut covered, &offset, -1.0, 1.0);
        Some(covered)
    };

    if snow.output != SnowOutput::Displacement {
        let mut normalized = depth;
        if amount > 0.0 {
            scale_offset_in_place(&mut normalized, 1.0 / (SNOW_SCALE * amount), 0.0);
        }
        ctx.write_image(&normalized, &output_name(target, "Snow"))?;
    }
    if let Some(covered) = covered {
        store_result(ctx.cache, target, RESULT_NAME, covered, true)?;
    }
    ctx.report_time("Snow simulation", started);
    Ok(())
}
