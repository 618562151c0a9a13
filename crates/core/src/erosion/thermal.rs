//! Thermal (angle of repose) erosion
//!
//! Material above the critical slope slides to lower neighbors through the
//! request/grant relaxation. On planets the relaxation runs on a cube atlas
//! so neighbor distances stay uniform up to the poles; only the change is
//! mapped back onto the equirectangular Source.

use std::time::Instant;

use tracing::{debug, info};

use super::SolverContext;
use crate::error::Result;
use crate::field::ops::combine_in_place;
use crate::field::{DoubleBuffer, Field};
use crate::heightmap::{source_map, store_result, ErosionTarget, MapId};
use crate::planet::{atlas_to_equirect, equirect_to_atlas, CubeAtlas};
use crate::settings::{ErosionSettings, Neighborhood, ThermalSettings};
use crate::solver::{RelaxJob, RelaxParams, RelaxStep, Topology};

/// Default name of thermal results
pub const RESULT_NAME: &str = "Thermal 1";

/// Neighborhood and stride of every iteration
///
/// With a stride gradient the stride is halved (rounding up) at checkpoints
/// that close in on the end of the run.
pub fn schedule(settings: &ThermalSettings) -> Vec<RelaxStep> {
    let iterations = settings.iterations;
    let mut stride = if settings.use_stride {
        settings.stride.max(1)
    } else {
        1
    };
    let mut next = iterations / 2;
    let mut steps = Vec::with_capacity(iterations as usize);
    for i in 0..iterations {
        let diagonal = match settings.neighborhood {
            Neighborhood::Cardinal => false,
            Neighborhood::Diagonal => true,
            Neighborhood::Both => i % 2 == 1,
        };
        steps.push(RelaxStep { diagonal, stride });
        if settings.use_stride && settings.stride_gradient && i >= next {
            stride = stride.div_ceil(2);
            next += (iterations - i) / 2;
        }
    }
    steps
}

/// Relaxation constants for thermal erosion
pub fn relax_params(settings: &ThermalSettings) -> RelaxParams {
    RelaxParams {
        ks: settings.strength / 100.0 * 0.5,
        tan_angle: settings.max_angle.tan(),
        use_offset: 0,
        limit_to_material: 0,
    }
}

/// Grid topology of a planar (or tiled) target
pub fn grid_topology(settings: &ErosionSettings, width: u32, height: u32) -> Topology {
    Topology::Grid {
        width,
        height,
        wrap_x: settings.tiling.wraps_x(),
        wrap_y: settings.tiling.wraps_y(),
        by: settings.scale_ratio,
        latitude_scaled: false,
    }
}

/// Erode the target's Source thermally and store the Result
pub fn erode(ctx: &mut SolverContext<'_>, target: &mut dyn ErosionTarget) -> Result<MapId> {
    ctx.require_base(target)?;
    let settings = target.settings().clone();
    let started = Instant::now();
    info!(target = target.name(), "Starting thermal erosion");

    let source = ctx.manager.clone_field(&source_map(ctx.cache, target)?.field)?;
    let steps = schedule(&settings.thermal);
    debug!(
        iterations = steps.len(),
        first_stride = steps.first().map_or(1, |s| s.stride),
        "Thermal schedule"
    );
    let params = relax_params(&settings.thermal);

    let result = if steps.is_empty() {
        source
    } else if settings.tiling.is_planet() {
        erode_planet(ctx, source, params, &steps)?
    } else {
        let (w, h) = source.size();
        let scratch = ctx.manager.create(w, h, 1)?;
        let mut material = DoubleBuffer::new(source, scratch);
        ctx.backend.relax(RelaxJob {
            params,
            material: &mut material,
            offset: None,
            topology: grid_topology(&settings, w, h),
            schedule: &steps,
        })?;
        material.into_current()
    };

    let id = store_result(ctx.cache, target, RESULT_NAME, result, false)?;
    ctx.report_time("Thermal erosion", started);
    Ok(id)
}

fn erode_planet(
    ctx: &mut SolverContext<'_>,
    mut source: Field,
    params: RelaxParams,
    steps: &[RelaxStep],
) -> Result<Field> {
    let (w, h) = source.size();
    let atlas = CubeAtlas::for_equirect_width(w);
    debug!(face_size = atlas.face_size, "Remapping planet onto cube atlas");

    let prior = equirect_to_atlas(ctx.manager, &source, atlas)?;
    let (aw, ah) = atlas.size();
    let mut material = DoubleBuffer::new(ctx.manager.clone_field(&prior)?, ctx.manager.create(aw, ah, 1)?);
    ctx.backend.relax(RelaxJob {
        params,
        material: &mut material,
        offset: None,
        topology: Topology::Cube(atlas),
        schedule: steps,
    })?;

    let mut delta = material.into_current();
    combine_in_place(&mut delta, &prior, 1.0, 1.0);
    let delta = atlas_to_equirect(ctx.manager, &delta, atlas, w, h)?;
    combine_in_place(&mut source, &delta, -1.0, 1.0);
    Ok(source)
}
