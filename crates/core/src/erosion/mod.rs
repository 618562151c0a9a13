//! Erosion solvers
//!
//! Each solver reads a target's Source (or Result) map, runs its kernels on
//! the active [`ComputeBackend`] and stores a new Result and/or writes
//! auxiliary images. Solvers allocate everything they need before touching
//! the map cache, so a failing call leaves the target unchanged.

pub mod color;
pub mod flow;
pub mod particle;
pub mod pipe;
pub mod snow;
pub mod thermal;

use std::time::Instant;

use tracing::warn;

use crate::error::{ErosionError, Result};
use crate::field::{Field, TextureManager, Tiling};
use crate::heightmap::{ErosionTarget, MapCache};
use crate::image::{ImageLibrary, ImageSink};
use crate::messages::MessageLog;
use crate::solver::ComputeBackend;

/// Droplets spawned per lane for each particle iteration
pub const PARTICLE_MULTIPLIER: u32 = 20;

/// Lanes along each axis of the droplet kernel
pub const LANE_GRID: u32 = 32;

/// Everything a solver may touch during one call
pub struct SolverContext<'a> {
    pub backend: &'a mut dyn ComputeBackend,
    pub manager: &'a TextureManager,
    pub cache: &'a mut MapCache,
    pub images: &'a mut ImageLibrary,
    pub messages: &'a mut MessageLog,
    /// Base seed of stochastic kernels
    pub seed: u32,
}

impl SolverContext<'_> {
    /// Reject targets whose Base was never prepared or is gone for good
    ///
    /// Solvers run only after `prepare_base`; nothing is created here.
    pub fn require_base(&self, target: &dyn ErosionTarget) -> Result<()> {
        if self.cache.has_opt(target.maps().base) {
            Ok(())
        } else {
            Err(ErosionError::InvalidSource(format!(
                "'{}' has no base map, prepare it before eroding",
                target.name()
            )))
        }
    }

    /// Load the red channel of a library image as a `width`x`height` field
    ///
    /// # Errors
    ///
    /// `ExternalAssetMissing` when no image name is set or the library has
    /// no image of that name.
    pub fn auxiliary_gray(&self, name: Option<&str>, width: u32, height: u32) -> Result<Field> {
        let image = self.image(name)?;
        let field = self.manager.field_from_image_red(image)?;
        self.manager.resize(&field, width, height)
    }

    /// Load a library image as a `width`x`height` RGBA field
    pub fn auxiliary_rgba(&self, name: Option<&str>, width: u32, height: u32) -> Result<Field> {
        let image = self.image(name)?;
        let field = self.manager.write_from_image(image)?;
        self.manager.resize(&field, width, height)
    }

    fn image(&self, name: Option<&str>) -> Result<&crate::image::ExternalImage> {
        let name = name.ok_or_else(|| ErosionError::ExternalAssetMissing("no image selected".into()))?;
        self.images
            .get(name)
            .ok_or_else(|| ErosionError::ExternalAssetMissing(format!("image '{name}' not found")))
    }

    /// Optional auxiliary map, treating a missing image as absent
    ///
    /// A missing asset is logged and reported; every other error propagates.
    pub fn optional_gray(
        &mut self,
        what: &str,
        name: Option<&str>,
        width: u32,
        height: u32,
    ) -> Result<Option<Field>> {
        if name.is_none() {
            return Ok(None);
        }
        match self.auxiliary_gray(name, width, height) {
            Ok(field) => Ok(Some(field)),
            Err(ErosionError::ExternalAssetMissing(reason)) => {
                warn!("{} map unavailable: {}", what, reason);
                self.messages
                    .info(format!("{what} map missing, continuing without it."));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Convert `field` to an image named `name` and store it in the library
    pub fn write_image(&mut self, field: &Field, name: &str) -> Result<()> {
        let image = self.manager.read_to_image(field, name)?;
        self.images.store(image);
        Ok(())
    }

    /// Record the duration of a finished solver run
    pub fn report_time(&mut self, what: &str, started: Instant) {
        self.messages
            .info(format!("{what}: {:.3} s.", started.elapsed().as_secs_f64()));
    }
}

/// Library name of an auxiliary output, `HYD_<target>_<suffix>`
pub fn output_name(target: &dyn ErosionTarget, suffix: &str) -> String {
    format!("HYD_{}_{suffix}", target.name())
}

/// Simulation size for a `simulation_scale` percentage
///
/// Returns `None` when the scaled short side equals the original one.
pub fn sub_resolution(size: (u32, u32), simulation_scale: f32) -> Option<(u32, u32)> {
    let (w, h) = size;
    let short = w.min(h);
    let sub = ((short as f32 * simulation_scale / 100.0).round() as u32).max(1);
    if sub == short {
        return None;
    }
    Some(if w > h {
        ((w as u64 * u64::from(sub)).div_ceil(u64::from(h)) as u32, sub)
    } else {
        (sub, (h as u64 * u64::from(sub)).div_ceil(u64::from(w)) as u32)
    })
}

/// Wrap flags of the droplet and pipe kernels
pub(crate) fn wrap_flags(tiling: Tiling) -> (u32, u32) {
    (u32::from(tiling.wraps_x()), u32::from(tiling.wraps_y()))
}
