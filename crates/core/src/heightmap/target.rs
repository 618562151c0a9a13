//! Erosion targets
//!
//! Solvers never look at what they erode: anything that can produce a height
//! field, report its size and carry settings plus the three cache layers
//! implements [`ErosionTarget`].

use serde::{Deserialize, Serialize};

use super::raster::{rasterize, Surface};
use crate::error::{ErosionError, Result};
use crate::field::{Field, TextureManager};
use crate::image::ExternalImage;
use crate::settings::{ErosionSettings, ScaleMode};

use super::cache::MapId;

/// Cache layers of one target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapSlots {
    /// Immutable ground truth, regenerated only on recalculation
    pub base: Option<MapId>,
    /// Input of the next solver call
    pub source: Option<MapId>,
    /// Output of the last solver call
    pub result: Option<MapId>,
}

/// Capability set shared by everything the engine can erode
pub trait ErosionTarget {
    /// Display name, used for written-back image names
    fn name(&self) -> &str;

    /// Heightmap resolution `(width, height)`
    fn size(&self) -> (u32, u32);

    /// Settings read by the solvers
    fn settings(&self) -> &ErosionSettings;

    /// Mutable settings
    fn settings_mut(&mut self) -> &mut ErosionSettings;

    /// Cache layer ids
    fn maps(&self) -> &MapSlots;

    /// Mutable cache layer ids
    fn maps_mut(&mut self) -> &mut MapSlots;

    /// Generate a fresh single-channel height field at [`size`](Self::size)
    ///
    /// # Errors
    ///
    /// `InvalidSource` when the target has no usable geometry or pixels.
    fn height_field(&self, manager: &TextureManager) -> Result<Field>;

    /// Ratio between stored heights and heights proportional to the width
    fn org_scale(&self) -> f32 {
        1.0
    }
}

/// A triangulated surface rasterized into a heightmap
#[derive(Debug, Clone)]
pub struct SurfaceTarget {
    name: String,
    surface: Surface,
    /// Object z scale applied by [`ScaleMode::World`]
    pub object_scale_z: f32,
    settings: ErosionSettings,
    maps: MapSlots,
}

impl SurfaceTarget {
    /// Wrap a surface with default settings
    pub fn new(name: impl Into<String>, surface: Surface) -> Self {
        Self {
            name: name.into(),
            surface,
            object_scale_z: 1.0,
            settings: ErosionSettings::default(),
            maps: MapSlots::default(),
        }
    }

    /// Replace the settings
    pub fn with_settings(mut self, settings: ErosionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The wrapped surface
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// Replace the surface; the caller decides whether to recalculate Base
    pub fn set_surface(&mut self, surface: Surface) {
        self.surface = surface;
    }

    fn height_multiplier(&self) -> f32 {
        match self.settings.scale_mode {
            ScaleMode::Normalized => 1.0,
            ScaleMode::Local => self.surface.org_scale(),
            ScaleMode::World => self.surface.org_scale() * self.object_scale_z,
            ScaleMode::AsStored => self.settings.height_scale,
        }
    }
}

impl ErosionTarget for SurfaceTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> (u32, u32) {
        self.settings.resolution
    }

    fn settings(&self) -> &ErosionSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut ErosionSettings {
        &mut self.settings
    }

    fn maps(&self) -> &MapSlots {
        &self.maps
    }

    fn maps_mut(&mut self) -> &mut MapSlots {
        &mut self.maps
    }

    fn height_field(&self, manager: &TextureManager) -> Result<Field> {
        let (width, height) = self.size();
        let mut field = rasterize(manager, &self.surface, width, height)?;
        let scale = self.height_multiplier();
        if scale != 1.0 {
            crate::field::ops::scale_offset_in_place(&mut field, scale, 0.0);
        }
        Ok(field)
    }

    fn org_scale(&self) -> f32 {
        self.surface.org_scale()
    }
}

/// A 2D image used directly as a heightmap
#[derive(Debug, Clone)]
pub struct ImageTarget {
    image: ExternalImage,
    settings: ErosionSettings,
    maps: MapSlots,
}

impl ImageTarget {
    /// Wrap an image with default settings sized to the image
    pub fn new(image: ExternalImage) -> Self {
        let settings = ErosionSettings {
            resolution: (image.width, image.height),
            ..ErosionSettings::default()
        };
        Self {
            image,
            settings,
            maps: MapSlots::default(),
        }
    }

    /// Replace the settings, keeping the image resolution
    pub fn with_settings(mut self, settings: ErosionSettings) -> Self {
        self.settings = ErosionSettings {
            resolution: (self.image.width, self.image.height),
            ..settings
        };
        self
    }

    /// The wrapped image
    pub fn image(&self) -> &ExternalImage {
        &self.image
    }
}

impl ErosionTarget for ImageTarget {
    fn name(&self) -> &str {
        &self.image.name
    }

    fn size(&self) -> (u32, u32) {
        (self.image.width, self.image.height)
    }

    fn settings(&self) -> &ErosionSettings {
        &self.settings
    }

    fn settings_mut(&mut self) -> &mut ErosionSettings {
        &mut self.settings
    }

    fn maps(&self) -> &MapSlots {
        &self.maps
    }

    fn maps_mut(&mut self) -> &mut MapSlots {
        &mut self.maps
    }

    fn height_field(&self, manager: &TextureManager) -> Result<Field> {
        if self.image.is_empty() {
            return Err(ErosionError::invalid_source(format!(
                "image '{}' has no pixels",
                self.image.name
            )));
        }
        manager.field_from_image_red(&self.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ColorSpace;
    use approx::assert_relative_eq;

    #[test]
    fn test_image_target_takes_red_channel() {
        let manager = TextureManager::unbounded();
        let image = ExternalImage::new(
            "img",
            2,
            1,
            vec![0.2, 0.9, 0.9, 1.0, 0.4, 0.0, 0.0, 1.0],
            ColorSpace::Linear,
        )
        .unwrap();
        let target = ImageTarget::new(image);
        let field = target.height_field(&manager).unwrap();
        assert_eq!(field.channels(), 1);
        assert_eq!(field.as_slice(), &[0.2, 0.4]);
        assert_eq!(target.size(), (2, 1));
    }

    #[test]
    fn test_surface_scale_modes() {
        let manager = TextureManager::unbounded();
        let surface = Surface::from_grid(2, 2, |x, _| x);
        let mut target = SurfaceTarget::new("ramp", surface);
        target.settings_mut().resolution = (4, 4);
        target.object_scale_z = 3.0;

        target.settings_mut().scale_mode = ScaleMode::Normalized;
        let normalized = target.height_field(&manager).unwrap().get(3, 0, 0);

        target.settings_mut().scale_mode = ScaleMode::Local;
        let local = target.height_field(&manager).unwrap().get(3, 0, 0);
        assert_relative_eq!(local, normalized * target.org_scale());

        target.settings_mut().scale_mode = ScaleMode::World;
        let world = target.height_field(&manager).unwrap().get(3, 0, 0);
        assert_relative_eq!(world, local * 3.0, epsilon = 1e-6);

        target.settings_mut().scale_mode = ScaleMode::AsStored;
        target.settings_mut().height_scale = 0.5;
        let stored = target.height_field(&manager).unwrap().get(3, 0, 0);
        assert_relative_eq!(stored, normalized * 0.5);
    }
}
