//! External images and the host image library
//!
//! Images are the exchange format with the host: RGBA `f32` pixels tagged
//! with their color encoding. Fields convert to and from images through the
//! [`TextureManager`]; results written back by the solvers land in an
//! [`ImageSink`], normally the engine's [`ImageLibrary`].

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ErosionError, Result};
use crate::field::{ops, Field, TextureManager};

/// Pixel encoding of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    /// Linear values, used as-is
    #[default]
    Linear,
    /// sRGB-encoded values, decoded before any math
    Srgb,
}

/// An RGBA image owned by the host
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalImage {
    /// Unique name within the library
    pub name: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row-major RGBA values
    pub pixels: Vec<f32>,
    /// Encoding of `pixels`
    pub colorspace: ColorSpace,
}

impl ExternalImage {
    /// Build an image, checking the pixel count
    pub fn new(
        name: impl Into<String>,
        width: u32,
        height: u32,
        pixels: Vec<f32>,
        colorspace: ColorSpace,
    ) -> Result<Self> {
        let name = name.into();
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(ErosionError::invalid_source(format!(
                "image '{name}' has {} values, expected {expected}",
                pixels.len()
            )));
        }
        Ok(Self {
            name,
            width,
            height,
            pixels,
            colorspace,
        })
    }

    /// Grayscale image with `values` broadcast to RGB and alpha 1
    pub fn from_gray(name: impl Into<String>, width: u32, height: u32, values: &[f32]) -> Result<Self> {
        let pixels = values.iter().flat_map(|&v| [v, v, v, 1.0]).collect();
        Self::new(name, width, height, pixels, ColorSpace::Linear)
    }

    /// Red channel of every pixel
    pub fn red_channel(&self) -> Vec<f32> {
        self.pixels.iter().step_by(4).copied().collect()
    }

    /// Whether the image holds any pixels
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Destination of images produced by the engine
pub trait ImageSink {
    /// Store `image` under its name, replacing any existing image.
    ///
    /// Returns `true` when an existing image was overwritten.
    fn store(&mut self, image: ExternalImage) -> bool;
}

/// Named image store shared with the host
#[derive(Debug, Default)]
pub struct ImageLibrary {
    images: FxHashMap<String, ExternalImage>,
}

impl ImageLibrary {
    /// Empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an image by name
    pub fn get(&self, name: &str) -> Option<&ExternalImage> {
        self.images.get(name)
    }

    /// Whether an image with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.images.contains_key(name)
    }

    /// Insert or overwrite an image; returns `true` if it replaced one
    pub fn insert(&mut self, image: ExternalImage) -> bool {
        self.images.insert(image.name.clone(), image).is_some()
    }

    /// Remove an image
    pub fn remove(&mut self, name: &str) -> Option<ExternalImage> {
        self.images.remove(name)
    }

    /// Names of every stored image, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.images.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of stored images
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Whether the library is empty
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl ImageSink for ImageLibrary {
    fn store(&mut self, image: ExternalImage) -> bool {
        self.insert(image)
    }
}

impl TextureManager {
    /// Convert a 1- or 4-channel field into a linear RGBA image
    ///
    /// Single-channel fields are broadcast to RGB with alpha 1.
    ///
    /// # Errors
    ///
    /// `UnsupportedChannelCount` for 2- and 3-channel fields.
    pub fn read_to_image(&self, field: &Field, name: &str) -> Result<ExternalImage> {
        let pixels = match field.channels() {
            1 => field
                .as_slice()
                .par_iter()
                .flat_map_iter(|&v| [v, v, v, 1.0])
                .collect(),
            4 => field.as_slice().to_vec(),
            n => return Err(ErosionError::UnsupportedChannelCount(n)),
        };
        Ok(ExternalImage {
            name: name.to_owned(),
            width: field.width(),
            height: field.height(),
            pixels,
            colorspace: ColorSpace::Linear,
        })
    }

    /// Convert an image into a 4-channel field in linear space
    pub fn write_from_image(&self, image: &ExternalImage) -> Result<Field> {
        let mut field = self.create_from(image.width, image.height, 4, image.pixels.clone())?;
        if image.colorspace == ColorSpace::Srgb {
            debug!(image = %image.name, "Linearizing sRGB image");
            ops::linearize_in_place(&mut field);
        }
        Ok(field)
    }

    /// Import the red channel of an image as a single-channel field
    pub fn field_from_image_red(&self, image: &ExternalImage) -> Result<Field> {
        if image.is_empty() {
            return Err(ErosionError::invalid_source(format!(
                "image '{}' has no pixels",
                image.name
            )));
        }
        let mut field = self.create_from(image.width, image.height, 1, image.red_channel())?;
        if image.colorspace == ColorSpace::Srgb {
            ops::linearize_in_place(&mut field);
        }
        Ok(field)
    }
}
