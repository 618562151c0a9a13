//! Grid-valued field storage
//!
//! A [`Field`] is a 2D grid of `f32` values with one to four interleaved
//! channels, stored row-major (`(y * width + x) * channels + c`). Fields are
//! only created through the [`TextureManager`](super::TextureManager), which
//! attaches an allocation lease so the memory budget is returned when the
//! field is dropped or released.

use std::fmt;

use super::manager::Lease;

/// 2D multi-channel grid of `f32` values
pub struct Field {
    pub(super) data: Vec<f32>,
    pub(super) width: u32,
    pub(super) height: u32,
    pub(super) channels: u8,
    pub(super) lease: Lease,
}

impl Field {
    /// Grid width in cells
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Grid height in cells
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`
    #[inline]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of interleaved channels (1-4)
    #[inline]
    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Number of grid cells (not values)
    #[inline]
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Size of the backing storage in bytes
    pub fn byte_size(&self) -> u64 {
        self.data.len() as u64 * 4
    }

    /// Whether `other` has the same size and channel count
    pub fn same_shape(&self, other: &Field) -> bool {
        self.size() == other.size() && self.channels == other.channels
    }

    /// Raw interleaved values
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Mutable raw interleaved values
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Index of the first channel of cell `(x, y)` in the raw slice
    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.channels as usize
    }

    /// Value of channel `c` at `(x, y)`
    ///
    /// # Panics
    ///
    /// Panics if coordinates or channel are out of bounds
    pub fn get(&self, x: u32, y: u32, c: u8) -> f32 {
        assert!(
            x < self.width && y < self.height && c < self.channels,
            "Coordinates out of bounds"
        );
        self.data[self.index(x, y) + c as usize]
    }

    /// Set channel `c` at `(x, y)`
    ///
    /// # Panics
    ///
    /// Panics if coordinates or channel are out of bounds
    pub fn set(&mut self, x: u32, y: u32, c: u8, value: f32) {
        assert!(
            x < self.width && y < self.height && c < self.channels,
            "Coordinates out of bounds"
        );
        let idx = self.index(x, y) + c as usize;
        self.data[idx] = value;
    }

    /// Fill every channel of every cell
    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// Copy all values from a field of the same shape
    ///
    /// # Panics
    ///
    /// Panics if the shapes differ
    pub fn copy_from(&mut self, other: &Field) {
        assert!(self.same_shape(other), "Field shapes differ");
        self.data.copy_from_slice(&other.data);
    }

    /// Sum of every value, accumulated in `f64`
    pub fn sum(&self) -> f64 {
        self.data.iter().map(|&v| f64::from(v)).sum()
    }

    /// Smallest and largest value over all channels
    pub fn min_max(&self) -> (f32, f32) {
        self.data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }

    /// Whether this field still counts against a manager's budget
    pub fn is_tracked(&self) -> bool {
        self.lease.is_active()
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}
