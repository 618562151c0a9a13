//! Tiling-aware addressing and bilinear sampling
//!
//! Continuous sample positions are in pixel units with cell `(i, j)` centered
//! on `(i, j)`.

use serde::{Deserialize, Serialize};

use super::data::Field;

/// Boundary handling of a grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tiling {
    /// Closed boundaries, samples clamp to the edge
    #[default]
    None,
    /// Wraps horizontally
    X,
    /// Wraps vertically
    Y,
    /// Wraps in both directions
    Xy,
    /// Equirectangular planet map: wraps in both axes for sampling, with
    /// pole handling left to the solvers' remap passes
    Planet,
}

impl Tiling {
    /// Horizontal wrap-around
    #[inline]
    pub const fn wraps_x(self) -> bool {
        matches!(self, Self::X | Self::Xy | Self::Planet)
    }

    /// Vertical wrap-around
    #[inline]
    pub const fn wraps_y(self) -> bool {
        matches!(self, Self::Y | Self::Xy | Self::Planet)
    }

    /// Planet mode
    #[inline]
    pub const fn is_planet(self) -> bool {
        matches!(self, Self::Planet)
    }
}

/// Map a possibly out-of-range coordinate onto `0..n`
///
/// Returns `None` when the coordinate falls off a closed edge.
#[inline]
pub fn address(coord: i64, n: u32, wrap: bool) -> Option<u32> {
    let n = i64::from(n);
    if wrap {
        Some(coord.rem_euclid(n) as u32)
    } else if (0..n).contains(&coord) {
        Some(coord as u32)
    } else {
        None
    }
}

/// Like [`address`] but clamps closed edges instead of rejecting them
#[inline]
pub fn address_clamped(coord: i64, n: u32, wrap: bool) -> u32 {
    if wrap {
        coord.rem_euclid(i64::from(n)) as u32
    } else {
        coord.clamp(0, i64::from(n) - 1) as u32
    }
}

/// The four texels and weights around a continuous position
#[derive(Debug, Clone, Copy)]
pub struct Footprint {
    /// Raw cell indices `[x0y0, x1y0, x0y1, x1y1]`
    pub cells: [usize; 4],
    /// Bilinear weights summing to one
    pub weights: [f32; 4],
    /// Fractional offsets inside the texel square
    pub frac: (f32, f32),
}

impl Footprint {
    /// Footprint of position `(x, y)` on a `width x height` grid
    pub fn at(x: f32, y: f32, width: u32, height: u32, tiling: Tiling) -> Self {
        let fx = x.floor();
        let fy = y.floor();
        let tx = x - fx;
        let ty = y - fy;
        let x0 = fx as i64;
        let y0 = fy as i64;

        let ax0 = address_clamped(x0, width, tiling.wraps_x()) as usize;
        let ax1 = address_clamped(x0 + 1, width, tiling.wraps_x()) as usize;
        let ay0 = address_clamped(y0, height, tiling.wraps_y()) as usize;
        let ay1 = address_clamped(y0 + 1, height, tiling.wraps_y()) as usize;
        let w = width as usize;

        Self {
            cells: [ay0 * w + ax0, ay0 * w + ax1, ay1 * w + ax0, ay1 * w + ax1],
            weights: [
                (1.0 - tx) * (1.0 - ty),
                tx * (1.0 - ty),
                (1.0 - tx) * ty,
                tx * ty,
            ],
            frac: (tx, ty),
        }
    }

    /// Interpolated value of channel `c`
    #[inline]
    pub fn sample(&self, field: &Field, c: u8) -> f32 {
        let ch = field.channels() as usize;
        let data = field.as_slice();
        self.cells
            .iter()
            .zip(self.weights)
            .map(|(&cell, w)| data[cell * ch + c as usize] * w)
            .sum()
    }

    /// Interpolated value and gradient (per pixel) of a single-channel slice
    #[inline]
    pub fn sample_with_gradient(&self, values: &[f32]) -> (f32, f32, f32) {
        let [h00, h10, h01, h11] = self.cells.map(|cell| values[cell]);
        let (tx, ty) = self.frac;
        let gx = (h10 - h00) * (1.0 - ty) + (h11 - h01) * ty;
        let gy = (h01 - h00) * (1.0 - tx) + (h11 - h10) * tx;
        let h = h00 * self.weights[0] + h10 * self.weights[1] + h01 * self.weights[2] + h11 * self.weights[3];
        (h, gx, gy)
    }
}

/// Bilinear sample of channel `c` at `(x, y)`
pub fn sample(field: &Field, x: f32, y: f32, c: u8, tiling: Tiling) -> f32 {
    Footprint::at(x, y, field.width(), field.height(), tiling).sample(field, c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::TextureManager;
    use approx::assert_relative_eq;

    #[test]
    fn test_address_modes() {
        assert_eq!(address(-1, 8, true), Some(7));
        assert_eq!(address(8, 8, true), Some(0));
        assert_eq!(address(-1, 8, false), None);
        assert_eq!(address(3, 8, false), Some(3));
        assert_eq!(address_clamped(-5, 8, false), 0);
        assert_eq!(address_clamped(11, 8, false), 7);
    }

    #[test]
    fn test_planet_wraps_both_axes() {
        assert!(Tiling::Planet.wraps_x());
        assert!(Tiling::Planet.wraps_y());
        assert!(!Tiling::X.wraps_y());
        assert!(!Tiling::None.wraps_x());
    }

    #[test]
    fn test_bilinear_midpoint() {
        let manager = TextureManager::unbounded();
        let field = manager
            .create_from(2, 2, 1, vec![0.0, 1.0, 2.0, 3.0])
            .unwrap();
        assert_relative_eq!(sample(&field, 0.5, 0.5, 0, Tiling::None), 1.5);
        assert_relative_eq!(sample(&field, 1.0, 0.0, 0, Tiling::None), 1.0);
        // Clamped beyond the edge
        assert_relative_eq!(sample(&field, 5.0, 5.0, 0, Tiling::None), 3.0);
    }

    #[test]
    fn test_wrapped_sample_blends_opposite_edge() {
        let manager = TextureManager::unbounded();
        let field = manager
            .create_from(4, 1, 1, vec![1.0, 0.0, 0.0, 3.0])
            .unwrap();
        // Halfway between the last and first column
        assert_relative_eq!(sample(&field, 3.5, 0.0, 0, Tiling::X), 2.0);
        assert_relative_eq!(sample(&field, 3.5, 0.0, 0, Tiling::None), 3.0);
    }

    #[test]
    fn test_gradient_of_ramp() {
        let manager = TextureManager::unbounded();
        let data: Vec<f32> = (0..16).map(|i| (i % 4) as f32 * 0.5).collect();
        let field = manager.create_from(4, 4, 1, data).unwrap();
        let fp = Footprint::at(1.3, 2.7, 4, 4, Tiling::None);
        let (h, gx, gy) = fp.sample_with_gradient(field.as_slice());
        assert_relative_eq!(h, 0.65, epsilon = 1e-6);
        assert_relative_eq!(gx, 0.5, epsilon = 1e-6);
        assert_relative_eq!(gy, 0.0, epsilon = 1e-6);
    }
}
