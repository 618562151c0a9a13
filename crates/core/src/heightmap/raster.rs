//! Top-surface rasterization of triangulated surfaces
//!
//! The surface's x/y bounding box is mapped onto the full grid and z onto a
//! normalized depth in `[0, 1]`. Each triangle is scan-converted at pixel
//! centers with a depth test that keeps the highest surface; equal depths
//! resolve to the last triangle drawn. Pixels no triangle covers stay 0.

use nalgebra::{Vector2, Vector3};
use tracing::debug;

use crate::error::{ErosionError, Result};
use crate::field::{Field, TextureManager};

/// A triangulated surface in object space
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Surface {
    /// Vertex positions, z up
    pub vertices: Vec<Vector3<f32>>,
    /// Counter-clockwise vertex index triples
    pub triangles: Vec<[u32; 3]>,
}

/// Axis-aligned bounds of a surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Minimum corner
    pub min: Vector3<f32>,
    /// Maximum corner
    pub max: Vector3<f32>,
}

impl Bounds {
    /// Size along each axis
    pub fn extent(&self) -> Vector3<f32> {
        self.max - self.min
    }
}

impl Surface {
    /// Regular grid surface sampled from `height(x, y)` over `[-1, 1]^2`
    pub fn from_grid(nx: u32, ny: u32, height: impl Fn(f32, f32) -> f32) -> Self {
        let mut vertices = Vec::with_capacity(nx as usize * ny as usize);
        for j in 0..ny {
            for i in 0..nx {
                let x = i as f32 / (nx - 1).max(1) as f32 * 2.0 - 1.0;
                let y = j as f32 / (ny - 1).max(1) as f32 * 2.0 - 1.0;
                vertices.push(Vector3::new(x, y, height(x, y)));
            }
        }
        let mut triangles = Vec::new();
        for j in 0..ny.saturating_sub(1) {
            for i in 0..nx.saturating_sub(1) {
                let a = j * nx + i;
                let b = a + 1;
                let c = a + nx;
                let d = c + 1;
                triangles.push([a, b, d]);
                triangles.push([a, d, c]);
            }
        }
        Self {
            vertices,
            triangles,
        }
    }

    /// Bounding box of all referenced vertices
    pub fn bounds(&self) -> Option<Bounds> {
        let mut iter = self.vertices.iter();
        let first = *iter.next()?;
        let (min, max) = iter.fold((first, first), |(lo, hi), v| (lo.inf(v), hi.sup(v)));
        Some(Bounds { min, max })
    }

    /// Factor turning normalized depth into heights proportional to the width
    ///
    /// The grid width spans two height units, so slope angles survive.
    pub fn org_scale(&self) -> f32 {
        self.bounds().map_or(1.0, |b| {
            let extent = b.extent();
            if extent.x > 0.0 {
                extent.z * 2.0 / extent.x
            } else {
                1.0
            }
        })
    }

    fn validate(&self) -> Result<Bounds> {
        if self.triangles.is_empty() {
            return Err(ErosionError::invalid_source("surface has no triangles"));
        }
        let count = self.vertices.len() as u32;
        if self.triangles.iter().flatten().any(|&i| i >= count) {
            return Err(ErosionError::invalid_source(
                "surface references a missing vertex",
            ));
        }
        let bounds = self
            .bounds()
            .ok_or_else(|| ErosionError::invalid_source("surface has no vertices"))?;
        let extent = bounds.extent();
        if extent.x <= 0.0 || extent.y <= 0.0 {
            return Err(ErosionError::invalid_source(
                "surface has no horizontal extent",
            ));
        }
        Ok(bounds)
    }
}

#[inline]
fn edge(a: Vector2<f32>, b: Vector2<f32>, p: Vector2<f32>) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Rasterize the normalized top-surface depth of `surface`
///
/// # Errors
///
/// `InvalidSource` for surfaces without triangles or horizontal extent.
pub fn rasterize(
    manager: &TextureManager,
    surface: &Surface,
    width: u32,
    height: u32,
) -> Result<Field> {
    let bounds = surface.validate()?;
    let extent = bounds.extent();
    let depth_range = if extent.z > 0.0 { extent.z } else { 1.0 };

    // Resize transform into pixel space and normalized depth
    let to_screen = |v: &Vector3<f32>| {
        (
            Vector2::new(
                (v.x - bounds.min.x) / extent.x * width as f32,
                (v.y - bounds.min.y) / extent.y * height as f32,
            ),
            (v.z - bounds.min.z) / depth_range,
        )
    };

    let mut field = manager.create(width, height, 1)?;
    let mut depth = vec![f32::NEG_INFINITY; width as usize * height as usize];
    let out = field.as_mut_slice();

    for tri in &surface.triangles {
        let [(p0, z0), (p1, z1), (p2, z2)] = tri.map(|i| to_screen(&surface.vertices[i as usize]));
        let area = edge(p0, p1, p2);
        if area.abs() <= f32::EPSILON {
            continue;
        }

        let min_x = p0.x.min(p1.x).min(p2.x).floor().max(0.0) as u32;
        let max_x = (p0.x.max(p1.x).max(p2.x).ceil() as u32).min(width);
        let min_y = p0.y.min(p1.y).min(p2.y).floor().max(0.0) as u32;
        let max_y = (p0.y.max(p1.y).max(p2.y).ceil() as u32).min(height);

        for y in min_y..max_y {
            for x in min_x..max_x {
                let p = Vector2::new(x as f32 + 0.5, y as f32 + 0.5);
                let w0 = edge(p1, p2, p) / area;
                let w1 = edge(p2, p0, p) / area;
                let w2 = edge(p0, p1, p) / area;
                // Small tolerance so shared edges leave no cracks
                if w0 < -1e-6 || w1 < -1e-6 || w2 < -1e-6 {
                    continue;
                }
                let z = w0 * z0 + w1 * z1 + w2 * z2;
                let idx = y as usize * width as usize + x as usize;
                if z >= depth[idx] {
                    depth[idx] = z;
                    out[idx] = z;
                }
            }
        }
    }

    debug!(
        width,
        height,
        triangles = surface.triangles.len(),
        "Rasterized surface"
    );
    Ok(field)
}
