//! Resampling between equirectangular maps and planet work representations

use nalgebra::{Rotation3, Vector3};
use rayon::prelude::*;

use super::cube::{direction_to_equirect, equirect_to_direction, sphere_to_face_uv, CubeAtlas};
use crate::error::Result;
use crate::field::{Field, Footprint, TextureManager, Tiling};

/// Sample an equirectangular field along a direction
fn sample_equirect(field: &Field, dir: &Vector3<f32>, c: u8) -> f32 {
    let (fx, fy) = direction_to_equirect(dir);
    let (w, h) = field.size();
    let px = fx * w as f32 - 0.5;
    let py = fy * h as f32 - 0.5;
    Footprint::at(px, py, w, h, Tiling::X).sample(field, c)
}

/// Resample an equirectangular field onto a cube atlas
pub fn equirect_to_atlas(
    manager: &TextureManager,
    field: &Field,
    atlas: CubeAtlas,
) -> Result<Field> {
    let (aw, ah) = atlas.size();
    let channels = field.channels();
    let mut out = manager.create(aw, ah, channels)?;
    out.as_mut_slice()
        .par_chunks_mut(channels as usize)
        .enumerate()
        .for_each(|(cell, texel)| {
            let dir = atlas.cell_direction(cell);
            for (c, v) in texel.iter_mut().enumerate() {
                *v = sample_equirect(field, &dir, c as u8);
            }
        });
    Ok(out)
}

/// Resample a cube atlas back onto an equirectangular grid
///
/// Bilinear lookups clamp at face borders.
pub fn atlas_to_equirect(
    manager: &TextureManager,
    atlas_field: &Field,
    atlas: CubeAtlas,
    width: u32,
    height: u32,
) -> Result<Field> {
    let channels = atlas_field.channels();
    let f = atlas.face_size;
    let face_cells = f as usize * f as usize;
    let src = atlas_field.as_slice();
    let ch = channels as usize;
    let mut out = manager.create(width, height, channels)?;

    out.as_mut_slice()
        .par_chunks_mut(width as usize * ch)
        .enumerate()
        .for_each(|(y, row)| {
            let fy = (y as f32 + 0.5) / height as f32;
            for x in 0..width as usize {
                let fx = (x as f32 + 0.5) / width as f32;
                let dir = equirect_to_direction(fx, fy);
                let (face, u, v) = sphere_to_face_uv(&dir);
                let fp = Footprint::at(u * f as f32 - 0.5, v * f as f32 - 0.5, f, f, Tiling::None);
                let base = face.index() * face_cells;
                for c in 0..ch {
                    row[x * ch + c] = fp
                        .cells
                        .iter()
                        .zip(fp.weights)
                        .map(|(&cell, w)| src[(base + cell) * ch + c] * w)
                        .sum();
                }
            }
        });
    Ok(out)
}

/// Rotation carrying both poles onto the equator
pub fn pole_swap() -> Rotation3<f32> {
    Rotation3::from_axis_angle(&Vector3::x_axis(), std::f32::consts::FRAC_PI_2)
}

/// Resample an equirectangular field as seen after rotating the sphere
///
/// The output at direction `d` holds the input at `rotation⁻¹ · d`.
pub fn rotate_equirect(
    manager: &TextureManager,
    field: &Field,
    rotation: &Rotation3<f32>,
) -> Result<Field> {
    let (w, h) = field.size();
    let ch = field.channels() as usize;
    let inverse = rotation.inverse();
    let mut out = manager.create(w, h, field.channels())?;
    out.as_mut_slice()
        .par_chunks_mut(w as usize * ch)
        .enumerate()
        .for_each(|(y, row)| {
            let fy = (y as f32 + 0.5) / h as f32;
            for x in 0..w as usize {
                let fx = (x as f32 + 0.5) / w as f32;
                let dir = inverse * equirect_to_direction(fx, fy);
                for c in 0..ch {
                    row[x * ch + c] = sample_equirect(field, &dir, c as u8);
                }
            }
        });
    Ok(out)
}
