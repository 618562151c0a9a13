//! Elementwise and resampling kernels over fields

use rayon::prelude::*;

use super::data::Field;
use super::sampling::{Footprint, Tiling};

/// Bilinear resample `src` into `dst` with aligned texel centers
pub(crate) fn resample_bilinear(src: &Field, dst: &mut Field) {
    debug_assert_eq!(src.channels(), dst.channels());
    let (sw, sh) = src.size();
    let (dw, dh) = dst.size();
    let channels = dst.channels() as usize;
    let sx = sw as f32 / dw as f32;
    let sy = sh as f32 / dh as f32;
    let row_len = dw as usize * channels;

    dst.as_mut_slice()
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            let src_y = (y as f32 + 0.5) * sy - 0.5;
            for x in 0..dw as usize {
                let src_x = (x as f32 + 0.5) * sx - 0.5;
                let fp = Footprint::at(src_x, src_y, sw, sh, Tiling::None);
                for c in 0..channels {
                    row[x * channels + c] = fp.sample(src, c as u8);
                }
            }
        });
}

/// `a = scale * (a - factor * b)` in place
pub fn combine_in_place(a: &mut Field, b: &Field, factor: f32, scale: f32) {
    assert!(a.same_shape(b), "Field shapes differ");
    a.as_mut_slice()
        .par_iter_mut()
        .zip(b.as_slice().par_iter())
        .for_each(|(va, &vb)| *va = scale * (*va - factor * vb));
}

/// `a = a * scale + offset` in place
pub fn scale_offset_in_place(a: &mut Field, scale: f32, offset: f32) {
    a.as_mut_slice()
        .par_iter_mut()
        .for_each(|v| *v = *v * scale + offset);
}

/// sRGB electro-optical transfer function
#[inline]
pub fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

/// Linearize an sRGB-encoded field; alpha of 4-channel fields is left alone
pub fn linearize_in_place(a: &mut Field) {
    let channels = a.channels() as usize;
    a.as_mut_slice()
        .par_chunks_mut(channels)
        .for_each(|texel| {
            for (c, v) in texel.iter_mut().enumerate() {
                if channels != 4 || c != 3 {
                    *v = srgb_to_linear(*v);
                }
            }
        });
}
