//! Cube-sphere geometry
//!
//! Six gnomonic cube faces cover the sphere with far less area distortion
//! than an equirectangular map. Faces are stacked vertically in an atlas
//! field of size `F x 6F`.

use std::f32::consts::{FRAC_PI_2, PI, TAU};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Identifies a cube face
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CubeFace {
    /// +X face
    PosX = 0,
    /// -X face
    NegX = 1,
    /// +Y face (north pole)
    PosY = 2,
    /// -Y face (south pole)
    NegY = 3,
    /// +Z face
    PosZ = 4,
    /// -Z face
    NegZ = 5,
}

impl CubeFace {
    /// All faces in atlas order
    pub const fn all() -> [CubeFace; 6] {
        [
            CubeFace::PosX,
            CubeFace::NegX,
            CubeFace::PosY,
            CubeFace::NegY,
            CubeFace::PosZ,
            CubeFace::NegZ,
        ]
    }

    /// Atlas slot (0-5)
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Face from an atlas slot
    pub const fn from_index(index: usize) -> Option<CubeFace> {
        match index {
            0 => Some(CubeFace::PosX),
            1 => Some(CubeFace::NegX),
            2 => Some(CubeFace::PosY),
            3 => Some(CubeFace::NegY),
            4 => Some(CubeFace::PosZ),
            5 => Some(CubeFace::NegZ),
            _ => None,
        }
    }
}

/// Point on the unit cube for face coordinates `u, v` in `[0, 1]`
pub fn face_uv_to_cube(face: CubeFace, u: f32, v: f32) -> Vector3<f32> {
    let s = u * 2.0 - 1.0;
    let t = v * 2.0 - 1.0;
    match face {
        CubeFace::PosX => Vector3::new(1.0, t, -s),
        CubeFace::NegX => Vector3::new(-1.0, t, s),
        CubeFace::PosY => Vector3::new(s, 1.0, t),
        CubeFace::NegY => Vector3::new(s, -1.0, -t),
        CubeFace::PosZ => Vector3::new(s, t, 1.0),
        CubeFace::NegZ => Vector3::new(-s, t, -1.0),
    }
}

/// Face and unclamped face coordinates of a direction (gnomonic projection)
pub fn sphere_to_face_uv(p: &Vector3<f32>) -> (CubeFace, f32, f32) {
    let a = p.abs();
    let (face, s, t) = if a.x >= a.y && a.x >= a.z {
        if p.x > 0.0 {
            (CubeFace::PosX, -p.z / p.x, p.y / p.x)
        } else {
            (CubeFace::NegX, p.z / -p.x, p.y / -p.x)
        }
    } else if a.y >= a.x && a.y >= a.z {
        if p.y > 0.0 {
            (CubeFace::PosY, p.x / p.y, p.z / p.y)
        } else {
            (CubeFace::NegY, p.x / -p.y, -p.z / -p.y)
        }
    } else if p.z > 0.0 {
        (CubeFace::PosZ, p.x / p.z, p.y / p.z)
    } else {
        (CubeFace::NegZ, -p.x / -p.z, p.y / -p.z)
    };
    (face, (s + 1.0) * 0.5, (t + 1.0) * 0.5)
}

/// Unit direction of normalized equirectangular coordinates
///
/// `fy = 0` is the north pole, `fx = 0.5` faces +Z.
pub fn equirect_to_direction(fx: f32, fy: f32) -> Vector3<f32> {
    let lat = FRAC_PI_2 - fy * PI;
    let lon = -PI + fx * TAU;
    Vector3::new(lat.cos() * lon.sin(), lat.sin(), lat.cos() * lon.cos())
}

/// Normalized equirectangular coordinates of a direction
pub fn direction_to_equirect(dir: &Vector3<f32>) -> (f32, f32) {
    let d = dir.normalize();
    let lat = d.y.clamp(-1.0, 1.0).asin();
    let lon = d.x.atan2(d.z);
    ((lon + PI) / TAU, (FRAC_PI_2 - lat) / PI)
}

/// Layout of a cube atlas with square faces of `face_size` cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CubeAtlas {
    /// Cells per face edge
    pub face_size: u32,
}

impl CubeAtlas {
    /// Atlas whose face cells roughly match the pixel size of an
    /// equirectangular map `width` pixels around
    pub fn for_equirect_width(width: u32) -> Self {
        let face_size = (width as f32 / PI).round().max(4.0) as u32;
        Self { face_size }
    }

    /// Atlas field size `(F, 6F)`
    pub fn size(&self) -> (u32, u32) {
        (self.face_size, self.face_size * 6)
    }

    /// Total cells
    pub fn cell_count(&self) -> usize {
        6 * self.face_size as usize * self.face_size as usize
    }

    /// Cell index of face-local `(x, y)`
    #[inline]
    pub fn cell(&self, face: CubeFace, x: u32, y: u32) -> usize {
        let f = self.face_size as usize;
        (face.index() * f + y as usize) * f + x as usize
    }

    /// Face and face-local coordinates of a cell index
    #[inline]
    pub fn locate(&self, cell: usize) -> (CubeFace, u32, u32) {
        let f = self.face_size as usize;
        let face = CubeFace::from_index(cell / (f * f)).unwrap_or(CubeFace::NegZ);
        let rem = cell % (f * f);
        (face, (rem % f) as u32, (rem / f) as u32)
    }

    /// Unit direction through the center of a cell
    pub fn cell_direction(&self, cell: usize) -> Vector3<f32> {
        let (face, x, y) = self.locate(cell);
        let f = self.face_size as f32;
        face_uv_to_cube(face, (x as f32 + 0.5) / f, (y as f32 + 0.5) / f).normalize()
    }

    /// Cell containing a direction
    pub fn cell_of(&self, dir: &Vector3<f32>) -> usize {
        let (face, u, v) = sphere_to_face_uv(dir);
        let f = self.face_size;
        let x = ((u * f as f32).floor() as i64).clamp(0, i64::from(f) - 1) as u32;
        let y = ((v * f as f32).floor() as i64).clamp(0, i64::from(f) - 1) as u32;
        self.cell(face, x, y)
    }
}
