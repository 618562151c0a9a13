//! Neighbor topologies for request/grant relaxation
//!
//! A lattice gives every cell up to four links for one neighborhood
//! (cardinal or diagonal) at one stride. Links are involutive: following
//! `link(i, k)` to `(t, b)` and then `link(t, b)` leads back to `(i, k)`.
//! This is what makes the grant pass conserve mass.
//!
//! Distances are in height units, where the width of an equirectangular or
//! planar grid spans 2 units.

use std::f32::consts::PI;

use nalgebra::Vector3;
use rayon::prelude::*;

use crate::field::sampling::address;
use crate::planet::{face_uv_to_cube, CubeAtlas};

/// Marker for a missing link in [`NeighborTable`] targets
pub const NO_LINK: u32 = u32::MAX;

/// Cardinal slot offsets `+x, -x, +y, -y`
pub const CARDINAL_OFFSETS: [(i64, i64); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];

/// Diagonal slot offsets `(+,+), (-,-), (+,-), (-,+)`
pub const DIAGONAL_OFFSETS: [(i64, i64); 4] = [(1, 1), (-1, -1), (1, -1), (-1, 1)];

/// Smallest latitude scale applied to x distances near the poles
const MIN_LATITUDE_SCALE: f32 = 1e-3;

/// One directed neighbor link
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    /// Neighbor cell index
    pub target: usize,
    /// Slot on the neighbor that points back here
    pub back: u8,
    /// Distance between the cell centers in height units
    pub distance: f32,
}

/// Neighbor topology with four slots per cell
pub trait Lattice: Sync {
    /// Number of cells
    fn cell_count(&self) -> usize;

    /// Link in `slot` (0..4) of `cell`, or `None` at a closed edge
    fn link(&self, cell: usize, slot: usize) -> Option<Link>;
}

/// Slot offsets of a neighborhood
#[inline]
pub fn offsets(diagonal: bool) -> &'static [(i64, i64); 4] {
    if diagonal {
        &DIAGONAL_OFFSETS
    } else {
        &CARDINAL_OFFSETS
    }
}

/// Regular grid lattice computed on the fly
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLattice {
    width: u32,
    height: u32,
    wrap_x: bool,
    wrap_y: bool,
    diagonal: bool,
    stride: u32,
    /// Ratio of y to x cell spacing
    by: f32,
    latitude_scaled: bool,
}

impl GridLattice {
    /// Lattice over a `width x height` grid
    pub fn new(width: u32, height: u32, wrap_x: bool, wrap_y: bool, diagonal: bool, stride: u32) -> Self {
        Self {
            width,
            height,
            wrap_x,
            wrap_y,
            diagonal,
            stride: stride.max(1),
            by: 1.0,
            latitude_scaled: false,
        }
    }

    /// Set the y/x spacing ratio
    #[must_use]
    pub fn with_y_ratio(mut self, by: f32) -> Self {
        self.by = by;
        self
    }

    /// Scale x spacing by the cosine of the row's latitude, treating the grid
    /// as an equirectangular map
    #[must_use]
    pub fn latitude_scaled(mut self, enabled: bool) -> Self {
        self.latitude_scaled = enabled;
        self
    }

    fn latitude_scale(&self, y: u32) -> f32 {
        if !self.latitude_scaled {
            return 1.0;
        }
        let lat = PI * (0.5 - (y as f32 + 0.5) / self.height as f32);
        lat.cos().max(MIN_LATITUDE_SCALE)
    }
}

impl Lattice for GridLattice {
    fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    fn link(&self, cell: usize, slot: usize) -> Option<Link> {
        let w = self.width as usize;
        let x = (cell % w) as i64;
        let y = (cell / w) as i64;
        let (ox, oy) = offsets(self.diagonal)[slot];
        let ds = i64::from(self.stride);
        let tx = address(x + ox * ds, self.width, self.wrap_x)?;
        let ty = address(y + oy * ds, self.height, self.wrap_y)?;
        let target = ty as usize * w + tx as usize;
        if target == cell {
            return None;
        }

        let unit = self.stride as f32 * 2.0 / self.width as f32;
        let lat = if oy == 0 {
            self.latitude_scale(y as u32)
        } else {
            0.5 * (self.latitude_scale(y as u32) + self.latitude_scale(ty))
        };
        let dx = ox.abs() as f32 * unit * lat;
        let dy = oy.abs() as f32 * unit * self.by;

        Some(Link {
            target,
            back: (slot ^ 1) as u8,
            distance: dx.hypot(dy),
        })
    }
}

/// Materialized lattice: per-cell targets, back slots and distances
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborTable {
    targets: Vec<[u32; 4]>,
    backs: Vec<[u8; 4]>,
    distances: Vec<[f32; 4]>,
}

impl NeighborTable {
    /// Snapshot any lattice into a table
    pub fn from_lattice(lattice: &dyn Lattice) -> Self {
        let rows: Vec<([u32; 4], [u8; 4], [f32; 4])> = (0..lattice.cell_count())
            .into_par_iter()
            .map(|cell| {
                let mut row = ([NO_LINK; 4], [0u8; 4], [0f32; 4]);
                for slot in 0..4 {
                    if let Some(link) = lattice.link(cell, slot) {
                        row.0[slot] = link.target as u32;
                        row.1[slot] = link.back;
                        row.2[slot] = link.distance;
                    }
                }
                row
            })
            .collect();
        Self::from_rows(rows)
    }

    /// Seam-aware lattice over a cube atlas
    ///
    /// Neighbors are found by stepping along the face plane and projecting
    /// the result back onto the cube, which crosses face seams naturally.
    /// Seam corners can produce one-way links; only links whose back link
    /// agrees are kept.
    pub fn cube(atlas: CubeAtlas, diagonal: bool, stride: u32) -> Self {
        let n = atlas.cell_count();
        let f = atlas.face_size as f32;
        let step = stride.max(1) as f32 * 2.0 / f;
        let offs = offsets(diagonal);

        let raw: Vec<[u32; 4]> = (0..n)
            .into_par_iter()
            .map(|cell| {
                let (face, x, y) = atlas.locate(cell);
                let u = (x as f32 + 0.5) / f;
                let v = (y as f32 + 0.5) / f;
                let center = face_uv_to_cube(face, u, v);
                let s_axis = (face_uv_to_cube(face, 1.0, v) - face_uv_to_cube(face, 0.0, v)) * 0.5;
                let t_axis = (face_uv_to_cube(face, u, 1.0) - face_uv_to_cube(face, u, 0.0)) * 0.5;

                let mut row = [NO_LINK; 4];
                for (slot, &(ox, oy)) in offs.iter().enumerate() {
                    let p: Vector3<f32> = center + s_axis * (ox as f32 * step) + t_axis * (oy as f32 * step);
                    let target = atlas.cell_of(&p);
                    if target != cell {
                        row[slot] = target as u32;
                    }
                }
                row
            })
            .collect();

        let pick_back = |cell: usize, slot: usize| -> Option<u8> {
            let target = raw[cell][slot];
            if target == NO_LINK {
                return None;
            }
            let row = &raw[target as usize];
            let preferred = slot ^ 1;
            if row[preferred] == cell as u32 {
                return Some(preferred as u8);
            }
            (0..4).find(|&s| row[s] == cell as u32).map(|s| s as u8)
        };

        let rows: Vec<([u32; 4], [u8; 4], [f32; 4])> = (0..n)
            .into_par_iter()
            .map(|cell| {
                let mut row = ([NO_LINK; 4], [0u8; 4], [0f32; 4]);
                let here = atlas.cell_direction(cell);
                for slot in 0..4 {
                    let Some(back) = pick_back(cell, slot) else {
                        continue;
                    };
                    let target = raw[cell][slot] as usize;
                    if pick_back(target, back as usize) != Some(slot as u8) {
                        continue;
                    }
                    let there = atlas.cell_direction(target);
                    let angle = here.dot(&there).clamp(-1.0, 1.0).acos();
                    row.0[slot] = target as u32;
                    row.1[slot] = back;
                    // Circumference spans 2 height units
                    row.2[slot] = angle / PI;
                }
                row
            })
            .collect();
        Self::from_rows(rows)
    }

    fn from_rows(rows: Vec<([u32; 4], [u8; 4], [f32; 4])>) -> Self {
        let mut targets = Vec::with_capacity(rows.len());
        let mut backs = Vec::with_capacity(rows.len());
        let mut distances = Vec::with_capacity(rows.len());
        for (t, b, d) in rows {
            targets.push(t);
            backs.push(b);
            distances.push(d);
        }
        Self {
            targets,
            backs,
            distances,
        }
    }

    /// Flat target indices, four per cell, [`NO_LINK`] where absent
    pub fn targets(&self) -> &[[u32; 4]] {
        &self.targets
    }

    /// Back slots packed four per `u32`, one byte each
    pub fn packed_backs(&self) -> Vec<u32> {
        self.backs
            .iter()
            .map(|b| u32::from_le_bytes(*b))
            .collect()
    }

    /// Distances, four per cell
    pub fn distances(&self) -> &[[f32; 4]] {
        &self.distances
    }
}

impl Lattice for NeighborTable {
    fn cell_count(&self) -> usize {
        self.targets.len()
    }

    #[inline]
    fn link(&self, cell: usize, slot: usize) -> Option<Link> {
        let target = self.targets[cell][slot];
        (target != NO_LINK).then(|| Link {
            target: target as usize,
            back: self.backs[cell][slot],
            distance: self.distances[cell][slot],
        })
    }
}

/// Where a relaxation runs
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Topology {
    /// Planar or equirectangular grid
    Grid {
        /// Grid width
        width: u32,
        /// Grid height
        height: u32,
        /// Horizontal wrap
        wrap_x: bool,
        /// Vertical wrap
        wrap_y: bool,
        /// y/x spacing ratio
        by: f32,
        /// Latitude-corrected x spacing
        latitude_scaled: bool,
    },
    /// Cube atlas of six faces
    Cube(CubeAtlas),
}

impl Topology {
    /// Number of cells
    pub fn cell_count(&self) -> usize {
        match self {
            Self::Grid { width, height, .. } => *width as usize * *height as usize,
            Self::Cube(atlas) => atlas.cell_count(),
        }
    }

    /// Materialized lattice for one neighborhood and stride
    pub fn table(&self, diagonal: bool, stride: u32) -> NeighborTable {
        match (*self, self.grid(diagonal, stride)) {
            (Self::Cube(atlas), _) => NeighborTable::cube(atlas, diagonal, stride),
            (Self::Grid { .. }, Some(lattice)) => NeighborTable::from_lattice(&lattice),
            (Self::Grid { .. }, None) => NeighborTable::from_rows(Vec::new()),
        }
    }

    /// Closed-form lattice for grid topologies
    pub fn grid(&self, diagonal: bool, stride: u32) -> Option<GridLattice> {
        match *self {
            Self::Grid {
                width,
                height,
                wrap_x,
                wrap_y,
                by,
                latitude_scaled,
            } => Some(
                GridLattice::new(width, height, wrap_x, wrap_y, diagonal, stride)
                    .with_y_ratio(by)
                    .latitude_scaled(latitude_scaled),
            ),
            Self::Cube(_) => None,
        }
    }
}
