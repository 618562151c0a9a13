//! CPU request/grant relaxation
//!
//! Pass A lets every cell post outflow requests to its linked neighbors.
//! Pass B settles each cell by subtracting its own requests and adding the
//! requests its neighbors posted back toward it. Both passes are pure
//! gathers, so the result does not depend on thread scheduling.

use rayon::prelude::*;

use super::lattice::Lattice;
use super::params::RelaxParams;

/// Post outflow requests, four per cell
pub fn post_requests(
    material: &[f32],
    offset: Option<&[f32]>,
    lattice: &dyn Lattice,
    params: &RelaxParams,
    requests: &mut [f32],
) {
    let surface = |cell: usize| material[cell] + offset.map_or(0.0, |o| o[cell]);

    requests.par_chunks_mut(4).enumerate().for_each(|(cell, req)| {
        let here = surface(cell);
        let mut excess = [0f32; 4];
        for (slot, e) in excess.iter_mut().enumerate() {
            if let Some(link) = lattice.link(cell, slot) {
                let drop = here - surface(link.target) - params.tan_angle * link.distance;
                if drop > 0.0 {
                    *e = drop;
                }
            }
        }

        let total: f32 = excess.iter().sum();
        let largest = excess.iter().copied().fold(0.0, f32::max);
        if largest <= 0.0 {
            req.fill(0.0);
            return;
        }

        let mut outflow = params.ks * largest * 0.5;
        if params.limit_to_material != 0 {
            outflow = outflow.min(material[cell].max(0.0));
        }
        for (r, e) in req.iter_mut().zip(excess) {
            *r = outflow * e / total;
        }
    });
}

/// Apply the posted requests
pub fn grant(material: &[f32], requests: &[f32], lattice: &dyn Lattice, out: &mut [f32]) {
    out.par_iter_mut().enumerate().for_each(|(cell, h)| {
        let mut value = material[cell];
        for slot in 0..4 {
            value -= requests[cell * 4 + slot];
            if let Some(link) = lattice.link(cell, slot) {
                value += requests[link.target * 4 + link.back as usize];
            }
        }
        *h = value;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::lattice::GridLattice;

    fn relax(material: &[f32], lattice: &GridLattice, params: &RelaxParams, iterations: usize) -> Vec<f32> {
        let mut current = material.to_vec();
        let mut next = vec![0.0; material.len()];
        let mut requests = vec![0.0; material.len() * 4];
        for _ in 0..iterations {
            post_requests(&current, None, lattice, params, &mut requests);
            grant(&current, &requests, lattice, &mut next);
            std::mem::swap(&mut current, &mut next);
        }
        current
    }

    #[test]
    fn test_spike_spreads_and_conserves() {
        let lattice = GridLattice::new(8, 8, false, false, false, 1);
        let mut h = vec![0.0; 64];
        h[3 * 8 + 3] = 1.0;
        let params = RelaxParams {
            ks: 0.5,
            tan_angle: 0.1,
            ..Default::default()
        };
        let out = relax(&h, &lattice, &params, 20);
        let total: f32 = out.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
        assert!(out[3 * 8 + 3] < 1.0);
        assert!(out[3 * 8 + 4] > 0.0);
    }

    #[test]
    fn test_flat_field_posts_nothing() {
        let lattice = GridLattice::new(4, 4, true, true, true, 1);
        let h = vec![0.25; 16];
        let mut requests = vec![1.0; 64];
        post_requests(&h, None, &lattice, &RelaxParams::default(), &mut requests);
        assert!(requests.iter().all(|&r| r == 0.0));
    }

    #[test]
    fn test_outflow_limited_to_material() {
        let lattice = GridLattice::new(3, 1, false, false, false, 1);
        let material = vec![0.0, 0.01, 0.0];
        let offset = vec![0.0, 1.0, 0.0];
        let params = RelaxParams {
            ks: 0.5,
            tan_angle: 0.0,
            use_offset: 1,
            limit_to_material: 1,
        };
        let mut requests = vec![0.0; 12];
        post_requests(&material, Some(&offset), &lattice, &params, &mut requests);
        let posted: f32 = requests[4..8].iter().sum();
        assert!((posted - 0.01).abs() < 1e-6);
    }
}
