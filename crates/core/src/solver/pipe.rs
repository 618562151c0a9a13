//! CPU pipe-model stages
//!
//! Virtual pipes connect each cell to four neighbors (cardinal or
//! diagonal). Every stage reads the previous stage's output in full before
//! writing, so rows can be processed in parallel.

use nalgebra::Vector2;
use rayon::prelude::*;

use crate::field::sampling::{address, address_clamped, Footprint};
use crate::field::Field;

use super::lattice::offsets;
use super::params::{PipeJob, PipeParams, PipeState};

/// Depth below which water is considered at rest
const DEPTH_EPSILON: f32 = 1e-4;

/// PCG hash shared with the WGSL kernels
#[inline]
pub fn pcg_hash(input: u32) -> u32 {
    let state = input.wrapping_mul(747796405).wrapping_add(2891336453);
    let word = ((state >> ((state >> 28) + 4)) ^ state).wrapping_mul(277803737);
    (word >> 22) ^ word
}

/// Random rain multiplier in `[0, 2)` for a cell and iteration
#[inline]
pub fn rain_jitter(seed: u32, iteration: u32, cell: u32) -> f32 {
    let h = pcg_hash(cell ^ pcg_hash(seed.wrapping_add(iteration)));
    (h >> 8) as f32 / (1u32 << 24) as f32 * 2.0
}

/// Factors below this count as fully hard
///
/// Bilinear weights sum to one only up to rounding, so an all-ones hardness
/// map samples to `1 - ulp` between texels.
pub const HARDNESS_CUTOFF: f32 = 1e-6;

/// Hardness multiplier for erosion
#[inline]
pub fn hardness_factor(hardness: f32, invert: bool) -> f32 {
    let h = hardness.clamp(0.0, 1.0);
    let factor = if invert { h } else { 1.0 - h };
    if factor <= HARDNESS_CUTOFF {
        0.0
    } else {
        factor
    }
}

fn neighbor(cell: usize, slot: usize, p: &PipeParams) -> Option<usize> {
    let w = p.width as usize;
    let (ox, oy) = offsets(p.diagonal != 0)[slot];
    let x = (cell % w) as i64 + ox;
    let y = (cell / w) as i64 + oy;
    let tx = address(x, p.width, p.wrap_x != 0)?;
    let ty = address(y, p.height, p.wrap_y != 0)?;
    Some(ty as usize * w + tx as usize)
}

fn pipe_length(slot: usize, p: &PipeParams) -> f32 {
    if p.diagonal != 0 {
        p.lx.hypot(p.ly)
    } else if slot < 2 {
        p.lx
    } else {
        p.ly
    }
}

fn slot_direction(slot: usize, p: &PipeParams) -> Vector2<f32> {
    let (ox, oy) = offsets(p.diagonal != 0)[slot];
    Vector2::new(ox as f32, oy as f32).normalize()
}

/// Stage 1: rainfall and evaporation
pub fn rain_and_evaporate(state: &mut PipeState, source: Option<&Field>, p: &PipeParams) {
    let random = p.random_rain != 0;
    state
        .water
        .as_mut_slice()
        .par_iter_mut()
        .enumerate()
        .for_each(|(cell, d)| {
            let mut amount = p.rain * p.dt;
            if let Some(source) = source {
                amount *= source.as_slice()[cell].max(0.0);
            }
            if random {
                amount *= rain_jitter(p.seed, p.iteration, cell as u32);
            }
            *d = (*d + amount) * (1.0 - p.evaporation);
        });
}

/// Stage 2: outflow flux along each pipe
pub fn update_flux(state: &mut PipeState, p: &PipeParams) {
    let PipeState {
        height, water, flux, ..
    } = state;
    let height = height.as_slice();
    let water = water.as_slice();

    flux.as_mut_slice().par_chunks_mut(4).enumerate().for_each(|(cell, f)| {
        let surface = height[cell] + water[cell];
        let mut total = 0.0;
        for slot in 0..4 {
            f[slot] = match neighbor(cell, slot, p) {
                Some(n) => {
                    let dh = surface - (height[n] + water[n]);
                    (f[slot] + p.dt * p.gravity * dh / pipe_length(slot, p)).max(0.0)
                }
                None => 0.0,
            };
            total += f[slot];
        }
        if total > 0.0 {
            let k = (water[cell] * p.lx * p.ly / (total * p.dt)).min(1.0);
            for v in f.iter_mut() {
                *v *= k;
            }
        }
    });
}

/// Stage 3: water depth from net flux, mean depth, and velocity
pub fn update_depth_and_velocity(state: &mut PipeState, p: &PipeParams) {
    let PipeState {
        water,
        flux,
        velocity,
        mean_depth,
        capacity,
        ..
    } = state;
    let flux = flux.as_slice();
    let water_now = water.as_slice();
    let area = p.lx * p.ly;

    velocity
        .as_mut_slice()
        .par_chunks_mut(2)
        .zip(mean_depth.as_mut_slice().par_iter_mut())
        .zip(capacity.as_mut_slice().par_iter_mut())
        .enumerate()
        .for_each(|(cell, ((vel, mean), next_depth))| {
            let mut inflow = 0.0;
            let mut outflow = 0.0;
            let mut net = Vector2::zeros();
            for slot in 0..4 {
                let out = flux[cell * 4 + slot];
                let back = neighbor(cell, slot, p).map_or(0.0, |n| flux[n * 4 + (slot ^ 1)]);
                inflow += back;
                outflow += out;
                net += slot_direction(slot, p) * (out - back);
            }

            let d = water_now[cell];
            let d2 = (d + p.dt * (inflow - outflow) / area).max(0.0);
            let dm = 0.5 * (d + d2);
            *next_depth = d2;
            *mean = dm;

            if dm > DEPTH_EPSILON {
                vel[0] = 0.5 * net.x / (p.ly * dm);
                vel[1] = 0.5 * net.y / (p.lx * dm);
            } else {
                vel[0] = 0.0;
                vel[1] = 0.0;
            }
        });

    water.copy_from(capacity);
}

/// Stage 4: sediment transport capacity
pub fn update_capacity(state: &mut PipeState, p: &PipeParams) {
    let PipeState {
        height,
        velocity,
        capacity,
        ..
    } = state;
    let h = height.as_slice();
    let vel = velocity.as_slice();
    let w = p.width as usize;
    let (wrap_x, wrap_y) = (p.wrap_x != 0, p.wrap_y != 0);

    capacity.as_mut_slice().par_iter_mut().enumerate().for_each(|(cell, c)| {
        let x = (cell % w) as i64;
        let y = (cell / w) as i64;
        let at = |xx: i64, yy: i64| {
            h[address_clamped(yy, p.height, wrap_y) as usize * w + address_clamped(xx, p.width, wrap_x) as usize]
        };
        let gx = (at(x + 1, y) - at(x - 1, y)) / (2.0 * p.lx);
        let gy = (at(x, y + 1) - at(x, y - 1)) / (2.0 * p.ly);
        let tan = gx.hypot(gy);
        let sin = tan / (1.0 + tan * tan).sqrt();
        let speed = vel[cell * 2].hypot(vel[cell * 2 + 1]);
        *c = p.kc * sin.max(p.min_alpha) * speed;
    });
}

/// Stage 5: dissolve into or settle out of the water
pub fn erode_and_deposit(state: &mut PipeState, hardness: Option<&Field>, p: &PipeParams) {
    let PipeState {
        height,
        sediment,
        capacity,
        ..
    } = state;
    let cap = capacity.as_slice();
    let invert = p.invert_hardness != 0;

    height
        .as_mut_slice()
        .par_iter_mut()
        .zip(sediment.current_mut().as_mut_slice().par_iter_mut())
        .enumerate()
        .for_each(|(cell, (h, s))| {
            let c = cap[cell];
            if c > *s {
                let factor = match hardness {
                    Some(field) if p.use_hardness != 0 => hardness_factor(field.as_slice()[cell], invert),
                    _ => 1.0,
                };
                let amount = p.ks * (c - *s) * factor;
                *h -= amount;
                *s += amount;
            } else {
                let amount = p.kd * (*s - c);
                *h += amount;
                *s -= amount;
            }
        });
}

/// Stage 6: semi-Lagrangian transport of sediment and colors
pub fn advect(state: &mut PipeState, p: &PipeParams) {
    let tiling = p.tiling();
    let vel = state.velocity.as_slice();
    let w = p.width as usize;
    let backtrace = |cell: usize| {
        let x = (cell % w) as f32 - vel[cell * 2] * p.dt / p.lx;
        let y = (cell / w) as f32 - vel[cell * 2 + 1] * p.dt / p.ly;
        Footprint::at(x, y, p.width, p.height, tiling)
    };

    {
        let (src, dst) = state.sediment.pair_mut();
        dst.as_mut_slice()
            .par_iter_mut()
            .enumerate()
            .for_each(|(cell, s)| *s = backtrace(cell).sample(src, 0));
    }
    state.sediment.swap();

    if p.advect_color != 0 {
        if let Some(color) = state.color.as_mut() {
            {
                let (src, dst) = color.pair_mut();
                dst.as_mut_slice()
                    .par_chunks_mut(4)
                    .enumerate()
                    .for_each(|(cell, px)| {
                        let fp = backtrace(cell);
                        for (c, v) in px.iter_mut().enumerate() {
                            *v = fp.sample(src, c as u8);
                        }
                    });
            }
            color.swap();
        }
    }
}

/// Run a full pipe-model schedule
pub fn run_pipe(job: &mut PipeJob<'_>) {
    for (i, step) in job.schedule.iter().enumerate() {
        if step.erase_flux {
            job.state.flux.fill(0.0);
        }
        let mut p = job.params;
        p.iteration = i as u32;
        p.diagonal = u32::from(step.diagonal);

        rain_and_evaporate(job.state, job.water_source, &p);
        update_flux(job.state, &p);
        update_depth_and_velocity(job.state, &p);
        update_capacity(job.state, &p);
        erode_and_deposit(job.state, job.hardness, &p);
        advect(job.state, &p);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{DoubleBuffer, TextureManager};
    use crate::solver::params::PipeStep;

    fn state(manager: &TextureManager, size: u32, height: impl Fn(u32, u32) -> f32) -> PipeState {
        let mut h = manager.create(size, size, 1).expect("height");
        for y in 0..size {
            for x in 0..size {
                h.set(x, y, 0, height(x, y));
            }
        }
        let create = |c| manager.create(size, size, c).expect("field");
        PipeState {
            height: h,
            flux: create(4),
            velocity: create(2),
            water: create(1),
            sediment: DoubleBuffer::new(create(1), create(1)),
            mean_depth: create(1),
            capacity: create(1),
            color: None,
        }
    }

    fn params(size: u32) -> PipeParams {
        PipeParams {
            width: size,
            height: size,
            dt: 0.15,
            rain: 0.2,
            evaporation: 0.1,
            gravity: 9.81,
            lx: 1.0,
            ly: 1.0,
            kc: 0.1,
            ks: 0.1,
            kd: 0.25,
            min_alpha: 0.001,
            ..Default::default()
        }
    }

    fn run(state: &mut PipeState, p: PipeParams, iterations: usize) {
        let schedule: Vec<PipeStep> = (0..iterations)
            .map(|i| PipeStep {
                diagonal: (i / 4) % 2 == 1,
                erase_flux: i % 4 == 0 && i > 0,
            })
            .collect();
        let mut job = PipeJob {
            params: p,
            state,
            water_source: None,
            hardness: None,
            schedule: &schedule,
        };
        run_pipe(&mut job);
    }

    #[test]
    fn test_flat_terrain_stays_flat() {
        let manager = TextureManager::unbounded();
        let mut s = state(&manager, 16, |_, _| 50.0);
        run(&mut s, params(16), 20);
        assert!(s.height.as_slice().iter().all(|&h| (h - 50.0).abs() < 1e-4));
        assert!(s.water.as_slice().iter().all(|&d| d >= 0.0));
    }

    #[test]
    fn test_water_stays_non_negative_on_slope() {
        let manager = TextureManager::unbounded();
        let mut s = state(&manager, 16, |x, y| (x + y) as f32 * 2.0);
        run(&mut s, params(16), 30);
        assert!(s.water.as_slice().iter().all(|&d| d >= 0.0 && d.is_finite()));
        assert!(s.height.as_slice().iter().all(|h| h.is_finite()));
        let moving = s.velocity.as_slice().iter().any(|&v| v.abs() > 0.0);
        assert!(moving);
    }

    #[test]
    fn test_flux_vanishes_at_closed_edges() {
        let manager = TextureManager::unbounded();
        let mut s = state(&manager, 8, |x, _| 10.0 - x as f32);
        s.water.fill(1.0);
        let p = params(8);
        update_flux(&mut s, &p);
        // Cell at x = 7 has no +x neighbor
        assert_eq!(s.flux.get(7, 3, 0), 0.0);
        assert!(s.flux.get(3, 3, 0) > 0.0);
    }

    #[test]
    fn test_rain_jitter_range() {
        for cell in 0..1000 {
            let r = rain_jitter(3, 5, cell);
            assert!((0.0..2.0).contains(&r));
        }
    }

    #[test]
    fn test_hardness_factor() {
        assert_eq!(hardness_factor(1.0, false), 0.0);
        assert_eq!(hardness_factor(1.0, true), 1.0);
        assert_eq!(hardness_factor(-3.0, false), 1.0);
        assert_eq!(hardness_factor(1.0 - 6e-8, false), 0.0);
        assert_eq!(hardness_factor(3e-8, true), 0.0);
    }
}
