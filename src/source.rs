//! Seismic source injection.
//!
//! Sources add their contribution once per timestep, before the first
//! sub-stage. The three kinds are independent and may be combined.

use std::f64::consts::PI;

use tracing::debug;

use crate::config::{DoubleCoupleConfig, RickerConfig};
use crate::error::{PropagationError, PropagationResult};
use crate::grid::{Grid, Subdomain, HALO};
use crate::medium::Medium;
use crate::wavefield::{Wavefield, TXX};

/// Half-width of the Gaussian smearing window for distributed sources.
pub const N_GAUSS: usize = 3;

pub trait SourceTerm: Send {
    fn name(&self) -> &'static str;

    /// Adds the contribution of timestep `it` to `w`. Only sub-stage 0
    /// injects.
    fn inject(&self, it: usize, stage: usize, w: &mut Wavefield, medium: &Medium);
}

/// Ricker wavelet with peak frequency `fc`, centred at `t = 0`.
pub fn ricker(t: f64, fc: f64) -> f64 {
    let arg = (PI * fc * t).powi(2);
    (1.0 - 2.0 * arg) * (-arg).exp()
}

/// Body force `A ricker(t - 1.2/fc)` along `direction` at one grid point.
#[derive(Debug, Clone)]
pub struct RickerPointSource {
    cell: Option<[usize; 3]>,
    amplitude: f64,
    frequency: f64,
    delay: f64,
    direction: [f64; 3],
    dt: f64,
    dh: f64,
}

impl RickerPointSource {
    pub fn new(sub: &Subdomain, config: &RickerConfig, dt: f64) -> Self {
        RickerPointSource {
            cell: sub.to_local(config.index),
            amplitude: config.amplitude,
            frequency: config.frequency,
            delay: 1.2 / config.frequency,
            direction: config.direction,
            dt,
            dh: sub.dh,
        }
    }

    pub fn force(&self, t: f64) -> f64 {
        self.amplitude * ricker(t - self.delay, self.frequency)
    }
}

impl SourceTerm for RickerPointSource {
    fn name(&self) -> &'static str {
        "ricker"
    }

    fn inject(&self, it: usize, stage: usize, w: &mut Wavefield, medium: &Medium) {
        let Some(idx) = self.cell else { return };
        if stage != 0 {
            return;
        }
        let c = medium.cell(idx);
        let t = it as f64 * self.dt;
        let scale = c.buoyancy * self.force(t) * self.dt / (c.jac * self.dh.powi(3));
        for (v, d) in self.direction.iter().enumerate() {
            w.add(v, idx, scale * d);
        }
    }
}

/// Moment tensor of a double couple in `(x east, y north, z up)`
/// coordinates, from strike, dip and rake in degrees. Components are
/// ordered `xx, yy, zz, xy, xz, yz`, matching the stress layout.
pub fn double_couple_tensor(strike: f64, dip: f64, rake: f64) -> [f64; 6] {
    let (phi, delta, lambda) = (strike.to_radians(), dip.to_radians(), rake.to_radians());
    let (sd, cd) = delta.sin_cos();
    let (sl, cl) = lambda.sin_cos();
    let (s2d, c2d) = (2.0 * delta).sin_cos();
    let (sp, cp) = phi.sin_cos();
    let (s2p, c2p) = (2.0 * phi).sin_cos();

    // Aki & Richards, north-east-down.
    let m_nn = -(sd * cl * s2p + s2d * sl * sp * sp);
    let m_ee = sd * cl * s2p - s2d * sl * cp * cp;
    let m_dd = s2d * sl;
    let m_ne = sd * cl * c2p + 0.5 * s2d * sl * s2p;
    let m_nd = -(cd * cl * cp + c2d * sl * sp);
    let m_ed = -(cd * cl * sp - c2d * sl * cp);

    [m_ee, m_nn, m_dd, m_ne, -m_ed, -m_nd]
}

/// Scalar seismic moment (N·m) for moment magnitude `mw`.
pub fn seismic_moment(mw: f64) -> f64 {
    10f64.powf(1.5 * mw + 9.1)
}

/// Cosine-bell moment rate of length `duration`, integrating to `m0`.
pub fn cosine_bell_rate(t: f64, duration: f64, m0: f64) -> f64 {
    if t < 0.0 || t > duration {
        return 0.0;
    }
    m0 * (1.0 - (2.0 * PI * t / duration).cos()) / duration
}

#[derive(Debug, Clone)]
pub struct DoubleCoupleSource {
    cell: Option<[usize; 3]>,
    tensor: [f64; 6],
    moment: f64,
    duration: f64,
    dt: f64,
    dh: f64,
}

impl DoubleCoupleSource {
    pub fn new(sub: &Subdomain, config: &DoubleCoupleConfig, dt: f64) -> Self {
        DoubleCoupleSource {
            cell: sub.to_local(config.index),
            tensor: double_couple_tensor(config.strike, config.dip, config.rake),
            moment: seismic_moment(config.magnitude),
            duration: config.duration,
            dt,
            dh: sub.dh,
        }
    }
}

impl SourceTerm for DoubleCoupleSource {
    fn name(&self) -> &'static str {
        "double-couple"
    }

    fn inject(&self, it: usize, stage: usize, w: &mut Wavefield, medium: &Medium) {
        let Some(idx) = self.cell else { return };
        if stage != 0 {
            return;
        }
        let c = medium.cell(idx);
        let rate = cosine_bell_rate(it as f64 * self.dt, self.duration, self.moment);
        let scale = rate * self.dt / (c.jac * self.dh.powi(3));
        for (n, m) in self.tensor.iter().enumerate() {
            w.add(TXX + n, idx, -m * scale);
        }
    }
}

/// One point of a distributed source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePoint {
    pub index: [usize; 3],
    /// Unit moment tensor, `xx, yy, zz, xy, xz, yz`.
    pub tensor: [f64; 6],
    /// Moment rate per timestep; at least `NT` samples.
    pub rate: Vec<f64>,
}

/// Distributed source as handed over by the source-data collaborator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiSourceData {
    pub points: Vec<SourcePoint>,
}

impl MultiSourceData {
    pub fn validate(&self, grid: &Grid, nt: usize) -> PropagationResult<()> {
        for (n, point) in self.points.iter().enumerate() {
            let [i, j, k] = point.index;
            if !grid.in_bounds(i, j, k) {
                return Err(PropagationError::Config(format!(
                    "source point {} at {:?} is outside the grid",
                    n, point.index
                )));
            }
            if point.rate.len() < nt {
                return Err(PropagationError::Resource(format!(
                    "source point {} has {} moment-rate samples, {} steps requested",
                    n,
                    point.rate.len(),
                    nt
                )));
            }
        }
        Ok(())
    }
}

/// Normalized 3D Gaussian weights over a `(2n+1)³` window, indexed
/// `[di + n][dj + n][dk + n]` flattened x-major.
pub fn gauss_factors(n: usize) -> Vec<f64> {
    let width = 2 * n + 1;
    let ra = 0.5 * n as f64;
    let mut factors = Vec::with_capacity(width.pow(3));
    for i in 0..width {
        for j in 0..width {
            for k in 0..width {
                let r2 = [i, j, k]
                    .iter()
                    .map(|&d| (d as f64 - n as f64).powi(2))
                    .sum::<f64>();
                factors.push((-r2 / (ra * ra)).exp());
            }
        }
    }
    let total: f64 = factors.iter().sum();
    factors.iter_mut().for_each(|f| *f /= total);
    factors
}

#[derive(Debug, Clone)]
struct Contribution {
    point: usize,
    cell: [usize; 3],
    tensor: [f64; 6],
}

/// Gaussian-smeared moment-tensor sources prepared for one rank.
#[derive(Debug, Clone)]
pub struct MultiSource {
    contributions: Vec<Contribution>,
    rates: Vec<Vec<f64>>,
    dt: f64,
}

impl MultiSource {
    /// Prepares every point whose window touches this rank's interior.
    ///
    /// With `free_surface`, window cells above the top of the grid are
    /// dropped and the remaining weights renormalized. With
    /// `per_cell_jacobian` each increment is scaled by `J_src / J_cell`.
    pub fn new(
        grid: &Grid,
        sub: &Subdomain,
        data: &MultiSourceData,
        medium: &Medium,
        dt: f64,
        free_surface: bool,
        per_cell_jacobian: bool,
    ) -> Self {
        let n = N_GAUSS as isize;
        let width = 2 * N_GAUSS + 1;
        let gauss = gauss_factors(N_GAUSS);
        let top = grid.nz as isize - 1;
        let volume = sub.dh.powi(3);

        let mut contributions = Vec::new();
        let mut rates = Vec::new();
        for point in &data.points {
            let src = point.index.map(|g| g as isize);
            let Some(src_local) = padded_local(sub, src) else {
                continue;
            };
            let j_src = medium.cell(src_local).jac;

            let mut kept = 0.0;
            let mut cells = Vec::new();
            for (w, weight) in gauss.iter().enumerate() {
                let off = [w / (width * width), (w / width) % width, w % width]
                    .map(|d| d as isize - n);
                let g = [src[0] + off[0], src[1] + off[1], src[2] + off[2]];
                if free_surface && g[2] > top {
                    continue;
                }
                kept += weight;
                if let Some(cell) = interior_local(sub, g) {
                    cells.push((cell, *weight));
                }
            }
            if cells.is_empty() {
                continue;
            }

            let slot = rates.len();
            rates.push(point.rate.clone());
            for (cell, weight) in cells {
                let mut scale = weight / kept / (j_src * volume);
                if per_cell_jacobian {
                    scale *= j_src / medium.cell(cell).jac;
                }
                contributions.push(Contribution {
                    point: slot,
                    cell,
                    tensor: point.tensor.map(|m| m * scale),
                });
            }
        }
        debug!(
            rank = sub.rank,
            points = rates.len(),
            cells = contributions.len(),
            "multi-source prepared"
        );
        MultiSource {
            contributions,
            rates,
            dt,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }
}

impl SourceTerm for MultiSource {
    fn name(&self) -> &'static str {
        "multi-source"
    }

    fn inject(&self, it: usize, stage: usize, w: &mut Wavefield, _medium: &Medium) {
        if stage != 0 {
            return;
        }
        for c in &self.contributions {
            let rate = self.rates[c.point].get(it).copied().unwrap_or(0.0);
            for (n, m) in c.tensor.iter().enumerate() {
                w.add(TXX + n, c.cell, -m * rate * self.dt);
            }
        }
    }
}

/// Local index of global `g` anywhere in the padded block.
fn padded_local(sub: &Subdomain, g: [isize; 3]) -> Option<[usize; 3]> {
    let padded = sub.padded();
    let mut local = [0; 3];
    for a in 0..3 {
        let l = g[a] - sub.start[a] as isize + HALO as isize;
        if l < 0 || l >= padded[a] as isize {
            return None;
        }
        local[a] = l as usize;
    }
    Some(local)
}

fn interior_local(sub: &Subdomain, g: [isize; 3]) -> Option<[usize; 3]> {
    if g.iter().any(|&v| v < 0) {
        return None;
    }
    sub.to_local(g.map(|v| v as usize))
}
