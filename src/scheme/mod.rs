//! Spatial derivative operators.
//!
//! A scheme turns the wavefield (interior plus exchanged ghosts) into
//! velocity/stress rates in two steps: `differentiate` produces one-axis
//! derivatives of the scheme's quantities, and `assemble` combines them with
//! the medium into the rate buffer consumed by the integrator. Boundary
//! treatments operate on the per-axis derivatives in between.

mod alternating_flux;
mod finite_difference;

pub use alternating_flux::{gradient_flux, AlternatingFlux};
pub use finite_difference::FiniteDifference;

use ndarray::{Array4, ArrayView1, ArrayView3, ArrayViewMut1, ArrayViewMut3, Axis, Zip};
use serde::{Deserialize, Serialize};

use crate::grid::Subdomain;
use crate::integrator::Integrator;
use crate::medium::{CellCoefficients, Medium};
use crate::wavefield::{stress_index, Wavefield, WSIZE};

/// Upwind-bias sign triples, indexed by `timestep % 8`. `1` is forward,
/// `-1` backward.
pub const FB_TABLE: [[i8; 3]; 8] = [
    [-1, -1, -1],
    [1, 1, -1],
    [1, 1, 1],
    [-1, -1, 1],
    [-1, 1, -1],
    [1, -1, -1],
    [1, -1, 1],
    [-1, 1, 1],
];

/// One-sided direction per axis for the current sub-stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpwindBias(pub [i8; 3]);

impl UpwindBias {
    pub fn for_timestep(it: usize) -> Self {
        UpwindBias(FB_TABLE[it % FB_TABLE.len()])
    }

    pub fn reversed(self) -> Self {
        UpwindBias(self.0.map(|s| -s))
    }

    pub fn sign(&self, axis: usize) -> i8 {
        self.0[axis]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemeKind {
    FiniteDifference,
    AlternatingFlux,
}

/// When the scheme wants its free-surface treatment applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeSurfaceMode {
    /// Ghost imaging before and derivative substitution after every
    /// sub-stage derivative.
    PerStage,
    /// One characteristic correction after each full timestep.
    PerStep,
}

/// Per-axis derivatives of a scheme's quantities, each shaped
/// `(quantities, nx + 2H, ny + 2H, nz + 2H)`.
#[derive(Debug, Clone)]
pub struct Gradients {
    pub axes: [Array4<f64>; 3],
}

impl Gradients {
    pub fn new(quantities: usize, padded: [usize; 3]) -> Self {
        let dim = (quantities, padded[0], padded[1], padded[2]);
        Gradients {
            axes: [Array4::zeros(dim), Array4::zeros(dim), Array4::zeros(dim)],
        }
    }

    pub fn quantities(&self) -> usize {
        self.axes[0].dim().0
    }

    pub fn get(&self, axis: usize, q: usize, idx: [usize; 3]) -> f64 {
        self.axes[axis][[q, idx[0], idx[1], idx[2]]]
    }

    pub fn set(&mut self, axis: usize, q: usize, idx: [usize; 3], value: f64) {
        self.axes[axis][[q, idx[0], idx[1], idx[2]]] = value;
    }
}

pub trait SpatialScheme: Send {
    fn name(&self) -> &'static str;

    fn integrator(&self) -> Integrator;

    /// Number of differentiated quantities per axis.
    fn quantities(&self) -> usize;

    fn free_surface_mode(&self) -> FreeSurfaceMode;

    /// Fills `grads` with one-axis derivatives on interior cells. Reads
    /// interior and ghost layers of `w`; ghosts must be exchanged first.
    fn differentiate(
        &mut self,
        w: &Wavefield,
        medium: &Medium,
        bias: UpwindBias,
        dh: f64,
        grads: &mut Gradients,
    );

    /// Combines `grads` into velocity/stress rates `h` on interior cells.
    fn assemble(&self, grads: &Gradients, medium: &Medium, sub: &Subdomain, h: &mut Array4<f64>);
}

pub fn build(kind: SchemeKind, padded: [usize; 3]) -> Box<dyn SpatialScheme> {
    match kind {
        SchemeKind::FiniteDifference => Box::new(FiniteDifference),
        SchemeKind::AlternatingFlux => Box::new(AlternatingFlux::new(padded)),
    }
}

/// Velocity and stress rates of one cell from the momentum divergence
/// `div_t[i] = Σ_j ∂_j T_ij` and the velocity gradient `grad_v[b][c] = ∂_b v_c`.
pub fn cell_rates(div_t: [f64; 3], grad_v: [[f64; 3]; 3], c: &CellCoefficients) -> [f64; WSIZE] {
    let mut rates = [0.0; WSIZE];
    for i in 0..3 {
        rates[i] = c.buoyancy * div_t[i];
    }
    let trace = grad_v[0][0] + grad_v[1][1] + grad_v[2][2];
    for a in 0..3 {
        for b in a..3 {
            let shear = c.mu * (grad_v[a][b] + grad_v[b][a]);
            rates[stress_index(a, b)] = if a == b { c.lambda * trace + shear } else { shear };
        }
    }
    rates
}

/// Runs a 1D stencil `kernel(src_lane, dst_lane)` over every lane of `src`
/// along `axis`, in parallel.
pub(crate) fn for_each_lane<F>(
    src: ArrayView3<'_, f64>,
    mut dst: ArrayViewMut3<'_, f64>,
    axis: usize,
    kernel: F,
) where
    F: Fn(ArrayView1<'_, f64>, ArrayViewMut1<'_, f64>) + Sync + Send,
{
    Zip::from(dst.lanes_mut(Axis(axis)))
        .and(src.lanes(Axis(axis)))
        .par_for_each(|d, s| kernel(s, d));
}

/// Writes `rate(idx)` into every interior cell of `h`, in parallel.
pub(crate) fn fill_interior<F>(sub: &Subdomain, h: &mut Array4<f64>, rate: F)
where
    F: Fn([usize; 3]) -> [f64; WSIZE] + Sync + Send,
{
    let (xr, yr, zr) = (sub.interior(0), sub.interior(1), sub.interior(2));
    Zip::indexed(h.lanes_mut(Axis(0))).par_for_each(|(i, j, k), mut out| {
        if xr.contains(&i) && yr.contains(&j) && zr.contains(&k) {
            let r = rate([i, j, k]);
            for (o, v) in out.iter_mut().zip(r) {
                *o = v;
            }
        }
    });
}
