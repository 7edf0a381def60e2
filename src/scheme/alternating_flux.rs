//! Alternating-flux finite differences with WENO5 reconstruction.
//!
//! The system is written in conservative curvilinear form. Along each
//! computational axis `a` every cell carries twelve flux values:
//!
//! * `J Σ_b M[a][b] T_ib` for the three momentum equations,
//! * `J M[a][b] v_c` for the nine velocity-gradient entries `∂_b v_c`,
//!
//! where `M[a][b] = ∂ξ_a/∂x_b`. Interface values are reconstructed with
//! WENO5-JS, upwinded to the left when the bias sign is `1` and to the
//! right when it is `-1`, and differenced. Dividing the summed differences
//! by `J` recovers the physical derivatives.

use ndarray::{Array4, ArrayView1, ArrayViewMut1, Axis, Zip};

use super::{
    cell_rates, fill_interior, for_each_lane, FreeSurfaceMode, Gradients, SpatialScheme, UpwindBias,
};
use crate::grid::{Subdomain, HALO};
use crate::integrator::Integrator;
use crate::medium::Medium;
use crate::wavefield::{stress_index, Wavefield};

/// Flux quantities per axis: 3 momentum + 9 velocity-gradient.
pub const FLUX_QUANTITIES: usize = 12;

/// Index of the flux for `∂_b v_c`.
pub fn gradient_flux(b: usize, c: usize) -> usize {
    3 + 3 * b + c
}

pub struct AlternatingFlux {
    fluxes: Array4<f64>,
}

impl AlternatingFlux {
    pub fn new(padded: [usize; 3]) -> Self {
        AlternatingFlux {
            fluxes: Array4::zeros((FLUX_QUANTITIES, padded[0], padded[1], padded[2])),
        }
    }

    fn fill_fluxes(&mut self, w: &Wavefield, medium: &Medium, axis: usize) {
        let data = &w.data;
        Zip::indexed(self.fluxes.lanes_mut(Axis(0))).par_for_each(|(i, j, k), mut q| {
            let c = medium.cell([i, j, k]);
            let m = c.metric[axis];
            for row in 0..3 {
                let t: f64 = (0..3).map(|b| m[b] * data[[stress_index(row, b), i, j, k]]).sum();
                q[row] = c.jac * t;
            }
            for b in 0..3 {
                for v in 0..3 {
                    q[gradient_flux(b, v)] = c.jac * m[b] * data[[v, i, j, k]];
                }
            }
        });
    }
}

/// WENO5-JS value at the interface right of `s[2]`, from the five-point
/// upwind stencil `s[0..5]` ordered along the upwind direction.
pub fn weno5(s: [f64; 5]) -> f64 {
    let [a, b, c, d, e] = s;
    let q0 = (2.0 * a - 7.0 * b + 11.0 * c) / 6.0;
    let q1 = (-b + 5.0 * c + 2.0 * d) / 6.0;
    let q2 = (2.0 * c + 5.0 * d - e) / 6.0;

    let b0 = 13.0 / 12.0 * (a - 2.0 * b + c).powi(2) + 0.25 * (a - 4.0 * b + 3.0 * c).powi(2);
    let b1 = 13.0 / 12.0 * (b - 2.0 * c + d).powi(2) + 0.25 * (b - d).powi(2);
    let b2 = 13.0 / 12.0 * (c - 2.0 * d + e).powi(2) + 0.25 * (3.0 * c - 4.0 * d + e).powi(2);

    // Scale-relative epsilon: velocities and stresses differ by many orders
    // of magnitude.
    let eps = 1e-6 * (a * a + b * b + c * c + d * d + e * e) / 5.0 + 1e-100;
    let a0 = 0.1 / (eps + b0).powi(2);
    let a1 = 0.6 / (eps + b1).powi(2);
    let a2 = 0.3 / (eps + b2).powi(2);
    (a0 * q0 + a1 * q1 + a2 * q2) / (a0 + a1 + a2)
}

/// Reconstructed flux at interface `i + 1/2`.
fn interface(f: &ArrayView1<'_, f64>, i: usize, sign: i8) -> f64 {
    if sign > 0 {
        weno5([f[i - 2], f[i - 1], f[i], f[i + 1], f[i + 2]])
    } else {
        weno5([f[i + 3], f[i + 2], f[i + 1], f[i], f[i - 1]])
    }
}

fn lane(f: ArrayView1<'_, f64>, mut d: ArrayViewMut1<'_, f64>, sign: i8, rdh: f64) {
    let n = f.len();
    if n < 2 * HALO + 1 {
        return;
    }
    let mut left = interface(&f, HALO - 1, sign);
    for i in HALO..n - HALO {
        let right = interface(&f, i, sign);
        d[i] = (right - left) * rdh;
        left = right;
    }
}

impl SpatialScheme for AlternatingFlux {
    fn name(&self) -> &'static str {
        "alternating-flux"
    }

    fn integrator(&self) -> Integrator {
        Integrator::TvdRk3
    }

    fn quantities(&self) -> usize {
        FLUX_QUANTITIES
    }

    fn free_surface_mode(&self) -> FreeSurfaceMode {
        FreeSurfaceMode::PerStep
    }

    fn differentiate(
        &mut self,
        w: &Wavefield,
        medium: &Medium,
        bias: UpwindBias,
        dh: f64,
        grads: &mut Gradients,
    ) {
        let rdh = 1.0 / dh;
        for axis in 0..3 {
            self.fill_fluxes(w, medium, axis);
            let sign = bias.sign(axis);
            for q in 0..FLUX_QUANTITIES {
                let src = self.fluxes.index_axis(Axis(0), q);
                let dst = grads.axes[axis].index_axis_mut(Axis(0), q);
                for_each_lane(src, dst, axis, |f, d| lane(f, d, sign, rdh));
            }
        }
    }

    fn assemble(&self, grads: &Gradients, medium: &Medium, sub: &Subdomain, h: &mut Array4<f64>) {
        fill_interior(sub, h, |idx| {
            let c = medium.cell(idx);
            let rjac = 1.0 / c.jac;
            let summed = |q: usize| (0..3).map(|a| grads.get(a, q, idx)).sum::<f64>() * rjac;
            let div_t = std::array::from_fn(|i| summed(i));
            let grad_v =
                std::array::from_fn(|b| std::array::from_fn(|v| summed(gradient_flux(b, v))));
            cell_rates(div_t, grad_v, &c)
        });
    }
}
