use ndarray::{Array4, ArrayView1, ArrayViewMut1, Axis};

use super::{
    cell_rates, fill_interior, for_each_lane, FreeSurfaceMode, Gradients, SpatialScheme, UpwindBias,
};
use crate::grid::{Subdomain, HALO};
use crate::integrator::Integrator;
use crate::medium::Medium;
use crate::wavefield::{stress_index, Wavefield, WSIZE};

/// Plain finite differences: MacCormack-type 2–4 one-sided stencils whose
/// direction alternates with the upwind bias, combined by classical RK4.
#[derive(Debug, Clone, Copy, Default)]
pub struct FiniteDifference;

/// Undivided one-sided difference at `i`; divide by `6 * dh`.
pub fn one_sided(u: &ArrayView1<'_, f64>, i: usize, sign: i8) -> f64 {
    if sign > 0 {
        7.0 * (u[i + 1] - u[i]) - (u[i + 2] - u[i + 1])
    } else {
        7.0 * (u[i] - u[i - 1]) - (u[i - 1] - u[i - 2])
    }
}

fn lane(u: ArrayView1<'_, f64>, mut d: ArrayViewMut1<'_, f64>, sign: i8, scale: f64) {
    let n = u.len();
    for i in HALO..n.saturating_sub(HALO) {
        d[i] = scale * one_sided(&u, i, sign);
    }
}

impl SpatialScheme for FiniteDifference {
    fn name(&self) -> &'static str {
        "finite-difference"
    }

    fn integrator(&self) -> Integrator {
        Integrator::Classical4
    }

    fn quantities(&self) -> usize {
        WSIZE
    }

    fn free_surface_mode(&self) -> FreeSurfaceMode {
        FreeSurfaceMode::PerStage
    }

    fn differentiate(
        &mut self,
        w: &Wavefield,
        _medium: &Medium,
        bias: UpwindBias,
        dh: f64,
        grads: &mut Gradients,
    ) {
        let scale = 1.0 / (6.0 * dh);
        for axis in 0..3 {
            let sign = bias.sign(axis);
            for c in 0..WSIZE {
                let dst = grads.axes[axis].index_axis_mut(Axis(0), c);
                for_each_lane(w.component(c), dst, axis, |u, d| lane(u, d, sign, scale));
            }
        }
    }

    fn assemble(&self, grads: &Gradients, medium: &Medium, sub: &Subdomain, h: &mut Array4<f64>) {
        fill_interior(sub, h, |idx| {
            let c = medium.cell(idx);
            // phys[q][b] = ∂_b q
            let mut phys = [[0.0; 3]; WSIZE];
            for (q, row) in phys.iter_mut().enumerate() {
                for (b, value) in row.iter_mut().enumerate() {
                    *value = (0..3).map(|a| c.metric[a][b] * grads.get(a, q, idx)).sum();
                }
            }
            let div_t = std::array::from_fn(|i| (0..3).map(|b| phys[stress_index(i, b)][b]).sum());
            let grad_v = std::array::from_fn(|b| std::array::from_fn(|v| phys[v][b]));
            cell_rates(div_t, grad_v, &c)
        });
    }
}
