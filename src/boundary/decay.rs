//! Cerjan exponential sponge: after each timestep every cell within
//! `thickness` of an absorbing face is multiplied by
//! `exp(-(a (N - i))²)`, where `i` is the distance to the face and `a` is
//! chosen so the outermost cell gets `edge_factor`.

use ndarray::{Axis, Zip};

use crate::grid::{Grid, Subdomain, HALO};
use crate::wavefield::Wavefield;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayParams {
    pub thickness: usize,
    pub edge_factor: f64,
}

impl DecayParams {
    /// Damping factor `dist` cells in from the face.
    pub fn factor(&self, dist: usize) -> f64 {
        let n = self.thickness;
        if dist >= n {
            return 1.0;
        }
        let a = (-self.edge_factor.ln()).sqrt() / n as f64;
        let x = a * (n - dist) as f64;
        (-x * x).exp()
    }
}

#[derive(Debug, Clone)]
pub struct ExpDecay {
    factors: [Vec<f64>; 3],
}

impl ExpDecay {
    /// Per-axis factors for `sub`. Ghost cells are left undamped.
    pub fn new(grid: &Grid, sub: &Subdomain, params: &DecayParams, free_surface: bool) -> Self {
        let dims = grid.dims();
        let padded = sub.padded();
        let factors = std::array::from_fn(|axis| {
            (0..padded[axis])
                .map(|l| {
                    if !sub.interior(axis).contains(&l) {
                        return 1.0;
                    }
                    let g = sub.start[axis] + l - HALO;
                    let mut f = params.factor(g);
                    if !(axis == 2 && free_surface) {
                        f *= params.factor(dims[axis] - 1 - g);
                    }
                    f
                })
                .collect()
        });
        ExpDecay { factors }
    }

    pub fn apply(&self, w: &mut Wavefield) {
        let [fx, fy, fz] = &self.factors;
        Zip::indexed(w.data.lanes_mut(Axis(0))).par_for_each(|(i, j, k), mut lane| {
            let f = fx[i] * fy[j] * fz[k];
            if f < 1.0 {
                lane.mapv_inplace(|v| v * f);
            }
        });
    }
}
