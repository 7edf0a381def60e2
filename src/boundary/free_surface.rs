//! Traction-free top surface.
//!
//! The plain finite-difference scheme images the field into the ghost
//! layers above the surface before differentiating, then overwrites the
//! vertical velocity derivatives near the surface. The flux scheme instead
//! applies a characteristic correction once per timestep. Inside lateral
//! PML slabs both schemes also redo the traction-free derivative after the
//! stretching, each in its own gradient layout.

use std::ops::Range;

use ndarray::{s, Zip};

use super::Cpml;
use crate::grid::{Subdomain, HALO};
use crate::medium::{CellCoefficients, Medium};
use crate::scheme::{gradient_flux, Gradients};
use crate::wavefield::{Wavefield, TXX, TXZ, TYY, TYZ, TZZ, VX, VY, VZ, WSIZE};

/// Components that carry traction across a horizontal surface.
const TRACTION: [usize; 3] = [TZZ, TXZ, TYZ];

#[derive(Debug, Clone)]
pub struct FreeSurface {
    layer: usize,
    lateral: [Range<usize>; 2],
    dh: f64,
}

impl FreeSurface {
    /// `None` unless `sub` owns the top face.
    pub fn new(sub: &Subdomain) -> Option<Self> {
        sub.surface_layer().map(|layer| FreeSurface {
            layer,
            lateral: [sub.interior(0), sub.interior(1)],
            dh: sub.dh,
        })
    }

    /// Local z index of the surface layer.
    pub fn layer(&self) -> usize {
        self.layer
    }

    /// Zeros the traction components on the surface and mirrors the field
    /// into the ghost layers above it: antisymmetric for traction
    /// components, symmetric for everything else.
    pub fn prepare(&self, w: &mut Wavefield) {
        let top = self.layer;
        for c in TRACTION {
            w.data.slice_mut(s![c, .., .., top]).fill(0.0);
        }
        for n in 1..=HALO {
            for c in 0..WSIZE {
                let sign = if TRACTION.contains(&c) { -1.0 } else { 1.0 };
                let (mut ghost, below) = w
                    .data
                    .multi_slice_mut((s![c, .., .., top + n], s![c, .., .., top - n]));
                Zip::from(&mut ghost).and(&below).for_each(|g, &b| *g = sign * b);
            }
        }
    }

    /// Replaces the ζ-derivatives of velocity on the surface layer by the
    /// traction-free values, and one layer below by a centred stencil that
    /// does not reach the imaged ghosts.
    pub fn correct(&self, w: &Wavefield, medium: &Medium, grads: &mut Gradients) {
        self.impose_traction_free(medium, grads, |_, _| true);

        let below = self.layer - 1;
        let scale = 0.5 / self.dh;
        for i in self.lateral[0].clone() {
            for j in self.lateral[1].clone() {
                for v in [VX, VY, VZ] {
                    let upper = w.get(v, [i, j, self.layer]);
                    let lower = w.get(v, [i, j, below - 1]);
                    grads.set(2, v, [i, j, below], scale * (upper - lower));
                }
            }
        }
    }

    /// Redoes the surface correction inside lateral PML slabs, once their
    /// horizontal derivatives have been stretched.
    pub fn correct_in_pml(&self, medium: &Medium, grads: &mut Gradients, cpml: &Cpml) {
        self.impose_traction_free(medium, grads, |i, j| cpml.covers_lateral(i, j));
    }

    /// Flux-scheme counterpart of [`correct_in_pml`](Self::correct_in_pml):
    /// rewrites the ζ-derivatives of the velocity-gradient fluxes
    /// `J M[ζ][b] v` on surface columns inside lateral PML slabs.
    pub fn correct_flux_in_pml(&self, medium: &Medium, grads: &mut Gradients, cpml: &Cpml) {
        for i in self.lateral[0].clone() {
            for j in self.lateral[1].clone() {
                if !cpml.covers_lateral(i, j) {
                    continue;
                }
                let idx = [i, j, self.layer];
                let c = medium.cell(idx);
                if c.mu <= 0.0 {
                    continue;
                }
                let rjac = 1.0 / c.jac;
                let lateral: [[f64; 3]; 3] = std::array::from_fn(|b| {
                    std::array::from_fn(|v| {
                        (0..2).map(|a| grads.get(a, gradient_flux(b, v), idx)).sum::<f64>() * rjac
                    })
                });
                let dz = traction_free_derivative(&c, lateral);
                for b in 0..3 {
                    for (v, value) in dz.iter().enumerate() {
                        grads.set(2, gradient_flux(b, v), idx, c.jac * c.metric[2][b] * value);
                    }
                }
            }
        }
    }

    fn impose_traction_free<F>(&self, medium: &Medium, grads: &mut Gradients, mask: F)
    where
        F: Fn(usize, usize) -> bool,
    {
        for i in self.lateral[0].clone() {
            for j in self.lateral[1].clone() {
                if !mask(i, j) {
                    continue;
                }
                let idx = [i, j, self.layer];
                let c = medium.cell(idx);
                if c.mu <= 0.0 {
                    continue;
                }
                let lateral = lateral_gradient(&c, grads, idx);
                let dz = traction_free_derivative(&c, lateral);
                for (v, value) in dz.into_iter().enumerate() {
                    grads.set(2, v, idx, value);
                }
            }
        }
    }

    /// Once-per-step correction for the flux scheme: keeps the upgoing
    /// characteristics and zeros the surface traction.
    pub fn characteristic_correction(&self, w: &mut Wavefield, medium: &Medium) {
        let k = self.layer;
        for i in self.lateral[0].clone() {
            for j in self.lateral[1].clone() {
                let idx = [i, j, k];
                let c = medium.cell(idx);
                let modulus = c.lambda + 2.0 * c.mu;
                let p_impedance = (modulus * c.rho()).sqrt();
                let s_impedance = (c.mu * c.rho()).sqrt();
                let [tzz, txz, tyz] = TRACTION.map(|t| w.get(t, idx));

                w.add(VZ, idx, -tzz / p_impedance);
                if s_impedance > 0.0 {
                    w.add(VX, idx, -txz / s_impedance);
                    w.add(VY, idx, -tyz / s_impedance);
                }
                let lateral_stress = -c.lambda / modulus * tzz;
                w.add(TXX, idx, lateral_stress);
                w.add(TYY, idx, lateral_stress);
                for t in TRACTION {
                    w.data[[t, i, j, k]] = 0.0;
                }
            }
        }
    }
}

/// `g[b][v]`: contribution of the two horizontal computational derivatives
/// to the physical `∂_b v_v`.
fn lateral_gradient(c: &CellCoefficients, grads: &Gradients, idx: [usize; 3]) -> [[f64; 3]; 3] {
    std::array::from_fn(|b| {
        std::array::from_fn(|v| (0..2).map(|a| c.metric[a][b] * grads.get(a, v, idx)).sum())
    })
}

/// ζ-derivative of velocity that makes the traction on a ζ = const surface
/// vanish, given the horizontal contributions `lateral[b][v]`.
///
/// Solves `(μ|n|² I + (λ+μ) n nᵀ) Z = -r` in closed form, with `n` the
/// ζ row of the metric.
pub fn traction_free_derivative(c: &CellCoefficients, lateral: [[f64; 3]; 3]) -> [f64; 3] {
    let n = c.metric[2];
    let norm2: f64 = n.iter().map(|x| x * x).sum();
    let div = lateral[0][0] + lateral[1][1] + lateral[2][2];
    let r: [f64; 3] = std::array::from_fn(|a| {
        let shear: f64 = (0..3).map(|b| n[b] * (lateral[a][b] + lateral[b][a])).sum();
        c.lambda * n[a] * div + c.mu * shear
    });
    let n_dot_r: f64 = (0..3).map(|a| n[a] * r[a]).sum();
    let k = (c.lambda + c.mu) / ((c.lambda + 2.0 * c.mu) * norm2);
    std::array::from_fn(|a| -(r[a] - k * n[a] * n_dot_r) / (c.mu * norm2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;
    use approx::assert_relative_eq;

    fn top_rank() -> (Subdomain, FreeSurface) {
        let grid = Grid::new([6, 6, 8], 20.0, [1, 1, 2]);
        let sub = grid.subdomain(1);
        let fs = FreeSurface::new(&sub).unwrap();
        (sub, fs)
    }

    #[test]
    fn only_top_ranks_get_a_surface() {
        let grid = Grid::new([6, 6, 8], 20.0, [1, 1, 2]);
        assert!(FreeSurface::new(&grid.subdomain(0)).is_none());
        let (sub, fs) = top_rank();
        assert_eq!(fs.layer(), HALO + sub.extent[2] - 1);
    }

    #[test]
    fn imaging_mirrors_about_the_surface() {
        let (sub, fs) = top_rank();
        let mut w = Wavefield::for_subdomain(&sub);
        let top = fs.layer();
        let cell = |k| [HALO + 1, HALO + 2, k];
        w.add(TZZ, cell(top), 7.0);
        w.add(TZZ, cell(top - 1), 5.0);
        w.add(TXZ, cell(top - 3), -2.0);
        w.add(VX, cell(top - 2), 3.0);
        w.add(TXX, cell(top - 1), 4.0);

        fs.prepare(&mut w);
        assert_eq!(w.get(TZZ, cell(top)), 0.0);
        assert_eq!(w.get(TZZ, cell(top + 1)), -5.0);
        assert_eq!(w.get(TXZ, cell(top + 3)), 2.0);
        assert_eq!(w.get(VX, cell(top + 2)), 3.0);
        assert_eq!(w.get(TXX, cell(top + 1)), 4.0);
    }

    #[test]
    fn flat_surface_derivatives() {
        let c = CellCoefficients::cartesian(3000.0, 1500.0, 2000.0);
        let mut lateral = [[0.0; 3]; 3];
        lateral[0][0] = 1.0; // ∂x vx
        lateral[1][1] = 0.5; // ∂y vy
        lateral[0][2] = 2.0; // ∂x vz
        lateral[1][2] = -1.0; // ∂y vz
        let dz = traction_free_derivative(&c, lateral);
        assert_relative_eq!(dz[0], -2.0, max_relative = 1e-12);
        assert_relative_eq!(dz[1], 1.0, max_relative = 1e-12);
        let ratio = c.lambda / (c.lambda + 2.0 * c.mu);
        assert_relative_eq!(dz[2], -ratio * 1.5, max_relative = 1e-12);
    }

    #[test]
    fn tilted_surface_has_zero_traction() {
        let mut c = CellCoefficients::cartesian(4000.0, 2200.0, 2600.0);
        c.metric[2] = [0.15, -0.2, 0.95];
        let lateral = [[0.3, -0.1, 0.7], [0.2, 0.4, -0.5], [0.05, 0.1, 0.0]];
        let dz = traction_free_derivative(&c, lateral);
        let n = c.metric[2];

        // Full gradient ∂_b v_v = lateral + n_b Z_v, then Σ_b n_b T_ab.
        let grad: [[f64; 3]; 3] =
            std::array::from_fn(|b| std::array::from_fn(|v| lateral[b][v] + n[b] * dz[v]));
        let div = grad[0][0] + grad[1][1] + grad[2][2];
        let stress = |a: usize, b: usize| {
            let shear = c.mu * (grad[a][b] + grad[b][a]);
            if a == b {
                c.lambda * div + shear
            } else {
                shear
            }
        };
        for a in 0..3 {
            let traction: f64 = (0..3).map(|b| n[b] * stress(a, b)).sum();
            assert!(traction.abs() < 1e-6 * c.mu, "traction[{a}] = {traction}");
        }
    }

    #[test]
    fn correct_uses_centred_stencil_below_surface() {
        let (sub, fs) = top_rank();
        let medium = Medium::homogeneous(sub.padded(), 3000.0, 1700.0, 2200.0);
        let mut w = Wavefield::for_subdomain(&sub);
        let top = fs.layer();
        let (i, j) = (HALO + 2, HALO + 2);
        w.add(VZ, [i, j, top], 4.0);
        w.add(VZ, [i, j, top - 2], 1.0);

        let mut grads = Gradients::new(WSIZE, sub.padded());
        grads.set(2, VZ, [i, j, top], 99.0);
        fs.correct(&w, &medium, &mut grads);
        assert_relative_eq!(grads.get(2, VZ, [i, j, top - 1]), 3.0 / 40.0, max_relative = 1e-12);
        // No lateral motion: the surface derivative vanishes.
        assert_eq!(grads.get(2, VZ, [i, j, top]), 0.0);
    }

    #[test]
    fn flux_correction_in_pml_zeroes_traction_on_tilted_surface() {
        use crate::boundary::PmlParams;
        use crate::integrator::Integrator;
        use crate::scheme::{AlternatingFlux, SpatialScheme};

        let (sub, fs) = top_rank();
        let mut cell = CellCoefficients::cartesian(4000.0, 2200.0, 2600.0);
        cell.metric[2] = [0.15, -0.2, 0.95];
        cell.jac = 1.3;
        let medium = Medium::from_fn(&sub, |_| cell);
        let params = PmlParams {
            thickness: 2,
            reflection: 1e-3,
            kappa_max: 1.0,
            alpha_max: 30.0,
        };
        let quantities = AlternatingFlux::new(sub.padded()).quantities();
        let cpml = Cpml::new(&sub, &params, 4000.0, true, quantities, Integrator::TvdRk3)
            .unwrap()
            .unwrap();

        let edge = [HALO, HALO + 3, fs.layer()];
        let centre = [HALO + 3, HALO + 3, fs.layer()];
        assert!(cpml.covers_lateral(edge[0], edge[1]));
        assert!(!cpml.covers_lateral(centre[0], centre[1]));

        let mut grads = Gradients::new(quantities, sub.padded());
        for idx in [edge, centre] {
            for b in 0..3 {
                for v in 0..3 {
                    let q = gradient_flux(b, v);
                    grads.set(0, q, idx, 0.1 * (b + 1) as f64 - 0.05 * v as f64);
                    grads.set(1, q, idx, 0.02 * (v + 2) as f64 * (b as f64 - 1.0));
                    grads.set(2, q, idx, 7.0);
                }
            }
        }
        fs.correct_flux_in_pml(&medium, &mut grads, &cpml);

        assert_eq!(grads.get(2, gradient_flux(1, 2), centre), 7.0);
        let grad: [[f64; 3]; 3] = std::array::from_fn(|b| {
            std::array::from_fn(|v| {
                (0..3).map(|a| grads.get(a, gradient_flux(b, v), edge)).sum::<f64>() / cell.jac
            })
        });
        let div = grad[0][0] + grad[1][1] + grad[2][2];
        let stress = |a: usize, b: usize| {
            let shear = cell.mu * (grad[a][b] + grad[b][a]);
            if a == b {
                cell.lambda * div + shear
            } else {
                shear
            }
        };
        let n = cell.metric[2];
        for a in 0..3 {
            let traction: f64 = (0..3).map(|b| n[b] * stress(a, b)).sum();
            assert!(traction.abs() < 1e-6 * cell.mu, "traction[{a}] = {traction}");
        }
    }

    #[test]
    fn characteristic_correction_removes_traction() {
        let (sub, fs) = top_rank();
        let medium = Medium::homogeneous(sub.padded(), 3000.0, 1500.0, 2000.0);
        let c = medium.cell([HALO, HALO, HALO]);
        let mut w = Wavefield::for_subdomain(&sub);
        let idx = [HALO + 1, HALO + 1, fs.layer()];
        w.add(TZZ, idx, 6.0e6);
        w.add(TXZ, idx, 3.0e6);
        w.add(VZ, idx, 1.0);

        fs.characteristic_correction(&mut w, &medium);
        assert_relative_eq!(w.get(VZ, idx), 1.0 - 6.0e6 / (2000.0 * 3000.0), max_relative = 1e-12);
        assert_relative_eq!(w.get(VX, idx), -3.0e6 / (2000.0 * 1500.0), max_relative = 1e-12);
        let shift = -c.lambda / (c.lambda + 2.0 * c.mu) * 6.0e6;
        assert_relative_eq!(w.get(TXX, idx), shift, max_relative = 1e-12);
        assert_relative_eq!(w.get(TYY, idx), shift, max_relative = 1e-12);
        for t in TRACTION {
            assert_eq!(w.get(t, idx), 0.0);
        }
    }
}
