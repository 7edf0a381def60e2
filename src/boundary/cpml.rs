//! Convolutional perfectly matched layers.
//!
//! Each absorbing face owned by a rank carries a slab of memory variables,
//! one per differentiated quantity and cell. Every sub-stage the derivative
//! across the face is stretched, `D' = D/κ - ψ`, and `ψ` is advanced with
//! `ψ̇ = -(d/κ + α) ψ + (d/κ²) D` by the same integrator stage as the
//! wavefield.

use ndarray::{s, Array4, Axis, Zip};
use tracing::debug;

use super::absorbing_faces;
use crate::error::{PropagationError, PropagationResult};
use crate::grid::{Direction, Subdomain, HALO};
use crate::integrator::{Integrator, StageScratch};
use crate::scheme::Gradients;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PmlParams {
    /// Layer thickness in cells.
    pub thickness: usize,
    /// Target reflection coefficient `R`.
    pub reflection: f64,
    pub kappa_max: f64,
    /// Usually `π f0` for dominant source frequency `f0`.
    pub alpha_max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PmlProfile {
    pub d: f64,
    pub kappa: f64,
    pub alpha: f64,
}

impl PmlParams {
    /// Damping profile at normalized depth `r ∈ (0, 1]`, `1` being the
    /// outermost cell.
    pub fn profile(&self, r: f64, vp_max: f64, dh: f64) -> PmlProfile {
        let length = self.thickness as f64 * dh;
        let d0 = -3.0 * vp_max * self.reflection.ln() / (2.0 * length);
        PmlProfile {
            d: d0 * r * r,
            kappa: 1.0 + (self.kappa_max - 1.0) * r * r,
            alpha: self.alpha_max * (1.0 - r),
        }
    }
}

#[derive(Debug)]
struct PmlLayer {
    face: Direction,
    origin: [usize; 3],
    profile: Vec<PmlProfile>,
    psi: Array4<f64>,
    rate: Array4<f64>,
    scratch: StageScratch,
}

impl PmlLayer {
    fn covers(&self, axis: usize, idx: usize) -> bool {
        let start = self.origin[axis];
        idx >= start && idx < start + self.profile.len()
    }
}

#[derive(Debug)]
pub struct Cpml {
    layers: Vec<PmlLayer>,
    integrator: Integrator,
}

impl Cpml {
    /// Allocates memory variables for every absorbing face owned by `sub`.
    /// Returns `None` when the rank owns no such face.
    pub fn new(
        sub: &Subdomain,
        params: &PmlParams,
        vp_max: f64,
        free_surface: bool,
        quantities: usize,
        integrator: Integrator,
    ) -> PropagationResult<Option<Self>> {
        let n = params.thickness;
        let faces = absorbing_faces(sub, free_surface);
        if n == 0 || faces.is_empty() {
            return Ok(None);
        }

        let mut layers = Vec::with_capacity(faces.len());
        for face in faces {
            let axis = face.axis();
            if sub.extent[axis] < n {
                return Err(PropagationError::Config(format!(
                    "rank {} owns face {:?} with {} interior points, PML needs {}",
                    sub.rank, face, sub.extent[axis], n
                )));
            }
            let mut origin = [HALO; 3];
            let mut shape = sub.extent;
            shape[axis] = n;
            if face.is_plus() {
                origin[axis] = HALO + sub.extent[axis] - n;
            }
            let profile = (0..n)
                .map(|m| {
                    let depth = if face.is_plus() { m + 1 } else { n - m };
                    params.profile(depth as f64 / n as f64, vp_max, sub.dh)
                })
                .collect();
            let dim = (quantities, shape[0], shape[1], shape[2]);
            layers.push(PmlLayer {
                face,
                origin,
                profile,
                psi: Array4::zeros(dim),
                rate: Array4::zeros(dim),
                scratch: StageScratch::new(integrator, dim),
            });
        }
        debug!(rank = sub.rank, layers = layers.len(), thickness = n, "CPML allocated");
        Ok(Some(Cpml { layers, integrator }))
    }

    #[cfg(test)]
    fn faces(&self) -> Vec<Direction> {
        self.layers.iter().map(|l| l.face).collect()
    }

    /// Stretches the derivatives across each owned face and records the
    /// memory-variable rates.
    pub fn apply(&mut self, grads: &mut Gradients) {
        for layer in &mut self.layers {
            let axis = layer.face.axis();
            let [ox, oy, oz] = layer.origin;
            let (_, lx, ly, lz) = layer.psi.dim();
            let profile = &layer.profile;
            let mut slab =
                grads.axes[axis].slice_mut(s![.., ox..ox + lx, oy..oy + ly, oz..oz + lz]);
            Zip::indexed(slab.lanes_mut(Axis(0)))
                .and(layer.psi.lanes(Axis(0)))
                .and(layer.rate.lanes_mut(Axis(0)))
                .par_for_each(|(i, j, k), mut d, psi, mut rate| {
                    let p = profile[[i, j, k][axis]];
                    let decay = p.d / p.kappa + p.alpha;
                    let gain = p.d / (p.kappa * p.kappa);
                    for q in 0..d.len() {
                        let raw = d[q];
                        d[q] = raw / p.kappa - psi[q];
                        rate[q] = -decay * psi[q] + gain * raw;
                    }
                });
        }
    }

    /// Advances the memory variables by integrator stage `stage`.
    pub fn combine(&mut self, stage: usize, dt: f64) {
        for layer in &mut self.layers {
            self.integrator
                .combine(stage, &mut layer.psi, &mut layer.scratch, &layer.rate, dt);
        }
    }

    /// Whether local column `(i, j)` lies in an x or y slab.
    pub fn covers_lateral(&self, i: usize, j: usize) -> bool {
        self.layers.iter().any(|l| match l.face.axis() {
            0 => l.covers(0, i),
            1 => l.covers(1, j),
            _ => false,
        })
    }

    #[cfg(test)]
    fn memory_max_abs(&self) -> f64 {
        self.layers
            .iter()
            .flat_map(|l| l.psi.iter())
            .fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn params() -> PmlParams {
        PmlParams {
            thickness: 4,
            reflection: 1e-3,
            kappa_max: 3.0,
            alpha_max: PI * 10.0,
        }
    }

    #[test]
    fn profile_endpoints() {
        let p = params();
        let d0 = -3.0 * 3000.0 * (1e-3_f64).ln() / (2.0 * 4.0 * 25.0);
        let outer = p.profile(1.0, 3000.0, 25.0);
        assert_relative_eq!(outer.d, d0, max_relative = 1e-12);
        assert_relative_eq!(outer.kappa, 3.0);
        assert_eq!(outer.alpha, 0.0);
        let inner = p.profile(0.25, 3000.0, 25.0);
        assert_relative_eq!(inner.d, d0 / 16.0, max_relative = 1e-12);
        assert_relative_eq!(inner.kappa, 1.125);
        assert_relative_eq!(inner.alpha, 0.75 * PI * 10.0, max_relative = 1e-12);
    }

    #[test]
    fn faces_follow_ownership_and_free_surface() {
        let grid = Grid::new([12, 10, 10], 25.0, [2, 1, 1]);
        let left = grid.subdomain(0);
        let cpml = Cpml::new(&left, &params(), 3000.0, true, 9, Integrator::Classical4)
            .unwrap()
            .unwrap();
        let faces = cpml.faces();
        assert_eq!(faces.len(), 4);
        assert!(faces.contains(&Direction::XMinus));
        assert!(!faces.contains(&Direction::XPlus));
        assert!(!faces.contains(&Direction::ZPlus));

        let cpml = Cpml::new(&left, &params(), 3000.0, false, 9, Integrator::Classical4)
            .unwrap()
            .unwrap();
        assert_eq!(cpml.faces().len(), 5);
    }

    #[test]
    fn thin_owner_is_rejected() {
        let grid = Grid::new([6, 10, 10], 25.0, [2, 1, 1]);
        let err = Cpml::new(&grid.subdomain(1), &params(), 3000.0, true, 9, Integrator::TvdRk3)
            .unwrap_err();
        assert!(matches!(err, PropagationError::Config(_)));
    }

    #[test]
    fn interior_rank_has_no_layers() {
        let grid = Grid::new([15, 15, 15], 25.0, [3, 3, 3]);
        let centre = grid.subdomain(grid.rank_id([1, 1, 1]));
        let cpml = Cpml::new(&centre, &params(), 3000.0, true, 9, Integrator::TvdRk3).unwrap();
        assert!(cpml.is_none());
    }

    #[test]
    fn stretching_and_memory_update() {
        let grid = Grid::new([10, 10, 10], 25.0, [1, 1, 1]);
        let sub = grid.subdomain(0);
        let p = params();
        let mut cpml = Cpml::new(&sub, &p, 3000.0, true, 2, Integrator::TvdRk3)
            .unwrap()
            .unwrap();
        let mut grads = Gradients::new(2, sub.padded());
        let outer = [HALO, HALO + 5, HALO + 5];
        let centre = [HALO + 5, HALO + 5, HALO + 5];
        grads.set(0, 1, outer, 2.0);
        grads.set(0, 1, centre, 2.0);

        cpml.apply(&mut grads);
        let prof = p.profile(1.0, 3000.0, 25.0);
        assert_relative_eq!(grads.get(0, 1, outer), 2.0 / prof.kappa, max_relative = 1e-12);
        assert_eq!(grads.get(0, 1, centre), 2.0);
        assert!(cpml.covers_lateral(HALO, HALO + 5));
        assert!(!cpml.covers_lateral(HALO + 5, HALO + 5));

        let dt = 1e-3;
        cpml.combine(0, dt);
        let gain = prof.d / (prof.kappa * prof.kappa);
        assert_relative_eq!(cpml.memory_max_abs(), dt * gain * 2.0, max_relative = 1e-12);
    }
}
