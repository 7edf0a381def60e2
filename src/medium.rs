use ndarray::Array4;

use crate::error::{PropagationError, PropagationResult};
use crate::grid::Subdomain;

// Coefficient layout along axis 0 of the medium tensor. The metric term
// ∂ξ_a/∂x_b lives at `3 * a + b`.
pub const JAC: usize = 9;
pub const LAMBDA: usize = 10;
pub const MU: usize = 11;
pub const BUOYANCY: usize = 12;
pub const CJM_SIZE: usize = 13;

/// Coefficients of one cell, unpacked from the medium tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellCoefficients {
    pub metric: [[f64; 3]; 3],
    pub jac: f64,
    pub lambda: f64,
    pub mu: f64,
    pub buoyancy: f64,
}

impl CellCoefficients {
    /// Cartesian cell (identity metric, unit Jacobian) from wave speeds.
    pub fn cartesian(vp: f64, vs: f64, rho: f64) -> Self {
        let (lambda, mu) = lame(vp, vs, rho);
        CellCoefficients {
            metric: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            jac: 1.0,
            lambda,
            mu,
            buoyancy: 1.0 / rho,
        }
    }

    pub fn rho(&self) -> f64 {
        1.0 / self.buoyancy
    }

    pub fn vp(&self) -> f64 {
        ((self.lambda + 2.0 * self.mu) * self.buoyancy).sqrt()
    }

    pub fn vs(&self) -> f64 {
        (self.mu * self.buoyancy).sqrt()
    }
}

/// Lamé parameters from P/S velocities and density.
pub fn lame(vp: f64, vs: f64, rho: f64) -> (f64, f64) {
    let mu = rho * vs * vs;
    let lambda = rho * vp * vp - 2.0 * mu;
    (lambda, mu)
}

/// Per-cell medium tensor over a rank's padded block (ghosts included),
/// shaped `(CJM_SIZE, nx + 2H, ny + 2H, nz + 2H)`. Read-only during
/// propagation.
#[derive(Debug, Clone, PartialEq)]
pub struct Medium {
    pub data: Array4<f64>,
}

impl Medium {
    pub fn homogeneous(padded: [usize; 3], vp: f64, vs: f64, rho: f64) -> Self {
        let cell = CellCoefficients::cartesian(vp, vs, rho);
        let mut medium = Medium {
            data: Array4::zeros((CJM_SIZE, padded[0], padded[1], padded[2])),
        };
        for i in 0..padded[0] {
            for j in 0..padded[1] {
                for k in 0..padded[2] {
                    medium.set_cell([i, j, k], &cell);
                }
            }
        }
        medium
    }

    /// Build a medium by evaluating `f` at the global index of every padded
    /// cell. Ghost cells at the global edge receive indices outside the grid;
    /// `f` decides what to return there.
    pub fn from_fn<F>(sub: &Subdomain, f: F) -> Self
    where
        F: Fn([isize; 3]) -> CellCoefficients,
    {
        let padded = sub.padded();
        let mut medium = Medium {
            data: Array4::zeros((CJM_SIZE, padded[0], padded[1], padded[2])),
        };
        for i in 0..padded[0] {
            for j in 0..padded[1] {
                for k in 0..padded[2] {
                    let cell = f(sub.to_global([i, j, k]));
                    medium.set_cell([i, j, k], &cell);
                }
            }
        }
        medium
    }

    pub fn padded(&self) -> [usize; 3] {
        let (_, nx, ny, nz) = self.data.dim();
        [nx, ny, nz]
    }

    pub fn cell(&self, idx: [usize; 3]) -> CellCoefficients {
        let [i, j, k] = idx;
        let d = &self.data;
        CellCoefficients {
            metric: std::array::from_fn(|a| std::array::from_fn(|b| d[[3 * a + b, i, j, k]])),
            jac: d[[JAC, i, j, k]],
            lambda: d[[LAMBDA, i, j, k]],
            mu: d[[MU, i, j, k]],
            buoyancy: d[[BUOYANCY, i, j, k]],
        }
    }

    pub fn set_cell(&mut self, idx: [usize; 3], cell: &CellCoefficients) {
        let [i, j, k] = idx;
        for a in 0..3 {
            for b in 0..3 {
                self.data[[3 * a + b, i, j, k]] = cell.metric[a][b];
            }
        }
        self.data[[JAC, i, j, k]] = cell.jac;
        self.data[[LAMBDA, i, j, k]] = cell.lambda;
        self.data[[MU, i, j, k]] = cell.mu;
        self.data[[BUOYANCY, i, j, k]] = cell.buoyancy;
    }

    pub fn max_vp(&self) -> f64 {
        let [nx, ny, nz] = self.padded();
        let mut vp_max = 0.0_f64;
        for i in 0..nx {
            for j in 0..ny {
                for k in 0..nz {
                    vp_max = vp_max.max(self.cell([i, j, k]).vp());
                }
            }
        }
        vp_max
    }

    /// Checks the tensor covers `sub` and holds physical values.
    pub fn validate(&self, sub: &Subdomain) -> PropagationResult<()> {
        if self.padded() != sub.padded() {
            return Err(PropagationError::Resource(format!(
                "medium tensor has padded shape {:?}, rank {} needs {:?}",
                self.padded(),
                sub.rank,
                sub.padded()
            )));
        }
        if self.data.iter().any(|v| !v.is_finite()) {
            return Err(PropagationError::Resource(
                "medium tensor contains non-finite values".to_string(),
            ));
        }
        let bad = self
            .data
            .index_axis(ndarray::Axis(0), JAC)
            .iter()
            .zip(self.data.index_axis(ndarray::Axis(0), BUOYANCY).iter())
            .any(|(&jac, &b)| jac <= 0.0 || b <= 0.0);
        if bad {
            return Err(PropagationError::Resource(
                "medium tensor has non-positive Jacobian or buoyancy".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;
    use approx::assert_relative_eq;

    #[test]
    fn lame_matches_velocities() {
        let cell = CellCoefficients::cartesian(6000.0, 3464.0, 2700.0);
        assert_relative_eq!(cell.vp(), 6000.0, max_relative = 1e-12);
        assert_relative_eq!(cell.vs(), 3464.0, max_relative = 1e-12);
        assert_relative_eq!(cell.rho(), 2700.0, max_relative = 1e-12);
    }

    #[test]
    fn homogeneous_round_trips_cells() {
        let medium = Medium::homogeneous([4, 5, 6], 3000.0, 1500.0, 2000.0);
        let cell = medium.cell([3, 4, 5]);
        assert_eq!(cell, CellCoefficients::cartesian(3000.0, 1500.0, 2000.0));
        assert_relative_eq!(medium.max_vp(), 3000.0, max_relative = 1e-12);
    }

    #[test]
    fn from_fn_sees_global_indices() {
        let grid = Grid::new([6, 6, 6], 10.0, [1, 1, 2]);
        let upper = grid.subdomain(1);
        let medium = Medium::from_fn(&upper, |g| {
            CellCoefficients::cartesian(2000.0 + g[2] as f64, 1000.0, 2000.0)
        });
        let top = upper.to_local([0, 0, 5]).unwrap();
        assert_relative_eq!(medium.cell(top).vp(), 2005.0, max_relative = 1e-12);
        assert!(medium.validate(&upper).is_ok());
    }

    #[test]
    fn validate_rejects_wrong_shape() {
        let grid = Grid::new([6, 6, 6], 10.0, [1, 1, 1]);
        let sub = grid.subdomain(0);
        let medium = Medium::homogeneous([3, 3, 3], 2000.0, 1000.0, 2000.0);
        assert!(matches!(
            medium.validate(&sub),
            Err(PropagationError::Resource(_))
        ));
    }
}
