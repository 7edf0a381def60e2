//! Multi-stage Runge–Kutta combination.
//!
//! The derivative operator produces a rate `h` per sub-stage; `combine`
//! folds it into the state with the stage weight. The same routine advances
//! the wavefield and the CPML memory variables so both always sit on the
//! same stage.

use ndarray::{Array4, Zip};

const RK4_A: [f64; 3] = [0.5, 0.5, 1.0];
const RK4_B: [f64; 4] = [1.0 / 6.0, 1.0 / 3.0, 1.0 / 3.0, 1.0 / 6.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrator {
    /// Classical four-stage Runge–Kutta, low-storage form.
    Classical4,
    /// Three-stage TVD (Shu–Osher) Runge–Kutta.
    TvdRk3,
}

/// Per-state scratch: the state at the start of the step and the RK4
/// accumulator.
#[derive(Debug, Clone)]
pub struct StageScratch {
    start: Array4<f64>,
    accum: Array4<f64>,
}

impl StageScratch {
    pub fn new(integrator: Integrator, dim: (usize, usize, usize, usize)) -> Self {
        let accum = match integrator {
            Integrator::Classical4 => Array4::zeros(dim),
            Integrator::TvdRk3 => Array4::zeros((0, 0, 0, 0)),
        };
        StageScratch {
            start: Array4::zeros(dim),
            accum,
        }
    }
}

impl Integrator {
    pub fn stages(self) -> usize {
        match self {
            Integrator::Classical4 => 4,
            Integrator::TvdRk3 => 3,
        }
    }

    /// Folds the rate `h` of sub-stage `stage` into `w`.
    pub fn combine(
        self,
        stage: usize,
        w: &mut Array4<f64>,
        scratch: &mut StageScratch,
        h: &Array4<f64>,
        dt: f64,
    ) {
        if stage == 0 {
            scratch.start.assign(w);
        }
        let start = &scratch.start;
        match self {
            Integrator::Classical4 => {
                let b = dt * RK4_B[stage];
                if stage == 0 {
                    Zip::from(&mut scratch.accum)
                        .and(start)
                        .and(h)
                        .par_for_each(|t, &m, &h| *t = m + b * h);
                } else {
                    Zip::from(&mut scratch.accum)
                        .and(h)
                        .par_for_each(|t, &h| *t += b * h);
                }
                if stage + 1 < RK4_B.len() {
                    let a = dt * RK4_A[stage];
                    Zip::from(w).and(start).and(h).par_for_each(|w, &m, &h| *w = m + a * h);
                } else {
                    w.assign(&scratch.accum);
                }
            }
            Integrator::TvdRk3 => match stage {
                0 => Zip::from(w).and(h).par_for_each(|w, &h| *w += dt * h),
                1 => Zip::from(w)
                    .and(start)
                    .and(h)
                    .par_for_each(|w, &m, &h| *w = 0.75 * m + 0.25 * (*w + dt * h)),
                _ => Zip::from(w).and(start).and(h).par_for_each(|w, &m, &h| {
                    *w = m / 3.0 + 2.0 / 3.0 * (*w + dt * h)
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// One step of y' = λy, evaluating the rate at every stage.
    fn step(integrator: Integrator, lambda: f64, dt: f64) -> f64 {
        let mut w = Array4::from_elem((1, 1, 1, 1), 1.0);
        let mut scratch = StageScratch::new(integrator, w.dim());
        for stage in 0..integrator.stages() {
            let h = w.mapv(|y| lambda * y);
            integrator.combine(stage, &mut w, &mut scratch, &h, dt);
        }
        w[[0, 0, 0, 0]]
    }

    #[test]
    fn classical_matches_fourth_order_taylor() {
        let z: f64 = -0.3;
        let expected = 1.0 + z + z * z / 2.0 + z.powi(3) / 6.0 + z.powi(4) / 24.0;
        assert_relative_eq!(step(Integrator::Classical4, -3.0, 0.1), expected, epsilon = 1e-14);
    }

    #[test]
    fn tvd_matches_third_order_taylor() {
        let z: f64 = 0.2;
        let expected = 1.0 + z + z * z / 2.0 + z.powi(3) / 6.0;
        assert_relative_eq!(step(Integrator::TvdRk3, 2.0, 0.1), expected, epsilon = 1e-14);
    }

    #[test]
    fn zero_rate_keeps_state() {
        for integrator in [Integrator::Classical4, Integrator::TvdRk3] {
            assert_relative_eq!(step(integrator, 0.0, 0.5), 1.0, epsilon = 1e-15);
        }
    }
}
