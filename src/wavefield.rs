use ndarray::{s, Array3, Array4, ArrayView3, Axis};

use crate::grid::Subdomain;

// Component layout along axis 0 of the field array.
pub const VX: usize = 0;
pub const VY: usize = 1;
pub const VZ: usize = 2;
pub const TXX: usize = 3;
pub const TYY: usize = 4;
pub const TZZ: usize = 5;
pub const TXY: usize = 6;
pub const TXZ: usize = 7;
pub const TYZ: usize = 8;
pub const WSIZE: usize = 9;

/// Stress component index for the symmetric tensor entry `(a, b)`.
pub fn stress_index(a: usize, b: usize) -> usize {
    match (a.min(b), a.max(b)) {
        (0, 0) => TXX,
        (1, 1) => TYY,
        (2, 2) => TZZ,
        (0, 1) => TXY,
        (0, 2) => TXZ,
        _ => TYZ,
    }
}

pub const COMPONENT_NAMES: [&str; WSIZE] = [
    "Vx", "Vy", "Vz", "Txx", "Tyy", "Tzz", "Txy", "Txz", "Tyz",
];

/// Velocity-stress field over a rank's padded block, shaped
/// `(WSIZE, nx + 2H, ny + 2H, nz + 2H)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Wavefield {
    pub data: Array4<f64>,
}

impl Wavefield {
    pub fn new(padded: [usize; 3]) -> Self {
        Wavefield {
            data: Array4::zeros((WSIZE, padded[0], padded[1], padded[2])),
        }
    }

    pub fn for_subdomain(sub: &Subdomain) -> Self {
        Wavefield::new(sub.padded())
    }

    pub fn padded(&self) -> [usize; 3] {
        let (_, nx, ny, nz) = self.data.dim();
        [nx, ny, nz]
    }

    pub fn component(&self, c: usize) -> ArrayView3<'_, f64> {
        self.data.index_axis(Axis(0), c)
    }

    pub fn get(&self, c: usize, idx: [usize; 3]) -> f64 {
        self.data[[c, idx[0], idx[1], idx[2]]]
    }

    pub fn add(&mut self, c: usize, idx: [usize; 3], value: f64) {
        self.data[[c, idx[0], idx[1], idx[2]]] += value;
    }

    /// Copy of the interior block (ghost layers stripped).
    pub fn interior(&self, sub: &Subdomain) -> Array4<f64> {
        let (x, y, z) = (sub.interior(0), sub.interior(1), sub.interior(2));
        self.data.slice(s![.., x, y, z]).to_owned()
    }

    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|&v| v == 0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// |v| = sqrt(vx² + vy² + vz²) over the padded block.
    pub fn velocity_magnitude(&self) -> Array3<f64> {
        let [nx, ny, nz] = self.padded();
        Array3::from_shape_fn((nx, ny, nz), |(i, j, k)| {
            let vx = self.data[[VX, i, j, k]];
            let vy = self.data[[VY, i, j, k]];
            let vz = self.data[[VZ, i, j, k]];
            (vx * vx + vy * vy + vz * vz).sqrt()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_field_is_zero_and_padded() {
        let w = Wavefield::new([7, 8, 9]);
        assert_eq!(w.data.dim(), (WSIZE, 7, 8, 9));
        assert!(w.is_zero());
    }

    #[test]
    fn stress_index_is_symmetric() {
        for a in 0..3 {
            for b in 0..3 {
                assert_eq!(stress_index(a, b), stress_index(b, a));
            }
        }
        assert_eq!(stress_index(0, 0), TXX);
        assert_eq!(stress_index(1, 0), TXY);
        assert_eq!(stress_index(2, 0), TXZ);
        assert_eq!(stress_index(2, 1), TYZ);
        assert_eq!(stress_index(2, 2), TZZ);
    }

    #[test]
    fn velocity_magnitude_combines_components() {
        let mut w = Wavefield::new([3, 3, 3]);
        w.add(VX, [1, 1, 1], 3.0);
        w.add(VZ, [1, 1, 1], 4.0);
        w.add(TXX, [1, 1, 1], 100.0);
        let mag = w.velocity_magnitude();
        assert_eq!(mag[[1, 1, 1]], 5.0);
        assert_eq!(mag[[0, 0, 0]], 0.0);
    }
}
