//! Boundary treatments: the traction-free top surface, convolutional PML
//! absorbing layers and the Cerjan exponential sponge.

pub mod cpml;
pub mod decay;
pub mod free_surface;

pub use cpml::{Cpml, PmlParams};
pub use decay::{DecayParams, ExpDecay};
pub use free_surface::FreeSurface;

use crate::grid::{Direction, Subdomain};

/// Global faces of `sub` that absorb outgoing energy. The top face is left
/// out when the free surface is active.
pub fn absorbing_faces(sub: &Subdomain, free_surface: bool) -> Vec<Direction> {
    sub.faces
        .iter()
        .filter(|&face| !(free_surface && face == Direction::ZPlus))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;

    #[test]
    fn top_face_absorbs_only_without_free_surface() {
        let grid = Grid::new([8, 8, 8], 10.0, [1, 1, 1]);
        let sub = grid.subdomain(0);
        assert_eq!(absorbing_faces(&sub, false).len(), 6);
        let faces = absorbing_faces(&sub, true);
        assert_eq!(faces.len(), 5);
        assert!(!faces.contains(&Direction::ZPlus));
    }
}
