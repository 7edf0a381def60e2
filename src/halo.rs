use std::ops::Range;

use ndarray::{Array4, ArrayView4, Axis, Slice};

use crate::error::{PropagationError, PropagationResult, TransportError};
use crate::grid::{Direction, Subdomain, HALO};
use crate::transport::Transport;

/// Ghost-slab exchange for one rank.
///
/// Axes are exchanged in order x, y, z. Each slab spans the full padded
/// extent of the other two axes, so ghosts received on an earlier axis are
/// forwarded along later ones and edge/corner ghosts end up consistent.
#[derive(Debug, Clone)]
pub struct HaloExchange {
    rank: usize,
    extent: [usize; 3],
    neighbors: [Option<usize>; 6],
}

impl HaloExchange {
    pub fn new(sub: &Subdomain) -> PropagationResult<Self> {
        for direction in Direction::ALL {
            if sub.neighbors.get(direction).is_some() && sub.extent[direction.axis()] < HALO {
                return Err(PropagationError::Config(format!(
                    "rank {} has {} interior points along axis {}, halo exchange needs at least {}",
                    sub.rank,
                    sub.extent[direction.axis()],
                    direction.axis(),
                    HALO
                )));
            }
        }
        Ok(HaloExchange {
            rank: sub.rank,
            extent: sub.extent,
            neighbors: Direction::ALL.map(|d| sub.neighbors.get(d)),
        })
    }

    fn has_neighbor(&self, direction: Direction) -> bool {
        self.neighbors[direction as usize].is_some()
    }

    /// Interior layers sent towards `direction`.
    fn send_range(&self, direction: Direction) -> Range<usize> {
        let n = self.extent[direction.axis()];
        if direction.is_plus() {
            n..n + HALO
        } else {
            HALO..2 * HALO
        }
    }

    /// Ghost layers filled by the neighbor in `direction`.
    fn recv_range(&self, direction: Direction) -> Range<usize> {
        let n = self.extent[direction.axis()];
        if direction.is_plus() {
            n + HALO..n + 2 * HALO
        } else {
            0..HALO
        }
    }

    /// Exchanges ghost slabs of every component of `field` with all valid
    /// neighbors. `field` is shaped `(components, nx + 2H, ny + 2H, nz + 2H)`.
    pub fn exchange<T: Transport + ?Sized>(
        &self,
        transport: &T,
        field: &mut Array4<f64>,
    ) -> Result<(), TransportError> {
        for axis in 0..3 {
            let directions = [Direction::new(axis, false), Direction::new(axis, true)];
            let array_axis = Axis(axis + 1);

            for &direction in &directions {
                if !self.has_neighbor(direction) {
                    continue;
                }
                let slab = field.slice_axis(array_axis, Slice::from(self.send_range(direction)));
                transport.send(direction, slab.iter().copied().collect())?;
            }

            for &direction in &directions {
                if !self.has_neighbor(direction) {
                    continue;
                }
                let payload = transport.recv(direction)?;
                let mut ghost =
                    field.slice_axis_mut(array_axis, Slice::from(self.recv_range(direction)));
                let shape = ghost.raw_dim();
                let expected = ghost.len();
                let received = ArrayView4::from_shape(shape, &payload).map_err(|_| {
                    TransportError::PayloadSize {
                        rank: self.rank,
                        direction,
                        expected,
                        got: payload.len(),
                    }
                })?;
                ghost.assign(&received);
            }
        }
        Ok(())
    }
}
