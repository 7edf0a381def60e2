//! Rank-to-rank message passing.
//!
//! `Transport` is the seam between the propagation loop and whatever moves
//! halo slabs between ranks. Two backends ship with the crate: a trivial
//! single-rank one and a shared-memory one that runs every rank on its own
//! thread. Both are blocking; the only way out of a blocked receive or
//! barrier is the shared abort signal, which every failing rank raises so
//! the rest of the computation stops with it.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::error::TransportError;
use crate::grid::{Direction, Grid};

const ABORT_POLL: Duration = Duration::from_millis(20);

pub trait Transport: Send {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Blocks until every rank has arrived.
    fn barrier(&self) -> Result<(), TransportError>;

    /// Sends `payload` to the neighbor in `direction`. That neighbor reads
    /// it with `recv(direction.opposite())`.
    fn send(&self, direction: Direction, payload: Vec<f64>) -> Result<(), TransportError>;

    /// Receives the next payload sent by the neighbor in `direction`.
    fn recv(&self, direction: Direction) -> Result<Vec<f64>, TransportError>;

    /// Stops the whole computation. Every rank blocked in `barrier` or
    /// `recv` returns `TransportError::Aborted`.
    fn abort(&self, reason: &str);
}

/// Transport for a single-rank run: no neighbors, barriers are free.
#[derive(Debug, Default)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn send(&self, direction: Direction, _payload: Vec<f64>) -> Result<(), TransportError> {
        Err(TransportError::NoNeighbor { rank: 0, direction })
    }

    fn recv(&self, direction: Direction) -> Result<Vec<f64>, TransportError> {
        Err(TransportError::NoNeighbor { rank: 0, direction })
    }

    fn abort(&self, reason: &str) {
        error!(rank = 0, reason, "aborting computation");
    }
}

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    aborted: Option<String>,
}

/// Reusable barrier that can be torn down by an abort.
#[derive(Debug)]
struct AbortableBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl AbortableBarrier {
    fn new(parties: usize) -> Self {
        AbortableBarrier {
            parties,
            state: Mutex::new(BarrierState::default()),
            cvar: Condvar::new(),
        }
    }

    fn wait(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.aborted {
            return Err(TransportError::Aborted(reason.clone()));
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation += 1;
            self.cvar.notify_all();
            return Ok(());
        }
        while state.generation == generation && state.aborted.is_none() {
            self.cvar.wait(&mut state);
        }
        if state.generation != generation {
            Ok(())
        } else {
            let reason = state.aborted.clone().unwrap_or_default();
            Err(TransportError::Aborted(reason))
        }
    }

    fn abort(&self, reason: &str) {
        let mut state = self.state.lock();
        if state.aborted.is_none() {
            state.aborted = Some(reason.to_string());
        }
        self.cvar.notify_all();
    }

    fn aborted(&self) -> Option<String> {
        self.state.lock().aborted.clone()
    }
}

/// Shared-memory transport: one endpoint per rank thread, one channel per
/// directed neighbor pair.
pub struct ThreadTransport {
    rank: usize,
    size: usize,
    senders: [Option<Sender<Vec<f64>>>; 6],
    receivers: [Option<Receiver<Vec<f64>>>; 6],
    barrier: Arc<AbortableBarrier>,
}

impl ThreadTransport {
    /// Endpoints for every rank of `grid`, indexed by rank id.
    pub fn mesh(grid: &Grid) -> Vec<ThreadTransport> {
        let size = grid.rank_count();
        let barrier = Arc::new(AbortableBarrier::new(size));
        let mut endpoints: Vec<ThreadTransport> = (0..size)
            .map(|rank| ThreadTransport {
                rank,
                size,
                senders: Default::default(),
                receivers: Default::default(),
                barrier: Arc::clone(&barrier),
            })
            .collect();

        for rank in 0..size {
            let sub = grid.subdomain(rank);
            for direction in Direction::ALL {
                if let Some(peer) = sub.neighbors.get(direction) {
                    // `peer` sends towards us, i.e. in the opposite direction.
                    let (tx, rx) = mpsc::channel();
                    endpoints[rank].receivers[direction as usize] = Some(rx);
                    endpoints[peer].senders[direction.opposite() as usize] = Some(tx);
                }
            }
        }
        debug!(ranks = size, "thread transport mesh built");
        endpoints
    }

    fn aborted_error(&self) -> Option<TransportError> {
        self.barrier.aborted().map(TransportError::Aborted)
    }
}

impl Transport for ThreadTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> Result<(), TransportError> {
        self.barrier.wait()
    }

    fn send(&self, direction: Direction, payload: Vec<f64>) -> Result<(), TransportError> {
        if let Some(err) = self.aborted_error() {
            return Err(err);
        }
        let tx = self.senders[direction as usize]
            .as_ref()
            .ok_or(TransportError::NoNeighbor {
                rank: self.rank,
                direction,
            })?;
        tx.send(payload).map_err(|_| TransportError::Disconnected {
            rank: self.rank,
            direction,
        })
    }

    fn recv(&self, direction: Direction) -> Result<Vec<f64>, TransportError> {
        let rx = self.receivers[direction as usize]
            .as_ref()
            .ok_or(TransportError::NoNeighbor {
                rank: self.rank,
                direction,
            })?;
        loop {
            match rx.recv_timeout(ABORT_POLL) {
                Ok(payload) => return Ok(payload),
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(err) = self.aborted_error() {
                        return Err(err);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(self.aborted_error().unwrap_or(TransportError::Disconnected {
                        rank: self.rank,
                        direction,
                    }));
                }
            }
        }
    }

    fn abort(&self, reason: &str) {
        error!(rank = self.rank, reason, "aborting computation");
        self.barrier.abort(reason);
    }
}
