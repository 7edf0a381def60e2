use crate::grid::Direction;

/// Failures of the rank-to-rank transport. All of them are fatal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("rank {rank}: neighbor in direction {direction:?} disconnected")]
    Disconnected { rank: usize, direction: Direction },

    #[error("rank {rank}: no neighbor in direction {direction:?}")]
    NoNeighbor { rank: usize, direction: Direction },

    #[error("rank {rank}: halo payload from {direction:?} has {got} values, expected {expected}")]
    PayloadSize {
        rank: usize,
        direction: Direction,
        expected: usize,
        got: usize,
    },

    #[error("computation aborted: {0}")]
    Aborted(String),
}

/// Errors surfaced by the propagation core.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PropagationError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("missing resource: {0}")]
    Resource(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("rank {rank} panicked")]
    RankPanicked { rank: usize },
}

pub type PropagationResult<T> = Result<T, PropagationError>;
