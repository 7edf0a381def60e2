//! Distributed 3D elastic wave propagation on a curvilinear grid.
//!
//! The grid is split over a `px × py × pz` rank mesh. Each rank owns a
//! padded block of the nine-component velocity/stress field and advances
//! it with either the MacCormack finite-difference scheme or the WENO
//! alternating-flux scheme, exchanging ghost layers with its neighbours
//! every integrator stage.

pub mod boundary;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod grid;
pub mod halo;
pub mod integrator;
pub mod medium;
pub mod scheme;
pub mod simulation;
pub mod source;
pub mod transport;
pub mod wavefield;

pub use config::Config;
pub use error::{PropagationError, PropagationResult, TransportError};
pub use grid::{Direction, Grid, Subdomain, HALO};
pub use medium::{CellCoefficients, Medium};
pub use scheme::SchemeKind;
pub use simulation::{gather_wavefield, run_ranks, RankOutput, Simulation, SimulationParams};
pub use transport::{LocalTransport, ThreadTransport, Transport};
pub use wavefield::Wavefield;
