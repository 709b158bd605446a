//! Multi-phase coordinator.
//!
//! - `state`: observable `AutoplayState` and its pure reducer
//! - `events`: structured events and the reporter publishing state and events
//! - `runner`: `MultiPhaseCoordinator`, which performs the side effects

pub mod events;
pub mod runner;
pub mod state;

pub use events::{AutoplayEvent, AutoplayEventKind};
pub use runner::MultiPhaseCoordinator;
pub use state::{AutoplayAction, AutoplayState, PhaseFailure, reduce};
