//! Single-phase generation cycle.
//!
//! - `machine`: pure status/counter transitions
//! - `orchestrator`: drives the service calls for each status

pub mod machine;
pub mod orchestrator;

pub use machine::{CompletionReason, CycleAction, CycleState, CycleStatus};
pub use orchestrator::{CycleOutcome, CycleRequest, SavedImage, SinglePhaseOrchestrator};
