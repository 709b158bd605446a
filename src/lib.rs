pub mod abort;
pub mod audit;
pub mod config;
pub mod coordinator;
pub mod cycle;
pub mod errors;
pub mod phase;
pub mod services;
pub mod settings;
pub mod sim;
pub mod snapshot;
pub mod ui;
pub mod workflows;

pub use abort::{AbortHandle, AbortSignal};
pub use config::{AutoplayConfig, ProjectBrief};
pub use coordinator::{AutoplayEvent, AutoplayEventKind, AutoplayState, MultiPhaseCoordinator};
pub use cycle::SinglePhaseOrchestrator;
pub use errors::{AutoplayError, CycleError, FailureKind};
pub use phase::Phase;
pub use services::{CycleServices, StudioServices};
pub use settings::{AutoplayToml, Timeouts};
pub use snapshot::SnapshotStack;
