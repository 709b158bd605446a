//! Typed error hierarchy for the autoplay engine.
//!
//! Two top-level enums cover the two layers:
//! - `CycleError`: single-phase orchestrator failures
//! - `AutoplayError`: coordinator API misuse and configuration problems
//!
//! Failures that happen *during* a run are not surfaced as `Err`; they end the run in
//! the `error` phase and are described by `FailureKind` on the observable state.

use crate::cycle::CycleStatus;
use crate::phase::Phase;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// The cycle step an injected service call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStep {
    Generate,
    Evaluate,
    Polish,
    Save,
    ApplyFeedback,
}

impl std::fmt::Display for CycleStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleStep::Generate => write!(f, "generate"),
            CycleStep::Evaluate => write!(f, "evaluate"),
            CycleStep::Polish => write!(f, "polish"),
            CycleStep::Save => write!(f, "save"),
            CycleStep::ApplyFeedback => write!(f, "apply feedback"),
        }
    }
}

/// Errors from the single-phase orchestrator.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("{step} step failed: {source}")]
    Service {
        step: CycleStep,
        #[source]
        source: anyhow::Error,
    },

    #[error("Cycle stalled: no completion within {}s", .after.as_secs())]
    TimedOut { after: Duration },

    #[error("Orchestrator is {status} and must be reset before starting a new run")]
    NotIdle { status: CycleStatus },
}

impl CycleError {
    pub fn service(step: CycleStep, source: anyhow::Error) -> Self {
        Self::Service { step, source }
    }

    /// Whether this error came from a safety-net timeout rather than a service.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

/// Classification of a run-ending failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// An injected service rejected
    Service,
    /// A safety-net timeout fired
    Timeout,
    /// The restart budget for a phase ran out without meeting its target
    Exhausted,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Service => write!(f, "service"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Errors from the coordinator API.
#[derive(Debug, Error)]
pub enum AutoplayError {
    #[error("Retry is only available from the error phase (current phase: {phase})")]
    RetryUnavailable { phase: Phase },

    #[error("Invalid autoplay config: {0}")]
    InvalidConfig(String),

    #[error("No configuration to resume: the run was reset or never started")]
    MissingConfig,

    #[error(transparent)]
    Cycle(#[from] CycleError),
}
