//! Pure state machine for one generation cycle.
//!
//! The machine only holds counters and a status tag. It performs no I/O and makes no
//! timing decisions; the orchestrator feeds it actions and acts on the new status.

use serde::{Deserialize, Serialize};

/// Status of a single-phase run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    #[default]
    Idle,
    Generating,
    Evaluating,
    Polishing,
    Refining,
    Complete,
    Error,
    Aborted,
}

impl CycleStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Aborted)
    }

    /// Whether a run is in flight.
    pub fn is_running(&self) -> bool {
        !self.is_terminal() && *self != Self::Idle
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Generating => "generating",
            Self::Evaluating => "evaluating",
            Self::Polishing => "polishing",
            Self::Refining => "refining",
            Self::Complete => "complete",
            Self::Error => "error",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Why a single-phase run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// Saved count reached the target
    TargetMet,
    /// Iteration budget used up before the target was met
    MaxIterations,
    Error,
    Timeout,
    Aborted,
}

impl CompletionReason {
    /// Whether the owner should halt rather than advance or restart.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Error | Self::Timeout)
    }
}

/// Inputs to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleAction {
    Start { target_saved: u32, max_iterations: u32 },
    ImagesReady { count: usize },
    Evaluated { polish_candidates: usize },
    Polished,
    ImageSaved,
    IterationDone,
    Fail { message: String },
    TimedOut { message: String },
    Abort,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CycleState {
    pub status: CycleStatus,
    /// 1-based iteration number; zero before the first start
    pub current_iteration: u32,
    pub max_iterations: u32,
    pub target_saved: u32,
    pub total_saved: u32,
    pub completion_reason: Option<CompletionReason>,
    pub error: Option<String>,
}

impl CycleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target_met(&self) -> bool {
        self.total_saved >= self.target_saved
    }

    /// Apply an action and return the next state. Actions that are not valid in the
    /// current status leave the state unchanged.
    pub fn apply(&self, action: CycleAction) -> CycleState {
        use CycleAction as A;
        use CycleStatus as S;

        let mut next = self.clone();
        match (self.status, action) {
            (_, A::Reset) => return CycleState::new(),
            (
                S::Idle,
                A::Start {
                    target_saved,
                    max_iterations,
                },
            ) => {
                next.target_saved = target_saved;
                next.max_iterations = max_iterations;
                next.total_saved = 0;
                next.current_iteration = 1;
                if target_saved == 0 {
                    next.finish(CompletionReason::TargetMet);
                } else {
                    next.status = S::Generating;
                }
            }
            (S::Generating, A::ImagesReady { .. }) => next.status = S::Evaluating,
            (S::Evaluating, A::Evaluated { polish_candidates }) => {
                next.status = if polish_candidates > 0 {
                    S::Polishing
                } else {
                    S::Refining
                };
            }
            (S::Polishing, A::Polished) => next.status = S::Refining,
            (S::Refining, A::ImageSaved) => next.total_saved += 1,
            (S::Refining, A::IterationDone) => {
                if next.target_met() {
                    next.finish(CompletionReason::TargetMet);
                } else if next.current_iteration >= next.max_iterations {
                    next.finish(CompletionReason::MaxIterations);
                } else {
                    next.current_iteration += 1;
                    next.status = S::Generating;
                }
            }
            (status, A::Fail { message }) if !status.is_terminal() && status != S::Idle => {
                next.status = S::Error;
                next.completion_reason = Some(CompletionReason::Error);
                next.error = Some(message);
            }
            (status, A::TimedOut { message }) if !status.is_terminal() && status != S::Idle => {
                next.status = S::Error;
                next.completion_reason = Some(CompletionReason::Timeout);
                next.error = Some(message);
            }
            (status, A::Abort) if !status.is_terminal() => {
                next.status = S::Aborted;
                next.completion_reason = Some(CompletionReason::Aborted);
            }
            _ => {}
        }
        next
    }

    fn finish(&mut self, reason: CompletionReason) {
        self.status = CycleStatus::Complete;
        self.completion_reason = Some(reason);
    }
}
