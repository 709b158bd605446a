//! Structured coordinator events and the reporter that publishes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::coordinator::state::{AutoplayAction, AutoplayState, reduce};
use crate::errors::FailureKind;
use crate::phase::Phase;

/// Events emitted during an autoplay run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AutoplayEventKind {
    /// A phase has started (or resumed after a retry).
    PhaseStarted { phase: Phase, target: u32 },
    /// A phase met its exit condition.
    PhaseCompleted { phase: Phase },
    /// A generated image was confirmed saved.
    ImageSaved {
        phase: Phase,
        prompt_id: String,
        image_url: String,
        saved: u32,
        target: u32,
    },
    /// The iteration budget ran out; the orchestrator starts again for what is left.
    PhaseRestarted {
        phase: Phase,
        remaining: u32,
        restart: u32,
    },
    PosterSelected {
        /// The `PosterRequest::candidate` number that won
        candidate: u32,
        candidates: usize,
        fallback: bool,
    },
    PosterSkipped { reason: String },
    HudGenerating { images: usize },
    HudCompleted { generated: u32, failed: u32 },
    /// A safety-net timeout fired.
    Timeout { phase: Phase, after_secs: u64 },
    /// A failure, either fatal or swallowed for an optional phase.
    Error {
        phase: Phase,
        kind: FailureKind,
        message: String,
        fatal: bool,
    },
    Aborted { phase: Phase },
    Retrying { phase: Phase },
    /// The run reached the complete phase.
    RunCompleted {
        aborted: bool,
        sketch_saved: u32,
        gameplay_saved: u32,
        poster_selected: bool,
        hud_generated: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoplayEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: AutoplayEventKind,
}

impl AutoplayEvent {
    pub fn now(kind: AutoplayEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Publishes state changes to the watch channel and events to the optional listener.
///
/// Both sends are synchronous, so they can be called from inside save callbacks.
pub(crate) struct Reporter {
    state: watch::Sender<AutoplayState>,
    events: Option<mpsc::UnboundedSender<AutoplayEvent>>,
}

impl Reporter {
    pub(crate) fn new() -> Self {
        let (state, _) = watch::channel(AutoplayState::default());
        Self {
            state,
            events: None,
        }
    }

    pub(crate) fn set_listener(&mut self, tx: mpsc::UnboundedSender<AutoplayEvent>) {
        self.events = Some(tx);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<AutoplayState> {
        self.state.subscribe()
    }

    pub(crate) fn snapshot(&self) -> AutoplayState {
        self.state.borrow().clone()
    }

    pub(crate) fn dispatch(&self, action: AutoplayAction) {
        self.state.send_modify(|state| *state = reduce(state, action));
    }

    pub(crate) fn emit(&self, kind: AutoplayEventKind) {
        match &kind {
            AutoplayEventKind::Error { .. } | AutoplayEventKind::Timeout { .. } => {
                warn!(event = ?kind, "autoplay event")
            }
            AutoplayEventKind::ImageSaved { .. } => debug!(event = ?kind, "autoplay event"),
            _ => info!(event = ?kind, "autoplay event"),
        }
        if let Some(ref tx) = self.events {
            tx.send(AutoplayEvent::now(kind)).ok();
        }
    }
}
