//! Observable coordinator state and its reducer.
//!
//! `reduce` is the only place `AutoplayState` changes. It is synchronous and pure so
//! every transition can be tested without services or timers.

use serde::{Deserialize, Serialize};

use crate::config::AutoplayConfig;
use crate::errors::FailureKind;
use crate::phase::{PanelGroup, Phase, PhaseProgress};
use crate::workflows::HudGenerationResult;

/// Why and where a run stopped in the error phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseFailure {
    pub phase: Phase,
    pub kind: FailureKind,
    pub message: String,
}

/// Everything a UI needs to render an autoplay run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoplayState {
    pub phase: Phase,
    pub sketch_progress: PhaseProgress,
    pub gameplay_progress: PhaseProgress,
    pub poster_selected: bool,
    pub hud_results: Vec<HudGenerationResult>,
    pub hud_generated: u32,
    pub failure: Option<PhaseFailure>,
    /// Units of work finished in the current phase
    pub image_index: u32,
    /// Units of work the current phase needs
    pub phase_target: u32,
    pub running: bool,
    pub aborted: bool,
    pub config: Option<AutoplayConfig>,
}

impl AutoplayState {
    pub fn error(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.message.as_str())
    }

    pub fn error_phase(&self) -> Option<Phase> {
        self.failure.as_ref().map(|f| f.phase)
    }

    pub fn progress(&self, panel: PanelGroup) -> &PhaseProgress {
        match panel {
            PanelGroup::Sketch => &self.sketch_progress,
            PanelGroup::Gameplay => &self.gameplay_progress,
        }
    }

    fn progress_mut(&mut self, panel: PanelGroup) -> &mut PhaseProgress {
        match panel {
            PanelGroup::Sketch => &mut self.sketch_progress,
            PanelGroup::Gameplay => &mut self.gameplay_progress,
        }
    }

    /// The run ended normally or by abort.
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Complete && !self.running
    }
}

/// Inputs to the coordinator reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum AutoplayAction {
    Start { config: AutoplayConfig },
    EnterPhase { phase: Phase, target: u32 },
    ImageSaved { panel: PanelGroup },
    PosterSelected,
    HudResult { result: HudGenerationResult },
    Fail {
        phase: Phase,
        kind: FailureKind,
        message: String,
    },
    Retry,
    Abort,
    Finish,
    Reset,
}

pub fn reduce(state: &AutoplayState, action: AutoplayAction) -> AutoplayState {
    let mut next = state.clone();
    match action {
        AutoplayAction::Start { config } => {
            next = AutoplayState {
                sketch_progress: PhaseProgress::new(config.sketch_count),
                gameplay_progress: PhaseProgress::new(config.gameplay_count),
                running: true,
                config: Some(config),
                ..AutoplayState::default()
            };
        }
        AutoplayAction::EnterPhase { phase, target } => {
            next.phase = phase;
            next.phase_target = target;
            next.image_index = match phase.panel() {
                Some(panel) => next.progress(panel).saved,
                None => 0,
            };
        }
        AutoplayAction::ImageSaved { panel } => {
            next.progress_mut(panel).record_save();
            if next.phase.panel() == Some(panel) {
                next.image_index = next.progress(panel).saved;
            }
        }
        AutoplayAction::PosterSelected => next.poster_selected = true,
        AutoplayAction::HudResult { result } => {
            // One result per source image; a later attempt replaces the earlier one
            match next
                .hud_results
                .iter_mut()
                .find(|existing| existing.original_url == result.original_url)
            {
                Some(existing) => *existing = result,
                None => next.hud_results.push(result),
            }
            next.hud_generated =
                u32::try_from(next.hud_results.iter().filter(|r| r.success).count())
                    .unwrap_or(u32::MAX);
            next.image_index = (next.image_index + 1).min(next.phase_target);
        }
        AutoplayAction::Fail {
            phase,
            kind,
            message,
        } if state.running => {
            next.phase = Phase::Error;
            next.running = false;
            next.failure = Some(PhaseFailure {
                phase,
                kind,
                message,
            });
        }
        AutoplayAction::Retry if state.phase == Phase::Error => {
            if let Some(failure) = next.failure.take() {
                next.phase = failure.phase;
                next.running = true;
                next.aborted = false;
            }
        }
        AutoplayAction::Abort if state.running => {
            next.phase = Phase::Complete;
            next.running = false;
            next.aborted = true;
        }
        AutoplayAction::Finish if state.running => {
            next.phase = Phase::Complete;
            next.running = false;
        }
        AutoplayAction::Reset => next = AutoplayState::default(),
        _ => {}
    }
    next
}
