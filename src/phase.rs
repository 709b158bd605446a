//! Phase definitions and the phase transition rules.
//!
//! This module provides:
//! - `Phase`: the fixed set of stages of an autoplay run
//! - `PanelGroup`: where the images of a countable phase are saved
//! - `PhaseProgress`: saved-vs-target counters for countable phases
//! - `first_phase` / `next_phase`: pure entry and exit rules

use crate::config::AutoplayConfig;
use serde::{Deserialize, Serialize};

/// A named stage of an autoplay run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Sketch,
    Gameplay,
    Poster,
    Hud,
    Complete,
    Error,
}

impl Phase {
    /// Phases whose work is counted in saved images and delegated to the cycle orchestrator.
    pub fn is_countable(&self) -> bool {
        matches!(self, Phase::Sketch | Phase::Gameplay)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Error)
    }

    /// Whether the phase does work (as opposed to idle/terminal markers).
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Phase::Sketch | Phase::Gameplay | Phase::Poster | Phase::Hud
        )
    }

    /// The panel group a countable phase saves into.
    pub fn panel(&self) -> Option<PanelGroup> {
        match self {
            Phase::Sketch => Some(PanelGroup::Sketch),
            Phase::Gameplay => Some(PanelGroup::Gameplay),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Sketch => "sketch",
            Phase::Gameplay => "gameplay",
            Phase::Poster => "poster",
            Phase::Hud => "hud",
            Phase::Complete => "complete",
            Phase::Error => "error",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two fixed groups of panel slots images are saved into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanelGroup {
    Sketch,
    Gameplay,
}

impl PanelGroup {
    pub const ALL: [PanelGroup; 2] = [PanelGroup::Sketch, PanelGroup::Gameplay];
}

impl std::fmt::Display for PanelGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PanelGroup::Sketch => write!(f, "sketch"),
            PanelGroup::Gameplay => write!(f, "gameplay"),
        }
    }
}

/// Saved-vs-target counters for a countable phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub saved: u32,
    pub target: u32,
}

impl PhaseProgress {
    pub fn new(target: u32) -> Self {
        Self { saved: 0, target }
    }

    /// Images still needed to meet the target.
    pub fn remaining(&self) -> u32 {
        self.target.saturating_sub(self.saved)
    }

    pub fn is_met(&self) -> bool {
        self.saved >= self.target
    }

    /// Record one confirmed save. Never exceeds the target.
    pub fn record_save(&mut self) {
        self.saved = (self.saved + 1).min(self.target);
    }
}

/// The phase a fresh run starts in.
pub fn first_phase(config: &AutoplayConfig) -> Phase {
    if config.sketch_count > 0 {
        Phase::Sketch
    } else if config.gameplay_count > 0 {
        Phase::Gameplay
    } else if config.poster_enabled {
        Phase::Poster
    } else if config.hud_enabled {
        Phase::Hud
    } else {
        Phase::Complete
    }
}

/// The phase that follows `current` once its exit condition is met.
///
/// HUD overlays are only worth running when at least one gameplay image exists.
pub fn next_phase(current: Phase, config: &AutoplayConfig, gameplay_saved: u32) -> Phase {
    let hud_ready = config.hud_enabled && gameplay_saved > 0;
    match current {
        Phase::Sketch if config.gameplay_count > 0 => Phase::Gameplay,
        Phase::Sketch if config.poster_enabled => Phase::Poster,
        Phase::Sketch => Phase::Complete,
        Phase::Gameplay if config.poster_enabled => Phase::Poster,
        Phase::Gameplay | Phase::Poster if hud_ready => Phase::Hud,
        Phase::Gameplay | Phase::Poster | Phase::Hud => Phase::Complete,
        Phase::Idle => first_phase(config),
        Phase::Complete | Phase::Error => current,
    }
}

/// The phases a run with `config` walks through when every countable target is met.
pub fn planned_phases(config: &AutoplayConfig) -> Vec<Phase> {
    let mut phases = Vec::new();
    let mut phase = first_phase(config);
    while phase.is_active() {
        phases.push(phase);
        phase = next_phase(phase, config, config.gameplay_count);
    }
    phases
}
