use crate::coordinator::{AutoplayEvent, AutoplayEventKind, AutoplayState};
use crate::phase::Phase;
use crate::ui::icons::{CHECK, CLOCK, CROSS, RESTART, SPARKLE, STOP, WARN};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal UI for an autoplay run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Phase bar: how many of the planned phases have finished
/// - Step bar: spinner with the current phase's unit progress
pub struct AutoplayUI {
    multi: MultiProgress,
    phase_bar: ProgressBar,
    step_bar: ProgressBar,
    phases: Vec<Phase>,
}

impl AutoplayUI {
    /// Create the UI for a run that will walk through `phases`.
    pub fn new(phases: Vec<Phase>) -> Self {
        let multi = MultiProgress::new();

        let phase_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let phase_bar = multi.add(ProgressBar::new(phases.len() as u64));
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix("Phases");

        let step_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");
        let step_bar = multi.add(ProgressBar::new_spinner());
        step_bar.set_style(step_style);
        step_bar.set_prefix("  Step");
        step_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            phase_bar,
            step_bar,
            phases,
        }
    }

    /// Print a line above the bars, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Redraw both bars from the latest observable state.
    pub fn render(&self, state: &AutoplayState) {
        let done = match state.phase {
            Phase::Complete => self.phases.len(),
            phase => self
                .phases
                .iter()
                .position(|p| *p == phase)
                .unwrap_or_default(),
        };
        self.phase_bar.set_position(done as u64);
        self.phase_bar
            .set_message(style(state.phase.as_str()).yellow().to_string());
        self.step_bar.set_message(step_message(state));
    }

    /// Print a line for events worth keeping in the scrollback.
    pub fn show_event(&self, event: &AutoplayEvent) {
        let line = match &event.kind {
            AutoplayEventKind::PhaseCompleted { phase } => {
                format!("{}{} complete", CHECK, style(phase).green())
            }
            AutoplayEventKind::PhaseRestarted {
                phase,
                remaining,
                restart,
            } => format!(
                "{}{} budget exhausted; restart {} for {} remaining",
                RESTART,
                style(phase).yellow(),
                restart,
                remaining
            ),
            AutoplayEventKind::PosterSelected {
                candidate,
                candidates,
                fallback,
            } => format!(
                "{}poster candidate {} selected from {}{}",
                SPARKLE,
                candidate + 1,
                candidates,
                if *fallback { " (fallback)" } else { "" }
            ),
            AutoplayEventKind::PosterSkipped { reason } => {
                format!("{}poster skipped: {}", WARN, style(reason).dim())
            }
            AutoplayEventKind::Timeout { phase, after_secs } => format!(
                "{}{} timed out after {}s",
                CLOCK,
                style(phase).red(),
                after_secs
            ),
            AutoplayEventKind::Error {
                phase,
                message,
                fatal,
                ..
            } => {
                let icon = if *fatal { CROSS } else { WARN };
                format!("{}{}: {}", icon, style(phase).red(), message)
            }
            AutoplayEventKind::Aborted { phase } => {
                format!("{}aborted during {}", STOP, style(phase).yellow())
            }
            AutoplayEventKind::Retrying { phase } => {
                format!("{}retrying {}", RESTART, style(phase).yellow())
            }
            _ => return,
        };
        self.print_line(line);
    }

    /// Stop the bars and leave a one-line summary.
    pub fn finish(&self, state: &AutoplayState) {
        self.render(state);
        self.step_bar.finish_and_clear();
        let summary = match (&state.failure, state.aborted) {
            (Some(failure), _) => format!(
                "{} failed in {} ({}): {}",
                CROSS,
                failure.phase,
                failure.kind,
                failure.message
            ),
            (None, true) => format!("{}run aborted", STOP),
            (None, false) => format!("{}run complete", CHECK),
        };
        self.phase_bar.finish_with_message(summary);
    }
}

/// Short description of the current phase's progress.
pub fn step_message(state: &AutoplayState) -> String {
    match state.phase {
        Phase::Sketch | Phase::Gameplay => format!(
            "{} images saved {}/{}",
            state.phase, state.image_index, state.phase_target
        ),
        Phase::Poster => format!("generating {} poster candidates", state.phase_target),
        Phase::Hud => format!(
            "HUD overlays {}/{} ({} ok)",
            state.image_index, state.phase_target, state.hud_generated
        ),
        Phase::Idle => "waiting".to_string(),
        Phase::Complete => "done".to_string(),
        Phase::Error => state.error().unwrap_or("failed").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_message_countable() {
        let state = AutoplayState {
            phase: Phase::Gameplay,
            image_index: 1,
            phase_target: 3,
            ..Default::default()
        };
        assert_eq!(step_message(&state), "gameplay images saved 1/3");
    }

    #[test]
    fn test_step_message_hud() {
        let state = AutoplayState {
            phase: Phase::Hud,
            image_index: 2,
            phase_target: 4,
            hud_generated: 1,
            ..Default::default()
        };
        assert_eq!(step_message(&state), "HUD overlays 2/4 (1 ok)");
    }

    #[test]
    fn test_step_message_error_uses_failure() {
        let state = AutoplayState {
            phase: Phase::Error,
            failure: Some(crate::coordinator::PhaseFailure {
                phase: Phase::Sketch,
                kind: crate::errors::FailureKind::Service,
                message: "generate step failed".to_string(),
            }),
            ..Default::default()
        };
        assert_eq!(step_message(&state), "generate step failed");
    }
}
