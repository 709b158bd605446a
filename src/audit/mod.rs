use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AutoplayConfig;
use crate::coordinator::{AutoplayEvent, AutoplayEventKind, AutoplayState};
use crate::errors::FailureKind;
use crate::phase::Phase;

/// Persistent record of one autoplay run, built from its event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub config: AutoplayConfig,
    pub phases: Vec<PhaseAudit>,
    /// Swallowed failures from optional phases
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_state: Option<AutoplayState>,
}

impl AuditRun {
    pub fn new(config: AutoplayConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            config,
            phases: Vec::new(),
            warnings: Vec::new(),
            final_state: None,
        }
    }

    /// Fold one event into the record.
    pub fn record(&mut self, event: &AutoplayEvent) {
        match &event.kind {
            AutoplayEventKind::PhaseStarted { phase, target } => {
                self.phases
                    .push(PhaseAudit::new(*phase, *target, event.timestamp));
            }
            AutoplayEventKind::ImageSaved { image_url, .. } => {
                if let Some(phase) = self.phases.last_mut() {
                    phase.saved_images.push(image_url.clone());
                }
            }
            AutoplayEventKind::PhaseRestarted { .. } => {
                if let Some(phase) = self.phases.last_mut() {
                    phase.restarts += 1;
                }
            }
            AutoplayEventKind::PhaseCompleted { .. } => {
                self.close_last(PhaseOutcome::Completed, event.timestamp);
            }
            AutoplayEventKind::Error {
                kind,
                message,
                fatal: true,
                ..
            } => {
                self.close_last(
                    PhaseOutcome::Failed {
                        kind: *kind,
                        message: message.clone(),
                    },
                    event.timestamp,
                );
            }
            AutoplayEventKind::Error { phase, message, .. } => {
                self.warnings.push(format!("{phase}: {message}"));
            }
            AutoplayEventKind::Aborted { .. } => {
                self.close_last(PhaseOutcome::Aborted, event.timestamp);
            }
            _ => {}
        }
    }

    fn close_last(&mut self, outcome: PhaseOutcome, at: DateTime<Utc>) {
        if let Some(phase) = self.phases.last_mut()
            && phase.outcome == PhaseOutcome::InProgress
        {
            phase.outcome = outcome;
            phase.ended_at = Some(at);
        }
    }

    pub fn finish(&mut self, state: AutoplayState) {
        self.ended_at = Some(Utc::now());
        self.final_state = Some(state);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseAudit {
    pub phase: Phase,
    pub target: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub saved_images: Vec<String>,
    pub restarts: u32,
    pub outcome: PhaseOutcome,
}

impl PhaseAudit {
    pub fn new(phase: Phase, target: u32, started_at: DateTime<Utc>) -> Self {
        Self {
            phase,
            target,
            started_at,
            ended_at: None,
            saved_images: Vec::new(),
            restarts: 0,
            outcome: PhaseOutcome::InProgress,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PhaseOutcome {
    InProgress,
    Completed,
    Failed { kind: FailureKind, message: String },
    Aborted,
}

pub mod logger;
pub use logger::AuditLogger;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectBrief;

    fn event(kind: AutoplayEventKind) -> AutoplayEvent {
        AutoplayEvent::now(kind)
    }

    fn new_run() -> AuditRun {
        AuditRun::new(AutoplayConfig::new(ProjectBrief::new("p1", "Neon Drift")).with_counts(2, 0))
    }

    #[test]
    fn test_audit_run_new() {
        let run = new_run();
        assert!(run.ended_at.is_none());
        assert!(run.phases.is_empty());
    }

    #[test]
    fn test_record_tracks_phase_lifecycle() {
        let mut run = new_run();
        run.record(&event(AutoplayEventKind::PhaseStarted {
            phase: Phase::Sketch,
            target: 2,
        }));
        run.record(&event(AutoplayEventKind::ImageSaved {
            phase: Phase::Sketch,
            prompt_id: "sketch-1".to_string(),
            image_url: "sim://a".to_string(),
            saved: 1,
            target: 2,
        }));
        run.record(&event(AutoplayEventKind::PhaseRestarted {
            phase: Phase::Sketch,
            remaining: 1,
            restart: 1,
        }));
        run.record(&event(AutoplayEventKind::PhaseCompleted {
            phase: Phase::Sketch,
        }));

        let sketch = &run.phases[0];
        assert_eq!(sketch.saved_images, vec!["sim://a".to_string()]);
        assert_eq!(sketch.restarts, 1);
        assert_eq!(sketch.outcome, PhaseOutcome::Completed);
        assert!(sketch.ended_at.is_some());
    }

    #[test]
    fn test_swallowed_error_becomes_warning() {
        let mut run = new_run();
        run.record(&event(AutoplayEventKind::PhaseStarted {
            phase: Phase::Poster,
            target: 3,
        }));
        run.record(&event(AutoplayEventKind::Error {
            phase: Phase::Poster,
            kind: FailureKind::Service,
            message: "evaluator offline".to_string(),
            fatal: false,
        }));
        assert_eq!(run.phases[0].outcome, PhaseOutcome::InProgress);
        assert_eq!(run.warnings, vec!["poster: evaluator offline".to_string()]);
    }

    #[test]
    fn test_fatal_error_closes_phase() {
        let mut run = new_run();
        run.record(&event(AutoplayEventKind::PhaseStarted {
            phase: Phase::Sketch,
            target: 2,
        }));
        run.record(&event(AutoplayEventKind::Error {
            phase: Phase::Sketch,
            kind: FailureKind::Timeout,
            message: "stalled".to_string(),
            fatal: true,
        }));
        assert!(matches!(
            run.phases[0].outcome,
            PhaseOutcome::Failed {
                kind: FailureKind::Timeout,
                ..
            }
        ));
    }
}
