//! Effect driver for a multi-phase autoplay run.
//!
//! The runner walks the phase sequence, delegating countable phases to a fresh run of
//! the single-phase orchestrator and the poster and HUD phases to their workflows.
//! Every state change goes through the reducer; every notable step becomes an event.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::abort::{AbortHandle, AbortSignal};
use crate::config::AutoplayConfig;
use crate::coordinator::events::{AutoplayEvent, AutoplayEventKind, Reporter};
use crate::coordinator::state::{AutoplayAction, AutoplayState};
use crate::cycle::{CompletionReason, CycleRequest, SinglePhaseOrchestrator};
use crate::errors::{AutoplayError, FailureKind};
use crate::phase::{PanelGroup, Phase, first_phase, next_phase};
use crate::services::{EvaluationCriteria, StudioServices};
use crate::settings::Timeouts;
use crate::workflows::{HudWorkflow, PosterOutcome, PosterWorkflow};

/// The work a phase needs, resolved before its timeout starts.
enum PhasePlan {
    Countable(PanelGroup),
    Poster,
    Hud(Vec<String>),
}

/// How a phase ended.
enum PhaseExit {
    Advance,
    Aborted,
    Failed { kind: FailureKind, message: String },
}

impl PhaseExit {
    fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }
}

/// Sequences `sketch → gameplay → poster → hud → complete` for one project.
pub struct MultiPhaseCoordinator<S> {
    services: Arc<S>,
    timeouts: Timeouts,
    orchestrator: SinglePhaseOrchestrator<S>,
    hud: HudWorkflow<S>,
    abort: AbortSignal,
    reporter: Reporter,
}

impl<S: StudioServices> MultiPhaseCoordinator<S> {
    pub fn new(services: Arc<S>, timeouts: Timeouts) -> Self {
        Self {
            orchestrator: SinglePhaseOrchestrator::new(services.clone(), timeouts),
            hud: HudWorkflow::new(services.clone()),
            services,
            timeouts,
            abort: AbortSignal::new(),
            reporter: Reporter::new(),
        }
    }

    /// Send structured events to `tx` as the run progresses.
    pub fn with_event_channel(mut self, tx: mpsc::UnboundedSender<AutoplayEvent>) -> Self {
        self.reporter.set_listener(tx);
        self
    }

    /// Watch the observable state.
    pub fn subscribe(&self) -> watch::Receiver<AutoplayState> {
        self.reporter.subscribe()
    }

    pub fn state(&self) -> AutoplayState {
        self.reporter.snapshot()
    }

    /// A handle that aborts the coordinator, the orchestrator and the HUD batch at once.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle::new(vec![
            self.abort.clone(),
            self.orchestrator.abort_handle(),
            self.hud.abort_handle(),
        ])
    }

    pub fn abort(&self) {
        self.abort_handle().abort();
    }

    /// Run every configured phase to completion.
    ///
    /// Failures inside the run do not produce `Err`: the returned state is in the error
    /// phase and describes the failure. `Err` is reserved for an invalid config.
    pub async fn start(&mut self, config: AutoplayConfig) -> Result<AutoplayState, AutoplayError> {
        config.validate()?;
        self.clear_flags();

        let phase = first_phase(&config);
        info!(
            project = %config.project.name,
            sketch = config.sketch_count,
            gameplay = config.gameplay_count,
            poster = config.poster_enabled,
            hud = config.hud_enabled,
            first = %phase,
            "starting autoplay run"
        );
        self.reporter.dispatch(AutoplayAction::Start {
            config: config.clone(),
        });
        Ok(self.drive(phase, &config).await)
    }

    /// Resume the phase that failed, keeping the progress made so far.
    pub async fn retry(&mut self) -> Result<AutoplayState, AutoplayError> {
        let snapshot = self.reporter.snapshot();
        let Some(failure) = snapshot.failure.filter(|_| snapshot.phase == Phase::Error) else {
            return Err(AutoplayError::RetryUnavailable {
                phase: snapshot.phase,
            });
        };
        let config = snapshot.config.ok_or(AutoplayError::MissingConfig)?;

        self.clear_flags();
        info!(phase = %failure.phase, kind = %failure.kind, "retrying failed phase");
        self.reporter.emit(AutoplayEventKind::Retrying {
            phase: failure.phase,
        });
        self.reporter.dispatch(AutoplayAction::Retry);
        Ok(self.drive(failure.phase, &config).await)
    }

    /// Return to the initial, configuration-free state.
    pub fn reset(&mut self) {
        self.clear_flags();
        self.reporter.dispatch(AutoplayAction::Reset);
    }

    fn clear_flags(&mut self) {
        self.abort.clear();
        self.orchestrator.reset();
        self.hud.reset();
    }

    async fn drive(&mut self, mut phase: Phase, config: &AutoplayConfig) -> AutoplayState {
        loop {
            if self.abort.is_requested() {
                self.finish_aborted(phase);
                break;
            }
            if !phase.is_active() {
                self.finish();
                break;
            }

            // Listing work can stall too, so planning gets the phase floor as its limit
            let planned = timeout(self.timeouts.phase_floor, self.plan(phase, config)).await;
            let exit = match planned {
                Ok((plan, target)) => {
                    self.enter_phase(phase, target);
                    let limit = self.timeouts.for_phase(target);
                    let result = timeout(limit, self.run_phase(phase, plan, config)).await;
                    match result {
                        Ok(exit) => exit,
                        Err(_) => self.phase_timed_out(phase, limit),
                    }
                }
                Err(_) => {
                    self.enter_phase(phase, 0);
                    self.phase_timed_out(phase, self.timeouts.phase_floor)
                }
            };

            match exit {
                PhaseExit::Advance => {
                    self.reporter
                        .emit(AutoplayEventKind::PhaseCompleted { phase });
                    let gameplay_saved = self.reporter.snapshot().gameplay_progress.saved;
                    phase = next_phase(phase, config, gameplay_saved);
                }
                PhaseExit::Aborted => {
                    self.finish_aborted(phase);
                    break;
                }
                PhaseExit::Failed { kind, message } => {
                    self.reporter.emit(AutoplayEventKind::Error {
                        phase,
                        kind,
                        message: message.clone(),
                        fatal: true,
                    });
                    self.reporter.dispatch(AutoplayAction::Fail {
                        phase,
                        kind,
                        message,
                    });
                    break;
                }
            }
        }
        self.reporter.snapshot()
    }

    fn enter_phase(&self, phase: Phase, target: u32) {
        self.reporter
            .dispatch(AutoplayAction::EnterPhase { phase, target });
        self.reporter
            .emit(AutoplayEventKind::PhaseStarted { phase, target });
    }

    /// Resolve what a phase has to do and how many units of work that is.
    async fn plan(&self, phase: Phase, config: &AutoplayConfig) -> (PhasePlan, u32) {
        match phase {
            Phase::Sketch => (PhasePlan::Countable(PanelGroup::Sketch), config.sketch_count),
            Phase::Gameplay => (
                PhasePlan::Countable(PanelGroup::Gameplay),
                config.gameplay_count,
            ),
            Phase::Poster => (PhasePlan::Poster, config.poster.candidates),
            _ => {
                let images = self.hud_images().await;
                let count = u32::try_from(images.len()).unwrap_or(u32::MAX);
                (PhasePlan::Hud(images), count)
            }
        }
    }

    async fn run_phase(
        &mut self,
        phase: Phase,
        plan: PhasePlan,
        config: &AutoplayConfig,
    ) -> PhaseExit {
        match plan {
            PhasePlan::Countable(panel) => self.run_countable(phase, panel, config).await,
            PhasePlan::Poster => self.run_poster(config).await,
            PhasePlan::Hud(images) => self.run_hud(&images, config).await,
        }
    }

    /// Run the orchestrator until the phase target is met, restarting it with the
    /// remaining count whenever its iteration budget runs out.
    async fn run_countable(
        &mut self,
        phase: Phase,
        panel: PanelGroup,
        config: &AutoplayConfig,
    ) -> PhaseExit {
        let mut restarts = 0u32;
        loop {
            if self.abort.is_requested() {
                return PhaseExit::Aborted;
            }
            let remaining = self.reporter.snapshot().progress(panel).remaining();
            if remaining == 0 {
                return PhaseExit::Advance;
            }

            let prompts = match self.services.prompts_for_phase(phase, remaining).await {
                Ok(prompts) => prompts,
                Err(e) => {
                    return PhaseExit::failed(
                        FailureKind::Service,
                        format!("Failed to build {phase} prompts: {e}"),
                    );
                }
            };
            let request = CycleRequest {
                label: phase.to_string(),
                panel,
                prompts,
                target_saved: remaining,
                max_iterations: config.max_iterations_per_image,
                criteria: EvaluationCriteria {
                    project_name: config.project.name.clone(),
                    vision: config.project.vision.clone(),
                    theme: config.project.theme.clone(),
                    purpose: phase.to_string(),
                },
            };

            let reporter = &self.reporter;
            let result = self
                .orchestrator
                .run(request, |saved| {
                    reporter.dispatch(AutoplayAction::ImageSaved { panel });
                    let progress = *reporter.snapshot().progress(panel);
                    reporter.emit(AutoplayEventKind::ImageSaved {
                        phase,
                        prompt_id: saved.prompt_id.clone(),
                        image_url: saved.image_url.clone(),
                        saved: progress.saved,
                        target: progress.target,
                    });
                })
                .await;
            self.orchestrator.reset();

            let outcome = match result {
                Ok(outcome) => outcome,
                Err(e) => return PhaseExit::failed(FailureKind::Service, e.to_string()),
            };
            match outcome.reason {
                CompletionReason::TargetMet => return PhaseExit::Advance,
                CompletionReason::Aborted => return PhaseExit::Aborted,
                CompletionReason::Error => {
                    let message = outcome
                        .error
                        .unwrap_or_else(|| format!("{phase} generation failed"));
                    return PhaseExit::failed(FailureKind::Service, message);
                }
                CompletionReason::Timeout => {
                    self.reporter.emit(AutoplayEventKind::Timeout {
                        phase,
                        after_secs: self.timeouts.cycle.as_secs(),
                    });
                    let message = outcome
                        .error
                        .unwrap_or_else(|| format!("{phase} cycle timed out"));
                    return PhaseExit::failed(FailureKind::Timeout, message);
                }
                CompletionReason::MaxIterations => {
                    restarts += 1;
                    if let Some(max) = config.max_phase_restarts
                        && restarts > max
                    {
                        let progress = *self.reporter.snapshot().progress(panel);
                        return PhaseExit::failed(
                            FailureKind::Exhausted,
                            format!(
                                "{phase} saved {}/{} images before running out of restarts ({max})",
                                progress.saved, progress.target
                            ),
                        );
                    }
                    self.reporter.emit(AutoplayEventKind::PhaseRestarted {
                        phase,
                        remaining: outcome.shortfall(),
                        restart: restarts,
                    });
                }
            }
        }
    }

    /// Poster failures never stop the run.
    async fn run_poster(&mut self, config: &AutoplayConfig) -> PhaseExit {
        let workflow = PosterWorkflow::new(self.services.clone(), self.abort.clone());
        match workflow.run(config).await {
            Ok(PosterOutcome::AlreadyExists) => {
                self.reporter.dispatch(AutoplayAction::PosterSelected);
                self.reporter.emit(AutoplayEventKind::PosterSkipped {
                    reason: "project already has a poster".to_string(),
                });
            }
            Ok(PosterOutcome::NoCandidates { attempted }) => {
                self.reporter.emit(AutoplayEventKind::PosterSkipped {
                    reason: format!("none of {attempted} poster candidates could be generated"),
                });
            }
            Ok(PosterOutcome::Selected {
                candidate,
                candidates,
                fallback,
                ..
            }) => {
                self.reporter.dispatch(AutoplayAction::PosterSelected);
                self.reporter.emit(AutoplayEventKind::PosterSelected {
                    candidate,
                    candidates,
                    fallback,
                });
            }
            Ok(PosterOutcome::Aborted) => return PhaseExit::Aborted,
            Err(e) => {
                self.reporter.emit(AutoplayEventKind::Error {
                    phase: Phase::Poster,
                    kind: FailureKind::Service,
                    message: format!("{e:#}"),
                    fatal: false,
                });
            }
        }
        PhaseExit::Advance
    }

    async fn run_hud(&mut self, images: &[String], config: &AutoplayConfig) -> PhaseExit {
        if images.is_empty() {
            info!("no saved images to overlay; skipping HUD");
            return PhaseExit::Advance;
        }
        self.reporter.emit(AutoplayEventKind::HudGenerating {
            images: images.len(),
        });

        let reporter = &self.reporter;
        let results = self
            .hud
            .run(images, &config.hud, |result| {
                reporter.dispatch(AutoplayAction::HudResult {
                    result: result.clone(),
                });
            })
            .await;
        let Some(results) = results else {
            return PhaseExit::Advance;
        };

        let generated = results.iter().filter(|r| r.success).count();
        self.reporter.emit(AutoplayEventKind::HudCompleted {
            generated: u32::try_from(generated).unwrap_or(u32::MAX),
            failed: u32::try_from(results.len() - generated).unwrap_or(u32::MAX),
        });
        if self.abort.is_requested() {
            return PhaseExit::Aborted;
        }
        PhaseExit::Advance
    }

    /// Saved images from both panel groups, sketch first, minus those that already
    /// have an overlay result from an earlier attempt at this run.
    async fn hud_images(&self) -> Vec<String> {
        let done: HashSet<String> = self
            .reporter
            .snapshot()
            .hud_results
            .into_iter()
            .map(|result| result.original_url)
            .collect();
        let mut images = Vec::new();
        for panel in PanelGroup::ALL {
            match self.services.saved_images(panel).await {
                Ok(urls) => images.extend(urls.into_iter().filter(|url| !done.contains(url))),
                Err(e) => warn!(panel = %panel, error = %e, "could not list saved images"),
            }
        }
        if !done.is_empty() {
            info!(done = done.len(), pending = images.len(), "resuming HUD overlays");
        }
        images
    }

    /// The phase safety net fired. The optional poster and HUD phases move on; sketch
    /// and gameplay halt.
    fn phase_timed_out(&mut self, phase: Phase, limit: Duration) -> PhaseExit {
        self.orchestrator.reset();
        self.reporter.emit(AutoplayEventKind::Timeout {
            phase,
            after_secs: limit.as_secs(),
        });
        let message = format!(
            "{phase} phase stalled: no completion within {}s",
            limit.as_secs()
        );
        if matches!(phase, Phase::Poster | Phase::Hud) {
            self.reporter.emit(AutoplayEventKind::Error {
                phase,
                kind: FailureKind::Timeout,
                message,
                fatal: false,
            });
            return PhaseExit::Advance;
        }
        PhaseExit::failed(FailureKind::Timeout, message)
    }

    fn finish(&self) {
        self.reporter.dispatch(AutoplayAction::Finish);
        self.emit_completed();
    }

    fn finish_aborted(&self, phase: Phase) {
        info!(phase = %phase, "autoplay run aborted");
        self.reporter.emit(AutoplayEventKind::Aborted { phase });
        self.reporter.dispatch(AutoplayAction::Abort);
        self.emit_completed();
    }

    fn emit_completed(&self) {
        let state = self.reporter.snapshot();
        info!(
            aborted = state.aborted,
            sketch = state.sketch_progress.saved,
            gameplay = state.gameplay_progress.saved,
            poster = state.poster_selected,
            hud = state.hud_generated,
            "autoplay run complete"
        );
        self.reporter.emit(AutoplayEventKind::RunCompleted {
            aborted: state.aborted,
            sketch_saved: state.sketch_progress.saved,
            gameplay_saved: state.gameplay_progress.saved,
            poster_selected: state.poster_selected,
            hud_generated: state.hud_generated,
        });
    }
}
