//! Side-effect driver for the cycle state machine.
//!
//! The orchestrator turns status changes into calls against the injected
//! `CycleServices` and feeds the results back into the machine. Data produced by one
//! step is handed to the next step by value, and every confirmed save reaches the
//! owner through the `on_saved` callback the moment it happens.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::abort::AbortSignal;
use crate::cycle::machine::{CompletionReason, CycleAction, CycleState, CycleStatus};
use crate::errors::{CycleError, CycleStep};
use crate::phase::PanelGroup;
use crate::services::{
    CycleServices, EvaluationCriteria, GeneratedImage, ImageEvaluation, ImagePrompt, SaveRequest,
};
use crate::settings::Timeouts;

/// What one orchestrator run should produce.
#[derive(Debug, Clone)]
pub struct CycleRequest {
    /// Name used in logs (usually the phase)
    pub label: String,
    pub panel: PanelGroup,
    pub prompts: Vec<ImagePrompt>,
    pub target_saved: u32,
    pub max_iterations: u32,
    pub criteria: EvaluationCriteria,
}

/// A confirmed save, delivered to the owner as it happens.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedImage {
    pub panel: PanelGroup,
    pub prompt_id: String,
    pub image_url: String,
    pub iteration: u32,
    /// Saves so far in this run, including this one
    pub total_saved: u32,
}

/// Result of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub reason: CompletionReason,
    pub total_saved: u32,
    pub target_saved: u32,
    pub iterations: u32,
    pub error: Option<String>,
}

impl CycleOutcome {
    fn from_state(state: &CycleState) -> Self {
        let reason = state.completion_reason.unwrap_or(match state.status {
            CycleStatus::Aborted => CompletionReason::Aborted,
            CycleStatus::Error => CompletionReason::Error,
            _ => CompletionReason::MaxIterations,
        });
        Self {
            reason,
            total_saved: state.total_saved,
            target_saved: state.target_saved,
            iterations: state.current_iteration,
            error: state.error.clone(),
        }
    }

    /// Remaining images the run failed to save.
    pub fn shortfall(&self) -> u32 {
        self.target_saved.saturating_sub(self.total_saved)
    }
}

/// One prompt with whatever this iteration produced for it.
struct Reviewed {
    prompt: ImagePrompt,
    image: Option<GeneratedImage>,
    evaluation: Option<ImageEvaluation>,
}

impl Reviewed {
    fn is_polish_candidate(&self) -> bool {
        self.image.is_some()
            && self
                .evaluation
                .as_ref()
                .is_some_and(|e| e.approved && e.needs_polish)
    }
}

fn pair_results(
    prompts: &[ImagePrompt],
    images: Vec<GeneratedImage>,
    evaluations: Vec<ImageEvaluation>,
) -> Vec<Reviewed> {
    let mut images: HashMap<String, GeneratedImage> = images
        .into_iter()
        .map(|img| (img.prompt_id.clone(), img))
        .collect();
    let mut evaluations: HashMap<String, ImageEvaluation> = evaluations
        .into_iter()
        .map(|e| (e.prompt_id.clone(), e))
        .collect();

    prompts
        .iter()
        .map(|prompt| Reviewed {
            prompt: prompt.clone(),
            image: images.remove(&prompt.id),
            evaluation: evaluations.remove(&prompt.id),
        })
        .collect()
}

/// Drives generate → evaluate → polish → refine until a run completes.
pub struct SinglePhaseOrchestrator<S> {
    services: Arc<S>,
    timeouts: Timeouts,
    state: CycleState,
    abort: AbortSignal,
}

impl<S: CycleServices> SinglePhaseOrchestrator<S> {
    pub fn new(services: Arc<S>, timeouts: Timeouts) -> Self {
        Self {
            services,
            timeouts,
            state: CycleState::new(),
            abort: AbortSignal::new(),
        }
    }

    pub fn state(&self) -> &CycleState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.state.status.is_running()
    }

    pub fn completion_reason(&self) -> Option<CompletionReason> {
        self.state.completion_reason
    }

    /// The flag checked before every iteration and between cycle steps.
    pub fn abort_handle(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn abort(&self) {
        self.abort.request();
    }

    /// Return to idle so the orchestrator can be started again.
    pub fn reset(&mut self) {
        self.state = self.state.apply(CycleAction::Reset);
        self.abort.clear();
    }

    fn dispatch(&mut self, action: CycleAction) {
        let before = self.state.status;
        self.state = self.state.apply(action);
        if before != self.state.status {
            debug!(from = %before, to = %self.state.status, "cycle transition");
        }
    }

    /// Run until the target is met, the iteration budget is exhausted, a service
    /// fails, the cycle safety net fires or the run is aborted.
    ///
    /// Refuses to start unless the orchestrator is idle; call `reset` between runs.
    pub async fn run<F>(
        &mut self,
        request: CycleRequest,
        mut on_saved: F,
    ) -> Result<CycleOutcome, CycleError>
    where
        F: FnMut(&SavedImage) + Send,
    {
        if self.state.status != CycleStatus::Idle {
            return Err(CycleError::NotIdle {
                status: self.state.status,
            });
        }

        info!(
            label = %request.label,
            target = request.target_saved,
            max_iterations = request.max_iterations,
            prompts = request.prompts.len(),
            "starting generation cycle"
        );
        self.dispatch(CycleAction::Start {
            target_saved: request.target_saved,
            max_iterations: request.max_iterations,
        });

        let mut pending = request.prompts.clone();
        while !self.state.status.is_terminal() {
            if self.abort.is_requested() {
                info!(label = %request.label, "cycle aborted");
                self.dispatch(CycleAction::Abort);
                break;
            }

            let limit = self.timeouts.cycle;
            let iteration =
                timeout(limit, self.run_iteration(&request, &mut pending, &mut on_saved)).await;
            match iteration {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(label = %request.label, error = %err, "cycle failed");
                    self.dispatch(CycleAction::Fail {
                        message: err.to_string(),
                    });
                }
                Err(_) => {
                    let err = CycleError::TimedOut { after: limit };
                    warn!(label = %request.label, error = %err, "cycle safety net fired");
                    self.dispatch(CycleAction::TimedOut {
                        message: err.to_string(),
                    });
                }
            }
        }

        let outcome = CycleOutcome::from_state(&self.state);
        info!(
            label = %request.label,
            reason = ?outcome.reason,
            saved = outcome.total_saved,
            iterations = outcome.iterations,
            "generation cycle finished"
        );
        Ok(outcome)
    }

    async fn run_iteration<F>(
        &mut self,
        request: &CycleRequest,
        pending: &mut Vec<ImagePrompt>,
        on_saved: &mut F,
    ) -> Result<(), CycleError>
    where
        F: FnMut(&SavedImage) + Send,
    {
        let iteration = self.state.current_iteration;
        debug!(label = %request.label, iteration, prompts = pending.len(), "generating images");

        let images = self
            .services
            .generate_images(pending.as_slice())
            .await
            .map_err(|e| CycleError::service(CycleStep::Generate, e))?;
        self.dispatch(CycleAction::ImagesReady {
            count: images.len(),
        });
        if self.abort.is_requested() {
            return Ok(());
        }

        let evaluations = self
            .services
            .evaluate_images(&images, &request.criteria)
            .await
            .map_err(|e| CycleError::service(CycleStep::Evaluate, e))?;
        let mut reviewed = pair_results(pending, images, evaluations);
        let polish_candidates = reviewed.iter().filter(|r| r.is_polish_candidate()).count();
        self.dispatch(CycleAction::Evaluated { polish_candidates });
        if self.abort.is_requested() {
            return Ok(());
        }

        if self.state.status == CycleStatus::Polishing {
            self.polish(&mut reviewed).await?;
            self.dispatch(CycleAction::Polished);
        }

        let mut next_batch = Vec::new();
        for item in reviewed {
            match (item.image, item.evaluation) {
                (Some(image), Some(evaluation)) if evaluation.approved => {
                    if self.state.target_met() {
                        continue;
                    }
                    let save = SaveRequest {
                        panel: request.panel,
                        prompt_id: item.prompt.id.clone(),
                        prompt: item.prompt.prompt.clone(),
                        image_url: image.url.clone(),
                    };
                    let stored = self
                        .services
                        .save_image(&save)
                        .await
                        .map_err(|e| CycleError::service(CycleStep::Save, e))?;
                    if stored {
                        self.dispatch(CycleAction::ImageSaved);
                        on_saved(&SavedImage {
                            panel: request.panel,
                            prompt_id: save.prompt_id,
                            image_url: save.image_url,
                            iteration,
                            total_saved: self.state.total_saved,
                        });
                    } else {
                        warn!(prompt_id = %item.prompt.id, "save was declined; retrying prompt");
                        next_batch.push(item.prompt);
                    }
                }
                (Some(_), Some(evaluation)) => {
                    let refined = self
                        .services
                        .apply_feedback(&item.prompt, &evaluation)
                        .await
                        .map_err(|e| CycleError::service(CycleStep::ApplyFeedback, e))?;
                    next_batch.push(refined);
                }
                // No image or no verdict: try the same prompt again
                _ => next_batch.push(item.prompt),
            }
        }

        if next_batch.is_empty() {
            next_batch = request.prompts.clone();
        }
        *pending = next_batch;
        self.dispatch(CycleAction::IterationDone);
        Ok(())
    }

    /// Polish every candidate within the per-image time box. A timed-out polish keeps
    /// the unpolished image.
    async fn polish(&self, reviewed: &mut [Reviewed]) -> Result<(), CycleError> {
        for item in reviewed.iter_mut().filter(|r| r.is_polish_candidate()) {
            let (Some(image), Some(evaluation)) = (item.image.as_ref(), item.evaluation.as_ref())
            else {
                continue;
            };
            let polished = timeout(
                self.timeouts.polish,
                self.services.polish_image(image, evaluation),
            )
            .await;
            match polished {
                Ok(Ok(polished)) => item.image = Some(polished),
                Ok(Err(e)) => return Err(CycleError::service(CycleStep::Polish, e)),
                Err(_) => {
                    warn!(
                        prompt_id = %item.prompt.id,
                        after_secs = self.timeouts.polish.as_secs(),
                        "polish timed out; keeping unpolished image"
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Scripted services: approval and save results are decided per call.
    #[derive(Default)]
    struct MockServices {
        /// Approve an image when the generate call number is >= this value
        approve_from_call: u32,
        polish: bool,
        polish_delay: Option<Duration>,
        save_results: Mutex<Vec<bool>>,
        fail_evaluate: bool,
        generate_delay: Option<Duration>,
        generate_calls: AtomicU32,
        seen_prompts: Mutex<Vec<Vec<String>>>,
        saved: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CycleServices for MockServices {
        async fn generate_images(&self, prompts: &[ImagePrompt]) -> Result<Vec<GeneratedImage>> {
            let call = self.generate_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(delay) = self.generate_delay {
                tokio::time::sleep(delay).await;
            }
            self.seen_prompts
                .lock()
                .unwrap()
                .push(prompts.iter().map(|p| p.prompt.clone()).collect());
            Ok(prompts
                .iter()
                .map(|p| GeneratedImage {
                    prompt_id: p.id.clone(),
                    url: format!("img://{}/{}", p.id, call),
                })
                .collect())
        }

        async fn evaluate_images(
            &self,
            images: &[GeneratedImage],
            _criteria: &EvaluationCriteria,
        ) -> Result<Vec<ImageEvaluation>> {
            if self.fail_evaluate {
                return Err(anyhow!("evaluator unavailable"));
            }
            let call = self.generate_calls.load(Ordering::SeqCst);
            Ok(images
                .iter()
                .map(|img| ImageEvaluation {
                    prompt_id: img.prompt_id.clone(),
                    approved: call >= self.approve_from_call,
                    score: 0.8,
                    feedback: Some("more contrast".to_string()),
                    needs_polish: self.polish,
                })
                .collect())
        }

        async fn polish_image(
            &self,
            image: &GeneratedImage,
            _evaluation: &ImageEvaluation,
        ) -> Result<GeneratedImage> {
            if let Some(delay) = self.polish_delay {
                tokio::time::sleep(delay).await;
            }
            Ok(GeneratedImage {
                prompt_id: image.prompt_id.clone(),
                url: format!("{}#polished", image.url),
            })
        }

        async fn save_image(&self, request: &SaveRequest) -> Result<bool> {
            let result = {
                let mut results = self.save_results.lock().unwrap();
                if results.is_empty() {
                    true
                } else {
                    results.remove(0)
                }
            };
            if result {
                self.saved.lock().unwrap().push(request.image_url.clone());
            }
            Ok(result)
        }

        async fn apply_feedback(
            &self,
            prompt: &ImagePrompt,
            evaluation: &ImageEvaluation,
        ) -> Result<ImagePrompt> {
            Ok(ImagePrompt::new(
                prompt.id.clone(),
                format!(
                    "{} ({})",
                    prompt.prompt,
                    evaluation.feedback.as_deref().unwrap_or("")
                ),
            ))
        }
    }

    fn request(prompts: usize, target: u32, max_iterations: u32) -> CycleRequest {
        CycleRequest {
            label: "sketch".to_string(),
            panel: PanelGroup::Sketch,
            prompts: (0..prompts)
                .map(|i| ImagePrompt::new(format!("slot-{i}"), format!("prompt {i}")))
                .collect(),
            target_saved: target,
            max_iterations,
            criteria: EvaluationCriteria::default(),
        }
    }

    fn orchestrator(services: MockServices) -> (SinglePhaseOrchestrator<MockServices>, Arc<MockServices>) {
        let services = Arc::new(services);
        (
            SinglePhaseOrchestrator::new(services.clone(), Timeouts::default()),
            services,
        )
    }

    #[tokio::test]
    async fn test_run_meets_target_and_reports_each_save() {
        let (mut orch, services) = orchestrator(MockServices::default());
        let mut reported = Vec::new();
        let outcome = orch
            .run(request(2, 2, 3), |saved| reported.push(saved.total_saved))
            .await
            .unwrap();

        assert_eq!(outcome.reason, CompletionReason::TargetMet);
        assert_eq!(outcome.total_saved, 2);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(reported, vec![1, 2]);
        assert_eq!(services.saved.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_prompts_are_refined_for_next_iteration() {
        let (mut orch, services) = orchestrator(MockServices {
            approve_from_call: 2,
            ..Default::default()
        });
        let outcome = orch.run(request(1, 1, 3), |_| {}).await.unwrap();

        assert_eq!(outcome.reason, CompletionReason::TargetMet);
        assert_eq!(outcome.iterations, 2);
        let seen = services.seen_prompts.lock().unwrap();
        assert_eq!(seen[0], vec!["prompt 0".to_string()]);
        assert_eq!(seen[1], vec!["prompt 0 (more contrast)".to_string()]);
    }

    #[tokio::test]
    async fn test_exhausted_budget_reports_max_iterations() {
        let (mut orch, _) = orchestrator(MockServices {
            approve_from_call: u32::MAX,
            ..Default::default()
        });
        let outcome = orch.run(request(2, 2, 2), |_| {}).await.unwrap();
        assert_eq!(outcome.reason, CompletionReason::MaxIterations);
        assert_eq!(outcome.total_saved, 0);
        assert_eq!(outcome.shortfall(), 2);
        assert_eq!(outcome.iterations, 2);
    }

    #[tokio::test]
    async fn test_declined_save_does_not_count() {
        let (mut orch, _) = orchestrator(MockServices {
            save_results: Mutex::new(vec![false, true]),
            ..Default::default()
        });
        let mut reported = 0;
        let outcome = orch.run(request(1, 1, 3), |_| reported += 1).await.unwrap();
        assert_eq!(outcome.reason, CompletionReason::TargetMet);
        assert_eq!(outcome.total_saved, 1);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(reported, 1);
    }

    #[tokio::test]
    async fn test_saves_stop_at_target() {
        let (mut orch, services) = orchestrator(MockServices::default());
        let outcome = orch.run(request(3, 1, 1), |_| {}).await.unwrap();
        assert_eq!(outcome.total_saved, 1);
        assert_eq!(services.saved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_polished_image_is_saved() {
        let (mut orch, services) = orchestrator(MockServices {
            polish: true,
            ..Default::default()
        });
        orch.run(request(1, 1, 1), |_| {}).await.unwrap();
        assert!(services.saved.lock().unwrap()[0].ends_with("#polished"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polish_timeout_keeps_original_image() {
        let (mut orch, services) = orchestrator(MockServices {
            polish: true,
            polish_delay: Some(Duration::from_secs(90)),
            ..Default::default()
        });
        let outcome = orch.run(request(1, 1, 1), |_| {}).await.unwrap();
        assert_eq!(outcome.reason, CompletionReason::TargetMet);
        assert!(!services.saved.lock().unwrap()[0].contains("#polished"));
    }

    #[tokio::test]
    async fn test_service_error_ends_in_error() {
        let (mut orch, _) = orchestrator(MockServices {
            fail_evaluate: true,
            ..Default::default()
        });
        let outcome = orch.run(request(1, 1, 3), |_| {}).await.unwrap();
        assert_eq!(outcome.reason, CompletionReason::Error);
        assert!(outcome.error.unwrap().contains("evaluator unavailable"));
        assert_eq!(orch.state().status, CycleStatus::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_safety_net_fires() {
        let (mut orch, _) = orchestrator(MockServices {
            generate_delay: Some(Duration::from_secs(600)),
            ..Default::default()
        });
        let outcome = orch.run(request(1, 1, 3), |_| {}).await.unwrap();
        assert_eq!(outcome.reason, CompletionReason::Timeout);
        assert!(outcome.error.unwrap().contains("stalled"));
    }

    #[tokio::test]
    async fn test_abort_before_run_ends_aborted() {
        let (mut orch, services) = orchestrator(MockServices::default());
        orch.abort();
        let outcome = orch.run(request(1, 1, 3), |_| {}).await.unwrap();
        assert_eq!(outcome.reason, CompletionReason::Aborted);
        assert_eq!(services.generate_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_requires_reset_between_runs() {
        let (mut orch, _) = orchestrator(MockServices::default());
        orch.run(request(1, 1, 1), |_| {}).await.unwrap();
        let err = orch.run(request(1, 1, 1), |_| {}).await.unwrap_err();
        assert!(matches!(err, CycleError::NotIdle { .. }));

        orch.reset();
        assert!(!orch.is_running());
        let outcome = orch.run(request(1, 1, 1), |_| {}).await.unwrap();
        assert_eq!(outcome.reason, CompletionReason::TargetMet);
    }

    #[tokio::test]
    async fn test_zero_target_completes_without_calls() {
        let (mut orch, services) = orchestrator(MockServices::default());
        let outcome = orch.run(request(1, 0, 3), |_| {}).await.unwrap();
        assert_eq!(outcome.reason, CompletionReason::TargetMet);
        assert_eq!(services.generate_calls.load(Ordering::SeqCst), 0);
    }
}
