//! Deterministic in-memory studio.
//!
//! `SimulatedStudio` implements both service traits without any AI provider or
//! database. The CLI runs against it, and tests script its behaviour through the
//! `with_*` builders: rejections, declined saves, failing or stalled steps, poster
//! evaluator answers and HUD failures.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;

use crate::errors::CycleStep;
use crate::phase::{PanelGroup, Phase};
use crate::services::{
    CycleServices, EvaluationCriteria, GeneratedImage, ImageEvaluation, ImagePrompt,
    PosterCriteria, PosterRequest, PosterSelection, RegenerateRequest, RegenerateResult,
    SaveRequest, StudioServices,
};

/// How the simulated poster evaluator answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PosterPick {
    /// Pick the last candidate
    #[default]
    Last,
    Index(usize),
    Fail,
}

/// Calls of one step to let through, then calls to fail.
#[derive(Debug, Clone, Copy, Default)]
struct ScriptedFailure {
    skip: u32,
    fail: u32,
}

#[derive(Debug, Default)]
struct StudioState {
    prompt_serial: u32,
    render_serial: u32,
    rejections: HashMap<String, u32>,
    saves_declined: u32,
    step_failures: HashMap<CycleStep, ScriptedFailure>,
    stalls_left: u32,
    saved: HashMap<PanelGroup, Vec<String>>,
    poster_exists: bool,
    poster_candidates: u32,
    selected_poster: Option<u32>,
    hud_calls: usize,
}

/// Which poster candidates fail to generate.
#[derive(Debug, Clone, Default)]
enum PosterFailures {
    #[default]
    None,
    All,
    Candidates(HashSet<u32>),
}

impl PosterFailures {
    fn fails(&self, candidate: u32) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Candidates(candidates) => candidates.contains(&candidate),
        }
    }
}

#[derive(Debug, Default)]
pub struct SimulatedStudio {
    latency: Option<Duration>,
    rejections_per_prompt: u32,
    polish: bool,
    declined_saves: u32,
    poster_pick: PosterPick,
    poster_failures: PosterFailures,
    hud_failures: HashSet<usize>,
    stalled_hud: HashSet<usize>,
    stalled_listing: bool,
    state: Mutex<StudioState>,
}

impl SimulatedStudio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every service call, so progress can be watched.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Reject each prompt this many times before approving it.
    pub fn with_rejections(mut self, per_prompt: u32) -> Self {
        self.rejections_per_prompt = per_prompt;
        self
    }

    /// Ask for a polish pass on every approved image.
    pub fn with_polish(mut self) -> Self {
        self.polish = true;
        self
    }

    /// Decline the first `count` save requests.
    pub fn with_declined_saves(mut self, count: u32) -> Self {
        self.declined_saves = count;
        self
    }

    /// Fail the first `times` calls of a cycle step.
    pub fn with_step_failure(self, step: CycleStep, times: u32) -> Self {
        self.with_step_failure_after(step, 0, times)
    }

    /// Let `skip` calls of a cycle step succeed, then fail the next `times`.
    pub fn with_step_failure_after(self, step: CycleStep, skip: u32, times: u32) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state
                .step_failures
                .insert(step, ScriptedFailure { skip, fail: times });
        }
        self
    }

    /// Never answer the first `times` generate calls.
    pub fn with_stalled_generation(self, times: u32) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.stalls_left = times;
        }
        self
    }

    pub fn with_existing_poster(self) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.poster_exists = true;
        }
        self
    }

    pub fn with_poster_pick(mut self, pick: PosterPick) -> Self {
        self.poster_pick = pick;
        self
    }

    /// Fail every poster candidate.
    pub fn with_poster_failures(mut self) -> Self {
        self.poster_failures = PosterFailures::All;
        self
    }

    /// Fail only these poster candidates, by `PosterRequest::candidate` number.
    pub fn with_poster_failures_at(mut self, candidates: impl IntoIterator<Item = u32>) -> Self {
        self.poster_failures = PosterFailures::Candidates(candidates.into_iter().collect());
        self
    }

    /// Fail the HUD overlays at these zero-based call positions.
    pub fn with_hud_failures(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.hud_failures = calls.into_iter().collect();
        self
    }

    /// Never answer the HUD overlays at these zero-based call positions.
    pub fn with_stalled_hud(mut self, calls: impl IntoIterator<Item = usize>) -> Self {
        self.stalled_hud = calls.into_iter().collect();
        self
    }

    /// Never answer a request to list saved images.
    pub fn with_stalled_listing(mut self) -> Self {
        self.stalled_listing = true;
        self
    }

    pub fn saved_count(&self, panel: PanelGroup) -> usize {
        self.lock()
            .map(|s| s.saved.get(&panel).map_or(0, Vec::len))
            .unwrap_or_default()
    }

    pub fn poster_candidates_generated(&self) -> u32 {
        self.lock().map(|s| s.poster_candidates).unwrap_or_default()
    }

    pub fn selected_poster(&self) -> Option<u32> {
        self.lock().ok().and_then(|s| s.selected_poster)
    }

    pub fn hud_calls(&self) -> usize {
        self.lock().map(|s| s.hud_calls).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StudioState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("simulated studio state poisoned"))
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Consume one scripted failure for `step`, if any are left.
    fn scripted_failure(&self, step: CycleStep) -> Result<()> {
        let mut state = self.lock()?;
        let Some(script) = state.step_failures.get_mut(&step) else {
            return Ok(());
        };
        if script.skip > 0 {
            script.skip -= 1;
        } else if script.fail > 0 {
            script.fail -= 1;
            bail!("simulated {step} failure");
        }
        Ok(())
    }
}

#[async_trait]
impl CycleServices for SimulatedStudio {
    async fn generate_images(&self, prompts: &[ImagePrompt]) -> Result<Vec<GeneratedImage>> {
        self.pause().await;
        let stalled = {
            let mut state = self.lock()?;
            let stalled = state.stalls_left > 0;
            state.stalls_left = state.stalls_left.saturating_sub(1);
            stalled
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        self.scripted_failure(CycleStep::Generate)?;

        let mut state = self.lock()?;
        Ok(prompts
            .iter()
            .map(|prompt| {
                state.render_serial += 1;
                GeneratedImage {
                    prompt_id: prompt.id.clone(),
                    url: format!("sim://render/{}/{}", prompt.id, state.render_serial),
                }
            })
            .collect())
    }

    async fn evaluate_images(
        &self,
        images: &[GeneratedImage],
        _criteria: &EvaluationCriteria,
    ) -> Result<Vec<ImageEvaluation>> {
        self.pause().await;
        self.scripted_failure(CycleStep::Evaluate)?;

        let mut state = self.lock()?;
        Ok(images
            .iter()
            .map(|image| {
                let seen = state.rejections.entry(image.prompt_id.clone()).or_default();
                let approved = *seen >= self.rejections_per_prompt;
                *seen += 1;
                ImageEvaluation {
                    prompt_id: image.prompt_id.clone(),
                    approved,
                    score: if approved { 0.85 } else { 0.4 },
                    feedback: (!approved).then(|| "push the silhouette contrast".to_string()),
                    needs_polish: approved && self.polish,
                }
            })
            .collect())
    }

    async fn polish_image(
        &self,
        image: &GeneratedImage,
        _evaluation: &ImageEvaluation,
    ) -> Result<GeneratedImage> {
        self.pause().await;
        self.scripted_failure(CycleStep::Polish)?;
        Ok(GeneratedImage {
            prompt_id: image.prompt_id.clone(),
            url: format!("{}?polished", image.url),
        })
    }

    async fn save_image(&self, request: &SaveRequest) -> Result<bool> {
        self.pause().await;
        self.scripted_failure(CycleStep::Save)?;

        let mut state = self.lock()?;
        if state.saves_declined < self.declined_saves {
            state.saves_declined += 1;
            return Ok(false);
        }
        state
            .saved
            .entry(request.panel)
            .or_default()
            .push(request.image_url.clone());
        Ok(true)
    }

    async fn apply_feedback(
        &self,
        prompt: &ImagePrompt,
        evaluation: &ImageEvaluation,
    ) -> Result<ImagePrompt> {
        self.pause().await;
        self.scripted_failure(CycleStep::ApplyFeedback)?;
        let prompt_text = match evaluation.feedback.as_deref() {
            Some(feedback) => format!("{}; {}", prompt.prompt, feedback),
            None => prompt.prompt.clone(),
        };
        Ok(ImagePrompt::new(prompt.id.clone(), prompt_text))
    }
}

#[async_trait]
impl StudioServices for SimulatedStudio {
    async fn prompts_for_phase(&self, phase: Phase, count: u32) -> Result<Vec<ImagePrompt>> {
        let mut state = self.lock()?;
        Ok((0..count)
            .map(|_| {
                state.prompt_serial += 1;
                let serial = state.prompt_serial;
                ImagePrompt::new(
                    format!("{phase}-{serial}"),
                    format!("{phase} panel {serial}"),
                )
            })
            .collect())
    }

    async fn saved_images(&self, panel: PanelGroup) -> Result<Vec<String>> {
        if self.stalled_listing {
            std::future::pending::<()>().await;
        }
        Ok(self.lock()?.saved.get(&panel).cloned().unwrap_or_default())
    }

    async fn has_poster(&self) -> Result<bool> {
        Ok(self.lock()?.poster_exists)
    }

    async fn generate_poster(&self, request: &PosterRequest) -> Result<String> {
        self.pause().await;
        self.lock()?.poster_candidates += 1;
        if self.poster_failures.fails(request.candidate) {
            bail!("simulated poster failure for candidate {}", request.candidate);
        }
        Ok(format!(
            "sim://poster/{}/{}",
            request.project_id, request.candidate
        ))
    }

    async fn select_best_poster(
        &self,
        urls: &[String],
        _criteria: &PosterCriteria,
    ) -> Result<PosterSelection> {
        self.pause().await;
        let selected_index = match self.poster_pick {
            PosterPick::Last => urls.len().saturating_sub(1),
            PosterPick::Index(index) => index,
            PosterPick::Fail => bail!("simulated poster evaluator failure"),
        };
        Ok(PosterSelection {
            selected_index,
            confidence: 0.7,
            reasoning: "strongest focal point".to_string(),
        })
    }

    async fn select_poster(&self, candidate: u32) -> Result<()> {
        self.lock()?.selected_poster = Some(candidate);
        Ok(())
    }

    async fn save_poster(&self) -> Result<bool> {
        let mut state = self.lock()?;
        if state.selected_poster.is_none() {
            return Ok(false);
        }
        state.poster_exists = true;
        Ok(true)
    }

    async fn regenerate_image(&self, request: &RegenerateRequest) -> Result<RegenerateResult> {
        self.pause().await;
        let call = {
            let mut state = self.lock()?;
            state.hud_calls += 1;
            state.hud_calls - 1
        };
        if self.stalled_hud.contains(&call) {
            std::future::pending::<()>().await;
        }
        if self.hud_failures.contains(&call) {
            return Ok(RegenerateResult::failed("overlay rejected"));
        }
        Ok(RegenerateResult::ok(format!(
            "{}#hud",
            request.source_image_url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejections_are_counted_per_prompt() {
        let studio = SimulatedStudio::new().with_rejections(1);
        let images = studio
            .generate_images(&[ImagePrompt::new("a", "x")])
            .await
            .unwrap();
        let criteria = EvaluationCriteria::default();
        let first = studio.evaluate_images(&images, &criteria).await.unwrap();
        let second = studio.evaluate_images(&images, &criteria).await.unwrap();
        assert!(!first[0].approved);
        assert!(first[0].feedback.is_some());
        assert!(second[0].approved);
    }

    #[tokio::test]
    async fn test_step_failure_is_consumed() {
        let studio = SimulatedStudio::new().with_step_failure(CycleStep::Generate, 1);
        let prompts = [ImagePrompt::new("a", "x")];
        assert!(studio.generate_images(&prompts).await.is_err());
        assert_eq!(studio.generate_images(&prompts).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_step_failure_after_skipped_calls() {
        let studio = SimulatedStudio::new().with_step_failure_after(CycleStep::Generate, 1, 1);
        let prompts = [ImagePrompt::new("a", "x")];
        assert!(studio.generate_images(&prompts).await.is_ok());
        assert!(studio.generate_images(&prompts).await.is_err());
        assert!(studio.generate_images(&prompts).await.is_ok());
    }

    #[tokio::test]
    async fn test_prompt_ids_are_unique_across_calls() {
        let studio = SimulatedStudio::new();
        let first = studio.prompts_for_phase(Phase::Sketch, 2).await.unwrap();
        let second = studio.prompts_for_phase(Phase::Sketch, 1).await.unwrap();
        assert_eq!(first[0].id, "sketch-1");
        assert_eq!(second[0].id, "sketch-3");
    }

    #[tokio::test]
    async fn test_declined_saves_are_not_stored() {
        let studio = SimulatedStudio::new().with_declined_saves(1);
        let request = SaveRequest {
            panel: PanelGroup::Gameplay,
            prompt_id: "g".to_string(),
            prompt: "p".to_string(),
            image_url: "sim://x".to_string(),
        };
        assert!(!studio.save_image(&request).await.unwrap());
        assert!(studio.save_image(&request).await.unwrap());
        assert_eq!(studio.saved_count(PanelGroup::Gameplay), 1);
    }
}
