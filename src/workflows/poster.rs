//! Poster selection.
//!
//! Generates the configured number of candidates one at a time, lets the evaluator pick
//! the best one and persists it. When the evaluator cannot help the first candidate wins.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::abort::AbortSignal;
use crate::config::AutoplayConfig;
use crate::services::{PosterCriteria, PosterRequest, PosterSelection, StudioServices};

/// How the poster phase ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PosterOutcome {
    /// The project already had a poster; nothing was generated
    AlreadyExists,
    /// No candidate could be produced
    NoCandidates { attempted: u32 },
    Selected {
        /// The `PosterRequest::candidate` number that won
        candidate: u32,
        url: String,
        /// How many candidates were generated successfully
        candidates: usize,
        /// The evaluator's pick was unusable and the first generated candidate was taken
        fallback: bool,
        reasoning: Option<String>,
        saved: bool,
    },
    Aborted,
}

impl PosterOutcome {
    /// Whether the project ends this phase with a poster.
    pub fn has_poster(&self) -> bool {
        matches!(self, Self::AlreadyExists | Self::Selected { .. })
    }
}

/// Resolve the evaluator's answer to a usable index.
///
/// Returns the index and whether the deterministic fallback was used.
pub fn resolve_selection(selection: &Result<PosterSelection>, candidates: usize) -> (usize, bool) {
    match selection {
        Ok(pick) if pick.selected_index < candidates => (pick.selected_index, false),
        Ok(pick) => {
            warn!(
                selected = pick.selected_index,
                candidates, "evaluator picked a poster that does not exist; using the first"
            );
            (0, true)
        }
        Err(e) => {
            warn!(error = %e, "poster evaluation failed; using the first candidate");
            (0, true)
        }
    }
}

pub struct PosterWorkflow<S> {
    services: Arc<S>,
    abort: AbortSignal,
}

impl<S: StudioServices> PosterWorkflow<S> {
    pub fn new(services: Arc<S>, abort: AbortSignal) -> Self {
        Self { services, abort }
    }

    pub async fn run(&self, config: &AutoplayConfig) -> Result<PosterOutcome> {
        if self
            .services
            .has_poster()
            .await
            .context("Failed to check for an existing poster")?
        {
            info!("project already has a poster; skipping generation");
            return Ok(PosterOutcome::AlreadyExists);
        }

        let attempted = config.poster.candidates;
        // Candidate numbers of the posters that generated, parallel to `urls`
        let mut generated = Vec::with_capacity(attempted as usize);
        let mut urls = Vec::with_capacity(attempted as usize);
        for candidate in 0..attempted {
            if self.abort.is_requested() {
                return Ok(PosterOutcome::Aborted);
            }
            let request = PosterRequest {
                project_id: config.project.id.clone(),
                project_name: config.project.name.clone(),
                dimensions: config.poster.dimensions,
                base_prompt: config.poster.base_prompt.clone(),
                candidate,
            };
            match self.services.generate_poster(&request).await {
                Ok(url) => {
                    debug!(candidate, url = %url, "poster candidate ready");
                    generated.push(candidate);
                    urls.push(url);
                }
                Err(e) => warn!(candidate, error = %e, "poster candidate failed"),
            }
        }

        if urls.is_empty() {
            warn!(attempted, "no poster candidates were produced");
            return Ok(PosterOutcome::NoCandidates { attempted });
        }

        let (index, fallback, reasoning) = if urls.len() == 1 {
            (0, false, None)
        } else {
            let criteria = PosterCriteria {
                project_name: config.project.name.clone(),
                vision: config.project.vision.clone(),
                theme: config.project.theme.clone(),
            };
            let selection = self.services.select_best_poster(&urls, &criteria).await;
            let (index, fallback) = resolve_selection(&selection, urls.len());
            let reasoning = selection.ok().filter(|_| !fallback).map(|s| s.reasoning);
            (index, fallback, reasoning)
        };

        let candidate = generated[index];
        self.services
            .select_poster(candidate)
            .await
            .context("Failed to select poster")?;
        let saved = self
            .services
            .save_poster()
            .await
            .context("Failed to save poster")?;
        if !saved {
            warn!(candidate, "poster selection was not persisted");
        }

        let candidates = urls.len();
        info!(candidate, candidates, fallback, "poster selected");
        Ok(PosterOutcome::Selected {
            candidate,
            url: urls.swap_remove(index),
            candidates,
            fallback,
            reasoning,
            saved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectBrief;
    use crate::sim::{PosterPick, SimulatedStudio};
    use anyhow::anyhow;

    fn config(candidates: u32) -> AutoplayConfig {
        let mut config = AutoplayConfig::new(ProjectBrief::new("p1", "Neon Drift")).with_poster(true);
        config.poster.candidates = candidates;
        config
    }

    fn workflow(studio: SimulatedStudio) -> (PosterWorkflow<SimulatedStudio>, Arc<SimulatedStudio>) {
        let studio = Arc::new(studio);
        (PosterWorkflow::new(studio.clone(), AbortSignal::new()), studio)
    }

    #[test]
    fn test_resolve_selection_in_range() {
        let pick = Ok(PosterSelection {
            selected_index: 2,
            confidence: 0.9,
            reasoning: "best contrast".to_string(),
        });
        assert_eq!(resolve_selection(&pick, 3), (2, false));
    }

    #[test]
    fn test_resolve_selection_falls_back() {
        let out_of_range = Ok(PosterSelection {
            selected_index: 7,
            confidence: 0.9,
            reasoning: String::new(),
        });
        assert_eq!(resolve_selection(&out_of_range, 3), (0, true));
        assert_eq!(resolve_selection(&Err(anyhow!("offline")), 3), (0, true));
    }

    #[tokio::test]
    async fn test_existing_poster_skips_generation() {
        let (poster, studio) = workflow(SimulatedStudio::new().with_existing_poster());
        let outcome = poster.run(&config(3)).await.unwrap();
        assert_eq!(outcome, PosterOutcome::AlreadyExists);
        assert!(outcome.has_poster());
        assert_eq!(studio.poster_candidates_generated(), 0);
    }

    #[tokio::test]
    async fn test_evaluator_pick_is_selected_and_saved() {
        let (poster, studio) = workflow(SimulatedStudio::new().with_poster_pick(PosterPick::Index(1)));
        let outcome = poster.run(&config(3)).await.unwrap();
        match outcome {
            PosterOutcome::Selected {
                candidate,
                candidates,
                fallback,
                saved,
                ..
            } => {
                assert_eq!(candidate, 1);
                assert_eq!(candidates, 3);
                assert!(!fallback);
                assert!(saved);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(studio.selected_poster(), Some(1));
    }

    #[tokio::test]
    async fn test_evaluator_failure_uses_first_candidate() {
        let (poster, studio) = workflow(SimulatedStudio::new().with_poster_pick(PosterPick::Fail));
        let outcome = poster.run(&config(2)).await.unwrap();
        assert!(matches!(
            outcome,
            PosterOutcome::Selected {
                candidate: 0,
                fallback: true,
                ..
            }
        ));
        assert_eq!(studio.selected_poster(), Some(0));
    }

    #[tokio::test]
    async fn test_single_candidate_skips_evaluator() {
        let (poster, _) = workflow(SimulatedStudio::new().with_poster_pick(PosterPick::Fail));
        let outcome = poster.run(&config(1)).await.unwrap();
        assert!(matches!(
            outcome,
            PosterOutcome::Selected {
                candidate: 0,
                fallback: false,
                candidates: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_no_candidates_when_every_generation_fails() {
        let (poster, studio) = workflow(SimulatedStudio::new().with_poster_failures());
        let outcome = poster.run(&config(3)).await.unwrap();
        assert_eq!(outcome, PosterOutcome::NoCandidates { attempted: 3 });
        assert!(!outcome.has_poster());
        assert_eq!(studio.selected_poster(), None);
    }

    #[tokio::test]
    async fn test_selection_names_candidate_not_survivor_position() {
        let (poster, studio) = workflow(
            SimulatedStudio::new()
                .with_poster_failures_at([0])
                .with_poster_pick(PosterPick::Index(0)),
        );
        let outcome = poster.run(&config(3)).await.unwrap();
        match outcome {
            PosterOutcome::Selected {
                candidate,
                url,
                candidates,
                fallback,
                ..
            } => {
                assert_eq!(candidate, 1);
                assert_eq!(url, "sim://poster/p1/1");
                assert_eq!(candidates, 2);
                assert!(!fallback);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(studio.selected_poster(), Some(1));
    }

    #[tokio::test]
    async fn test_fallback_takes_first_generated_candidate() {
        let (poster, studio) = workflow(
            SimulatedStudio::new()
                .with_poster_failures_at([0, 2])
                .with_poster_pick(PosterPick::Fail),
        );
        let outcome = poster.run(&config(4)).await.unwrap();
        assert!(matches!(
            outcome,
            PosterOutcome::Selected {
                candidate: 1,
                candidates: 2,
                fallback: true,
                ..
            }
        ));
        assert_eq!(studio.selected_poster(), Some(1));
    }
}
