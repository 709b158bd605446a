//! HUD overlay batch.
//!
//! Each saved image is sent through `regenerate_image` in overlay mode, one at a time.
//! Failures are recorded per image and the batch keeps going; an abort stops the batch
//! before the next image and keeps everything produced so far.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::abort::AbortSignal;
use crate::config::HudSettings;
use crate::services::{RegenerateMode, RegenerateRequest, StudioServices};

/// Outcome of overlaying a HUD on one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HudGenerationResult {
    pub original_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hud_url: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HudGenerationResult {
    fn succeeded(original_url: &str, hud_url: String) -> Self {
        Self {
            original_url: original_url.to_string(),
            hud_url: Some(hud_url),
            success: true,
            error: None,
        }
    }

    fn failed(original_url: &str, error: impl Into<String>) -> Self {
        Self {
            original_url: original_url.to_string(),
            hud_url: None,
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Instruction handed to the image service for every overlay.
pub fn overlay_prompt(settings: &HudSettings) -> String {
    format!(
        "Overlay a game HUD on this screenshot without changing the scene. Style reference: {}",
        settings.reference.trim()
    )
}

/// Clears the in-flight flag when the batch ends, including when its future is dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct HudWorkflow<S> {
    services: Arc<S>,
    abort: AbortSignal,
    in_flight: AtomicBool,
}

impl<S: StudioServices> HudWorkflow<S> {
    pub fn new(services: Arc<S>) -> Self {
        Self {
            services,
            abort: AbortSignal::new(),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn abort_handle(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Overlay a HUD on every image in order, handing each result to `on_result` as
    /// soon as it exists.
    ///
    /// Returns `None` without doing anything if another batch is already running.
    pub async fn run<F>(
        &self,
        images: &[String],
        settings: &HudSettings,
        mut on_result: F,
    ) -> Option<Vec<HudGenerationResult>>
    where
        F: FnMut(&HudGenerationResult) + Send,
    {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            warn!("HUD batch already in flight; ignoring second request");
            return None;
        }
        let _guard = InFlight(&self.in_flight);

        let prompt = overlay_prompt(settings);
        info!(images = images.len(), "generating HUD overlays");

        let mut results = Vec::with_capacity(images.len());
        for (index, url) in images.iter().enumerate() {
            if self.abort.is_requested() {
                info!(done = index, total = images.len(), "HUD batch aborted");
                break;
            }
            debug!(index, url = %url, "overlaying HUD");

            let request = RegenerateRequest {
                prompt: prompt.clone(),
                source_image_url: url.clone(),
                aspect_ratio: settings.aspect_ratio.clone(),
                mode: RegenerateMode::HudOverlay,
            };
            let result = match self.services.regenerate_image(&request).await {
                Ok(outcome) => match (outcome.success, outcome.image_url) {
                    (true, Some(hud_url)) => HudGenerationResult::succeeded(url, hud_url),
                    (true, None) => HudGenerationResult::failed(url, "no image returned"),
                    (false, _) => HudGenerationResult::failed(
                        url,
                        outcome.error.unwrap_or_else(|| "HUD generation failed".to_string()),
                    ),
                },
                Err(e) => {
                    warn!(url = %url, error = %e, "HUD overlay failed");
                    HudGenerationResult::failed(url, e.to_string())
                }
            };
            on_result(&result);
            results.push(result);
        }
        Some(results)
    }

    /// Clear the abort flag so the next batch can run.
    pub fn reset(&self) {
        self.abort.clear();
    }
}
