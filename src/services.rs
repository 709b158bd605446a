//! Injected service seams.
//!
//! The engine never talks to an AI provider, a database or a UI directly. Hosts
//! implement these traits; tests substitute in-memory doubles.
//!
//! Every call returns its fresh result directly to the caller. Nothing is published
//! to shared state for the engine to read back later.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::phase::{PanelGroup, Phase};
use crate::snapshot::Dimensions;

/// A prompt to render, addressed by a stable id (usually the panel slot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePrompt {
    pub id: String,
    pub prompt: String,
}

impl ImagePrompt {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
        }
    }
}

/// An image produced for a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub prompt_id: String,
    pub url: String,
}

/// Evaluator verdict for one generated image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageEvaluation {
    pub prompt_id: String,
    pub approved: bool,
    /// Quality score in 0.0..=1.0
    pub score: f32,
    /// Guidance for refining the prompt when the image was rejected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    /// The image is acceptable but would benefit from a polish pass
    #[serde(default)]
    pub needs_polish: bool,
}

/// Criteria passed to the evaluator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationCriteria {
    pub project_name: String,
    pub vision: String,
    pub theme: String,
    /// What the images are for (e.g. "sketch", "gameplay")
    pub purpose: String,
}

/// A request to store an approved image into a panel slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveRequest {
    pub panel: PanelGroup,
    pub prompt_id: String,
    pub prompt: String,
    pub image_url: String,
}

/// Inputs for one poster candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosterRequest {
    pub project_id: String,
    pub project_name: String,
    pub dimensions: Dimensions,
    pub base_prompt: String,
    /// Zero-based index of the candidate being generated
    pub candidate: u32,
}

/// Criteria the poster evaluator ranks candidates against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PosterCriteria {
    pub project_name: String,
    pub vision: String,
    pub theme: String,
}

/// The evaluator's pick among poster candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosterSelection {
    pub selected_index: usize,
    pub confidence: f32,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegenerateMode {
    /// Re-render the whole image from the prompt
    Full,
    /// Keep the source image and draw a HUD overlay on top of it
    HudOverlay,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegenerateRequest {
    pub prompt: String,
    pub source_image_url: String,
    pub aspect_ratio: String,
    pub mode: RegenerateMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegenerateResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RegenerateResult {
    pub fn ok(image_url: impl Into<String>) -> Self {
        Self {
            success: true,
            image_url: Some(image_url.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            image_url: None,
            error: Some(error.into()),
        }
    }
}

/// The five services one generation cycle depends on.
///
/// Real implementation: the host application. Test double: the mocks in the test
/// modules and `sim::SimulatedStudio`.
#[async_trait]
pub trait CycleServices: Send + Sync {
    /// Render every prompt and return the images that were produced.
    async fn generate_images(&self, prompts: &[ImagePrompt]) -> Result<Vec<GeneratedImage>>;

    async fn evaluate_images(
        &self,
        images: &[GeneratedImage],
        criteria: &EvaluationCriteria,
    ) -> Result<Vec<ImageEvaluation>>;

    /// Produce a polished version of an approved image.
    async fn polish_image(
        &self,
        image: &GeneratedImage,
        evaluation: &ImageEvaluation,
    ) -> Result<GeneratedImage>;

    /// Store an approved image. `Ok(false)` means nothing was stored.
    async fn save_image(&self, request: &SaveRequest) -> Result<bool>;

    /// Rewrite a rejected prompt using the evaluator's feedback.
    async fn apply_feedback(
        &self,
        prompt: &ImagePrompt,
        evaluation: &ImageEvaluation,
    ) -> Result<ImagePrompt>;
}

/// Everything a full multi-phase run needs on top of the cycle services.
#[async_trait]
pub trait StudioServices: CycleServices {
    /// Build `count` prompts for a countable phase.
    async fn prompts_for_phase(&self, phase: Phase, count: u32) -> Result<Vec<ImagePrompt>>;

    /// Image URLs currently saved in a panel group.
    async fn saved_images(&self, panel: PanelGroup) -> Result<Vec<String>>;

    async fn has_poster(&self) -> Result<bool>;

    /// Generate one poster candidate and return its URL.
    async fn generate_poster(&self, request: &PosterRequest) -> Result<String>;

    /// Rank the candidates that were generated. `selected_index` points into `urls`.
    async fn select_best_poster(
        &self,
        urls: &[String],
        criteria: &PosterCriteria,
    ) -> Result<PosterSelection>;

    /// Mark a candidate as the project poster, by its `PosterRequest::candidate` number.
    async fn select_poster(&self, candidate: u32) -> Result<()>;

    async fn save_poster(&self) -> Result<bool>;

    async fn regenerate_image(&self, request: &RegenerateRequest) -> Result<RegenerateResult>;
}
