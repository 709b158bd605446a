use serde::{Deserialize, Serialize};

use crate::errors::AutoplayError;
use crate::phase::Phase;
use crate::snapshot::Dimensions;

pub const DEFAULT_MAX_ITERATIONS_PER_IMAGE: u32 = 3;
pub const DEFAULT_POSTER_CANDIDATES: u32 = 3;

/// Project details used as evaluation criteria.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectBrief {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub vision: String,
    #[serde(default)]
    pub theme: String,
}

impl ProjectBrief {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            vision: String::new(),
            theme: String::new(),
        }
    }

    pub fn with_vision(mut self, vision: impl Into<String>) -> Self {
        self.vision = vision.into();
        self
    }

    pub fn with_theme(mut self, theme: impl Into<String>) -> Self {
        self.theme = theme.into();
        self
    }
}

/// Poster phase inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosterSettings {
    pub dimensions: Dimensions,
    pub base_prompt: String,
    /// Number of candidates generated before selection
    pub candidates: u32,
}

impl Default for PosterSettings {
    fn default() -> Self {
        Self {
            dimensions: Dimensions::new(1024, 1536),
            base_prompt: "Key art poster for the game".to_string(),
            candidates: DEFAULT_POSTER_CANDIDATES,
        }
    }
}

/// HUD phase inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HudSettings {
    /// Reference description of the HUD style overlaid on every image
    pub reference: String,
    pub aspect_ratio: String,
}

impl Default for HudSettings {
    fn default() -> Self {
        Self {
            reference: "minimal in-game HUD: health bar top-left, minimap top-right".to_string(),
            aspect_ratio: "16:9".to_string(),
        }
    }
}

/// Immutable input to one autoplay run.
///
/// Set once at `start` and read-only afterwards; `retry` reuses the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoplayConfig {
    pub sketch_count: u32,
    pub gameplay_count: u32,
    pub poster_enabled: bool,
    pub hud_enabled: bool,
    pub max_iterations_per_image: u32,
    /// Upper bound on orchestrator restarts within one phase after an exhausted
    /// iteration budget. `None` restarts until the phase timeout fires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_phase_restarts: Option<u32>,
    pub project: ProjectBrief,
    #[serde(default)]
    pub poster: PosterSettings,
    #[serde(default)]
    pub hud: HudSettings,
}

impl AutoplayConfig {
    /// Create a config with no countable work and both optional phases disabled.
    pub fn new(project: ProjectBrief) -> Self {
        Self {
            sketch_count: 0,
            gameplay_count: 0,
            poster_enabled: false,
            hud_enabled: false,
            max_iterations_per_image: DEFAULT_MAX_ITERATIONS_PER_IMAGE,
            max_phase_restarts: None,
            project,
            poster: PosterSettings::default(),
            hud: HudSettings::default(),
        }
    }

    pub fn with_counts(mut self, sketch: u32, gameplay: u32) -> Self {
        self.sketch_count = sketch;
        self.gameplay_count = gameplay;
        self
    }

    pub fn with_poster(mut self, enabled: bool) -> Self {
        self.poster_enabled = enabled;
        self
    }

    pub fn with_hud(mut self, enabled: bool) -> Self {
        self.hud_enabled = enabled;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations_per_image = max_iterations;
        self
    }

    pub fn with_max_phase_restarts(mut self, restarts: u32) -> Self {
        self.max_phase_restarts = Some(restarts);
        self
    }

    pub fn with_poster_settings(mut self, poster: PosterSettings) -> Self {
        self.poster = poster;
        self
    }

    pub fn with_hud_settings(mut self, hud: HudSettings) -> Self {
        self.hud = hud;
        self
    }

    /// Target image count for a countable phase; zero for every other phase.
    pub fn target_for(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Sketch => self.sketch_count,
            Phase::Gameplay => self.gameplay_count,
            _ => 0,
        }
    }

    pub fn validate(&self) -> Result<(), AutoplayError> {
        if self.max_iterations_per_image == 0 {
            return Err(AutoplayError::InvalidConfig(
                "max_iterations_per_image must be at least 1".to_string(),
            ));
        }
        if self.poster_enabled && self.poster.candidates == 0 {
            return Err(AutoplayError::InvalidConfig(
                "poster.candidates must be at least 1 when the poster phase is enabled"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = AutoplayConfig::new(ProjectBrief::new("p", "Game"));
        assert_eq!(config.sketch_count, 0);
        assert!(!config.poster_enabled);
        assert_eq!(config.max_iterations_per_image, DEFAULT_MAX_ITERATIONS_PER_IMAGE);
        assert!(config.max_phase_restarts.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_target_for() {
        let config = AutoplayConfig::new(ProjectBrief::new("p", "Game")).with_counts(2, 4);
        assert_eq!(config.target_for(Phase::Sketch), 2);
        assert_eq!(config.target_for(Phase::Gameplay), 4);
        assert_eq!(config.target_for(Phase::Poster), 0);
    }

    #[test]
    fn test_validate_rejects_zero_iterations() {
        let config = AutoplayConfig::new(ProjectBrief::new("p", "Game")).with_max_iterations(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_iterations_per_image"));
    }

    #[test]
    fn test_validate_rejects_zero_poster_candidates_only_when_enabled() {
        let poster = PosterSettings {
            candidates: 0,
            ..Default::default()
        };
        let disabled = AutoplayConfig::new(ProjectBrief::new("p", "Game"))
            .with_poster_settings(poster.clone());
        assert!(disabled.validate().is_ok());

        let enabled = disabled.with_poster(true);
        assert!(enabled.validate().is_err());
    }

    #[test]
    fn test_config_json_roundtrip_keeps_brief() {
        let config = AutoplayConfig::new(
            ProjectBrief::new("p", "Game")
                .with_vision("cozy farming")
                .with_theme("autumn"),
        )
        .with_counts(1, 1);
        let json = serde_json::to_string(&config).unwrap();
        let back: AutoplayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
