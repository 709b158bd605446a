//! Layered policy settings for the autoplay engine.
//!
//! Settings are read from `autoplay.toml`, then environment variables, then CLI
//! arguments. The timeout values are safety nets tuned from operation, not contracts,
//! so every one of them is configurable.
//!
//! # Configuration File Format
//!
//! ```toml
//! [timeouts]
//! cycle_secs = 120
//! polish_secs = 45
//! phase_floor_secs = 60
//! phase_per_image_secs = 75
//!
//! [defaults]
//! max_iterations_per_image = 3
//! poster_candidates = 3
//! max_phase_restarts = 5
//!
//! [hud]
//! reference = "minimal HUD: health bar top-left"
//! aspect_ratio = "16:9"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::config::{
    AutoplayConfig, DEFAULT_MAX_ITERATIONS_PER_IMAGE, DEFAULT_POSTER_CANDIDATES, HudSettings,
    ProjectBrief,
};

pub const SETTINGS_FILE: &str = "autoplay.toml";

const ENV_CYCLE_TIMEOUT: &str = "AUTOPLAY_CYCLE_TIMEOUT_SECS";
const ENV_POLISH_TIMEOUT: &str = "AUTOPLAY_POLISH_TIMEOUT_SECS";
const ENV_PHASE_FLOOR: &str = "AUTOPLAY_PHASE_FLOOR_SECS";
const ENV_PHASE_PER_IMAGE: &str = "AUTOPLAY_PHASE_PER_IMAGE_SECS";

/// Safety-net timeouts, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutsSection {
    /// Upper bound on one generate → evaluate → polish → refine pass
    #[serde(default = "default_cycle_secs")]
    pub cycle_secs: u64,
    /// Time box for polishing a single image
    #[serde(default = "default_polish_secs")]
    pub polish_secs: u64,
    /// Fixed part of the per-phase timeout
    #[serde(default = "default_phase_floor_secs")]
    pub phase_floor_secs: u64,
    /// Per-image allowance added to the phase timeout
    #[serde(default = "default_phase_per_image_secs")]
    pub phase_per_image_secs: u64,
}

fn default_cycle_secs() -> u64 {
    120
}

fn default_polish_secs() -> u64 {
    45
}

fn default_phase_floor_secs() -> u64 {
    60
}

fn default_phase_per_image_secs() -> u64 {
    75
}

impl Default for TimeoutsSection {
    fn default() -> Self {
        Self {
            cycle_secs: default_cycle_secs(),
            polish_secs: default_polish_secs(),
            phase_floor_secs: default_phase_floor_secs(),
            phase_per_image_secs: default_phase_per_image_secs(),
        }
    }
}

/// Default run parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultsSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations_per_image: u32,
    #[serde(default = "default_poster_candidates")]
    pub poster_candidates: u32,
    #[serde(default)]
    pub max_phase_restarts: Option<u32>,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS_PER_IMAGE
}

fn default_poster_candidates() -> u32 {
    DEFAULT_POSTER_CANDIDATES
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            max_iterations_per_image: default_max_iterations(),
            poster_candidates: default_poster_candidates(),
            max_phase_restarts: None,
        }
    }
}

/// The complete autoplay.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoplayToml {
    #[serde(default)]
    pub timeouts: TimeoutsSection,
    #[serde(default)]
    pub defaults: DefaultsSection,
    #[serde(default)]
    pub hud: HudSettings,
}

impl AutoplayToml {
    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse settings from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse autoplay.toml")
    }

    /// Load `autoplay.toml` from `dir`, falling back to defaults when it is absent.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(SETTINGS_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save settings to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize autoplay.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write settings file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides read from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Unparseable values are ignored.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        if let Some(secs) = read(ENV_CYCLE_TIMEOUT) {
            self.timeouts.cycle_secs = secs;
        }
        if let Some(secs) = read(ENV_POLISH_TIMEOUT) {
            self.timeouts.polish_secs = secs;
        }
        if let Some(secs) = read(ENV_PHASE_FLOOR) {
            self.timeouts.phase_floor_secs = secs;
        }
        if let Some(secs) = read(ENV_PHASE_PER_IMAGE) {
            self.timeouts.phase_per_image_secs = secs;
        }
        self
    }

    /// Build a run config for `project` seeded with these defaults.
    pub fn run_config(&self, project: ProjectBrief) -> AutoplayConfig {
        let mut config = AutoplayConfig::new(project)
            .with_max_iterations(self.defaults.max_iterations_per_image)
            .with_hud_settings(self.hud.clone());
        config.poster.candidates = self.defaults.poster_candidates;
        config.max_phase_restarts = self.defaults.max_phase_restarts;
        config
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts::from(&self.timeouts)
    }

    /// Validate the settings and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.timeouts.cycle_secs == 0 {
            warnings.push("timeouts.cycle_secs is 0: every cycle will time out".to_string());
        }
        if self.timeouts.polish_secs >= self.timeouts.cycle_secs {
            warnings.push(format!(
                "timeouts.polish_secs ({}) should be shorter than timeouts.cycle_secs ({})",
                self.timeouts.polish_secs, self.timeouts.cycle_secs
            ));
        }
        if self.defaults.max_iterations_per_image == 0 {
            warnings.push("defaults.max_iterations_per_image must be at least 1".to_string());
        }
        if self.hud.reference.trim().is_empty() {
            warnings.push("hud.reference is empty: HUD overlays will have no style guide".to_string());
        }
        warnings
    }
}

/// Resolved timeouts used at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub cycle: Duration,
    pub polish: Duration,
    pub phase_floor: Duration,
    pub phase_per_image: Duration,
}

impl Timeouts {
    /// Phase safety net: a fixed floor plus an allowance per unit of work.
    ///
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn for_phase(&self, units: u32) -> Duration {
        self.phase_per_image
            .saturating_mul(units)
            .saturating_add(self.phase_floor)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from(&TimeoutsSection::default())
    }
}

impl From<&TimeoutsSection> for Timeouts {
    fn from(section: &TimeoutsSection) -> Self {
        Self {
            cycle: Duration::from_secs(section.cycle_secs),
            polish: Duration::from_secs(section.polish_secs),
            phase_floor: Duration::from_secs(section.phase_floor_secs),
            phase_per_image: Duration::from_secs(section.phase_per_image_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = AutoplayToml::default();
        let timeouts = settings.timeouts();
        assert_eq!(timeouts.cycle, Duration::from_secs(120));
        assert_eq!(timeouts.for_phase(2), Duration::from_secs(60 + 150));
        assert!(settings.validate().is_empty());
    }

    #[test]
    fn test_phase_timeout_saturates() {
        let timeouts = Timeouts {
            phase_per_image: Duration::from_secs(u64::MAX / 2),
            ..Timeouts::default()
        };
        assert_eq!(timeouts.for_phase(3), Duration::MAX);

        let timeouts = Timeouts {
            phase_floor: Duration::MAX,
            ..Timeouts::default()
        };
        assert_eq!(timeouts.for_phase(1), Duration::MAX);
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let settings = AutoplayToml::parse(
            r#"
[timeouts]
cycle_secs = 90

[defaults]
max_phase_restarts = 4
"#,
        )
        .unwrap();
        assert_eq!(settings.timeouts.cycle_secs, 90);
        assert_eq!(settings.timeouts.polish_secs, 45);
        assert_eq!(settings.defaults.max_phase_restarts, Some(4));
        assert_eq!(settings.defaults.poster_candidates, 3);
    }

    #[test]
    fn test_parse_invalid_toml_errors() {
        let err = AutoplayToml::parse("[timeouts\ncycle_secs = ").unwrap_err();
        assert!(err.to_string().contains("autoplay.toml"));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let settings = AutoplayToml::load_or_default(dir.path()).unwrap();
        assert_eq!(settings, AutoplayToml::default());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let mut settings = AutoplayToml::default();
        settings.timeouts.phase_per_image_secs = 30;
        settings.save(&dir.path().join(SETTINGS_FILE)).unwrap();

        let loaded = AutoplayToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.timeouts.phase_per_image_secs, 30);
    }

    #[test]
    fn test_overrides_from_lookup() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_CYCLE_TIMEOUT, "30"),
            (ENV_PHASE_FLOOR, "not-a-number"),
        ]);
        let settings = AutoplayToml::default()
            .with_overrides_from(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(settings.timeouts.cycle_secs, 30);
        assert_eq!(settings.timeouts.phase_floor_secs, 60);
    }

    #[test]
    fn test_validate_warns_on_polish_longer_than_cycle() {
        let mut settings = AutoplayToml::default();
        settings.timeouts.polish_secs = 200;
        let warnings = settings.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("polish_secs"));
    }

    #[test]
    fn test_run_config_uses_defaults() {
        let mut settings = AutoplayToml::default();
        settings.defaults.max_iterations_per_image = 5;
        settings.defaults.poster_candidates = 2;
        let config = settings.run_config(ProjectBrief::new("p", "Game"));
        assert_eq!(config.max_iterations_per_image, 5);
        assert_eq!(config.poster.candidates, 2);
    }
}
