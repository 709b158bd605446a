//! Configuration view and validation commands: `autoplay config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use autoplay::settings::{AutoplayToml, SETTINGS_FILE};

    let config_path = project_dir.join(SETTINGS_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Autoplay Configuration");
            println!("======================");
            println!();

            let toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                AutoplayToml::load(&config_path)?
            } else {
                println!("No {} found; using defaults.", SETTINGS_FILE);
                AutoplayToml::default()
            };
            println!();

            println!("[timeouts]");
            println!("  cycle_secs = {}", toml.timeouts.cycle_secs);
            println!("  polish_secs = {}", toml.timeouts.polish_secs);
            println!("  phase_floor_secs = {}", toml.timeouts.phase_floor_secs);
            println!(
                "  phase_per_image_secs = {}",
                toml.timeouts.phase_per_image_secs
            );
            println!();

            println!("[defaults]");
            println!(
                "  max_iterations_per_image = {}",
                toml.defaults.max_iterations_per_image
            );
            println!("  poster_candidates = {}", toml.defaults.poster_candidates);
            match toml.defaults.max_phase_restarts {
                Some(max) => println!("  max_phase_restarts = {}", max),
                None => println!("  max_phase_restarts = (unbounded)"),
            }
            println!();

            println!("[hud]");
            println!("  reference = \"{}\"", toml.hud.reference);
            println!("  aspect_ratio = \"{}\"", toml.hud.aspect_ratio);
            println!();

            // Effective values include environment overrides
            let timeouts = toml.with_env_overrides().timeouts();
            println!("Effective timeouts (with env overrides):");
            println!("  cycle = {}s", timeouts.cycle.as_secs());
            println!("  polish = {}s", timeouts.polish.as_secs());
            println!(
                "  phase = {}s + {}s per image",
                timeouts.phase_floor.as_secs(),
                timeouts.phase_per_image.as_secs()
            );
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No {} found. Using defaults (valid).", SETTINGS_FILE);
                return Ok(());
            }

            let toml = AutoplayToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", SETTINGS_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !project_dir.exists() {
                std::fs::create_dir_all(project_dir)?;
            }

            AutoplayToml::default().save(&config_path)?;

            println!("Created {} at {}", SETTINGS_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [timeouts] cycle, polish and per-phase safety nets");
            println!("  - [defaults] iteration budget, poster candidates, restart limit");
            println!("  - [hud] overlay reference and aspect ratio");
            println!();
        }
    }

    Ok(())
}
