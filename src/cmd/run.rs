//! Full autoplay run: `autoplay run`.

use anyhow::{Context, Result, bail};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::super::RunArgs;

/// Where audit records are written, relative to the project directory.
pub const AUDIT_DIR: &str = ".autoplay/audit";

/// Lowercase, dash-separated id derived from a project name.
fn project_id(name: &str) -> String {
    let id: Vec<String> = name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();
    if id.is_empty() {
        "project".to_string()
    } else {
        id.join("-")
    }
}

pub async fn cmd_run(project_dir: &Path, args: &RunArgs) -> Result<()> {
    use autoplay::audit::AuditLogger;
    use autoplay::config::ProjectBrief;
    use autoplay::coordinator::MultiPhaseCoordinator;
    use autoplay::phase::planned_phases;
    use autoplay::settings::AutoplayToml;
    use autoplay::sim::SimulatedStudio;
    use autoplay::ui::AutoplayUI;

    let mut settings = AutoplayToml::load_or_default(project_dir)?.with_env_overrides();
    if let Some(secs) = args.cycle_timeout {
        settings.timeouts.cycle_secs = secs;
    }
    if let Some(secs) = args.polish_timeout {
        settings.timeouts.polish_secs = secs;
    }
    for warning in settings.validate() {
        warn!(%warning, "settings warning");
    }

    let project = ProjectBrief::new(project_id(&args.name), args.name.clone())
        .with_vision(args.vision.clone())
        .with_theme(args.theme.clone());
    let mut config = settings
        .run_config(project)
        .with_counts(args.sketches, args.gameplay)
        .with_poster(!args.no_poster)
        .with_hud(!args.no_hud);
    if let Some(max) = args.max_iterations {
        config = config.with_max_iterations(max);
    }
    if let Some(max) = args.max_restarts {
        config = config.with_max_phase_restarts(max);
    }

    let mut studio = SimulatedStudio::new()
        .with_rejections(args.rejections)
        .with_polish();
    if args.latency_ms > 0 {
        studio = studio.with_latency(Duration::from_millis(args.latency_ms));
    }

    let (tx, mut events) = mpsc::unbounded_channel();
    let mut coordinator =
        MultiPhaseCoordinator::new(Arc::new(studio), settings.timeouts()).with_event_channel(tx);

    let abort = coordinator.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; aborting run");
            abort.abort();
        }
    });

    let ui = Arc::new(AutoplayUI::new(planned_phases(&config)));

    let mut state_rx = coordinator.subscribe();
    let render_ui = ui.clone();
    let render = tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = state_rx.borrow_and_update().clone();
            render_ui.render(&state);
        }
    });

    let mut audit = if args.no_audit {
        None
    } else {
        let mut logger = AuditLogger::new(&project_dir.join(AUDIT_DIR));
        logger.start_run(config.clone())?;
        Some(logger)
    };
    let event_ui = ui.clone();
    let recorder = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            event_ui.show_event(&event);
            if let Some(logger) = audit.as_mut()
                && let Err(e) = logger.record(&event)
            {
                warn!(error = %e, "failed to record audit event");
            }
        }
        audit
    });

    let final_state = coordinator.start(config).await?;

    // Dropping the coordinator closes the state and event channels
    drop(coordinator);
    render.await.context("render task failed")?;
    let audit = recorder.await.context("audit recorder task failed")?;
    ui.finish(&final_state);

    if let Some(mut logger) = audit {
        let path = logger.finish_run(final_state.clone())?;
        info!(path = %path.display(), "audit record written");
    }

    if args.json {
        let json =
            serde_json::to_string_pretty(&final_state).context("Failed to serialize final state")?;
        println!("{json}");
    }

    if let Some(failure) = &final_state.failure {
        bail!(
            "autoplay failed in the {} phase ({}): {}",
            failure.phase,
            failure.kind,
            failure.message
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_id_slugifies_name() {
        assert_eq!(project_id("Neon Drift: Reloaded"), "neon-drift-reloaded");
        assert_eq!(project_id("  "), "project");
    }
}
