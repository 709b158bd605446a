use super::AuditRun;
use crate::config::AutoplayConfig;
use crate::coordinator::{AutoplayEvent, AutoplayState};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Writes audit records for autoplay runs under a directory.
///
/// The active run is mirrored to `current-run.json` after every event; finished runs
/// move to `runs/<timestamp>_<id>.json`.
pub struct AuditLogger {
    audit_dir: PathBuf,
    current_run: Option<AuditRun>,
    current_run_file: PathBuf,
}

impl AuditLogger {
    pub fn new(audit_dir: &Path) -> Self {
        let current_run_file = audit_dir.join("current-run.json");
        Self {
            audit_dir: audit_dir.to_path_buf(),
            current_run: None,
            current_run_file,
        }
    }

    pub fn start_run(&mut self, config: AutoplayConfig) -> Result<()> {
        fs::create_dir_all(&self.audit_dir).with_context(|| {
            format!(
                "Failed to create audit directory: {}",
                self.audit_dir.display()
            )
        })?;
        self.current_run = Some(AuditRun::new(config));
        self.save_current()
    }

    /// Fold an event into the current run.
    ///
    /// Returns an error if no run is active.
    pub fn record(&mut self, event: &AutoplayEvent) -> Result<()> {
        let run = self
            .current_run
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("record called with no active run"))?;
        run.record(event);
        self.save_current()
    }

    pub fn finish_run(&mut self, state: AutoplayState) -> Result<PathBuf> {
        let run = self
            .current_run
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("No current run to finish"))?;

        run.finish(state);

        let filename = format!(
            "{}_{}.json",
            run.started_at.format("%Y-%m-%dT%H-%M-%S"),
            &run.run_id.to_string()[..8]
        );
        let runs_dir = self.audit_dir.join("runs");
        fs::create_dir_all(&runs_dir).context("Failed to create audit runs directory")?;
        let run_file = runs_dir.join(&filename);

        let json = serde_json::to_string_pretty(&run).context("Failed to serialize audit run")?;
        fs::write(&run_file, json).context("Failed to write audit run file")?;

        if self.current_run_file.exists() {
            fs::remove_file(&self.current_run_file)
                .context("Failed to remove current-run.json after finishing run")?;
        }

        self.current_run = None;
        Ok(run_file)
    }

    fn save_current(&self) -> Result<()> {
        if let Some(ref run) = self.current_run {
            let json =
                serde_json::to_string_pretty(&run).context("Failed to serialize current run")?;
            fs::write(&self.current_run_file, json).context("Failed to write current run file")?;
        }
        Ok(())
    }
}
