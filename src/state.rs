use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reconcile::{DesiredState, ReconcileReport};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Target;
use crate::driver::DeployError;

// ============================================================================
// Run Record
// ============================================================================

/// What the last run against one target did
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RunRecord {
    pub job: String,
    pub target: Target,
    pub desired: DesiredState,
    pub finished_at: DateTime<Utc>,
    pub succeeded: bool,

    /// Step the run stopped at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Identifiers produced by the run, by slot
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,

    /// Steps that completed, in the order they ran
    #[serde(default)]
    pub steps: Vec<StepRecord>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StepRecord {
    pub step: String,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

impl RunRecord {
    /// Summarize a finished run
    pub fn new(
        job: &str,
        target: Target,
        desired: DesiredState,
        result: &Result<ReconcileReport, DeployError>,
    ) -> Self {
        let mut record = Self {
            job: job.to_string(),
            target,
            desired,
            finished_at: Utc::now(),
            succeeded: result.is_ok(),
            failed_step: None,
            error: None,
            outputs: BTreeMap::new(),
            steps: Vec::new(),
        };

        let report = match result {
            Ok(report) => Some(report),
            Err(e) => {
                record.error = Some(format!("{e:#}"));
                record.failed_step = e.step().map(str::to_string);
                e.report()
            }
        };
        if let Some(report) = report {
            record.add_report(report);
        }
        record
    }

    fn add_report(&mut self, report: &ReconcileReport) {
        self.outputs = report
            .outputs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.steps = report
            .steps
            .iter()
            .map(|s| StepRecord {
                step: s.step.clone(),
                result: s.result.to_string(),
                identifier: s.identifier.clone(),
            })
            .collect();
    }

    /// File holding the record for `job` on `target`
    pub fn path(dir: &Path, job: &str, target: Target) -> PathBuf {
        dir.join(format!("{job}-{target}.toml"))
    }

    /// Load the last record, if any run was recorded
    pub fn load(dir: &Path, job: &str, target: Target) -> Result<Option<Self>> {
        let path = Self::path(dir, job, target);

        if !path.exists() {
            log::debug!("No run recorded at {}", path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read run record: {}", path.display()))?;

        let record = toml::from_str(&content)
            .with_context(|| format!("Failed to parse run record: {}", path.display()))?;

        Ok(Some(record))
    }

    /// Save the record, replacing the previous one for the same target
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;

        let path = Self::path(dir, &self.job, self.target);
        let content =
            toml::to_string_pretty(self).context("Failed to serialize run record to TOML")?;

        fs::write(&path, &content)
            .with_context(|| format!("Failed to write run record: {}", path.display()))?;

        log::debug!("Saved run record to {}", path.display());
        Ok(path)
    }
}
