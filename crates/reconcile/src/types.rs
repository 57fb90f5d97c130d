//! Core types for resource reconciliation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::process::Output;

/// Presence every resource of a run converges to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    /// Create or update every resource
    Present,
    /// Delete every resource
    Absent,
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => write!(f, "present"),
            Self::Absent => write!(f, "absent"),
        }
    }
}

/// Requirement level for sudo/elevated privileges
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SudoRequirement {
    /// No elevated privileges needed
    #[default]
    None,
    /// Elevated privileges required with a reason
    Required { reason: String },
}

/// Observed state of a resource relative to its definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    /// Resource exists and matches its definition
    Present { details: Option<String> },
    /// Resource does not exist
    Absent,
    /// Resource exists but differs from its definition
    Modified { from: String, to: String },
    /// State cannot be determined (e.g. an input identifier is not known yet)
    Unknown,
}

impl ResourceState {
    /// Check if state represents presence
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    /// Check if state represents absence
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Whether the resource exists in any form
    pub fn exists(&self) -> bool {
        matches!(self, Self::Present { .. } | Self::Modified { .. })
    }
}

/// Result of converging one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyResult {
    /// No changes needed
    NoChange,
    /// Resource was created
    Created,
    /// Resource was updated in place (or replaced)
    Modified,
    /// Resource was removed
    Removed,
    /// Step had nothing to do in this run
    Skipped { reason: String },
}

impl ApplyResult {
    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Modified | Self::Removed)
    }
}

impl fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoChange => write!(f, "unchanged"),
            Self::Created => write!(f, "created"),
            Self::Modified => write!(f, "updated"),
            Self::Removed => write!(f, "removed"),
            Self::Skipped { reason } => write!(f, "skipped ({reason})"),
        }
    }
}

/// What an upsert reports back to the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// What happened to the resource
    pub result: ApplyResult,
    /// Provider-assigned identifier of the resource, if it has one
    pub identifier: Option<String>,
}

impl Outcome {
    /// Outcome without an identifier
    pub fn new(result: ApplyResult) -> Self {
        Self {
            result,
            identifier: None,
        }
    }

    /// Attach the resolved identifier
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }
}

impl From<ApplyResult> for Outcome {
    fn from(result: ApplyResult) -> Self {
        Self::new(result)
    }
}

/// Identifiers produced during a run, keyed by slot name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slots(BTreeMap<String, String>);

impl Slots {
    /// Empty slot map
    pub fn new() -> Self {
        Self::default()
    }

    /// Value bound to a slot, if any
    pub fn get(&self, slot: &str) -> Option<&str> {
        self.0.get(slot).map(String::as_str)
    }

    /// Bind a slot
    pub fn insert(&mut self, slot: impl Into<String>, value: impl Into<String>) {
        self.0.insert(slot.into(), value.into());
    }

    /// Iterate bindings in slot-name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of bound slots
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no slot is bound
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// What happened to one step of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// Step id
    pub step: String,
    /// Resource type of the step
    pub resource_type: String,
    /// Result of the step
    pub result: ApplyResult,
    /// Identifier the step produced, if any
    pub identifier: Option<String>,
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub modified: usize,
    pub removed: usize,
    pub skipped: usize,
    pub no_change: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.modified + self.removed
    }

    /// Total number of steps processed
    pub fn total(&self) -> usize {
        self.created + self.modified + self.removed + self.skipped + self.no_change
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ApplyResult) {
        match result {
            ApplyResult::NoChange => self.no_change += 1,
            ApplyResult::Created => self.created += 1,
            ApplyResult::Modified => self.modified += 1,
            ApplyResult::Removed => self.removed += 1,
            ApplyResult::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// Result of a reconciliation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// State the run converged to
    pub desired: DesiredState,
    /// Steps in the order they ran
    pub steps: Vec<StepReport>,
    /// Identifiers produced by the run
    pub outputs: Slots,
    /// Aggregated counts
    pub summary: ExecuteSummary,
}

impl ReconcileReport {
    /// Empty report for a run towards `desired`
    pub fn new(desired: DesiredState) -> Self {
        Self {
            desired,
            steps: Vec::new(),
            outputs: Slots::new(),
            summary: ExecuteSummary::default(),
        }
    }

    /// Record a finished step
    pub fn record(&mut self, report: StepReport) {
        self.summary.add_result(&report.result);
        self.steps.push(report);
    }

    /// Step ids in the order they ran
    pub fn order(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.step.as_str()).collect()
    }
}

/// Output from a privileged command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub success: bool,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            success: output.status.success(),
        }
    }
}

impl CommandOutput {
    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}
