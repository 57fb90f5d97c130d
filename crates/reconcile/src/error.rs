//! Error types for plan construction and reconciliation runs.

use crate::types::ReconcileReport;
use thiserror::Error;

/// Errors raised while validating a plan or running it.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Two steps share an id
    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),

    /// An explicit ordering edge names a step that is not in the plan
    #[error("step '{step}' is ordered after unknown step '{after}'")]
    UnknownDependency {
        /// Step declaring the edge
        step: String,
        /// Missing step
        after: String,
    },

    /// A consumed slot has no producer in the plan
    #[error("step '{step}' requires '{slot}', which no step provides")]
    UnboundSlot {
        /// Consuming step
        step: String,
        /// Slot name
        slot: String,
    },

    /// A slot is produced by more than one step
    #[error("'{slot}' is provided by both '{first}' and '{second}'")]
    ConflictingProducers {
        /// Slot name
        slot: String,
        /// First producer in plan order
        first: String,
        /// Second producer in plan order
        second: String,
    },

    /// The dependency edges form a cycle
    #[error("dependency cycle between steps: {}", .0.join(", "))]
    Cycle(Vec<String>),

    /// Privileges could not be acquired for the run
    #[error("could not acquire privileges: {0}")]
    Sudo(#[source] anyhow::Error),

    /// A producing step finished without returning its identifier
    #[error("step '{step}' did not return an identifier for '{slot}'")]
    MissingOutput {
        /// Producing step
        step: String,
        /// Slot it should have filled
        slot: String,
    },

    /// A step failed; steps completed before it are in `report`
    #[error("step '{step}' failed: {source}")]
    StepFailed {
        /// Failed step id
        step: String,
        /// Steps completed before the failure
        report: Box<ReconcileReport>,
        /// Underlying failure
        #[source]
        source: anyhow::Error,
    },
}

impl ReconcileError {
    /// Id of the step the run stopped at, if the failure belongs to a step
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::StepFailed { step, .. } | Self::MissingOutput { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Whether the plan itself is malformed
    pub fn is_plan_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateStep(_)
                | Self::UnknownDependency { .. }
                | Self::UnboundSlot { .. }
                | Self::ConflictingProducers { .. }
                | Self::Cycle(_)
        )
    }
}
