//! # Reconcile
//!
//! Dependency-ordered reconciliation of named resources.
//!
//! A plan is a small directed acyclic graph of steps. Each step declares
//! the identifier slots it consumes and the slot it fills; a run towards
//! [`DesiredState::Present`] upserts every step in topological order and
//! threads the identifiers each upsert returns into the steps that need
//! them. A run towards [`DesiredState::Absent`] deletes the same steps in
//! reverse order, treating "already gone" as success.
//!
//! ## Core Concepts
//!
//! - **Resource**: one named thing with an upsert and an idempotent delete
//! - **ExecutionPlan**: steps plus their dependency edges
//! - **reconcile**: runs a plan strictly sequentially, stopping at the first failure
//! - **compute_diffs**: previews what a run would change without mutating
//!
//! ## Example
//!
//! ```ignore
//! use reconcile::{DesiredState, ExecutionPlan, reconcile_simple};
//!
//! let mut plan = ExecutionPlan::new();
//! plan.add(Role::new("job1"));           // provides "role_arn"
//! plan.add(Function::new("job1"));       // requires "role_arn", provides "function_arn"
//! plan.add(Schedule::new("job1"));       // requires "function_arn"
//!
//! let report = reconcile_simple(DesiredState::Present, &plan)?;
//! println!("role: {:?}", report.outputs.get("role_arn"));
//!
//! // Tear down: Schedule, Function, Role
//! reconcile_simple(DesiredState::Absent, &plan)?;
//! ```
//!
//! ## Provider Traits
//!
//! - [`SudoProvider`]: Provides elevated privilege execution
//! - [`ProgressCallback`]: Receives progress updates

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod planner;
pub mod resource;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use context::{ApplyContext, DirectRunner, NoProgress, ProgressCallback, SudoProvider};
pub use diff::{Change, DiffSummary, ResourceDiff, compute_diffs, group_by_type};
pub use error::ReconcileError;
pub use executor::{reconcile, reconcile_simple};
pub use planner::ExecutionPlan;
pub use resource::{BoxedResource, Resource, ResourceExt};
pub use types::{
    ApplyResult, CommandOutput, DesiredState, ExecuteSummary, Outcome, ReconcileReport,
    ResourceState, Slots, StepReport, SudoRequirement,
};
