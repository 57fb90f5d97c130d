//! Resource trait for reconciliation
//!
//! A Resource is one named thing that a plan drives to presence or
//! absence. Creation is an upsert, deletion tolerates the thing being
//! gone already.

use crate::context::ApplyContext;
use crate::types::{ApplyResult, Outcome, ResourceState, Slots, SudoRequirement};
use anyhow::Result;
use std::fmt;

/// Core trait for reconciled resources
///
/// Every step of a plan implements this trait, which provides:
/// - Identity (id, description, type)
/// - Identifier slots consumed and produced
/// - State detection for previews
/// - Convergence in both directions (upsert, delete)
/// - Privilege requirements
///
/// # Identifier slots
///
/// A resource that yields a provider-assigned identifier names the slot it
/// fills in [`provides`](Resource::provides) and returns the value from
/// [`upsert`](Resource::upsert). Downstream resources list that slot in
/// [`requires`](Resource::requires) and read it with
/// [`ApplyContext::input`]. Slots are only filled while creating: deletion
/// runs in reverse order and must address resources by logical name.
///
/// # Example
///
/// ```ignore
/// use reconcile::{ApplyContext, ApplyResult, Outcome, Resource, ResourceState, Slots};
///
/// #[derive(Debug)]
/// struct Marker { path: std::path::PathBuf }
///
/// impl Resource for Marker {
///     fn id(&self) -> String { "marker".into() }
///     fn description(&self) -> String { format!("Marker file {}", self.path.display()) }
///     fn resource_type(&self) -> &'static str { "file" }
///
///     fn current_state(&self, _slots: &Slots) -> anyhow::Result<ResourceState> {
///         Ok(if self.path.exists() {
///             ResourceState::Present { details: None }
///         } else {
///             ResourceState::Absent
///         })
///     }
///
///     fn upsert(&self, _ctx: &mut ApplyContext) -> anyhow::Result<Outcome> {
///         if self.path.exists() {
///             return Ok(ApplyResult::NoChange.into());
///         }
///         std::fs::write(&self.path, "")?;
///         Ok(ApplyResult::Created.into())
///     }
///
///     fn delete(&self, _ctx: &mut ApplyContext) -> anyhow::Result<ApplyResult> {
///         if !self.path.exists() {
///             return Ok(ApplyResult::NoChange);
///         }
///         std::fs::remove_file(&self.path)?;
///         Ok(ApplyResult::Removed)
///     }
/// }
/// ```
pub trait Resource: Send + Sync + fmt::Debug {
    /// Step id, unique within a plan (e.g. "role", "invoke-grant")
    fn id(&self) -> String;

    /// Human-readable description of what this resource does
    fn description(&self) -> String;

    /// Resource type category
    ///
    /// Used for grouping in previews. Examples:
    /// - "iam_role", "lambda_function"
    /// - "cron_entry"
    fn resource_type(&self) -> &'static str;

    /// Whether this resource requires elevated privileges
    fn sudo_requirement(&self) -> SudoRequirement {
        SudoRequirement::None
    }

    /// Identifier slots this resource reads during upsert
    fn requires(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Identifier slot this resource fills during upsert
    fn provides(&self) -> Option<&'static str> {
        None
    }

    /// Detect the current state of this resource without changing it
    ///
    /// `slots` holds whatever identifiers are known; return
    /// [`ResourceState::Unknown`] when a required one is missing.
    fn current_state(&self, slots: &Slots) -> Result<ResourceState>;

    /// Identifier of the live resource, if it exists
    ///
    /// Used by previews to resolve downstream slots without mutating.
    fn existing_identifier(&self) -> Result<Option<String>> {
        Ok(None)
    }

    /// Create the resource or update it in place
    ///
    /// Must be safe to re-run: an up-to-date resource returns
    /// [`ApplyResult::NoChange`] (still with its identifier).
    fn upsert(&self, ctx: &mut ApplyContext) -> Result<Outcome>;

    /// Delete the resource
    ///
    /// A resource that is already absent returns [`ApplyResult::NoChange`]
    /// without mutating anything.
    fn delete(&self, ctx: &mut ApplyContext) -> Result<ApplyResult>;

    /// Whether [`delete`](Resource::delete) leaves the resource in place
    ///
    /// Previews of a teardown report no change for such resources.
    fn retains_on_delete(&self) -> bool {
        false
    }
}

/// A boxed resource for type-erased storage
pub type BoxedResource = Box<dyn Resource>;

/// Extension trait for working with boxed resources
pub trait ResourceExt {
    /// Check if the resource requires sudo based on its requirement
    fn requires_sudo(&self) -> bool;
}

impl<R: Resource + ?Sized> ResourceExt for R {
    fn requires_sudo(&self) -> bool {
        matches!(self.sudo_requirement(), SudoRequirement::Required { .. })
    }
}
