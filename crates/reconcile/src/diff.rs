//! Diff computation for plan previews
//!
//! A preview walks the plan without mutating anything. Identifiers of
//! resources that already exist are threaded into downstream slots so their
//! state can be compared; anything depending on a resource that would be
//! created reports [`ResourceState::Unknown`].

use crate::error::ReconcileError;
use crate::planner::ExecutionPlan;
use crate::resource::{Resource, ResourceExt};
use crate::types::{DesiredState, ResourceState, Slots};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// What a run would do to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    /// Resource is missing and would be created
    Create,
    /// Resource exists and would be updated in place
    Update,
    /// Resource exists and would be deleted
    Delete,
    /// Resource depends on identifiers not known before the run
    Unknown,
}

/// A pending change to one step of a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDiff {
    /// Step id
    pub resource_id: String,
    /// Type of the resource
    pub resource_type: String,
    /// Human-readable description
    pub description: String,
    /// Observed state
    pub current: ResourceState,
    /// What the run would do
    pub change: Change,
    /// Whether this resource requires sudo
    pub requires_sudo: bool,
}

impl ResourceDiff {
    fn new(resource: &dyn Resource, current: ResourceState, change: Change) -> Self {
        Self {
            resource_id: resource.id(),
            resource_type: resource.resource_type().to_string(),
            description: resource.description(),
            current,
            change,
            requires_sudo: resource.requires_sudo(),
        }
    }
}

/// Compute the changes a run towards `desired` would make
///
/// Returns only steps that would change (or cannot be determined), in the
/// order the run would execute them. Resources that survive their delete are
/// left out of a teardown preview.
pub fn compute_diffs(
    desired: DesiredState,
    plan: &ExecutionPlan,
) -> Result<Vec<ResourceDiff>, ReconcileError> {
    let mut slots = Slots::new();
    let mut states = HashMap::new();

    for resource in plan.creation_order()? {
        let current = resource.current_state(&slots).unwrap_or_else(|e| {
            log::warn!("Could not determine state of {}: {e:#}", resource.id());
            ResourceState::Unknown
        });

        if let Some(slot) = resource.provides()
            && current.exists()
        {
            match resource.existing_identifier() {
                Ok(Some(identifier)) => slots.insert(slot, identifier),
                Ok(None) => {}
                Err(e) => log::debug!("No identifier for {}: {e:#}", resource.id()),
            }
        }

        states.insert(resource.id(), current);
    }

    let mut diffs = Vec::new();
    for resource in plan.order_for(desired)? {
        let current = states
            .remove(&resource.id())
            .unwrap_or(ResourceState::Unknown);

        let change = match (desired, &current) {
            (DesiredState::Present, ResourceState::Absent) => Some(Change::Create),
            (DesiredState::Present, ResourceState::Modified { .. }) => Some(Change::Update),
            (DesiredState::Present, ResourceState::Present { .. }) => None,
            (DesiredState::Absent, _) if resource.retains_on_delete() => None,
            (DesiredState::Absent, ResourceState::Absent) => None,
            (DesiredState::Absent, ResourceState::Present { .. } | ResourceState::Modified { .. }) => {
                Some(Change::Delete)
            }
            (_, ResourceState::Unknown) => Some(Change::Unknown),
        };

        if let Some(change) = change {
            diffs.push(ResourceDiff::new(resource, current, change));
        }
    }

    Ok(diffs)
}

/// Diff summary statistics
#[derive(Debug, Clone, Default)]
pub struct DiffSummary {
    /// Number of resources to add
    pub additions: usize,
    /// Number of resources to remove
    pub removals: usize,
    /// Number of resources to modify
    pub modifications: usize,
    /// Number of resources whose change is not known yet
    pub unknown: usize,
    /// Number of resources requiring sudo
    pub sudo_required: usize,
}

impl DiffSummary {
    /// Create a summary from a list of diffs
    pub fn from_diffs(diffs: &[ResourceDiff]) -> Self {
        let mut summary = Self::default();
        for diff in diffs {
            match diff.change {
                Change::Create => summary.additions += 1,
                Change::Delete => summary.removals += 1,
                Change::Update => summary.modifications += 1,
                Change::Unknown => summary.unknown += 1,
            }
            if diff.requires_sudo {
                summary.sudo_required += 1;
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications + self.unknown
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group diffs by resource type
pub fn group_by_type(diffs: &[ResourceDiff]) -> BTreeMap<String, Vec<&ResourceDiff>> {
    let mut groups: BTreeMap<String, Vec<&ResourceDiff>> = BTreeMap::new();
    for diff in diffs {
        groups
            .entry(diff.resource_type.clone())
            .or_default()
            .push(diff);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::reconcile_simple;
    use crate::testing::World;

    fn chain(world: &World) -> ExecutionPlan {
        let mut plan = ExecutionPlan::new();
        plan.add(world.step("role").provides("role_arn"));
        plan.add(world.step("unit").requires(&["role_arn"]).provides("unit_arn"));
        plan.add(world.step("trigger").requires(&["unit_arn"]));
        plan
    }

    #[test]
    fn test_preview_on_empty_world() {
        let world = World::default();
        let diffs = compute_diffs(DesiredState::Present, &chain(&world)).unwrap();

        let changes: Vec<Change> = diffs.iter().map(|d| d.change).collect();
        // Downstream steps cannot be compared before the role exists
        assert_eq!(changes, vec![Change::Create, Change::Unknown, Change::Unknown]);
        assert!(world.mutations().is_empty());
    }

    #[test]
    fn test_preview_threads_existing_identifiers() {
        let world = World::default();
        let plan = chain(&world);
        reconcile_simple(DesiredState::Present, &plan).unwrap();

        assert!(compute_diffs(DesiredState::Present, &plan).unwrap().is_empty());
    }

    #[test]
    fn test_preview_teardown_lists_existing_in_reverse() {
        let world = World::default();
        let plan = chain(&world);
        reconcile_simple(DesiredState::Present, &plan).unwrap();
        world.remove_out_of_band("trigger");

        let diffs = compute_diffs(DesiredState::Absent, &plan).unwrap();
        let ids: Vec<&str> = diffs.iter().map(|d| d.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["unit", "role"]);
        assert!(diffs.iter().all(|d| d.change == Change::Delete));
    }

    #[test]
    fn test_preview_teardown_omits_retained_resources() {
        let world = World::default();
        let mut plan = ExecutionPlan::new();
        plan.add(world.step("role").provides("role_arn"));
        plan.add(world.step("bucket").retained());
        plan.add(world.step("unit").requires(&["role_arn"]));
        reconcile_simple(DesiredState::Present, &plan).unwrap();

        let diffs = compute_diffs(DesiredState::Absent, &plan).unwrap();
        let ids: Vec<&str> = diffs.iter().map(|d| d.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["unit", "role"]);

        // The bucket is still live, yet a repeated teardown has nothing to say about it
        reconcile_simple(DesiredState::Absent, &plan).unwrap();
        assert_eq!(world.live_count(), 1);
        let diffs = compute_diffs(DesiredState::Absent, &plan).unwrap();
        assert!(diffs.iter().all(|d| d.resource_id != "bucket"));
    }

    #[test]
    fn test_summary_and_grouping() {
        let world = World::default();
        let diffs = compute_diffs(DesiredState::Present, &chain(&world)).unwrap();

        let summary = DiffSummary::from_diffs(&diffs);
        assert_eq!(summary.additions, 1);
        assert_eq!(summary.unknown, 2);
        assert!(summary.has_changes());

        let groups = group_by_type(&diffs);
        assert_eq!(groups["fake"].len(), 3);
    }
}
