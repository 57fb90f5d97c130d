//! Execution planner - dependency graph of resource steps
//!
//! A step depends on every step that provides a slot it requires, plus any
//! step named in its explicit `after` list. Creation runs the graph in
//! topological order; deletion runs the same order reversed.

use crate::error::ReconcileError;
use crate::resource::{BoxedResource, Resource, ResourceExt};
use crate::types::DesiredState;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// One node of the plan
struct Step {
    resource: BoxedResource,
    after: Vec<String>,
}

/// A plan of resource steps with dependency edges
#[derive(Default)]
pub struct ExecutionPlan {
    steps: Vec<Step>,
}

impl ExecutionPlan {
    /// Create a new empty plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a step ordered only by the slots it requires
    pub fn add<R: Resource + 'static>(&mut self, resource: R) {
        self.add_after(resource, &[]);
    }

    /// Add a step that must also run after the named steps
    pub fn add_after<R: Resource + 'static>(&mut self, resource: R, after: &[&str]) {
        self.steps.push(Step {
            resource: Box::new(resource),
            after: after.iter().map(|s| (*s).to_string()).collect(),
        });
    }

    /// Total number of steps in the plan
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check if plan is empty
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check if plan has any privileged steps
    pub fn has_privileged(&self) -> bool {
        self.steps.iter().any(|s| s.resource.requires_sudo())
    }

    /// Step ids in insertion order
    pub fn ids(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.resource.id()).collect()
    }

    /// Validate the graph and return its steps in creation order
    ///
    /// Among steps whose dependencies are satisfied, the one added first
    /// runs first, so independent steps keep their insertion order.
    pub fn creation_order(&self) -> Result<Vec<&dyn Resource>, ReconcileError> {
        let deps = self.dependencies()?;
        let mut done = vec![false; self.steps.len()];
        let mut order = Vec::with_capacity(self.steps.len());

        while order.len() < self.steps.len() {
            let next = (0..self.steps.len())
                .find(|&i| !done[i] && deps[i].iter().all(|&d| done[d]));

            match next {
                Some(i) => {
                    done[i] = true;
                    order.push(self.steps[i].resource.as_ref());
                }
                None => {
                    let stuck = (0..self.steps.len())
                        .filter(|&i| !done[i])
                        .map(|i| self.steps[i].resource.id())
                        .collect();
                    return Err(ReconcileError::Cycle(stuck));
                }
            }
        }

        Ok(order)
    }

    /// Steps in the order a run towards `desired` executes them
    pub fn order_for(&self, desired: DesiredState) -> Result<Vec<&dyn Resource>, ReconcileError> {
        let mut order = self.creation_order()?;
        if desired == DesiredState::Absent {
            order.reverse();
        }
        Ok(order)
    }

    /// Resolve every step's dependencies to step indices
    fn dependencies(&self) -> Result<Vec<BTreeSet<usize>>, ReconcileError> {
        let ids = self.ids();

        let mut seen = HashSet::new();
        for id in &ids {
            if !seen.insert(id.as_str()) {
                return Err(ReconcileError::DuplicateStep(id.clone()));
            }
        }

        let mut producers: BTreeMap<&'static str, usize> = BTreeMap::new();
        for (i, step) in self.steps.iter().enumerate() {
            if let Some(slot) = step.resource.provides() {
                if let Some(&first) = producers.get(slot) {
                    return Err(ReconcileError::ConflictingProducers {
                        slot: slot.to_string(),
                        first: ids[first].clone(),
                        second: ids[i].clone(),
                    });
                }
                producers.insert(slot, i);
            }
        }

        let mut deps = Vec::with_capacity(self.steps.len());
        for (i, step) in self.steps.iter().enumerate() {
            let mut edges = BTreeSet::new();

            for slot in step.resource.requires() {
                let producer =
                    producers
                        .get(slot)
                        .ok_or_else(|| ReconcileError::UnboundSlot {
                            step: ids[i].clone(),
                            slot: slot.to_string(),
                        })?;
                edges.insert(*producer);
            }

            for after in &step.after {
                let target = ids.iter().position(|id| id == after).ok_or_else(|| {
                    ReconcileError::UnknownDependency {
                        step: ids[i].clone(),
                        after: after.clone(),
                    }
                })?;
                edges.insert(target);
            }

            deps.push(edges);
        }

        Ok(deps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::World;

    fn ids(order: &[&dyn Resource]) -> Vec<String> {
        order.iter().map(|r| r.id()).collect()
    }

    #[test]
    fn test_slots_order_steps_regardless_of_insertion() {
        let world = World::default();
        let mut plan = ExecutionPlan::new();
        plan.add(world.step("trigger").requires(&["unit"]).provides("trigger"));
        plan.add(world.step("unit").requires(&["role"]).provides("unit"));
        plan.add(world.step("role").provides("role"));

        let order = plan.creation_order().unwrap();
        assert_eq!(ids(&order), vec!["role", "unit", "trigger"]);
    }

    #[test]
    fn test_independent_steps_keep_insertion_order() {
        let world = World::default();
        let mut plan = ExecutionPlan::new();
        plan.add(world.step("a"));
        plan.add(world.step("b"));
        plan.add(world.step("c"));

        assert_eq!(ids(&plan.creation_order().unwrap()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_explicit_after_edge() {
        let world = World::default();
        let mut plan = ExecutionPlan::new();
        plan.add_after(world.step("unit"), &["artifact"]);
        plan.add(world.step("artifact"));

        assert_eq!(ids(&plan.creation_order().unwrap()), vec!["artifact", "unit"]);
    }

    #[test]
    fn test_absent_reverses_order() {
        let world = World::default();
        let mut plan = ExecutionPlan::new();
        plan.add(world.step("a").provides("a"));
        plan.add(world.step("b").requires(&["a"]).provides("b"));
        plan.add(world.step("c").requires(&["b"]));

        let order = plan.order_for(DesiredState::Absent).unwrap();
        assert_eq!(ids(&order), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let world = World::default();
        let mut plan = ExecutionPlan::new();
        plan.add(world.step("role"));
        plan.add(world.step("role"));

        assert!(matches!(
            plan.creation_order(),
            Err(ReconcileError::DuplicateStep(id)) if id == "role"
        ));
    }

    #[test]
    fn test_unknown_after_rejected() {
        let world = World::default();
        let mut plan = ExecutionPlan::new();
        plan.add_after(world.step("unit"), &["ghost"]);

        let err = plan.creation_order().err().unwrap();
        assert!(err.is_plan_error());
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_unbound_slot_rejected() {
        let world = World::default();
        let mut plan = ExecutionPlan::new();
        plan.add(world.step("unit").requires(&["role"]));

        assert!(matches!(
            plan.creation_order(),
            Err(ReconcileError::UnboundSlot { slot, .. }) if slot == "role"
        ));
    }

    #[test]
    fn test_two_producers_rejected() {
        let world = World::default();
        let mut plan = ExecutionPlan::new();
        plan.add(world.step("a").provides("role"));
        plan.add(world.step("b").provides("role"));

        assert!(matches!(
            plan.creation_order(),
            Err(ReconcileError::ConflictingProducers { first, second, .. })
                if first == "a" && second == "b"
        ));
    }

    #[test]
    fn test_cycle_rejected() {
        let world = World::default();
        let mut plan = ExecutionPlan::new();
        plan.add(world.step("root"));
        plan.add(world.step("a").requires(&["b"]).provides("a"));
        plan.add(world.step("b").requires(&["a"]).provides("b"));

        match plan.creation_order() {
            Err(ReconcileError::Cycle(stuck)) => assert_eq!(stuck, vec!["a", "b"]),
            other => panic!("expected cycle, got {:?}", other.map(|o| ids(&o))),
        }
    }

    #[test]
    fn test_has_privileged() {
        let world = World::default();
        let mut plan = ExecutionPlan::new();
        plan.add(world.step("a"));
        assert!(!plan.has_privileged());

        plan.add(world.step("b").privileged());
        assert!(plan.has_privileged());
    }
}
