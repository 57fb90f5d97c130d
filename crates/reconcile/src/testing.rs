//! In-memory resources shared by the unit tests of this crate.

use crate::context::ApplyContext;
use crate::resource::Resource;
use crate::types::{ApplyResult, Outcome, ResourceState, Slots, SudoRequirement};
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct WorldState {
    serial: u32,
    live: BTreeMap<String, String>,
    mutations: Vec<String>,
    inputs: BTreeMap<String, Vec<(String, String)>>,
}

/// Shared fake "remote" that fake resources live in.
#[derive(Debug, Clone, Default)]
pub struct World(Arc<Mutex<WorldState>>);

impl World {
    pub fn step(&self, id: &str) -> FakeResource {
        FakeResource {
            id: id.to_string(),
            requires: Vec::new(),
            provides: None,
            privileged: false,
            failing: false,
            retained: false,
            world: self.clone(),
        }
    }

    /// Mutations performed so far, e.g. `create:role`, `delete:role`.
    pub fn mutations(&self) -> Vec<String> {
        self.0.lock().unwrap().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.0.lock().unwrap().mutations.clear();
    }

    /// Identifier of a live resource.
    pub fn identifier(&self, id: &str) -> Option<String> {
        self.0.lock().unwrap().live.get(id).cloned()
    }

    /// Inputs the last upsert of `id` read.
    pub fn inputs(&self, id: &str) -> Vec<(String, String)> {
        self.0
            .lock()
            .unwrap()
            .inputs
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove a resource behind the reconciler's back.
    pub fn remove_out_of_band(&self, id: &str) {
        self.0.lock().unwrap().live.remove(id);
    }

    pub fn live_count(&self) -> usize {
        self.0.lock().unwrap().live.len()
    }
}

#[derive(Debug)]
pub struct FakeResource {
    id: String,
    requires: Vec<&'static str>,
    provides: Option<&'static str>,
    privileged: bool,
    failing: bool,
    retained: bool,
    world: World,
}

impl FakeResource {
    pub fn requires(mut self, slots: &[&'static str]) -> Self {
        self.requires = slots.to_vec();
        self
    }

    pub fn provides(mut self, slot: &'static str) -> Self {
        self.provides = Some(slot);
        self
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// Teardown skips this resource instead of deleting it.
    pub fn retained(mut self) -> Self {
        self.retained = true;
        self
    }
}

impl Resource for FakeResource {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn description(&self) -> String {
        format!("Fake resource {}", self.id)
    }

    fn resource_type(&self) -> &'static str {
        "fake"
    }

    fn sudo_requirement(&self) -> SudoRequirement {
        if self.privileged {
            SudoRequirement::Required {
                reason: "test".to_string(),
            }
        } else {
            SudoRequirement::None
        }
    }

    fn requires(&self) -> Vec<&'static str> {
        self.requires.clone()
    }

    fn provides(&self) -> Option<&'static str> {
        self.provides
    }

    fn current_state(&self, slots: &Slots) -> Result<ResourceState> {
        if self.requires.iter().any(|s| slots.get(s).is_none()) {
            return Ok(ResourceState::Unknown);
        }
        Ok(match self.world.identifier(&self.id) {
            Some(identifier) => ResourceState::Present {
                details: Some(identifier),
            },
            None => ResourceState::Absent,
        })
    }

    fn existing_identifier(&self) -> Result<Option<String>> {
        Ok(self.world.identifier(&self.id))
    }

    fn retains_on_delete(&self) -> bool {
        self.retained
    }

    fn upsert(&self, ctx: &mut ApplyContext) -> Result<Outcome> {
        if self.failing {
            anyhow::bail!("{} exploded", self.id);
        }
        if self.privileged {
            ctx.require_sudo()?.run_checked("touch", &[self.id.as_str()])?;
        }

        let mut inputs = Vec::new();
        for slot in &self.requires {
            inputs.push(((*slot).to_string(), ctx.input(slot)?.to_string()));
        }

        let mut state = self.world.0.lock().unwrap();
        state.inputs.insert(self.id.clone(), inputs);

        let existing = state.live.get(&self.id).cloned();
        let (result, identifier) = match existing {
            Some(identifier) => (ApplyResult::NoChange, identifier),
            None => {
                state.serial += 1;
                let identifier = format!("{}#{}", self.id, state.serial);
                state.live.insert(self.id.clone(), identifier.clone());
                state.mutations.push(format!("create:{}", self.id));
                (ApplyResult::Created, identifier)
            }
        };

        let outcome = Outcome::new(result);
        Ok(match self.provides {
            Some(_) => outcome.with_identifier(identifier),
            None => outcome,
        })
    }

    fn delete(&self, _ctx: &mut ApplyContext) -> Result<ApplyResult> {
        if self.failing {
            anyhow::bail!("{} exploded", self.id);
        }
        if self.retained {
            return Ok(ApplyResult::Skipped {
                reason: "retained".to_string(),
            });
        }
        let mut state = self.world.0.lock().unwrap();
        if state.live.remove(&self.id).is_none() {
            return Ok(ApplyResult::NoChange);
        }
        state.mutations.push(format!("delete:{}", self.id));
        Ok(ApplyResult::Removed)
    }
}
