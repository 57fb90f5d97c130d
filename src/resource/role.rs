//! Execution role assumed by the function

use anyhow::Result;
use reconcile::{ApplyContext, ApplyResult, Outcome, Resource, ResourceState, Slots};

use super::{ProviderHandle, removed_or_absent, same_document, slots};

#[derive(Debug)]
pub struct ExecutionRole {
    provider: ProviderHandle,
    name: String,
    trust_policy: String,
}

impl ExecutionRole {
    pub fn new(provider: ProviderHandle, name: &str, trust_policy: &str) -> Self {
        Self {
            provider,
            name: name.to_string(),
            trust_policy: trust_policy.to_string(),
        }
    }
}

impl Resource for ExecutionRole {
    fn id(&self) -> String {
        "role".to_string()
    }

    fn description(&self) -> String {
        format!("Execution role {}", self.name)
    }

    fn resource_type(&self) -> &'static str {
        "iam_role"
    }

    fn provides(&self) -> Option<&'static str> {
        Some(slots::ROLE_ARN)
    }

    fn current_state(&self, _slots: &Slots) -> Result<ResourceState> {
        Ok(match self.provider.get_role(&self.name)? {
            None => ResourceState::Absent,
            Some(role) if same_document(&role.trust_policy, &self.trust_policy) => {
                ResourceState::Present {
                    details: Some(role.arn),
                }
            }
            Some(_) => ResourceState::Modified {
                from: "trust policy (deployed)".to_string(),
                to: "trust policy (configured)".to_string(),
            },
        })
    }

    fn existing_identifier(&self) -> Result<Option<String>> {
        Ok(self.provider.get_role(&self.name)?.map(|r| r.arn))
    }

    fn upsert(&self, _ctx: &mut ApplyContext) -> Result<Outcome> {
        match self.provider.get_role(&self.name)? {
            None => {
                let role = self.provider.create_role(&self.name, &self.trust_policy)?;
                Ok(Outcome::new(ApplyResult::Created).with_identifier(role.arn))
            }
            Some(role) if same_document(&role.trust_policy, &self.trust_policy) => {
                Ok(Outcome::new(ApplyResult::NoChange).with_identifier(role.arn))
            }
            Some(role) => {
                self.provider
                    .update_trust_policy(&self.name, &self.trust_policy)?;
                Ok(Outcome::new(ApplyResult::Modified).with_identifier(role.arn))
            }
        }
    }

    fn delete(&self, _ctx: &mut ApplyContext) -> Result<ApplyResult> {
        if self.provider.get_role(&self.name)?.is_none() {
            return Ok(ApplyResult::NoChange);
        }
        removed_or_absent(self.provider.delete_role(&self.name), "role")
    }
}
