//! Inline grant attached to the execution role
//!
//! The document is replaced wholesale on every change, never merged.

use anyhow::Result;
use reconcile::{ApplyContext, ApplyResult, Outcome, Resource, ResourceState, Slots};

use super::{ProviderHandle, removed_or_absent, same_document, slots};

#[derive(Debug)]
pub struct RolePolicy {
    provider: ProviderHandle,
    role: String,
    policy: String,
    document: String,
}

impl RolePolicy {
    pub fn new(provider: ProviderHandle, role: &str, policy: &str, document: &str) -> Self {
        Self {
            provider,
            role: role.to_string(),
            policy: policy.to_string(),
            document: document.to_string(),
        }
    }
}

impl Resource for RolePolicy {
    fn id(&self) -> String {
        "role-policy".to_string()
    }

    fn description(&self) -> String {
        format!("Grant {} on role {}", self.policy, self.role)
    }

    fn resource_type(&self) -> &'static str {
        "iam_role_policy"
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![slots::ROLE_ARN]
    }

    fn current_state(&self, _slots: &Slots) -> Result<ResourceState> {
        Ok(
            match self.provider.get_role_policy(&self.role, &self.policy)? {
                None => ResourceState::Absent,
                Some(current) if same_document(&current, &self.document) => {
                    ResourceState::Present {
                        details: Some(self.policy.clone()),
                    }
                }
                Some(_) => ResourceState::Modified {
                    from: "policy document (deployed)".to_string(),
                    to: "policy document (configured)".to_string(),
                },
            },
        )
    }

    fn upsert(&self, ctx: &mut ApplyContext) -> Result<Outcome> {
        let role_arn = ctx.input(slots::ROLE_ARN)?;
        let result = match self.provider.get_role_policy(&self.role, &self.policy)? {
            Some(current) if same_document(&current, &self.document) => {
                return Ok(ApplyResult::NoChange.into());
            }
            Some(_) => ApplyResult::Modified,
            None => ApplyResult::Created,
        };

        log::debug!("Attaching {} to {role_arn}", self.policy);
        self.provider
            .put_role_policy(&self.role, &self.policy, &self.document)?;
        Ok(result.into())
    }

    fn delete(&self, _ctx: &mut ApplyContext) -> Result<ApplyResult> {
        if self
            .provider
            .get_role_policy(&self.role, &self.policy)?
            .is_none()
        {
            return Ok(ApplyResult::NoChange);
        }
        removed_or_absent(
            self.provider.delete_role_policy(&self.role, &self.policy),
            "role policy",
        )
    }
}
