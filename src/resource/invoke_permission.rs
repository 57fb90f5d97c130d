//! Statement on the function's resource policy allowing the schedule rule
//! to invoke it

use anyhow::Result;
use cloudkit::PermissionSpec;
use reconcile::{ApplyContext, ApplyResult, Outcome, Resource, ResourceState, Slots};

use super::{ProviderHandle, removed_or_absent, slots};

const ACTION: &str = "lambda:InvokeFunction";
const PRINCIPAL: &str = "events.amazonaws.com";

#[derive(Debug)]
pub struct InvokePermission {
    provider: ProviderHandle,
    function: String,
    statement_id: String,
}

impl InvokePermission {
    pub fn new(provider: ProviderHandle, function: &str) -> Self {
        Self {
            provider,
            function: function.to_string(),
            statement_id: format!("{function}-schedule"),
        }
    }

    fn desired(&self, rule_arn: &str) -> PermissionSpec {
        PermissionSpec {
            function: self.function.clone(),
            statement_id: self.statement_id.clone(),
            action: ACTION.to_string(),
            principal: PRINCIPAL.to_string(),
            source_arn: rule_arn.to_string(),
        }
    }
}

impl Resource for InvokePermission {
    fn id(&self) -> String {
        "invoke-grant".to_string()
    }

    fn description(&self) -> String {
        format!("Invoke grant {} on {}", self.statement_id, self.function)
    }

    fn resource_type(&self) -> &'static str {
        "invoke_permission"
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![slots::RULE_ARN]
    }

    fn current_state(&self, inputs: &Slots) -> Result<ResourceState> {
        let Some(current) = self
            .provider
            .get_permission(&self.function, &self.statement_id)?
        else {
            return Ok(ResourceState::Absent);
        };

        Ok(match inputs.get(slots::RULE_ARN) {
            Some(rule_arn) if current != self.desired(rule_arn) => ResourceState::Modified {
                from: current.source_arn,
                to: rule_arn.to_string(),
            },
            _ => ResourceState::Present {
                details: Some(current.source_arn),
            },
        })
    }

    fn upsert(&self, ctx: &mut ApplyContext) -> Result<Outcome> {
        let desired = self.desired(ctx.input(slots::RULE_ARN)?);

        let result = match self
            .provider
            .get_permission(&self.function, &self.statement_id)?
        {
            Some(current) if current == desired => ApplyResult::NoChange,
            Some(_) => {
                // Statements cannot be edited; replace the whole statement
                self.provider
                    .remove_permission(&self.function, &self.statement_id)?;
                self.provider.add_permission(&desired)?;
                ApplyResult::Modified
            }
            None => {
                self.provider.add_permission(&desired)?;
                ApplyResult::Created
            }
        };

        Ok(Outcome::new(result).with_identifier(&self.statement_id))
    }

    fn delete(&self, _ctx: &mut ApplyContext) -> Result<ApplyResult> {
        if self
            .provider
            .get_permission(&self.function, &self.statement_id)?
            .is_none()
        {
            return Ok(ApplyResult::NoChange);
        }
        removed_or_absent(
            self.provider
                .remove_permission(&self.function, &self.statement_id),
            "invoke grant",
        )
    }
}
