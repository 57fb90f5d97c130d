//! Schedule rule targeting the function
//!
//! The rule carries exactly one target: the function identifier resolved
//! by the previous step. Foreign targets found on the rule are removed.

use anyhow::Result;
use cloudkit::RuleTarget;
use reconcile::{ApplyContext, ApplyResult, Outcome, Resource, ResourceState, Slots};

use super::{ProviderHandle, removed_or_absent, slots};

#[derive(Debug)]
pub struct ScheduleRule {
    provider: ProviderHandle,
    name: String,
    schedule: String,
    target_id: String,
}

impl ScheduleRule {
    pub fn new(provider: ProviderHandle, name: &str, schedule: &str) -> Self {
        Self {
            provider,
            name: name.to_string(),
            schedule: schedule.to_string(),
            target_id: format!("{name}-target"),
        }
    }

    fn targets(&self) -> Result<Vec<RuleTarget>> {
        match self.provider.list_targets(&self.name) {
            Ok(targets) => Ok(targets),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Resource for ScheduleRule {
    fn id(&self) -> String {
        "trigger".to_string()
    }

    fn description(&self) -> String {
        format!("Schedule {} ({})", self.name, self.schedule)
    }

    fn resource_type(&self) -> &'static str {
        "schedule_rule"
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![slots::FUNCTION_ARN]
    }

    fn provides(&self) -> Option<&'static str> {
        Some(slots::RULE_ARN)
    }

    fn current_state(&self, inputs: &Slots) -> Result<ResourceState> {
        let Some(rule) = self.provider.get_rule(&self.name)? else {
            return Ok(ResourceState::Absent);
        };
        if rule.schedule != self.schedule {
            return Ok(ResourceState::Modified {
                from: rule.schedule,
                to: self.schedule.clone(),
            });
        }

        let targets = self.targets()?;
        if let Some(function_arn) = inputs.get(slots::FUNCTION_ARN) {
            let expected = RuleTarget {
                id: self.target_id.clone(),
                arn: function_arn.to_string(),
            };
            if targets != [expected] {
                return Ok(ResourceState::Modified {
                    from: format!("{} target(s)", targets.len()),
                    to: format!("target {function_arn}"),
                });
            }
        }

        Ok(ResourceState::Present {
            details: Some(rule.arn),
        })
    }

    fn existing_identifier(&self) -> Result<Option<String>> {
        Ok(self.provider.get_rule(&self.name)?.map(|r| r.arn))
    }

    fn upsert(&self, ctx: &mut ApplyContext) -> Result<Outcome> {
        let function_arn = ctx.input(slots::FUNCTION_ARN)?;

        let (rule, mut result) = match self.provider.get_rule(&self.name)? {
            Some(rule) if rule.schedule == self.schedule => (rule, ApplyResult::NoChange),
            Some(_) => (
                self.provider.put_rule(&self.name, &self.schedule)?,
                ApplyResult::Modified,
            ),
            None => (
                self.provider.put_rule(&self.name, &self.schedule)?,
                ApplyResult::Created,
            ),
        };

        let target = RuleTarget {
            id: self.target_id.clone(),
            arn: function_arn.to_string(),
        };
        let current = self.provider.list_targets(&self.name)?;

        if !current.contains(&target) {
            log::debug!("Targeting {} at {function_arn}", self.name);
            self.provider.put_target(&self.name, &target)?;
            if result == ApplyResult::NoChange {
                result = ApplyResult::Modified;
            }
        }

        let foreign: Vec<String> = current
            .into_iter()
            .filter(|t| t.id != target.id)
            .map(|t| t.id)
            .collect();
        if !foreign.is_empty() {
            log::warn!("Removing foreign targets from {}: {}", self.name, foreign.join(", "));
            self.provider.remove_targets(&self.name, &foreign)?;
            if result == ApplyResult::NoChange {
                result = ApplyResult::Modified;
            }
        }

        Ok(Outcome::new(result).with_identifier(rule.arn))
    }

    fn delete(&self, _ctx: &mut ApplyContext) -> Result<ApplyResult> {
        if self.provider.get_rule(&self.name)?.is_none() {
            return Ok(ApplyResult::NoChange);
        }

        let ids: Vec<String> = self.targets()?.into_iter().map(|t| t.id).collect();
        if !ids.is_empty() {
            removed_or_absent(self.provider.remove_targets(&self.name, &ids), "rule targets")?;
        }
        removed_or_absent(self.provider.delete_rule(&self.name), "rule")
    }
}
