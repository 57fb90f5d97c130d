//! The deployed function and the step that clears a stale one

use anyhow::Result;
use cloudkit::{CodeLocation, FunctionSpec};
use reconcile::{ApplyContext, ApplyResult, Outcome, Resource, ResourceState, Slots};
use std::collections::BTreeMap;

use super::{ProviderHandle, removed_or_absent, short, slots};

/// Configured attributes of the function, everything but the identifiers
/// produced by earlier steps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSettings {
    pub name: String,
    pub runtime: String,
    pub handler: String,
    pub memory_mb: u32,
    pub timeout_secs: u32,
    pub environment: BTreeMap<String, String>,
    pub code: CodeLocation,
}

impl FunctionSettings {
    fn spec(&self, role_arn: &str, revision: &str) -> FunctionSpec {
        FunctionSpec {
            name: self.name.clone(),
            role_arn: role_arn.to_string(),
            runtime: self.runtime.clone(),
            handler: self.handler.clone(),
            code: self.code.clone(),
            memory_mb: self.memory_mb,
            timeout_secs: self.timeout_secs,
            environment: self.environment.clone(),
            revision: revision.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct Function {
    provider: ProviderHandle,
    settings: FunctionSettings,
}

impl Function {
    pub fn new(provider: ProviderHandle, settings: FunctionSettings) -> Self {
        Self { provider, settings }
    }
}

impl Resource for Function {
    fn id(&self) -> String {
        "function".to_string()
    }

    fn description(&self) -> String {
        format!(
            "Function {} ({}, {} MB)",
            self.settings.name, self.settings.runtime, self.settings.memory_mb
        )
    }

    fn resource_type(&self) -> &'static str {
        "function"
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![slots::ROLE_ARN, slots::ARTIFACT]
    }

    fn provides(&self) -> Option<&'static str> {
        Some(slots::FUNCTION_ARN)
    }

    fn current_state(&self, inputs: &Slots) -> Result<ResourceState> {
        let Some(current) = self.provider.get_function(&self.settings.name)? else {
            return Ok(ResourceState::Absent);
        };
        let (Some(role_arn), Some(revision)) =
            (inputs.get(slots::ROLE_ARN), inputs.get(slots::ARTIFACT))
        else {
            return Ok(ResourceState::Unknown);
        };

        let spec = self.settings.spec(role_arn, revision);
        Ok(if !current.runs_revision(&spec) {
            ResourceState::Modified {
                from: format!("code {}", short(current.revision.as_deref().unwrap_or("-"))),
                to: format!("code {}", short(revision)),
            }
        } else if !current.matches_configuration(&spec) {
            ResourceState::Modified {
                from: "configuration (deployed)".to_string(),
                to: "configuration (configured)".to_string(),
            }
        } else {
            ResourceState::Present {
                details: Some(current.arn),
            }
        })
    }

    fn existing_identifier(&self) -> Result<Option<String>> {
        Ok(self
            .provider
            .get_function(&self.settings.name)?
            .map(|f| f.arn))
    }

    fn upsert(&self, ctx: &mut ApplyContext) -> Result<Outcome> {
        let spec = self
            .settings
            .spec(ctx.input(slots::ROLE_ARN)?, ctx.input(slots::ARTIFACT)?);

        let Some(current) = self.provider.get_function(&spec.name)? else {
            let created = self.provider.create_function(&spec)?;
            return Ok(Outcome::new(ApplyResult::Created).with_identifier(created.arn));
        };

        if !current.runs_revision(&spec) {
            log::debug!("Pointing {} at revision {}", spec.name, short(&spec.revision));
            self.provider.update_function_code(&spec.name, &spec.code)?;
            // The code call does not record the revision; the configuration call does
            let updated = self.provider.update_function_configuration(&spec)?;
            return Ok(Outcome::new(ApplyResult::Modified).with_identifier(updated.arn));
        }

        if !current.matches_configuration(&spec) {
            let updated = self.provider.update_function_configuration(&spec)?;
            return Ok(Outcome::new(ApplyResult::Modified).with_identifier(updated.arn));
        }

        Ok(Outcome::new(ApplyResult::NoChange).with_identifier(current.arn))
    }

    fn delete(&self, _ctx: &mut ApplyContext) -> Result<ApplyResult> {
        if self.provider.get_function(&self.settings.name)?.is_none() {
            return Ok(ApplyResult::NoChange);
        }
        removed_or_absent(
            self.provider.delete_function(&self.settings.name),
            "function",
        )
    }
}

/// Removes any function already registered under the logical name
///
/// Runs ahead of [`Function`] in the create plan so a definition left by
/// an earlier, incompatible deployment can never block the upsert.
#[derive(Debug)]
pub struct ClearFunction {
    provider: ProviderHandle,
    name: String,
}

impl ClearFunction {
    pub fn new(provider: ProviderHandle, name: &str) -> Self {
        Self {
            provider,
            name: name.to_string(),
        }
    }
}

impl Resource for ClearFunction {
    fn id(&self) -> String {
        "clear-function".to_string()
    }

    fn description(&self) -> String {
        format!("Clear previous function {}", self.name)
    }

    fn resource_type(&self) -> &'static str {
        "function_reset"
    }

    fn current_state(&self, _slots: &Slots) -> Result<ResourceState> {
        Ok(match self.provider.get_function(&self.name)? {
            None => ResourceState::Present {
                details: Some("nothing to clear".to_string()),
            },
            Some(existing) => ResourceState::Modified {
                from: existing.arn,
                to: "cleared".to_string(),
            },
        })
    }

    fn upsert(&self, _ctx: &mut ApplyContext) -> Result<Outcome> {
        if self.provider.get_function(&self.name)?.is_none() {
            return Ok(ApplyResult::NoChange.into());
        }
        log::info!("Clearing previous function {}", self.name);
        Ok(removed_or_absent(self.provider.delete_function(&self.name), "function")?.into())
    }

    fn delete(&self, _ctx: &mut ApplyContext) -> Result<ApplyResult> {
        Ok(ApplyResult::NoChange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudkit::{MockProvider, Provider};
    use std::sync::Arc;

    fn settings() -> FunctionSettings {
        FunctionSettings {
            name: "job1".to_string(),
            runtime: "python3.12".to_string(),
            handler: "twitbot.lambda_handler".to_string(),
            memory_mb: 256,
            timeout_secs: 60,
            environment: BTreeMap::new(),
            code: CodeLocation {
                bucket: "job1-artifacts".to_string(),
                key: "job1.zip".to_string(),
            },
        }
    }

    fn handle(mock: &MockProvider) -> ProviderHandle {
        ProviderHandle::new(Arc::new(mock.clone()))
    }

    /// Role plus uploaded archive, returned as resolved slots
    fn prerequisites(mock: &MockProvider, dir: &tempfile::TempDir, digest: &str) -> Slots {
        let role = match mock.get_role("job1").unwrap() {
            Some(role) => role,
            None => mock.create_role("job1", "{}").unwrap(),
        };
        if !mock.bucket_exists("job1-artifacts").unwrap() {
            mock.create_bucket("job1-artifacts").unwrap();
        }
        let body = dir.path().join("job1.zip");
        std::fs::write(&body, digest).unwrap();
        mock.put_object("job1-artifacts", "job1.zip", &body, digest)
            .unwrap();

        let mut inputs = Slots::new();
        inputs.insert(slots::ROLE_ARN, role.arn);
        inputs.insert(slots::ARTIFACT, digest);
        inputs
    }

    #[test]
    fn test_create_threads_role_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockProvider::new();
        let inputs = prerequisites(&mock, &dir, "d1");
        mock.clear_journal();

        let step = Function::new(handle(&mock), settings());
        assert!(step.current_state(&inputs).unwrap().is_absent());

        let outcome = step.upsert(&mut ApplyContext::new(&inputs)).unwrap();
        assert_eq!(outcome.result, ApplyResult::Created);

        let journal = mock.journal();
        assert_eq!(journal.len(), 1);
        assert_eq!(journal[0].op, "create_function");
        assert_eq!(journal[0].reference.as_deref(), inputs.get(slots::ROLE_ARN));
        assert_eq!(outcome.identifier, step.existing_identifier().unwrap());
    }

    #[test]
    fn test_same_revision_and_settings_is_no_change() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockProvider::new();
        let inputs = prerequisites(&mock, &dir, "d1");
        let step = Function::new(handle(&mock), settings());
        step.upsert(&mut ApplyContext::new(&inputs)).unwrap();
        mock.clear_journal();

        assert!(step.current_state(&inputs).unwrap().is_present());
        let outcome = step.upsert(&mut ApplyContext::new(&inputs)).unwrap();
        assert_eq!(outcome.result, ApplyResult::NoChange);
        assert!(outcome.identifier.is_some());
        assert!(mock.journal().is_empty());
    }

    #[test]
    fn test_new_artifact_updates_code_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockProvider::new();
        let step = Function::new(handle(&mock), settings());
        step.upsert(&mut ApplyContext::new(&prerequisites(&mock, &dir, "d1")))
            .unwrap();

        let inputs = prerequisites(&mock, &dir, "d2");
        mock.clear_journal();
        assert!(matches!(
            step.current_state(&inputs).unwrap(),
            ResourceState::Modified { .. }
        ));

        let outcome = step.upsert(&mut ApplyContext::new(&inputs)).unwrap();
        assert_eq!(outcome.result, ApplyResult::Modified);
        assert_eq!(
            mock.journal_ops(),
            vec!["update_function_code", "update_function_configuration"]
        );
        assert_eq!(
            mock.get_function("job1").unwrap().unwrap().revision.as_deref(),
            Some("d2")
        );
    }

    #[test]
    fn test_changed_limits_update_configuration_only() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockProvider::new();
        let inputs = prerequisites(&mock, &dir, "d1");
        Function::new(handle(&mock), settings())
            .upsert(&mut ApplyContext::new(&inputs))
            .unwrap();
        mock.clear_journal();

        let mut larger = settings();
        larger.memory_mb = 512;
        larger
            .environment
            .insert("FEEDBOT_CONFIG".to_string(), "twitbot.cf".to_string());
        let outcome = Function::new(handle(&mock), larger)
            .upsert(&mut ApplyContext::new(&inputs))
            .unwrap();

        assert_eq!(outcome.result, ApplyResult::Modified);
        assert_eq!(mock.journal_ops(), vec!["update_function_configuration"]);
        assert_eq!(mock.get_function("job1").unwrap().unwrap().memory_mb, 512);
    }

    #[test]
    fn test_state_unknown_until_inputs_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockProvider::new();
        let inputs = prerequisites(&mock, &dir, "d1");
        let step = Function::new(handle(&mock), settings());
        step.upsert(&mut ApplyContext::new(&inputs)).unwrap();

        assert_eq!(
            step.current_state(&Slots::new()).unwrap(),
            ResourceState::Unknown
        );
    }

    #[test]
    fn test_clear_removes_existing_function_only() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockProvider::new();
        let clear = ClearFunction::new(handle(&mock), "job1");
        let slots = Slots::new();

        assert!(clear.current_state(&slots).unwrap().is_present());
        assert_eq!(
            clear.upsert(&mut ApplyContext::new(&slots)).unwrap().result,
            ApplyResult::NoChange
        );

        let inputs = prerequisites(&mock, &dir, "d1");
        Function::new(handle(&mock), settings())
            .upsert(&mut ApplyContext::new(&inputs))
            .unwrap();
        mock.clear_journal();

        assert!(matches!(
            clear.current_state(&slots).unwrap(),
            ResourceState::Modified { .. }
        ));
        assert_eq!(
            clear.upsert(&mut ApplyContext::new(&slots)).unwrap().result,
            ApplyResult::Removed
        );
        assert_eq!(mock.journal_ops(), vec!["delete_function"]);
    }

    #[test]
    fn test_delete_when_absent_does_not_mutate() {
        let mock = MockProvider::new();
        let result = Function::new(handle(&mock), settings())
            .delete(&mut ApplyContext::new(&Slots::new()))
            .unwrap();
        assert_eq!(result, ApplyResult::NoChange);
        assert!(mock.journal().is_empty());
    }
}
