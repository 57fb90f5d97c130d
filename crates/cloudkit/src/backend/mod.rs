//! Provider trait and implementations.
//!
//! The [`Provider`] trait is the remote API surface the reconciler talks to:
//! every resource is addressed by its logical name and every create or
//! update returns the provider-assigned identifier.
//!
//! # Testing
//!
//! Use [`MockProvider`] to exercise deployments without credentials:
//!
//! ```
//! use cloudkit::backend::{MockProvider, Provider};
//!
//! let mock = MockProvider::new();
//! let role = mock.create_role("job1", "{}").unwrap();
//! assert!(role.arn.starts_with("arn:mock:iam"));
//! assert_eq!(mock.journal().len(), 1);
//! ```

pub mod aws;

use crate::error::{Error, Result};
use crate::types::{
    CodeLocation, Function, FunctionSpec, ObjectInfo, PermissionSpec, Role, Rule, RuleTarget,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Remote provider operations.
///
/// Reads return `Ok(None)` for missing resources. Mutations on missing
/// resources return [`Error::NotFound`], which teardown callers treat as
/// success.
pub trait Provider: Send + Sync {
    /// Look up a role by name.
    fn get_role(&self, name: &str) -> Result<Option<Role>>;

    /// Create a role with the given trust policy.
    fn create_role(&self, name: &str, trust_policy: &str) -> Result<Role>;

    /// Replace the trust policy of an existing role.
    fn update_trust_policy(&self, name: &str, trust_policy: &str) -> Result<()>;

    /// Delete a role. Inline policies must be removed first.
    fn delete_role(&self, name: &str) -> Result<()>;

    /// Read an inline role policy document.
    fn get_role_policy(&self, role: &str, policy: &str) -> Result<Option<String>>;

    /// Create or replace an inline role policy.
    fn put_role_policy(&self, role: &str, policy: &str, document: &str) -> Result<()>;

    /// Delete an inline role policy.
    fn delete_role_policy(&self, role: &str, policy: &str) -> Result<()>;

    /// Whether a bucket exists and is reachable.
    fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    /// Create a private bucket.
    fn create_bucket(&self, bucket: &str) -> Result<()>;

    /// Delete an empty bucket.
    fn delete_bucket(&self, bucket: &str) -> Result<()>;

    /// Read object metadata.
    fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectInfo>>;

    /// Upload a file, recording `digest` as object metadata.
    fn put_object(&self, bucket: &str, key: &str, body: &Path, digest: &str)
    -> Result<ObjectInfo>;

    /// Delete an object.
    fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Look up a function by name.
    fn get_function(&self, name: &str) -> Result<Option<Function>>;

    /// Create a function.
    fn create_function(&self, spec: &FunctionSpec) -> Result<Function>;

    /// Point an existing function at new code.
    fn update_function_code(&self, name: &str, code: &CodeLocation) -> Result<Function>;

    /// Replace the mutable configuration of an existing function.
    fn update_function_configuration(&self, spec: &FunctionSpec) -> Result<Function>;

    /// Delete a function together with its resource policy.
    fn delete_function(&self, name: &str) -> Result<()>;

    /// Look up a schedule rule by name.
    fn get_rule(&self, name: &str) -> Result<Option<Rule>>;

    /// Create or update a schedule rule.
    fn put_rule(&self, name: &str, schedule: &str) -> Result<Rule>;

    /// List the targets of a rule.
    fn list_targets(&self, rule: &str) -> Result<Vec<RuleTarget>>;

    /// Create or replace a target (by id) on a rule.
    fn put_target(&self, rule: &str, target: &RuleTarget) -> Result<()>;

    /// Remove targets from a rule.
    fn remove_targets(&self, rule: &str, ids: &[String]) -> Result<()>;

    /// Delete a rule. Targets must be removed first.
    fn delete_rule(&self, name: &str) -> Result<()>;

    /// Read a statement from a function's resource policy.
    fn get_permission(&self, function: &str, statement_id: &str)
    -> Result<Option<PermissionSpec>>;

    /// Add a statement to a function's resource policy.
    fn add_permission(&self, permission: &PermissionSpec) -> Result<()>;

    /// Remove a statement from a function's resource policy.
    fn remove_permission(&self, function: &str, statement_id: &str) -> Result<()>;
}

/// A mutation recorded by [`MockProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Operation name (`create_role`, `put_rule`, ...)
    pub op: &'static str,
    /// Logical name the call addressed
    pub name: String,
    /// Identifier passed by reference, if the call takes one
    pub reference: Option<String>,
}

impl Call {
    fn new(op: &'static str, name: &str, reference: Option<&str>) -> Self {
        Self {
            op,
            name: name.to_string(),
            reference: reference.map(str::to_string),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    serial: u32,
    roles: BTreeMap<String, Role>,
    role_policies: BTreeMap<(String, String), String>,
    buckets: BTreeSet<String>,
    objects: BTreeMap<(String, String), ObjectInfo>,
    functions: BTreeMap<String, Function>,
    rules: BTreeMap<String, Rule>,
    targets: BTreeMap<String, Vec<RuleTarget>>,
    permissions: BTreeMap<(String, String), PermissionSpec>,
    journal: Vec<Call>,
    failures: BTreeSet<&'static str>,
}

impl MockState {
    fn fail_if_injected(&self, op: &'static str) -> Result<()> {
        if self.failures.contains(op) {
            return Err(Error::CommandFailed {
                message: format!("injected failure in {op}"),
                stderr: String::new(),
            });
        }
        Ok(())
    }

    fn record(&mut self, op: &'static str, name: &str, reference: Option<&str>) {
        self.journal.push(Call::new(op, name, reference));
    }
}

/// In-memory provider for tests and rehearsals.
///
/// Enforces the same ordering constraints as the real provider: a role
/// with inline policies cannot be deleted, a rule with targets cannot be
/// deleted, a function cannot assume a role that does not exist, and a
/// duplicate statement id is a conflict. Only successful mutations are
/// recorded in the [`journal`](MockProvider::journal).
#[derive(Debug, Clone)]
pub struct MockProvider {
    state: Arc<Mutex<MockState>>,
    region: String,
}

const MOCK_ACCOUNT: &str = "000000000000";

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create a new empty mock provider.
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            region: "eu-west-1".to_string(),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Mutations performed so far, in order.
    pub fn journal(&self) -> Vec<Call> {
        self.state().journal.clone()
    }

    /// Operation names of the journal, in order.
    pub fn journal_ops(&self) -> Vec<&'static str> {
        self.state().journal.iter().map(|c| c.op).collect()
    }

    /// Forget recorded mutations (state is kept).
    pub fn clear_journal(&self) {
        self.state().journal.clear();
    }

    /// Make every call to `op` fail until [`heal`](MockProvider::heal) is called.
    pub fn fail_on(&self, op: &'static str) {
        self.state().failures.insert(op);
    }

    /// Stop injecting failures.
    pub fn heal(&self) {
        self.state().failures.clear();
    }

    /// Number of resources of every kind currently held.
    pub fn resource_count(&self) -> usize {
        let state = self.state();
        state.roles.len()
            + state.role_policies.len()
            + state.buckets.len()
            + state.objects.len()
            + state.functions.len()
            + state.rules.len()
            + state.targets.values().map(Vec::len).sum::<usize>()
            + state.permissions.len()
    }

    fn function_arn(&self, name: &str) -> String {
        format!(
            "arn:mock:lambda:{}:{MOCK_ACCOUNT}:function:{name}",
            self.region
        )
    }

    fn rule_arn(&self, name: &str) -> String {
        format!("arn:mock:events:{}:{MOCK_ACCOUNT}:rule/{name}", self.region)
    }
}

impl Provider for MockProvider {
    fn get_role(&self, name: &str) -> Result<Option<Role>> {
        Ok(self.state().roles.get(name).cloned())
    }

    fn create_role(&self, name: &str, trust_policy: &str) -> Result<Role> {
        let mut state = self.state();
        state.fail_if_injected("create_role")?;
        if state.roles.contains_key(name) {
            return Err(Error::Conflict {
                message: format!("EntityAlreadyExists: role {name}"),
            });
        }
        state.serial += 1;
        // Roles get a creation serial so a recreated role has a new identity.
        let role = Role {
            name: name.to_string(),
            arn: format!(
                "arn:mock:iam::{MOCK_ACCOUNT}:role/{name}-{:04}",
                state.serial
            ),
            trust_policy: trust_policy.to_string(),
        };
        state.roles.insert(name.to_string(), role.clone());
        state.record("create_role", name, None);
        Ok(role)
    }

    fn update_trust_policy(&self, name: &str, trust_policy: &str) -> Result<()> {
        let mut state = self.state();
        state.fail_if_injected("update_trust_policy")?;
        let role = state
            .roles
            .get_mut(name)
            .ok_or_else(|| Error::not_found("role", name))?;
        role.trust_policy = trust_policy.to_string();
        state.record("update_trust_policy", name, None);
        Ok(())
    }

    fn delete_role(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        state.fail_if_injected("delete_role")?;
        if !state.roles.contains_key(name) {
            return Err(Error::not_found("role", name));
        }
        if state.role_policies.keys().any(|(role, _)| role == name) {
            return Err(Error::Conflict {
                message: format!("DeleteConflict: role {name} still has inline policies"),
            });
        }
        state.roles.remove(name);
        state.record("delete_role", name, None);
        Ok(())
    }

    fn get_role_policy(&self, role: &str, policy: &str) -> Result<Option<String>> {
        let key = (role.to_string(), policy.to_string());
        Ok(self.state().role_policies.get(&key).cloned())
    }

    fn put_role_policy(&self, role: &str, policy: &str, document: &str) -> Result<()> {
        let mut state = self.state();
        state.fail_if_injected("put_role_policy")?;
        if !state.roles.contains_key(role) {
            return Err(Error::not_found("role", role));
        }
        state
            .role_policies
            .insert((role.to_string(), policy.to_string()), document.to_string());
        state.record("put_role_policy", policy, Some(role));
        Ok(())
    }

    fn delete_role_policy(&self, role: &str, policy: &str) -> Result<()> {
        let mut state = self.state();
        state.fail_if_injected("delete_role_policy")?;
        let key = (role.to_string(), policy.to_string());
        if state.role_policies.remove(&key).is_none() {
            return Err(Error::not_found("role policy", policy));
        }
        state.record("delete_role_policy", policy, Some(role));
        Ok(())
    }

    fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.state().buckets.contains(bucket))
    }

    fn create_bucket(&self, bucket: &str) -> Result<()> {
        let mut state = self.state();
        state.fail_if_injected("create_bucket")?;
        if !state.buckets.insert(bucket.to_string()) {
            return Err(Error::Conflict {
                message: format!("BucketAlreadyOwnedByYou: {bucket}"),
            });
        }
        state.record("create_bucket", bucket, None);
        Ok(())
    }

    fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let mut state = self.state();
        state.fail_if_injected("delete_bucket")?;
        if !state.buckets.contains(bucket) {
            return Err(Error::not_found("bucket", bucket));
        }
        if state.objects.keys().any(|(b, _)| b == bucket) {
            return Err(Error::Conflict {
                message: format!("BucketNotEmpty: {bucket}"),
            });
        }
        state.buckets.remove(bucket);
        state.record("delete_bucket", bucket, None);
        Ok(())
    }

    fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectInfo>> {
        let key = (bucket.to_string(), key.to_string());
        Ok(self.state().objects.get(&key).cloned())
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &Path,
        digest: &str,
    ) -> Result<ObjectInfo> {
        let size = std::fs::metadata(body)?.len();
        let mut state = self.state();
        state.fail_if_injected("put_object")?;
        if !state.buckets.contains(bucket) {
            return Err(Error::not_found("bucket", bucket));
        }
        let info = ObjectInfo {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size,
            digest: Some(digest.to_string()),
        };
        state
            .objects
            .insert((bucket.to_string(), key.to_string()), info.clone());
        state.record("put_object", key, Some(bucket));
        Ok(info)
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let mut state = self.state();
        state.fail_if_injected("delete_object")?;
        if state
            .objects
            .remove(&(bucket.to_string(), key.to_string()))
            .is_none()
        {
            return Err(Error::not_found("object", key));
        }
        state.record("delete_object", key, Some(bucket));
        Ok(())
    }

    fn get_function(&self, name: &str) -> Result<Option<Function>> {
        Ok(self.state().functions.get(name).cloned())
    }

    fn create_function(&self, spec: &FunctionSpec) -> Result<Function> {
        let arn = self.function_arn(&spec.name);
        let mut state = self.state();
        state.fail_if_injected("create_function")?;
        if state.functions.contains_key(&spec.name) {
            return Err(Error::Conflict {
                message: format!("ResourceConflictException: function {} exists", spec.name),
            });
        }
        if !state.roles.values().any(|r| r.arn == spec.role_arn) {
            return Err(Error::InvalidRequest {
                message: format!("role {} cannot be assumed", spec.role_arn),
            });
        }
        let code_key = (spec.code.bucket.clone(), spec.code.key.clone());
        if !state.objects.contains_key(&code_key) {
            return Err(Error::InvalidRequest {
                message: format!("code object {}/{} missing", spec.code.bucket, spec.code.key),
            });
        }
        let function = Function {
            name: spec.name.clone(),
            arn,
            role_arn: spec.role_arn.clone(),
            runtime: spec.runtime.clone(),
            handler: spec.handler.clone(),
            memory_mb: spec.memory_mb,
            timeout_secs: spec.timeout_secs,
            environment: spec.environment.clone(),
            revision: Some(spec.revision.clone()),
        };
        state.functions.insert(spec.name.clone(), function.clone());
        state.record("create_function", &spec.name, Some(&spec.role_arn));
        Ok(function)
    }

    fn update_function_code(&self, name: &str, code: &CodeLocation) -> Result<Function> {
        let mut state = self.state();
        state.fail_if_injected("update_function_code")?;
        let digest = state
            .objects
            .get(&(code.bucket.clone(), code.key.clone()))
            .and_then(|o| o.digest.clone());
        let function = state
            .functions
            .get_mut(name)
            .ok_or_else(|| Error::not_found("function", name))?;
        function.revision = digest;
        let function = function.clone();
        state.record("update_function_code", name, None);
        Ok(function)
    }

    fn update_function_configuration(&self, spec: &FunctionSpec) -> Result<Function> {
        let mut state = self.state();
        state.fail_if_injected("update_function_configuration")?;
        if !state.roles.values().any(|r| r.arn == spec.role_arn) {
            return Err(Error::InvalidRequest {
                message: format!("role {} cannot be assumed", spec.role_arn),
            });
        }
        let function = state
            .functions
            .get_mut(&spec.name)
            .ok_or_else(|| Error::not_found("function", &spec.name))?;
        function.role_arn = spec.role_arn.clone();
        function.runtime = spec.runtime.clone();
        function.handler = spec.handler.clone();
        function.memory_mb = spec.memory_mb;
        function.timeout_secs = spec.timeout_secs;
        function.environment = spec.environment.clone();
        function.revision = Some(spec.revision.clone());
        let function = function.clone();
        state.record(
            "update_function_configuration",
            &spec.name,
            Some(&spec.role_arn),
        );
        Ok(function)
    }

    fn delete_function(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        state.fail_if_injected("delete_function")?;
        if state.functions.remove(name).is_none() {
            return Err(Error::not_found("function", name));
        }
        // The resource policy lives on the function and goes with it.
        state.permissions.retain(|(function, _), _| function != name);
        state.record("delete_function", name, None);
        Ok(())
    }

    fn get_rule(&self, name: &str) -> Result<Option<Rule>> {
        Ok(self.state().rules.get(name).cloned())
    }

    fn put_rule(&self, name: &str, schedule: &str) -> Result<Rule> {
        let arn = self.rule_arn(name);
        let mut state = self.state();
        state.fail_if_injected("put_rule")?;
        let rule = Rule {
            name: name.to_string(),
            arn,
            schedule: schedule.to_string(),
        };
        state.rules.insert(name.to_string(), rule.clone());
        state.record("put_rule", name, None);
        Ok(rule)
    }

    fn list_targets(&self, rule: &str) -> Result<Vec<RuleTarget>> {
        let state = self.state();
        if !state.rules.contains_key(rule) {
            return Err(Error::not_found("rule", rule));
        }
        Ok(state.targets.get(rule).cloned().unwrap_or_default())
    }

    fn put_target(&self, rule: &str, target: &RuleTarget) -> Result<()> {
        let mut state = self.state();
        state.fail_if_injected("put_target")?;
        if !state.rules.contains_key(rule) {
            return Err(Error::not_found("rule", rule));
        }
        let targets = state.targets.entry(rule.to_string()).or_default();
        targets.retain(|t| t.id != target.id);
        targets.push(target.clone());
        state.record("put_target", rule, Some(&target.arn));
        Ok(())
    }

    fn remove_targets(&self, rule: &str, ids: &[String]) -> Result<()> {
        let mut state = self.state();
        state.fail_if_injected("remove_targets")?;
        if !state.rules.contains_key(rule) {
            return Err(Error::not_found("rule", rule));
        }
        if let Some(targets) = state.targets.get_mut(rule) {
            targets.retain(|t| !ids.contains(&t.id));
            if targets.is_empty() {
                state.targets.remove(rule);
            }
        }
        state.record("remove_targets", rule, None);
        Ok(())
    }

    fn delete_rule(&self, name: &str) -> Result<()> {
        let mut state = self.state();
        state.fail_if_injected("delete_rule")?;
        if !state.rules.contains_key(name) {
            return Err(Error::not_found("rule", name));
        }
        if state.targets.get(name).is_some_and(|t| !t.is_empty()) {
            return Err(Error::Conflict {
                message: format!("rule {name} still has targets"),
            });
        }
        state.rules.remove(name);
        state.record("delete_rule", name, None);
        Ok(())
    }

    fn get_permission(
        &self,
        function: &str,
        statement_id: &str,
    ) -> Result<Option<PermissionSpec>> {
        let key = (function.to_string(), statement_id.to_string());
        Ok(self.state().permissions.get(&key).cloned())
    }

    fn add_permission(&self, permission: &PermissionSpec) -> Result<()> {
        let mut state = self.state();
        state.fail_if_injected("add_permission")?;
        if !state.functions.contains_key(&permission.function) {
            return Err(Error::not_found("function", &permission.function));
        }
        let key = (
            permission.function.clone(),
            permission.statement_id.clone(),
        );
        if state.permissions.contains_key(&key) {
            return Err(Error::Conflict {
                message: format!(
                    "ResourceConflictException: statement {} exists",
                    permission.statement_id
                ),
            });
        }
        state.permissions.insert(key, permission.clone());
        state.record(
            "add_permission",
            &permission.statement_id,
            Some(&permission.source_arn),
        );
        Ok(())
    }

    fn remove_permission(&self, function: &str, statement_id: &str) -> Result<()> {
        let mut state = self.state();
        state.fail_if_injected("remove_permission")?;
        let key = (function.to_string(), statement_id.to_string());
        if state.permissions.remove(&key).is_none() {
            return Err(Error::not_found("permission", statement_id));
        }
        state.record("remove_permission", statement_id, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function_spec(role_arn: &str) -> FunctionSpec {
        FunctionSpec {
            name: "job1".to_string(),
            role_arn: role_arn.to_string(),
            runtime: "python3.12".to_string(),
            handler: "twitbot.lambda_handler".to_string(),
            code: CodeLocation {
                bucket: "bots".to_string(),
                key: "job1.zip".to_string(),
            },
            memory_mb: 256,
            timeout_secs: 60,
            environment: BTreeMap::new(),
            revision: "d1".to_string(),
        }
    }

    fn upload(mock: &MockProvider) {
        let dir = tempfile::tempdir().unwrap();
        let body = dir.path().join("job1.zip");
        std::fs::write(&body, b"PK").unwrap();
        mock.create_bucket("bots").unwrap();
        mock.put_object("bots", "job1.zip", &body, "d1").unwrap();
    }

    #[test]
    fn test_role_with_policy_cannot_be_deleted() {
        let mock = MockProvider::new();
        mock.create_role("job1", "{}").unwrap();
        mock.put_role_policy("job1", "logs", "{}").unwrap();

        let err = mock.delete_role("job1").unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::Conflict);

        mock.delete_role_policy("job1", "logs").unwrap();
        mock.delete_role("job1").unwrap();
        assert_eq!(mock.resource_count(), 0);
    }

    #[test]
    fn test_recreated_role_gets_new_identity() {
        let mock = MockProvider::new();
        let first = mock.create_role("job1", "{}").unwrap();
        mock.delete_role("job1").unwrap();
        let second = mock.create_role("job1", "{}").unwrap();
        assert_ne!(first.arn, second.arn);
    }

    #[test]
    fn test_function_requires_existing_role() {
        let mock = MockProvider::new();
        upload(&mock);
        let err = mock
            .create_function(&function_spec("arn:mock:iam::0:role/ghost"))
            .unwrap_err();
        assert_eq!(err.category(), crate::ErrorCategory::InvalidRequest);
    }

    #[test]
    fn test_delete_function_drops_permissions() {
        let mock = MockProvider::new();
        upload(&mock);
        let role = mock.create_role("job1", "{}").unwrap();
        mock.create_function(&function_spec(&role.arn)).unwrap();
        mock.add_permission(&PermissionSpec {
            function: "job1".to_string(),
            statement_id: "job1-schedule".to_string(),
            action: "lambda:InvokeFunction".to_string(),
            principal: "events.amazonaws.com".to_string(),
            source_arn: "arn:rule".to_string(),
        })
        .unwrap();

        mock.delete_function("job1").unwrap();
        assert!(mock.get_permission("job1", "job1-schedule").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_statement_is_conflict() {
        let mock = MockProvider::new();
        upload(&mock);
        let role = mock.create_role("job1", "{}").unwrap();
        mock.create_function(&function_spec(&role.arn)).unwrap();
        let permission = PermissionSpec {
            function: "job1".to_string(),
            statement_id: "sid".to_string(),
            action: "lambda:InvokeFunction".to_string(),
            principal: "events.amazonaws.com".to_string(),
            source_arn: "arn:rule".to_string(),
        };
        mock.add_permission(&permission).unwrap();
        assert!(mock.add_permission(&permission).is_err());
    }

    #[test]
    fn test_rule_with_targets_cannot_be_deleted() {
        let mock = MockProvider::new();
        mock.put_rule("job1", "rate(1 day)").unwrap();
        mock.put_target(
            "job1",
            &RuleTarget {
                id: "job1".to_string(),
                arn: "arn:fn".to_string(),
            },
        )
        .unwrap();

        assert!(mock.delete_rule("job1").is_err());
        mock.remove_targets("job1", &["job1".to_string()]).unwrap();
        mock.delete_rule("job1").unwrap();
    }

    #[test]
    fn test_failed_mutations_are_not_journaled() {
        let mock = MockProvider::new();
        mock.fail_on("create_role");
        assert!(mock.create_role("job1", "{}").is_err());
        assert!(mock.journal().is_empty());

        mock.heal();
        mock.create_role("job1", "{}").unwrap();
        assert_eq!(mock.journal_ops(), vec!["create_role"]);
    }
}
