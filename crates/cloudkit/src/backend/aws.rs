//! AWS CLI backend.
//!
//! Every call shells out to `aws ... --output json` and parses the response.
//! Transient failures (throttling, connectivity) are retried here with
//! exponential backoff; callers above this layer never retry.

use crate::backend::Provider;
use crate::error::{Error, Result};
use crate::retry::{LogCallback, with_retry};
use crate::types::{
    CodeLocation, Function, FunctionSpec, ObjectInfo, PermissionSpec, RetryConfig, Role, Rule,
    RuleTarget,
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Object metadata key holding the artifact digest.
const DIGEST_METADATA_KEY: &str = "digest";

/// Prefix of the function description carrying the artifact digest.
const REVISION_PREFIX: &str = "revision ";

/// Backend that executes real `aws` commands.
pub struct AwsCli {
    program: PathBuf,
    region: Option<String>,
    profile: Option<String>,
    retry: RetryConfig,
}

impl AwsCli {
    /// Locate the `aws` executable on PATH.
    pub fn new(region: Option<String>, profile: Option<String>) -> Result<Self> {
        let program = which::which("aws").map_err(|_| Error::CliNotFound)?;
        Ok(Self::with_program(program, region, profile))
    }

    /// Use an explicit executable (tests, wrappers such as `aws-vault exec`).
    pub fn with_program(
        program: impl Into<PathBuf>,
        region: Option<String>,
        profile: Option<String>,
    ) -> Self {
        Self {
            program: program.into(),
            region,
            profile,
            retry: RetryConfig::default(),
        }
    }

    /// Override the transport retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Arguments prepended to every call.
    fn global_args(&self) -> Vec<String> {
        let mut args = vec!["--output".to_string(), "json".to_string()];
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        if let Some(profile) = &self.profile {
            args.push("--profile".to_string());
            args.push(profile.clone());
        }
        args
    }

    /// Run a call once, returning stdout on success.
    fn run_once(&self, args: &[String], kind: &'static str, name: &str) -> Result<String> {
        log::debug!("aws {}", args.join(" "));
        let output = Command::new(&self.program)
            .args(self.global_args())
            .args(args)
            .output()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::CliNotFound
                } else {
                    Error::Io(e)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::from_cli_output(&stderr, kind, name));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Run a call with transport retries.
    fn call(&self, args: &[String], kind: &'static str, name: &str) -> Result<String> {
        with_retry(&self.retry, Some(&LogCallback), || {
            self.run_once(args, kind, name)
        })
    }

    /// Run a call and parse its JSON response.
    fn call_json<T: for<'de> Deserialize<'de>>(
        &self,
        args: &[String],
        kind: &'static str,
        name: &str,
    ) -> Result<T> {
        let stdout = self.call(args, kind, name)?;
        Ok(serde_json::from_str(&stdout)?)
    }

    /// Run a read call, mapping "not found" to `None`.
    fn lookup<T: for<'de> Deserialize<'de>>(
        &self,
        args: &[String],
        kind: &'static str,
        name: &str,
    ) -> Result<Option<T>> {
        match self.call_json(args, kind, name) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Block until the function has finished applying an update.
    fn wait_function_updated(&self, name: &str) -> Result<()> {
        let args = strings(&["lambda", "wait", "function-updated-v2", "--function-name", name]);
        self.call(&args, "function", name).map(|_| ())
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| (*a).to_string()).collect()
}

/// Arguments for `create-bucket`; us-east-1 rejects an explicit location.
fn create_bucket_args(bucket: &str, region: Option<&str>) -> Vec<String> {
    let mut args = strings(&["s3api", "create-bucket", "--bucket", bucket, "--acl", "private"]);
    if let Some(region) = region.filter(|r| *r != "us-east-1") {
        args.push("--create-bucket-configuration".to_string());
        args.push(format!("LocationConstraint={region}"));
    }
    args
}

fn environment_json(environment: &BTreeMap<String, String>) -> String {
    json!({ "Variables": environment }).to_string()
}

fn create_function_args(spec: &FunctionSpec) -> Vec<String> {
    let mut args = strings(&[
        "lambda",
        "create-function",
        "--function-name",
        &spec.name,
        "--runtime",
        &spec.runtime,
        "--role",
        &spec.role_arn,
        "--handler",
        &spec.handler,
    ]);
    args.push("--code".to_string());
    args.push(format!(
        "S3Bucket={},S3Key={}",
        spec.code.bucket, spec.code.key
    ));
    args.extend(configuration_tail(spec));
    args
}

fn update_configuration_args(spec: &FunctionSpec) -> Vec<String> {
    let mut args = strings(&[
        "lambda",
        "update-function-configuration",
        "--function-name",
        &spec.name,
        "--runtime",
        &spec.runtime,
        "--role",
        &spec.role_arn,
        "--handler",
        &spec.handler,
    ]);
    args.extend(configuration_tail(spec));
    args
}

fn configuration_tail(spec: &FunctionSpec) -> Vec<String> {
    vec![
        "--memory-size".to_string(),
        spec.memory_mb.to_string(),
        "--timeout".to_string(),
        spec.timeout_secs.to_string(),
        "--environment".to_string(),
        environment_json(&spec.environment),
        "--description".to_string(),
        format!("{REVISION_PREFIX}{}", spec.revision),
    ]
}

// =============================================================================
// AWS CLI response types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RoleEnvelope {
    role: AwsRole,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsRole {
    role_name: String,
    arn: String,
    #[serde(default)]
    assume_role_policy_document: Value,
}

impl From<AwsRole> for Role {
    fn from(r: AwsRole) -> Self {
        Self {
            name: r.role_name,
            arn: r.arn,
            trust_policy: policy_to_string(&r.assume_role_policy_document),
        }
    }
}

/// Policy documents come back decoded (an object) or URL-encoded (a string).
fn policy_to_string(document: &Value) -> String {
    match document {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RolePolicyEnvelope {
    policy_document: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HeadObject {
    content_length: u64,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FunctionEnvelope {
    configuration: AwsFunction,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsFunction {
    function_name: String,
    function_arn: String,
    role: String,
    #[serde(default)]
    runtime: String,
    #[serde(default)]
    handler: String,
    memory_size: u32,
    timeout: u32,
    #[serde(default)]
    environment: Option<AwsEnvironment>,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsEnvironment {
    #[serde(default)]
    variables: BTreeMap<String, String>,
}

impl From<AwsFunction> for Function {
    fn from(f: AwsFunction) -> Self {
        Self {
            name: f.function_name,
            arn: f.function_arn,
            role_arn: f.role,
            runtime: f.runtime,
            handler: f.handler,
            memory_mb: f.memory_size,
            timeout_secs: f.timeout,
            environment: f.environment.map(|e| e.variables).unwrap_or_default(),
            revision: f
                .description
                .strip_prefix(REVISION_PREFIX)
                .map(str::to_string),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsRule {
    name: String,
    arn: String,
    #[serde(default)]
    schedule_expression: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutRuleResponse {
    rule_arn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TargetsEnvelope {
    #[serde(default)]
    targets: Vec<AwsTarget>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AwsTarget {
    id: String,
    arn: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PolicyEnvelope {
    policy: String,
}

/// Find one statement in a function resource policy document.
fn find_statement(function: &str, policy: &str, statement_id: &str) -> Result<Option<PermissionSpec>> {
    let document: Value = serde_json::from_str(policy)?;
    let statements = document["Statement"].as_array().cloned().unwrap_or_default();

    Ok(statements
        .iter()
        .find(|s| s["Sid"].as_str() == Some(statement_id))
        .map(|s| PermissionSpec {
            function: function.to_string(),
            statement_id: statement_id.to_string(),
            action: s["Action"].as_str().unwrap_or_default().to_string(),
            principal: s["Principal"]["Service"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            source_arn: s["Condition"]["ArnLike"]["AWS:SourceArn"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        }))
}

impl Provider for AwsCli {
    fn get_role(&self, name: &str) -> Result<Option<Role>> {
        let args = strings(&["iam", "get-role", "--role-name", name]);
        Ok(self
            .lookup::<RoleEnvelope>(&args, "role", name)?
            .map(|r| r.role.into()))
    }

    fn create_role(&self, name: &str, trust_policy: &str) -> Result<Role> {
        let args = strings(&[
            "iam",
            "create-role",
            "--role-name",
            name,
            "--assume-role-policy-document",
            trust_policy,
        ]);
        let envelope: RoleEnvelope = self.call_json(&args, "role", name)?;
        Ok(envelope.role.into())
    }

    fn update_trust_policy(&self, name: &str, trust_policy: &str) -> Result<()> {
        let args = strings(&[
            "iam",
            "update-assume-role-policy",
            "--role-name",
            name,
            "--policy-document",
            trust_policy,
        ]);
        self.call(&args, "role", name).map(|_| ())
    }

    fn delete_role(&self, name: &str) -> Result<()> {
        let args = strings(&["iam", "delete-role", "--role-name", name]);
        self.call(&args, "role", name).map(|_| ())
    }

    fn get_role_policy(&self, role: &str, policy: &str) -> Result<Option<String>> {
        let args = strings(&[
            "iam",
            "get-role-policy",
            "--role-name",
            role,
            "--policy-name",
            policy,
        ]);
        Ok(self
            .lookup::<RolePolicyEnvelope>(&args, "role policy", policy)?
            .map(|p| policy_to_string(&p.policy_document)))
    }

    fn put_role_policy(&self, role: &str, policy: &str, document: &str) -> Result<()> {
        let args = strings(&[
            "iam",
            "put-role-policy",
            "--role-name",
            role,
            "--policy-name",
            policy,
            "--policy-document",
            document,
        ]);
        self.call(&args, "role policy", policy).map(|_| ())
    }

    fn delete_role_policy(&self, role: &str, policy: &str) -> Result<()> {
        let args = strings(&[
            "iam",
            "delete-role-policy",
            "--role-name",
            role,
            "--policy-name",
            policy,
        ]);
        self.call(&args, "role policy", policy).map(|_| ())
    }

    fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let args = strings(&["s3api", "head-bucket", "--bucket", bucket]);
        match self.call(&args, "bucket", bucket) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create_bucket(&self, bucket: &str) -> Result<()> {
        let args = create_bucket_args(bucket, self.region.as_deref());
        self.call(&args, "bucket", bucket).map(|_| ())
    }

    fn delete_bucket(&self, bucket: &str) -> Result<()> {
        let args = strings(&["s3api", "delete-bucket", "--bucket", bucket]);
        self.call(&args, "bucket", bucket).map(|_| ())
    }

    fn head_object(&self, bucket: &str, key: &str) -> Result<Option<ObjectInfo>> {
        let args = strings(&["s3api", "head-object", "--bucket", bucket, "--key", key]);
        Ok(self
            .lookup::<HeadObject>(&args, "object", key)?
            .map(|head| ObjectInfo {
                bucket: bucket.to_string(),
                key: key.to_string(),
                size: head.content_length,
                digest: head.metadata.get(DIGEST_METADATA_KEY).cloned(),
            }))
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &Path,
        digest: &str,
    ) -> Result<ObjectInfo> {
        let size = std::fs::metadata(body)?.len();
        let body = body.to_string_lossy();
        let metadata = format!("{DIGEST_METADATA_KEY}={digest}");
        let args = strings(&[
            "s3api",
            "put-object",
            "--bucket",
            bucket,
            "--key",
            key,
            "--body",
            &body,
            "--acl",
            "private",
            "--metadata",
            &metadata,
        ]);
        self.call(&args, "object", key)?;
        Ok(ObjectInfo {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size,
            digest: Some(digest.to_string()),
        })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let args = strings(&["s3api", "delete-object", "--bucket", bucket, "--key", key]);
        self.call(&args, "object", key).map(|_| ())
    }

    fn get_function(&self, name: &str) -> Result<Option<Function>> {
        let args = strings(&["lambda", "get-function", "--function-name", name]);
        Ok(self
            .lookup::<FunctionEnvelope>(&args, "function", name)?
            .map(|f| f.configuration.into()))
    }

    fn create_function(&self, spec: &FunctionSpec) -> Result<Function> {
        let created: AwsFunction =
            self.call_json(&create_function_args(spec), "function", &spec.name)?;
        let args = strings(&[
            "lambda",
            "wait",
            "function-active-v2",
            "--function-name",
            &spec.name,
        ]);
        self.call(&args, "function", &spec.name)?;
        Ok(created.into())
    }

    fn update_function_code(&self, name: &str, code: &CodeLocation) -> Result<Function> {
        let args = strings(&[
            "lambda",
            "update-function-code",
            "--function-name",
            name,
            "--s3-bucket",
            &code.bucket,
            "--s3-key",
            &code.key,
        ]);
        let updated: AwsFunction = self.call_json(&args, "function", name)?;
        self.wait_function_updated(name)?;
        Ok(updated.into())
    }

    fn update_function_configuration(&self, spec: &FunctionSpec) -> Result<Function> {
        let updated: AwsFunction =
            self.call_json(&update_configuration_args(spec), "function", &spec.name)?;
        self.wait_function_updated(&spec.name)?;
        Ok(updated.into())
    }

    fn delete_function(&self, name: &str) -> Result<()> {
        let args = strings(&["lambda", "delete-function", "--function-name", name]);
        self.call(&args, "function", name).map(|_| ())
    }

    fn get_rule(&self, name: &str) -> Result<Option<Rule>> {
        let args = strings(&["events", "describe-rule", "--name", name]);
        Ok(self.lookup::<AwsRule>(&args, "rule", name)?.map(|r| Rule {
            name: r.name,
            arn: r.arn,
            schedule: r.schedule_expression,
        }))
    }

    fn put_rule(&self, name: &str, schedule: &str) -> Result<Rule> {
        let args = strings(&[
            "events",
            "put-rule",
            "--name",
            name,
            "--schedule-expression",
            schedule,
            "--state",
            "ENABLED",
        ]);
        let response: PutRuleResponse = self.call_json(&args, "rule", name)?;
        Ok(Rule {
            name: name.to_string(),
            arn: response.rule_arn,
            schedule: schedule.to_string(),
        })
    }

    fn list_targets(&self, rule: &str) -> Result<Vec<RuleTarget>> {
        let args = strings(&["events", "list-targets-by-rule", "--rule", rule]);
        let envelope: TargetsEnvelope = self.call_json(&args, "rule", rule)?;
        Ok(envelope
            .targets
            .into_iter()
            .map(|t| RuleTarget { id: t.id, arn: t.arn })
            .collect())
    }

    fn put_target(&self, rule: &str, target: &RuleTarget) -> Result<()> {
        let targets = json!([{ "Id": target.id, "Arn": target.arn }]).to_string();
        let args = strings(&["events", "put-targets", "--rule", rule, "--targets", &targets]);
        self.call(&args, "rule", rule).map(|_| ())
    }

    fn remove_targets(&self, rule: &str, ids: &[String]) -> Result<()> {
        let mut args = strings(&["events", "remove-targets", "--rule", rule, "--ids"]);
        args.extend(ids.iter().cloned());
        self.call(&args, "rule", rule).map(|_| ())
    }

    fn delete_rule(&self, name: &str) -> Result<()> {
        let args = strings(&["events", "delete-rule", "--name", name]);
        self.call(&args, "rule", name).map(|_| ())
    }

    fn get_permission(
        &self,
        function: &str,
        statement_id: &str,
    ) -> Result<Option<PermissionSpec>> {
        let args = strings(&["lambda", "get-policy", "--function-name", function]);
        match self.lookup::<PolicyEnvelope>(&args, "function policy", function)? {
            Some(envelope) => find_statement(function, &envelope.policy, statement_id),
            None => Ok(None),
        }
    }

    fn add_permission(&self, permission: &PermissionSpec) -> Result<()> {
        let args = strings(&[
            "lambda",
            "add-permission",
            "--function-name",
            &permission.function,
            "--statement-id",
            &permission.statement_id,
            "--action",
            &permission.action,
            "--principal",
            &permission.principal,
            "--source-arn",
            &permission.source_arn,
        ]);
        self.call(&args, "permission", &permission.statement_id)
            .map(|_| ())
    }

    fn remove_permission(&self, function: &str, statement_id: &str) -> Result<()> {
        let args = strings(&[
            "lambda",
            "remove-permission",
            "--function-name",
            function,
            "--statement-id",
            statement_id,
        ]);
        self.call(&args, "permission", statement_id).map(|_| ())
    }
}
