//! Core types for provider operations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// An execution role as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Logical role name
    pub name: String,
    /// Provider-assigned identifier (ARN)
    pub arn: String,
    /// Trust policy document (JSON)
    pub trust_policy: String,
}

/// Where a function's code lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLocation {
    /// Bucket holding the archive
    pub bucket: String,
    /// Object key of the archive
    pub key: String,
}

/// Desired definition of a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// Logical function name
    pub name: String,
    /// Identifier of the execution role (ARN)
    pub role_arn: String,
    /// Runtime identifier (e.g. `python3.12`)
    pub runtime: String,
    /// Handler entry point (e.g. `twitbot.lambda_handler`)
    pub handler: String,
    /// Code archive location
    pub code: CodeLocation,
    /// Memory size in MB
    pub memory_mb: u32,
    /// Timeout in seconds
    pub timeout_secs: u32,
    /// Environment bindings
    pub environment: BTreeMap<String, String>,
    /// Digest of the artifact this definition deploys
    pub revision: String,
}

/// A function as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    /// Logical function name
    pub name: String,
    /// Provider-assigned identifier (ARN)
    pub arn: String,
    /// Role the function assumes
    pub role_arn: String,
    /// Runtime identifier
    pub runtime: String,
    /// Handler entry point
    pub handler: String,
    /// Memory size in MB
    pub memory_mb: u32,
    /// Timeout in seconds
    pub timeout_secs: u32,
    /// Environment bindings
    pub environment: BTreeMap<String, String>,
    /// Artifact digest recorded on the last code or configuration update
    pub revision: Option<String>,
}

impl Function {
    /// Whether the mutable configuration already matches `spec`.
    pub fn matches_configuration(&self, spec: &FunctionSpec) -> bool {
        self.role_arn == spec.role_arn
            && self.runtime == spec.runtime
            && self.handler == spec.handler
            && self.memory_mb == spec.memory_mb
            && self.timeout_secs == spec.timeout_secs
            && self.environment == spec.environment
    }

    /// Whether the deployed code is the artifact described by `spec`.
    pub fn runs_revision(&self, spec: &FunctionSpec) -> bool {
        self.revision.as_deref() == Some(spec.revision.as_str())
    }
}

/// A schedule rule as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Logical rule name
    pub name: String,
    /// Provider-assigned identifier (ARN)
    pub arn: String,
    /// Schedule expression (`rate(1 day)`, `cron(0 6 * * ? *)`)
    pub schedule: String,
}

/// A single target attached to a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTarget {
    /// Target id, unique within the rule
    pub id: String,
    /// Identifier of the invoked resource
    pub arn: String,
}

/// A permission statement on a function's resource policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSpec {
    /// Function the statement is attached to
    pub function: String,
    /// Statement id, the statement's identity
    pub statement_id: String,
    /// Permitted action (e.g. `lambda:InvokeFunction`)
    pub action: String,
    /// Principal being authorized (e.g. `events.amazonaws.com`)
    pub principal: String,
    /// Identifier of the calling resource (rule ARN)
    pub source_arn: String,
}

/// Metadata of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    /// Bucket name
    pub bucket: String,
    /// Object key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Content digest recorded at upload time, if any
    pub digest: Option<String>,
}

/// Configuration for retry behavior on transient errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> FunctionSpec {
        FunctionSpec {
            name: "job1".to_string(),
            role_arn: "arn:aws:iam::1:role/job1".to_string(),
            runtime: "python3.12".to_string(),
            handler: "twitbot.lambda_handler".to_string(),
            code: CodeLocation {
                bucket: "b".to_string(),
                key: "job1.zip".to_string(),
            },
            memory_mb: 256,
            timeout_secs: 60,
            environment: BTreeMap::new(),
            revision: "abc".to_string(),
        }
    }

    #[test]
    fn test_retry_delay_backoff() {
        let config = RetryConfig::new(5, Duration::from_secs(2), 2.0);
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(8));
    }

    #[test]
    fn test_retry_delay_capped() {
        let config = RetryConfig::new(10, Duration::from_secs(30), 4.0);
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(60));
    }

    #[test]
    fn test_matches_configuration_detects_memory_change() {
        let spec = spec();
        let mut function = Function {
            name: spec.name.clone(),
            arn: "arn".to_string(),
            role_arn: spec.role_arn.clone(),
            runtime: spec.runtime.clone(),
            handler: spec.handler.clone(),
            memory_mb: spec.memory_mb,
            timeout_secs: spec.timeout_secs,
            environment: BTreeMap::new(),
            revision: Some("abc".to_string()),
        };
        assert!(function.matches_configuration(&spec));
        assert!(function.runs_revision(&spec));

        function.memory_mb = 512;
        assert!(!function.matches_configuration(&spec));
    }
}
