//! Deployment configuration (`feedbot.toml`)
//!
//! ```toml
//! [job]
//! name = "twitbot"
//! source = "bot"
//! template = "twitbot.cf.tmpl"
//! target = "serverless"
//!
//! [variables]
//! consumer_key = "env:TWITBOT_CONSUMER_KEY"
//!
//! [serverless]
//! region = "eu-west-1"
//! memory_mb = 256
//! ```

use anyhow::{Context, Result, bail};
use cloudkit::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

/// Where the job runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// A persistent host driven by cron
    Host,
    /// A serverless function fired by a schedule rule
    #[default]
    Serverless,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Serverless => write!(f, "serverless"),
        }
    }
}

/// Complete deployment file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    pub job: JobConfig,

    /// Template variables; `env:NAME` values are read from the environment
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub serverless: ServerlessConfig,

    #[serde(default)]
    pub retry: RetrySettings,
}

/// The program being deployed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Logical name shared by every resource of the deployment
    pub name: String,

    /// Directory holding the program sources
    #[serde(default = "default_source")]
    pub source: PathBuf,

    /// Program file, relative to `source`
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,

    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Dependency manifest installed into the artifact
    #[serde(default)]
    pub requirements: Option<PathBuf>,

    /// Configuration template
    pub template: PathBuf,

    /// File name of the rendered configuration
    #[serde(default = "default_config_name")]
    pub config_name: String,

    /// Target used when the command line does not pick one
    #[serde(default)]
    pub target: Target,

    /// Parent directory for staging areas (system temp dir when unset)
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Installer used to vendor dependencies
    #[serde(default = "default_resolver")]
    pub resolver: String,
}

/// Host-cron target settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Account the job runs as (defaults to the job name)
    #[serde(default)]
    pub user: Option<String>,

    /// The program is installed to `<install_root>/<name>`
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,

    #[serde(default = "default_cron_dir")]
    pub cron_dir: PathBuf,

    /// Five-field cron schedule
    #[serde(default = "default_cron_schedule")]
    pub schedule: String,

    /// Run host commands through sudo (disable when already root)
    #[serde(default = "default_true")]
    pub use_sudo: bool,

    /// Account database consulted for existing users
    #[serde(default = "default_passwd_file")]
    pub passwd_file: PathBuf,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            user: None,
            install_root: default_install_root(),
            cron_dir: default_cron_dir(),
            schedule: default_cron_schedule(),
            use_sudo: true,
            passwd_file: default_passwd_file(),
        }
    }
}

/// Serverless target settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerlessConfig {
    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub profile: Option<String>,

    /// Artifact bucket (defaults to `<name>-artifacts`)
    #[serde(default)]
    pub bucket: Option<String>,

    /// Artifact object key (defaults to `<name>.zip`)
    #[serde(default)]
    pub artifact_key: Option<String>,

    /// `rate(...)` or `cron(...)` expression
    #[serde(default = "default_rate")]
    pub schedule: String,

    #[serde(default = "default_memory")]
    pub memory_mb: u32,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,

    #[serde(default = "default_runtime")]
    pub runtime: String,

    #[serde(default = "default_handler")]
    pub handler: String,

    /// Trust policy document of the execution role (JSON)
    #[serde(default)]
    pub trust_policy: Option<String>,

    /// Log-writing grant attached to the execution role (JSON)
    #[serde(default)]
    pub log_policy: Option<String>,

    /// Delete any function left under the job name before creating it
    ///
    /// On by default, so every deployment starts from a fresh function.
    /// Turning it off departs from that default: an existing function is
    /// updated in place instead of being cleared first.
    #[serde(default = "default_true")]
    pub clear_stale_function: bool,

    /// Also delete the artifact object and bucket on teardown
    #[serde(default)]
    pub purge_artifact: bool,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

impl Default for ServerlessConfig {
    fn default() -> Self {
        Self {
            region: None,
            profile: None,
            bucket: None,
            artifact_key: None,
            schedule: default_rate(),
            memory_mb: default_memory(),
            timeout_secs: default_timeout(),
            runtime: default_runtime(),
            handler: default_handler(),
            trust_policy: None,
            log_policy: None,
            clear_stale_function: true,
            purge_artifact: false,
            environment: BTreeMap::new(),
        }
    }
}

/// Retry of transient provider errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_attempts(),
            base_delay_secs: default_base_delay(),
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.max_attempts.max(1),
            Duration::from_secs(self.base_delay_secs),
            2.0,
        )
    }
}

fn default_source() -> PathBuf {
    PathBuf::from(".")
}

fn default_entrypoint() -> String {
    "twitbot.py".to_string()
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_config_name() -> String {
    "twitbot.cf".to_string()
}

fn default_resolver() -> String {
    "pip3".to_string()
}

fn default_install_root() -> PathBuf {
    PathBuf::from("/opt")
}

fn default_cron_dir() -> PathBuf {
    PathBuf::from("/etc/cron.d")
}

fn default_cron_schedule() -> String {
    "0 6 * * *".to_string()
}

fn default_passwd_file() -> PathBuf {
    PathBuf::from("/etc/passwd")
}

fn default_rate() -> String {
    "rate(1 day)".to_string()
}

fn default_memory() -> u32 {
    256
}

fn default_timeout() -> u32 {
    60
}

fn default_runtime() -> String {
    "python3.12".to_string()
}

fn default_handler() -> String {
    "twitbot.lambda_handler".to_string()
}

fn default_attempts() -> u32 {
    4
}

fn default_base_delay() -> u64 {
    2
}

fn default_true() -> bool {
    true
}

const DEFAULT_TRUST_POLICY: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    {
      "Effect": "Allow",
      "Principal": { "Service": "lambda.amazonaws.com" },
      "Action": "sts:AssumeRole"
    }
  ]
}"#;

const DEFAULT_LOG_POLICY: &str = r#"{
  "Version": "2012-10-17",
  "Statement": [
    {
      "Effect": "Allow",
      "Action": ["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
      "Resource": "arn:aws:logs:*:*:*"
    }
  ]
}"#;

impl DeployConfig {
    /// Load, anchor relative paths at the file's directory, and validate
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        log::debug!("Loaded deployment file {}", path.display());
        Self::from_toml(&content, &base)
            .with_context(|| format!("Invalid deployment file {}", path.display()))
    }

    /// Parse a deployment file whose relative paths are anchored at `base`
    pub fn from_toml(content: &str, base: &Path) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.resolve_paths(base);
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        self.job.source = paths::resolve(&self.job.source, base);
        self.job.template = paths::resolve(&self.job.template, base);
        if let Some(requirements) = &self.job.requirements {
            self.job.requirements = Some(paths::resolve(requirements, base));
        }
        if let Some(staging) = &self.job.staging_dir {
            self.job.staging_dir = Some(paths::resolve(staging, base));
        }
        self.host.install_root = paths::resolve(&self.host.install_root, base);
        self.host.cron_dir = paths::resolve(&self.host.cron_dir, base);
        self.host.passwd_file = paths::resolve(&self.host.passwd_file, base);
    }

    /// Check every section, reporting the first problem
    pub fn validate(&self) -> Result<()> {
        validate_name("job.name", &self.job.name)?;
        if self.job.entrypoint.trim().is_empty() {
            bail!("job.entrypoint must not be empty");
        }
        if self.job.config_name.is_empty() || self.job.config_name.contains('/') {
            bail!(
                "job.config_name must be a plain file name, got '{}'",
                self.job.config_name
            );
        }

        for (field, value) in [
            ("job.entrypoint", self.job.entrypoint.as_str()),
            ("job.config_name", self.job.config_name.as_str()),
            ("host.install_root", &*self.host.install_root.to_string_lossy()),
        ] {
            // A line break would end the cron entry early
            if value.chars().any(char::is_control) {
                bail!("{field} must not contain control characters");
            }
        }

        if let Some(user) = &self.host.user {
            validate_name("host.user", user)?;
        }
        let fields = self.host.schedule.split_whitespace().count();
        if fields != 5 {
            bail!(
                "host.schedule must have five cron fields, got {fields} in '{}'",
                self.host.schedule
            );
        }

        let s = &self.serverless;
        if !(s.schedule.starts_with("rate(") || s.schedule.starts_with("cron("))
            || !s.schedule.ends_with(')')
        {
            bail!(
                "serverless.schedule must be rate(...) or cron(...), got '{}'",
                s.schedule
            );
        }
        if !(128..=10240).contains(&s.memory_mb) {
            bail!(
                "serverless.memory_mb must be between 128 and 10240, got {}",
                s.memory_mb
            );
        }
        if !(1..=900).contains(&s.timeout_secs) {
            bail!(
                "serverless.timeout_secs must be between 1 and 900, got {}",
                s.timeout_secs
            );
        }
        for (field, document) in [
            ("serverless.trust_policy", &s.trust_policy),
            ("serverless.log_policy", &s.log_policy),
        ] {
            if let Some(document) = document {
                serde_json::from_str::<serde_json::Value>(document)
                    .with_context(|| format!("{field} is not valid JSON"))?;
            }
        }

        Ok(())
    }

    /// Account the host job runs as
    pub fn host_user(&self) -> &str {
        self.host.user.as_deref().unwrap_or(&self.job.name)
    }

    /// Directory the program is installed to on the host
    pub fn install_dir(&self) -> PathBuf {
        self.host.install_root.join(&self.job.name)
    }

    pub fn bucket(&self) -> String {
        self.serverless
            .bucket
            .clone()
            .unwrap_or_else(|| format!("{}-artifacts", self.job.name))
    }

    pub fn artifact_key(&self) -> String {
        self.serverless
            .artifact_key
            .clone()
            .unwrap_or_else(|| format!("{}.zip", self.job.name))
    }

    pub fn trust_policy(&self) -> &str {
        self.serverless
            .trust_policy
            .as_deref()
            .unwrap_or(DEFAULT_TRUST_POLICY)
    }

    pub fn log_policy(&self) -> &str {
        self.serverless
            .log_policy
            .as_deref()
            .unwrap_or(DEFAULT_LOG_POLICY)
    }

    /// Template variables with command-line overrides applied and
    /// `env:NAME` references resolved
    pub fn resolve_variables(
        &self,
        overrides: &[(String, String)],
    ) -> Result<BTreeMap<String, String>> {
        let mut merged = self.variables.clone();
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }

        let mut resolved = BTreeMap::new();
        for (key, value) in merged {
            let value = match value.strip_prefix("env:") {
                Some(name) => std::env::var(name).with_context(|| {
                    format!("variable '{key}' reads ${name}, which is not set")
                })?,
                None => value,
            };
            resolved.insert(key, value);
        }
        Ok(resolved)
    }
}

/// Names end up in role, function, rule and cron file names
fn validate_name(field: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid_start || !valid_rest || name.len() > 64 {
        bail!(
            "{field} must be 1-64 letters, digits, '-' or '_' starting with a letter or digit, got '{name}'"
        );
    }
    Ok(())
}
