//! Deployment resources
//!
//! Every step of a deployment is a [`reconcile::Resource`]:
//! - serverless steps address a [`cloudkit::Provider`] by logical name and
//!   hand the identifiers it assigns to downstream steps through slots
//! - host steps mutate the machine only through the privileged runner the
//!   executor passes in, and read state straight from the filesystem

use cloudkit::Provider;
use reconcile::ApplyResult;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

pub mod artifact;
pub mod config_file;
pub mod cron_entry;
pub mod function;
pub mod host_account;
pub mod install_dir;
pub mod invoke_permission;
pub mod role;
pub mod role_policy;
pub mod schedule;

pub use artifact::ArtifactUpload;
pub use config_file::ConfigFile;
pub use cron_entry::{CronEntry, CronJob};
pub use function::{ClearFunction, Function, FunctionSettings};
pub use host_account::HostAccount;
pub use install_dir::InstallDir;
pub use invoke_permission::InvokePermission;
pub use role::ExecutionRole;
pub use role_policy::RolePolicy;
pub use schedule::ScheduleRule;

/// Identifier slots threaded between steps
pub mod slots {
    pub const ROLE_ARN: &str = "role_arn";
    pub const ARTIFACT: &str = "artifact";
    pub const FUNCTION_ARN: &str = "function_arn";
    pub const RULE_ARN: &str = "rule_arn";
    pub const HOST_USER: &str = "host_user";
    pub const INSTALL_DIR: &str = "install_dir";
    pub const CONFIG_PATH: &str = "config_path";
}

/// Shared handle to the provider used by every serverless step
#[derive(Clone)]
pub struct ProviderHandle(Arc<dyn Provider>);

impl ProviderHandle {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self(provider)
    }
}

impl Deref for ProviderHandle {
    type Target = dyn Provider;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Provider")
    }
}

/// Treat "already gone" as a successful delete
fn removed_or_absent(result: cloudkit::Result<()>, what: &str) -> anyhow::Result<ApplyResult> {
    match result {
        Ok(()) => Ok(ApplyResult::Removed),
        Err(e) if e.is_not_found() => {
            log::debug!("{what} already absent");
            Ok(ApplyResult::NoChange)
        }
        Err(e) => Err(e.into()),
    }
}

/// Compare policy documents structurally, falling back to text
fn same_document(a: &str, b: &str) -> bool {
    match (
        serde_json::from_str::<serde_json::Value>(a),
        serde_json::from_str::<serde_json::Value>(b),
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.trim() == b.trim(),
    }
}

/// A value only available while a staging area exists
fn staged<'a, T>(value: &'a Option<T>, what: &str) -> anyhow::Result<&'a T> {
    value
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("no staged {what}; this step only runs in a create plan"))
}

/// First characters of a digest, for display
fn short(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by resource, plan and driver tests.

    use reconcile::{CommandOutput, SudoProvider};
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::process::Command;
    use std::sync::{Arc, Mutex};

    /// Runner standing in for sudo on a test host
    ///
    /// Account commands edit a fake passwd file and ownership changes are
    /// skipped; everything else runs for real, so file operations land in
    /// the temporary directories the test points the steps at.
    #[derive(Clone)]
    pub struct FakeHost {
        pub passwd: PathBuf,
        commands: Arc<Mutex<Vec<String>>>,
    }

    impl FakeHost {
        pub fn new(passwd: &Path) -> Self {
            if !passwd.exists() {
                fs::write(passwd, "root:x:0:0:root:/root:/bin/sh\n").unwrap();
            }
            Self {
                passwd: passwd.to_path_buf(),
                commands: Arc::default(),
            }
        }

        /// Program names run so far, e.g. `["useradd", "install", ...]`
        pub fn programs(&self) -> Vec<String> {
            self.commands
                .lock()
                .unwrap()
                .iter()
                .map(|c| c.split(' ').next().unwrap_or_default().to_string())
                .collect()
        }

        pub fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.commands.lock().unwrap().clear();
        }

        fn ok() -> CommandOutput {
            CommandOutput {
                stdout: Vec::new(),
                stderr: Vec::new(),
                success: true,
            }
        }
    }

    impl SudoProvider for FakeHost {
        fn run(&self, cmd: &str, args: &[&str]) -> anyhow::Result<CommandOutput> {
            self.commands
                .lock()
                .unwrap()
                .push(format!("{cmd} {}", args.join(" ")));

            match cmd {
                "useradd" => {
                    let user = args.last().copied().unwrap_or_default();
                    let mut passwd = fs::read_to_string(&self.passwd)?;
                    passwd.push_str(&format!("{user}:x:999:999::/nonexistent:/usr/sbin/nologin\n"));
                    fs::write(&self.passwd, passwd)?;
                    Ok(Self::ok())
                }
                "userdel" => {
                    let user = args.last().copied().unwrap_or_default();
                    let prefix = format!("{user}:");
                    let passwd: String = fs::read_to_string(&self.passwd)?
                        .lines()
                        .filter(|l| !l.starts_with(&prefix))
                        .map(|l| format!("{l}\n"))
                        .collect();
                    fs::write(&self.passwd, passwd)?;
                    Ok(Self::ok())
                }
                "chown" => Ok(Self::ok()),
                _ => Ok(Command::new(cmd).args(args).output()?.into()),
            }
        }
    }
}
