//! System account the host job runs as

use anyhow::{Context, Result};
use reconcile::{ApplyContext, ApplyResult, Outcome, Resource, ResourceState, Slots, SudoRequirement};
use std::fs;
use std::path::{Path, PathBuf};

use super::slots;

#[derive(Debug, Clone)]
pub struct HostAccount {
    user: String,
    home: PathBuf,
    passwd_file: PathBuf,
}

impl HostAccount {
    pub fn new(user: &str, home: &Path, passwd_file: &Path) -> Self {
        Self {
            user: user.to_string(),
            home: home.to_path_buf(),
            passwd_file: passwd_file.to_path_buf(),
        }
    }

    fn exists(&self) -> Result<bool> {
        let passwd = fs::read_to_string(&self.passwd_file)
            .with_context(|| format!("Could not read {}", self.passwd_file.display()))?;
        let prefix = format!("{}:", self.user);
        Ok(passwd.lines().any(|line| line.starts_with(&prefix)))
    }
}

impl Resource for HostAccount {
    fn id(&self) -> String {
        "account".to_string()
    }

    fn description(&self) -> String {
        format!("System account {}", self.user)
    }

    fn resource_type(&self) -> &'static str {
        "host_account"
    }

    fn sudo_requirement(&self) -> SudoRequirement {
        SudoRequirement::Required {
            reason: format!("manage the {} account", self.user),
        }
    }

    fn provides(&self) -> Option<&'static str> {
        Some(slots::HOST_USER)
    }

    fn current_state(&self, _slots: &Slots) -> Result<ResourceState> {
        Ok(if self.exists()? {
            ResourceState::Present {
                details: Some(self.user.clone()),
            }
        } else {
            ResourceState::Absent
        })
    }

    fn existing_identifier(&self) -> Result<Option<String>> {
        Ok(self.exists()?.then(|| self.user.clone()))
    }

    fn upsert(&self, ctx: &mut ApplyContext) -> Result<Outcome> {
        if self.exists()? {
            return Ok(Outcome::new(ApplyResult::NoChange).with_identifier(&self.user));
        }

        let home = self.home.to_string_lossy();
        ctx.require_sudo()?
            .run_checked(
                "useradd",
                &[
                    "--system",
                    "--no-create-home",
                    "--home-dir",
                    &home,
                    "--shell",
                    "/usr/sbin/nologin",
                    &self.user,
                ],
            )
            .with_context(|| format!("Could not create account {}", self.user))?;

        Ok(Outcome::new(ApplyResult::Created).with_identifier(&self.user))
    }

    fn delete(&self, ctx: &mut ApplyContext) -> Result<ApplyResult> {
        if !self.exists()? {
            return Ok(ApplyResult::NoChange);
        }
        ctx.require_sudo()?
            .run_checked("userdel", &[&self.user])
            .with_context(|| format!("Could not remove account {}", self.user))?;
        Ok(ApplyResult::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::testing::FakeHost;

    #[test]
    fn test_account_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let passwd = dir.path().join("passwd");
        let host = FakeHost::new(&passwd);
        let slots = Slots::new();
        let account = HostAccount::new("job1", Path::new("/opt/job1"), &passwd);

        assert!(account.current_state(&slots).unwrap().is_absent());
        assert_eq!(account.existing_identifier().unwrap(), None);

        let outcome = account
            .upsert(&mut ApplyContext::with_sudo(&slots, &host))
            .unwrap();
        assert_eq!(outcome.result, ApplyResult::Created);
        assert_eq!(outcome.identifier.as_deref(), Some("job1"));
        assert!(host.commands()[0].contains("--home-dir /opt/job1"));

        let again = account
            .upsert(&mut ApplyContext::with_sudo(&slots, &host))
            .unwrap();
        assert_eq!(again.result, ApplyResult::NoChange);
        assert_eq!(host.programs(), vec!["useradd"]);

        assert_eq!(
            account
                .delete(&mut ApplyContext::with_sudo(&slots, &host))
                .unwrap(),
            ApplyResult::Removed
        );
        assert!(account.current_state(&slots).unwrap().is_absent());
    }

    #[test]
    fn test_prefix_match_is_exact() {
        let dir = tempfile::tempdir().unwrap();
        let passwd = dir.path().join("passwd");
        fs::write(&passwd, "job10:x:998:998::/:/usr/sbin/nologin\n").unwrap();

        let account = HostAccount::new("job1", Path::new("/opt/job1"), &passwd);
        assert!(!account.exists().unwrap());
    }

    #[test]
    fn test_create_without_privileges_fails() {
        let dir = tempfile::tempdir().unwrap();
        let passwd = dir.path().join("passwd");
        FakeHost::new(&passwd);
        let slots = Slots::new();

        let account = HostAccount::new("job1", Path::new("/opt/job1"), &passwd);
        assert!(account.upsert(&mut ApplyContext::new(&slots)).is_err());
    }

    #[test]
    fn test_delete_when_absent_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let passwd = dir.path().join("passwd");
        let host = FakeHost::new(&passwd);
        let slots = Slots::new();

        let account = HostAccount::new("job1", Path::new("/opt/job1"), &passwd);
        let result = account
            .delete(&mut ApplyContext::with_sudo(&slots, &host))
            .unwrap();
        assert_eq!(result, ApplyResult::NoChange);
        assert!(host.commands().is_empty());
    }
}
