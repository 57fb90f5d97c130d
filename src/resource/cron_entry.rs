//! Named entry in the system cron directory
//!
//! The command line is fixed: change into the install directory and run
//! the program against the committed configuration as the job account.

use anyhow::{Context, Result};
use reconcile::{ApplyContext, ApplyResult, Outcome, Resource, ResourceState, Slots, SudoRequirement};
use std::fs;
use std::path::{Path, PathBuf};

use super::{slots, staged};

/// What the entry runs and when
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronJob {
    pub schedule: String,
    pub interpreter: String,
    pub entrypoint: String,
}

impl CronJob {
    fn render(&self, user: &str, dir: &str, config: &str) -> String {
        format!(
            "# Installed by feedbot-deploy; local edits are overwritten\n\
             SHELL=/bin/sh\n\
             PATH=/usr/local/bin:/usr/bin:/bin\n\
             {} {user} cd {} && {} {} --config {}\n",
            self.schedule,
            quote(dir),
            self.interpreter,
            quote(&self.entrypoint),
            quote(config)
        )
    }
}

/// Quote `word` for the cron command field
///
/// Plain paths pass through untouched. Anything else is single-quoted for
/// `/bin/sh`, and `%` is escaped because cron turns it into a newline even
/// inside quotes.
fn quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+:@,=".contains(c));
    if plain {
        return word.to_string();
    }
    let escaped = word.replace('\'', "'\\''").replace('%', "\\%");
    format!("'{escaped}'")
}

#[derive(Debug)]
pub struct CronEntry {
    path: PathBuf,
    job: CronJob,
    scratch: Option<PathBuf>,
}

impl CronEntry {
    pub fn new(path: &Path, job: CronJob) -> Self {
        Self {
            path: path.to_path_buf(),
            job,
            scratch: None,
        }
    }

    /// Directory for the file written before it is installed
    pub fn staged_in(mut self, scratch: &Path) -> Self {
        self.scratch = Some(scratch.to_path_buf());
        self
    }

    fn desired(&self, inputs: &Slots) -> Option<String> {
        Some(self.job.render(
            inputs.get(slots::HOST_USER)?,
            inputs.get(slots::INSTALL_DIR)?,
            inputs.get(slots::CONFIG_PATH)?,
        ))
    }

    fn display(&self) -> String {
        self.path.display().to_string()
    }
}

impl Resource for CronEntry {
    fn id(&self) -> String {
        "cron-entry".to_string()
    }

    fn description(&self) -> String {
        format!("Cron entry {} ({})", self.path.display(), self.job.schedule)
    }

    fn resource_type(&self) -> &'static str {
        "cron_entry"
    }

    fn sudo_requirement(&self) -> SudoRequirement {
        SudoRequirement::Required {
            reason: format!("write {}", self.path.display()),
        }
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![slots::HOST_USER, slots::INSTALL_DIR, slots::CONFIG_PATH]
    }

    fn current_state(&self, inputs: &Slots) -> Result<ResourceState> {
        if !self.path.exists() {
            return Ok(ResourceState::Absent);
        }
        let Some(desired) = self.desired(inputs) else {
            return Ok(ResourceState::Unknown);
        };

        let installed = fs::read_to_string(&self.path)
            .with_context(|| format!("Could not read {}", self.path.display()))?;
        Ok(if installed == desired {
            ResourceState::Present {
                details: Some(self.job.schedule.clone()),
            }
        } else {
            ResourceState::Modified {
                from: "installed entry".to_string(),
                to: self.job.schedule.clone(),
            }
        })
    }

    fn existing_identifier(&self) -> Result<Option<String>> {
        Ok(self.path.exists().then(|| self.display()))
    }

    fn upsert(&self, ctx: &mut ApplyContext) -> Result<Outcome> {
        let scratch = staged(&self.scratch, "scratch directory")?;
        let desired = self.job.render(
            ctx.input(slots::HOST_USER)?,
            ctx.input(slots::INSTALL_DIR)?,
            ctx.input(slots::CONFIG_PATH)?,
        );

        let result = match fs::read_to_string(&self.path) {
            Ok(installed) if installed == desired => {
                return Ok(Outcome::new(ApplyResult::NoChange).with_identifier(self.display()));
            }
            Ok(_) => ApplyResult::Modified,
            Err(_) => ApplyResult::Created,
        };

        let file = scratch.join("cron-entry");
        fs::write(&file, &desired)
            .with_context(|| format!("Could not write {}", file.display()))?;

        ctx.require_sudo()?.run_checked(
            "install",
            &["-m", "0644", &file.to_string_lossy(), &self.display()],
        )?;
        Ok(Outcome::new(result).with_identifier(self.display()))
    }

    fn delete(&self, ctx: &mut ApplyContext) -> Result<ApplyResult> {
        if !self.path.exists() {
            return Ok(ApplyResult::NoChange);
        }
        ctx.require_sudo()?
            .run_checked("rm", &["-f", &self.display()])?;
        Ok(ApplyResult::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::testing::FakeHost;

    fn job(schedule: &str) -> CronJob {
        CronJob {
            schedule: schedule.to_string(),
            interpreter: "python3".to_string(),
            entrypoint: "twitbot.py".to_string(),
        }
    }

    fn inputs() -> Slots {
        let mut inputs = Slots::new();
        inputs.insert(slots::HOST_USER, "job1");
        inputs.insert(slots::INSTALL_DIR, "/opt/job1");
        inputs.insert(slots::CONFIG_PATH, "/opt/job1/twitbot.cf");
        inputs
    }

    #[test]
    fn test_entry_runs_program_as_job_account() {
        let root = tempfile::tempdir().unwrap();
        let host = FakeHost::new(&root.path().join("passwd"));
        let path = root.path().join("job1");
        let inputs = inputs();
        let entry = CronEntry::new(&path, job("0 6 * * *")).staged_in(root.path());

        assert!(entry.current_state(&inputs).unwrap().is_absent());
        let outcome = entry
            .upsert(&mut ApplyContext::with_sudo(&inputs, &host))
            .unwrap();
        assert_eq!(outcome.result, ApplyResult::Created);

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.ends_with(
            "0 6 * * * job1 cd /opt/job1 && python3 twitbot.py --config /opt/job1/twitbot.cf\n"
        ));
        assert!(entry.current_state(&inputs).unwrap().is_present());

        host.clear();
        let again = entry
            .upsert(&mut ApplyContext::with_sudo(&inputs, &host))
            .unwrap();
        assert_eq!(again.result, ApplyResult::NoChange);
        assert!(host.commands().is_empty());
    }

    #[test]
    fn test_paths_with_spaces_are_quoted() {
        let root = tempfile::tempdir().unwrap();
        let host = FakeHost::new(&root.path().join("passwd"));
        let path = root.path().join("job1");
        let mut inputs = Slots::new();
        inputs.insert(slots::HOST_USER, "job1");
        inputs.insert(slots::INSTALL_DIR, "/srv/feed bots/job1");
        inputs.insert(slots::CONFIG_PATH, "/srv/feed bots/job1/twitbot.cf");

        CronEntry::new(&path, job("0 6 * * *"))
            .staged_in(root.path())
            .upsert(&mut ApplyContext::with_sudo(&inputs, &host))
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.ends_with(
            "0 6 * * * job1 cd '/srv/feed bots/job1' && python3 twitbot.py --config '/srv/feed bots/job1/twitbot.cf'\n"
        ));
    }

    #[test]
    fn test_quote_escapes_shell_and_cron_metacharacters() {
        assert_eq!(quote("/opt/job1/twitbot.cf"), "/opt/job1/twitbot.cf");
        assert_eq!(quote("/opt/$HOME"), "'/opt/$HOME'");
        assert_eq!(quote("/opt/bob's"), "'/opt/bob'\\''s'");
        assert_eq!(quote("/opt/100%"), "'/opt/100\\%'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn test_schedule_change_rewrites_entry() {
        let root = tempfile::tempdir().unwrap();
        let host = FakeHost::new(&root.path().join("passwd"));
        let path = root.path().join("job1");
        let inputs = inputs();
        CronEntry::new(&path, job("0 6 * * *"))
            .staged_in(root.path())
            .upsert(&mut ApplyContext::with_sudo(&inputs, &host))
            .unwrap();

        let entry = CronEntry::new(&path, job("30 7 * * 1")).staged_in(root.path());
        assert!(matches!(
            entry.current_state(&inputs).unwrap(),
            ResourceState::Modified { .. }
        ));
        let outcome = entry
            .upsert(&mut ApplyContext::with_sudo(&inputs, &host))
            .unwrap();
        assert_eq!(outcome.result, ApplyResult::Modified);
        assert!(fs::read_to_string(&path).unwrap().contains("30 7 * * 1 job1"));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let host = FakeHost::new(&root.path().join("passwd"));
        let path = root.path().join("job1");
        fs::write(&path, "x").unwrap();
        let empty = Slots::new();

        let entry = CronEntry::new(&path, job("0 6 * * *"));
        assert_eq!(
            entry
                .delete(&mut ApplyContext::with_sudo(&empty, &host))
                .unwrap(),
            ApplyResult::Removed
        );
        assert_eq!(
            entry
                .delete(&mut ApplyContext::with_sudo(&empty, &host))
                .unwrap(),
            ApplyResult::NoChange
        );
        assert_eq!(host.programs(), vec!["rm"]);
    }
}
