//! Rendered configuration committed next to the installed program
//!
//! The new content is first installed as `<name>.candidate`, checked by the
//! program's own `--validate` mode, and only then moved over the live file.
//! A rejected candidate is removed and the live file is left untouched.

use anyhow::{Context, Result};
use reconcile::{ApplyContext, ApplyResult, Outcome, Resource, ResourceState, Slots, SudoRequirement};
use similar::{ChangeTag, TextDiff};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{slots, staged};
use crate::render::ProgramCheck;

#[derive(Debug)]
struct Pending {
    content: String,
    check: ProgramCheck,
    scratch: PathBuf,
}

#[derive(Debug)]
pub struct ConfigFile {
    path: PathBuf,
    pending: Option<Pending>,
}

impl ConfigFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            pending: None,
        }
    }

    /// Commit `content` once `check` accepts it
    pub fn with_content(mut self, content: &str, check: ProgramCheck, scratch: &Path) -> Self {
        self.pending = Some(Pending {
            content: content.to_string(),
            check,
            scratch: scratch.to_path_buf(),
        });
        self
    }

    fn candidate(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".candidate");
        PathBuf::from(name)
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "config".to_string())
    }
}

/// `+N -M lines` between two documents
fn line_changes(old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    let (mut added, mut removed) = (0, 0);
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => removed += 1,
            ChangeTag::Equal => {}
        }
    }
    format!("+{added} -{removed} lines")
}

impl Resource for ConfigFile {
    fn id(&self) -> String {
        "config".to_string()
    }

    fn description(&self) -> String {
        format!("Configuration {}", self.path.display())
    }

    fn resource_type(&self) -> &'static str {
        "config_file"
    }

    fn sudo_requirement(&self) -> SudoRequirement {
        SudoRequirement::Required {
            reason: format!("install {}", self.path.display()),
        }
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![slots::INSTALL_DIR, slots::HOST_USER]
    }

    fn provides(&self) -> Option<&'static str> {
        Some(slots::CONFIG_PATH)
    }

    fn current_state(&self, _slots: &Slots) -> Result<ResourceState> {
        let deployed = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ResourceState::Absent),
            // Owned by the job account and unreadable to us
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Ok(ResourceState::Unknown);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Could not read {}", self.path.display()));
            }
        };

        Ok(match &self.pending {
            Some(pending) if pending.content != deployed => ResourceState::Modified {
                from: self.file_name(),
                to: line_changes(&deployed, &pending.content),
            },
            _ => ResourceState::Present {
                details: Some(self.path.display().to_string()),
            },
        })
    }

    fn existing_identifier(&self) -> Result<Option<String>> {
        Ok(self
            .path
            .exists()
            .then(|| self.path.display().to_string()))
    }

    fn upsert(&self, ctx: &mut ApplyContext) -> Result<Outcome> {
        let pending = staged(&self.pending, "configuration")?;
        let user = ctx.input(slots::HOST_USER)?;
        let dir = ctx.input(slots::INSTALL_DIR)?;
        let sudo = ctx.require_sudo()?;

        let live = self.path.to_string_lossy().to_string();
        let current = sudo.run("cat", &[&live])?;
        if current.success && current.stdout == pending.content.as_bytes() {
            return Ok(Outcome::new(ApplyResult::NoChange).with_identifier(live));
        }
        let result = if current.success {
            ApplyResult::Modified
        } else {
            ApplyResult::Created
        };

        let scratch = pending.scratch.join(self.file_name());
        fs::write(&scratch, &pending.content)
            .with_context(|| format!("Could not write {}", scratch.display()))?;
        let scratch = scratch.to_string_lossy();
        let candidate = self.candidate();
        let candidate_str = candidate.to_string_lossy();
        let owner = format!("{user}:");

        sudo.run_checked("install", &["-m", "0600", &scratch, &candidate_str])?;
        sudo.run_checked("chown", &[&owner, &candidate_str])?;

        log::info!("Validating configuration in {dir}");
        if let Err(rejected) = pending.check.validate(sudo, &candidate) {
            if let Err(e) = sudo.run_checked("rm", &["-f", &candidate_str]) {
                log::warn!("Could not remove {candidate_str}: {e:#}");
            }
            return Err(rejected.into());
        }

        sudo.run_checked("mv", &["-f", &candidate_str, &live])?;
        Ok(Outcome::new(result).with_identifier(live))
    }

    fn delete(&self, ctx: &mut ApplyContext) -> Result<ApplyResult> {
        if !self.path.exists() {
            return Ok(ApplyResult::NoChange);
        }
        ctx.require_sudo()?
            .run_checked("rm", &["-f", &self.path.to_string_lossy()])?;
        Ok(ApplyResult::Removed)
    }
}
