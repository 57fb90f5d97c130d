//! Directory the staged package is installed to on the host
//!
//! A `.revision` stamp inside the directory holds the digest of the
//! installed artifact, so an unchanged package is not copied again.
//! A new revision is assembled in a `.next` sibling and swapped in whole,
//! so files dropped from the package do not linger; only the kept files
//! (the committed configuration) carry over.

use anyhow::{Context, Result, bail};
use reconcile::{ApplyContext, ApplyResult, Outcome, Resource, ResourceState, Slots, SudoRequirement};
use std::fs;
use std::path::{Path, PathBuf};

use super::{short, slots, staged};
use crate::stage::Artifact;

const STAMP: &str = ".revision";

#[derive(Debug)]
struct Package {
    dir: PathBuf,
    digest: String,
    scratch: PathBuf,
}

#[derive(Debug)]
pub struct InstallDir {
    dir: PathBuf,
    package: Option<Package>,
    keep: Vec<String>,
}

impl InstallDir {
    /// Step addressing `dir`; enough for teardown
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            package: None,
            keep: Vec::new(),
        }
    }

    /// Carry `name` over from the previous revision when present
    pub fn keeping(mut self, name: &str) -> Self {
        self.keep.push(name.to_string());
        self
    }

    /// Install `artifact`'s package, using `scratch` for intermediate files
    pub fn with_package(mut self, artifact: &Artifact, scratch: &Path) -> Self {
        self.package = Some(Package {
            dir: artifact.package_dir.clone(),
            digest: artifact.digest.clone(),
            scratch: scratch.to_path_buf(),
        });
        self
    }

    fn installed_revision(&self) -> Option<String> {
        fs::read_to_string(self.dir.join(STAMP))
            .ok()
            .map(|s| s.trim().to_string())
    }

    fn display(&self) -> String {
        self.dir.display().to_string()
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.dir.clone().into_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }
}

impl Resource for InstallDir {
    fn id(&self) -> String {
        "install-dir".to_string()
    }

    fn description(&self) -> String {
        format!("Install directory {}", self.dir.display())
    }

    fn resource_type(&self) -> &'static str {
        "install_dir"
    }

    fn sudo_requirement(&self) -> SudoRequirement {
        SudoRequirement::Required {
            reason: format!("write to {}", self.dir.display()),
        }
    }

    fn requires(&self) -> Vec<&'static str> {
        vec![slots::HOST_USER]
    }

    fn provides(&self) -> Option<&'static str> {
        Some(slots::INSTALL_DIR)
    }

    fn current_state(&self, _slots: &Slots) -> Result<ResourceState> {
        if !self.dir.is_dir() {
            return Ok(ResourceState::Absent);
        }
        let installed = self.installed_revision().unwrap_or_default();

        Ok(match &self.package {
            Some(package) if package.digest != installed => ResourceState::Modified {
                from: short(&installed).to_string(),
                to: short(&package.digest).to_string(),
            },
            _ => ResourceState::Present {
                details: Some(self.display()),
            },
        })
    }

    fn existing_identifier(&self) -> Result<Option<String>> {
        Ok(self.dir.is_dir().then(|| self.display()))
    }

    fn upsert(&self, ctx: &mut ApplyContext) -> Result<Outcome> {
        let package = staged(&self.package, "package")?;
        let user = ctx.input(slots::HOST_USER)?;

        if self.installed_revision().as_deref() == Some(package.digest.as_str()) {
            return Ok(Outcome::new(ApplyResult::NoChange).with_identifier(self.display()));
        }
        let result = if self.dir.is_dir() {
            ApplyResult::Modified
        } else {
            ApplyResult::Created
        };

        let sudo = ctx.require_sudo()?;
        let dir = self.display();
        let next = self.sibling(".next");
        let old = self.sibling(".old");
        let (next, old) = (next.to_string_lossy(), old.to_string_lossy());
        let source = format!("{}/.", package.dir.display());
        let stamp = package.scratch.join(STAMP);
        fs::write(&stamp, &package.digest)
            .with_context(|| format!("Could not write {}", stamp.display()))?;
        let stamp = stamp.to_string_lossy();
        let target = format!("{next}/{STAMP}");
        let owner = format!("{user}:");

        // Leftovers of an interrupted run
        sudo.run_checked("rm", &["-rf", &next, &old])?;
        sudo.run_checked("install", &["-d", "-m", "0755", &next])?;
        sudo.run_checked("cp", &["-R", &source, &next])
            .with_context(|| format!("Could not copy package into {next}"))?;
        sudo.run_checked("install", &["-m", "0644", &stamp, &target])?;
        for name in &self.keep {
            let kept = self.dir.join(name);
            if kept.exists() {
                let kept = kept.to_string_lossy();
                sudo.run_checked("cp", &["-p", &kept, &format!("{next}/{name}")])?;
            }
        }
        sudo.run_checked("chown", &["-R", &owner, &next])?;

        let replacing = self.dir.exists();
        if replacing {
            sudo.run_checked("mv", &[&dir, &old])?;
        }
        sudo.run_checked("mv", &[&next, &dir])
            .with_context(|| format!("Could not move new revision into {dir}"))?;
        if replacing {
            sudo.run_checked("rm", &["-rf", &old])?;
        }

        log::info!("Installed revision {} to {dir}", short(&package.digest));
        Ok(Outcome::new(result).with_identifier(dir))
    }

    fn delete(&self, ctx: &mut ApplyContext) -> Result<ApplyResult> {
        if !self.dir.exists() {
            return Ok(ApplyResult::NoChange);
        }
        if !self.dir.is_absolute() || self.dir.components().count() < 3 {
            bail!("Refusing to remove {}: not a job directory", self.dir.display());
        }

        ctx.require_sudo()?
            .run_checked("rm", &["-rf", &self.display()])?;
        Ok(ApplyResult::Removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::testing::FakeHost;

    struct Fixture {
        _root: tempfile::TempDir,
        host: FakeHost,
        package: PathBuf,
        scratch: PathBuf,
        dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let host = FakeHost::new(&root.path().join("passwd"));
        let package = root.path().join("package");
        let scratch = root.path().join("scratch");
        fs::create_dir_all(package.join("lib")).unwrap();
        fs::create_dir_all(&scratch).unwrap();
        fs::write(package.join("twitbot.py"), "print('hi')\n").unwrap();
        fs::write(package.join("lib/dep.py"), "").unwrap();
        let dir = root.path().join("opt/job1");
        Fixture {
            _root: root,
            host,
            package,
            scratch,
            dir,
        }
    }

    fn artifact(f: &Fixture, digest: &str) -> Artifact {
        Artifact {
            path: f.scratch.join("artifact.zip"),
            package_dir: f.package.clone(),
            digest: digest.to_string(),
            size: 0,
            entries: 2,
        }
    }

    fn with_user() -> Slots {
        let mut inputs = Slots::new();
        inputs.insert(slots::HOST_USER, "job1");
        inputs
    }

    #[test]
    fn test_install_copies_package_and_stamps_revision() {
        let f = fixture();
        let inputs = with_user();
        let step = InstallDir::new(&f.dir).with_package(&artifact(&f, "d1"), &f.scratch);

        assert!(step.current_state(&inputs).unwrap().is_absent());
        let outcome = step
            .upsert(&mut ApplyContext::with_sudo(&inputs, &f.host))
            .unwrap();

        assert_eq!(outcome.result, ApplyResult::Created);
        assert_eq!(outcome.identifier, Some(f.dir.display().to_string()));
        assert!(f.dir.join("twitbot.py").exists());
        assert!(f.dir.join("lib/dep.py").exists());
        assert_eq!(fs::read_to_string(f.dir.join(STAMP)).unwrap(), "d1");
        assert_eq!(
            f.host.programs(),
            vec!["rm", "install", "cp", "install", "chown", "mv"]
        );
        assert!(!step.sibling(".next").exists());
    }

    #[test]
    fn test_same_revision_is_not_copied_again() {
        let f = fixture();
        let inputs = with_user();
        let step = InstallDir::new(&f.dir).with_package(&artifact(&f, "d1"), &f.scratch);
        step.upsert(&mut ApplyContext::with_sudo(&inputs, &f.host))
            .unwrap();
        f.host.clear();

        assert!(step.current_state(&inputs).unwrap().is_present());
        let outcome = step
            .upsert(&mut ApplyContext::with_sudo(&inputs, &f.host))
            .unwrap();
        assert_eq!(outcome.result, ApplyResult::NoChange);
        assert!(f.host.commands().is_empty());
    }

    #[test]
    fn test_new_revision_replaces_the_tree() {
        let f = fixture();
        let inputs = with_user();
        InstallDir::new(&f.dir)
            .with_package(&artifact(&f, "d1"), &f.scratch)
            .upsert(&mut ApplyContext::with_sudo(&inputs, &f.host))
            .unwrap();
        fs::write(f.dir.join("twitbot.cf"), "kept").unwrap();

        let step = InstallDir::new(&f.dir)
            .keeping("twitbot.cf")
            .with_package(&artifact(&f, "d2"), &f.scratch);
        assert!(matches!(
            step.current_state(&inputs).unwrap(),
            ResourceState::Modified { .. }
        ));
        let outcome = step
            .upsert(&mut ApplyContext::with_sudo(&inputs, &f.host))
            .unwrap();

        assert_eq!(outcome.result, ApplyResult::Modified);
        assert_eq!(fs::read_to_string(f.dir.join(STAMP)).unwrap(), "d2");
        assert_eq!(fs::read_to_string(f.dir.join("twitbot.cf")).unwrap(), "kept");
        assert!(!step.sibling(".old").exists());
    }

    #[test]
    fn test_files_dropped_from_package_are_removed() {
        let f = fixture();
        let inputs = with_user();
        InstallDir::new(&f.dir)
            .with_package(&artifact(&f, "d1"), &f.scratch)
            .upsert(&mut ApplyContext::with_sudo(&inputs, &f.host))
            .unwrap();
        fs::write(f.dir.join("scratch.log"), "left by a run").unwrap();

        fs::remove_file(f.package.join("lib/dep.py")).unwrap();
        InstallDir::new(&f.dir)
            .with_package(&artifact(&f, "d2"), &f.scratch)
            .upsert(&mut ApplyContext::with_sudo(&inputs, &f.host))
            .unwrap();

        assert!(f.dir.join("twitbot.py").exists());
        assert!(!f.dir.join("lib/dep.py").exists());
        assert!(!f.dir.join("scratch.log").exists());
    }

    #[test]
    fn test_interrupted_swap_is_cleaned_up() {
        let f = fixture();
        let inputs = with_user();
        let step = InstallDir::new(&f.dir).with_package(&artifact(&f, "d1"), &f.scratch);
        fs::create_dir_all(step.sibling(".next").join("stale")).unwrap();

        step.upsert(&mut ApplyContext::with_sudo(&inputs, &f.host))
            .unwrap();

        assert!(f.dir.join("twitbot.py").exists());
        assert!(!f.dir.join("stale").exists());
        assert!(!step.sibling(".next").exists());
    }

    #[test]
    fn test_delete_removes_tree() {
        let f = fixture();
        let inputs = with_user();
        InstallDir::new(&f.dir)
            .with_package(&artifact(&f, "d1"), &f.scratch)
            .upsert(&mut ApplyContext::with_sudo(&inputs, &f.host))
            .unwrap();

        let step = InstallDir::new(&f.dir);
        let empty = Slots::new();
        assert_eq!(
            step.delete(&mut ApplyContext::with_sudo(&empty, &f.host))
                .unwrap(),
            ApplyResult::Removed
        );
        assert!(!f.dir.exists());
        assert_eq!(
            step.delete(&mut ApplyContext::with_sudo(&empty, &f.host))
                .unwrap(),
            ApplyResult::NoChange
        );
    }

    #[test]
    fn test_delete_refuses_shallow_paths() {
        let f = fixture();
        let empty = Slots::new();
        let err = InstallDir::new(Path::new("/tmp"))
            .delete(&mut ApplyContext::with_sudo(&empty, &f.host))
            .unwrap_err();
        assert!(err.to_string().contains("Refusing"));
        assert!(f.host.commands().is_empty());
    }
}
