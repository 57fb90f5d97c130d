//! Artifact staging
//!
//! A [`StagingArea`] is a private temporary directory laid out as:
//!
//! ```text
//! feedbot-stage-XXXXXX/
//! ├── package/      program sources, vendored dependencies, rendered config
//! ├── scratch/      candidate files written by host steps before install
//! └── artifact.zip  deterministic archive of package/
//! ```
//!
//! The directory is removed when the area is closed or dropped, whichever
//! comes first, so every exit path of a deployment releases it.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use crate::runner;

const PREFIX: &str = "feedbot-stage-";

#[derive(Debug, Error)]
pub enum StageError {
    #[error("could not create staging area: {0}")]
    Create(#[source] io::Error),

    #[error("source directory {} does not exist", .0.display())]
    MissingSource(PathBuf),

    #[error("could not copy {}: {source}", path.display())]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("dependency resolution failed: {0:#}")]
    Dependencies(#[source] anyhow::Error),

    #[error("could not build archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("staging I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("could not remove staging area: {0}")]
    Cleanup(#[source] io::Error),
}

/// Installs runtime dependencies into a directory
pub trait DependencyResolver {
    fn resolve(&self, manifest: &Path, target: &Path) -> anyhow::Result<()>;
}

/// `pip3 install --target <dir> -r <manifest>`
#[derive(Debug, Clone)]
pub struct PipResolver {
    pub program: String,
}

impl PipResolver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for PipResolver {
    fn default() -> Self {
        Self::new("pip3")
    }
}

impl DependencyResolver for PipResolver {
    fn resolve(&self, manifest: &Path, target: &Path) -> anyhow::Result<()> {
        if !runner::command_exists(&self.program) {
            anyhow::bail!("{} is not installed", self.program);
        }
        let target = target.to_string_lossy();
        let manifest = manifest.to_string_lossy();
        runner::run_capture(
            &self.program,
            &[
                "install",
                "--quiet",
                "--no-compile",
                "--target",
                &target,
                "-r",
                &manifest,
            ],
        )?;
        Ok(())
    }
}

/// What goes into the package
#[derive(Debug, Clone, Copy)]
pub struct StageInput<'a> {
    /// Program sources, copied recursively (hidden entries and caches skipped)
    pub source: &'a Path,
    /// Dependency manifest, if the program has runtime dependencies
    pub requirements: Option<&'a Path>,
    /// Rendered configuration as `(file name, content)`
    pub config: Option<(&'a str, &'a str)>,
}

/// The deployable archive built from a staging area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Archive path inside the staging area
    pub path: PathBuf,
    /// Unpacked package directory the archive was built from
    pub package_dir: PathBuf,
    /// blake3 digest of the archive (hex)
    pub digest: String,
    pub size: u64,
    /// Number of files in the archive
    pub entries: usize,
}

/// Exclusively owned, self-deleting staging directory
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    /// Create a staging area in the system temp directory
    pub fn new() -> Result<Self, StageError> {
        let dir = tempfile::Builder::new()
            .prefix(PREFIX)
            .tempdir()
            .map_err(StageError::Create)?;
        Self::init(dir)
    }

    /// Create a staging area under `parent`
    pub fn new_in(parent: &Path) -> Result<Self, StageError> {
        fs::create_dir_all(parent).map_err(StageError::Create)?;
        let dir = tempfile::Builder::new()
            .prefix(PREFIX)
            .tempdir_in(parent)
            .map_err(StageError::Create)?;
        Self::init(dir)
    }

    fn init(dir: TempDir) -> Result<Self, StageError> {
        fs::create_dir(dir.path().join("package")).map_err(StageError::Create)?;
        fs::create_dir(dir.path().join("scratch")).map_err(StageError::Create)?;
        log::debug!("Staging area {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn package_dir(&self) -> PathBuf {
        self.dir.path().join("package")
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    fn archive_path(&self) -> PathBuf {
        self.dir.path().join("artifact.zip")
    }

    /// Assemble the package and archive it
    pub fn stage(
        &self,
        input: &StageInput<'_>,
        resolver: &dyn DependencyResolver,
    ) -> Result<Artifact, StageError> {
        let package = self.package_dir();

        if let Some(manifest) = input.requirements {
            log::info!("Resolving dependencies from {}", manifest.display());
            resolver
                .resolve(manifest, &package)
                .map_err(StageError::Dependencies)?;
        }

        copy_tree(input.source, &package)?;

        if let Some((name, content)) = input.config {
            fs::write(package.join(name), content)?;
        }

        normalize_permissions(&package)?;

        let archive = self.archive_path();
        let entries = write_archive(&package, &archive)?;
        let size = fs::metadata(&archive)?.len();
        let digest = digest_file(&archive)?;
        log::info!(
            "Staged {entries} files ({size} bytes, digest {})",
            &digest[..12]
        );

        Ok(Artifact {
            path: archive,
            package_dir: package,
            digest,
            size,
            entries,
        })
    }

    /// Remove the staging area, reporting failures
    pub fn close(self) -> Result<(), StageError> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(StageError::Cleanup)?;
        log::debug!("Removed staging area {}", path.display());
        Ok(())
    }
}

fn is_skipped(name: &str) -> bool {
    name.starts_with('.') || name == "__pycache__" || name.ends_with(".pyc")
}

/// Copy the contents of `source` into `target`
fn copy_tree(source: &Path, target: &Path) -> Result<(), StageError> {
    if !source.is_dir() {
        return Err(StageError::MissingSource(source.to_path_buf()));
    }

    let walker = WalkDir::new(source)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_skipped(&e.file_name().to_string_lossy()));

    for entry in walker {
        let entry = entry.map_err(|e| StageError::Copy {
            path: e.path().map(Path::to_path_buf).unwrap_or_default(),
            source: e.into(),
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let destination = target.join(relative);

        let copied = if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)
        } else {
            fs::copy(entry.path(), &destination).map(|_| ())
        };
        copied.map_err(|source| StageError::Copy {
            path: entry.path().to_path_buf(),
            source,
        })?;
    }

    Ok(())
}

/// Make every file world-readable and every directory world-traversable
#[cfg(unix)]
fn normalize_permissions(root: &Path) -> Result<(), StageError> {
    use std::os::unix::fs::PermissionsExt;

    for entry in WalkDir::new(root) {
        let entry = entry.map_err(io::Error::from)?;
        let metadata = entry.metadata().map_err(io::Error::from)?;
        let mode = metadata.permissions().mode();
        let wanted = if metadata.is_dir() {
            mode | 0o755
        } else {
            mode | 0o644
        };
        if wanted != mode {
            fs::set_permissions(entry.path(), fs::Permissions::from_mode(wanted))?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn normalize_permissions(_root: &Path) -> Result<(), StageError> {
    Ok(())
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

/// Zip `package` with sorted, `/`-separated names and fixed timestamps
///
/// Identical package contents always produce a byte-identical archive.
fn write_archive(package: &Path, archive: &Path) -> Result<usize, StageError> {
    let mut zip = zip::ZipWriter::new(File::create(archive)?);
    let base = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let mut entries = 0;
    for entry in WalkDir::new(package).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(package)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let mode = if is_executable(&entry.metadata().map_err(io::Error::from)?) {
            0o755
        } else {
            0o644
        };
        zip.start_file(name, base.unix_permissions(mode))?;
        io::copy(&mut File::open(entry.path())?, &mut zip)?;
        entries += 1;
    }

    zip.finish()?;
    Ok(entries)
}

/// blake3 digest of a file as lowercase hex
pub fn digest_file(path: &Path) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    hasher.update_reader(File::open(path)?)?;
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::Mutex;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn source_tree() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("twitbot.py"), "print('digest')\n");
        write(&dir.path().join("lib/filters.py"), "KEEP = True\n");
        write(&dir.path().join(".git/HEAD"), "ref: main\n");
        write(&dir.path().join("__pycache__/twitbot.cpython-312.pyc"), "x");
        dir
    }

    /// Resolver that drops a fake vendored package into the target
    #[derive(Default)]
    struct FakeResolver {
        calls: Mutex<Vec<PathBuf>>,
    }

    impl DependencyResolver for FakeResolver {
        fn resolve(&self, manifest: &Path, target: &Path) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(manifest.to_path_buf());
            write(&target.join("twitter/__init__.py"), "API = None\n");
            Ok(())
        }
    }

    struct FailingResolver;

    impl DependencyResolver for FailingResolver {
        fn resolve(&self, _manifest: &Path, _target: &Path) -> anyhow::Result<()> {
            anyhow::bail!("no matching distribution found for python-twitter")
        }
    }

    fn archive_names(path: &Path) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn test_stage_builds_self_contained_archive() {
        let source = source_tree();
        let parent = tempfile::tempdir().unwrap();
        let area = StagingArea::new_in(parent.path()).unwrap();
        let resolver = FakeResolver::default();

        let artifact = area
            .stage(
                &StageInput {
                    source: source.path(),
                    requirements: Some(Path::new("requirements.txt")),
                    config: Some(("twitbot.cf", "[api]\n")),
                },
                &resolver,
            )
            .unwrap();

        assert_eq!(
            archive_names(&artifact.path),
            vec![
                "lib/filters.py",
                "twitbot.cf",
                "twitbot.py",
                "twitter/__init__.py"
            ]
        );
        assert_eq!(artifact.entries, 4);
        assert_eq!(artifact.digest.len(), 64);
        assert_eq!(artifact.size, fs::metadata(&artifact.path).unwrap().len());
        assert_eq!(resolver.calls.lock().unwrap().len(), 1);

        let mut archive = zip::ZipArchive::new(File::open(&artifact.path).unwrap()).unwrap();
        let mut config = String::new();
        archive
            .by_name("twitbot.cf")
            .unwrap()
            .read_to_string(&mut config)
            .unwrap();
        assert_eq!(config, "[api]\n");
    }

    #[test]
    fn test_archive_is_deterministic() {
        let source = source_tree();
        let input = StageInput {
            source: source.path(),
            requirements: None,
            config: Some(("twitbot.cf", "[api]\n")),
        };

        let first = StagingArea::new().unwrap();
        let second = StagingArea::new().unwrap();
        let a = first.stage(&input, &PipResolver::default()).unwrap();
        let b = second.stage(&input, &PipResolver::default()).unwrap();

        assert_eq!(a.digest, b.digest);
        assert_ne!(first.path(), second.path());
    }

    #[test]
    fn test_digest_changes_with_config() {
        let source = source_tree();
        let area = StagingArea::new().unwrap();
        let other = StagingArea::new().unwrap();

        let a = area
            .stage(
                &StageInput {
                    source: source.path(),
                    requirements: None,
                    config: Some(("twitbot.cf", "[api]\nmail_from = a\n")),
                },
                &PipResolver::default(),
            )
            .unwrap();
        let b = other
            .stage(
                &StageInput {
                    source: source.path(),
                    requirements: None,
                    config: Some(("twitbot.cf", "[api]\nmail_from = b\n")),
                },
                &PipResolver::default(),
            )
            .unwrap();

        assert_ne!(a.digest, b.digest);
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_are_normalized() {
        use std::os::unix::fs::PermissionsExt;

        let source = source_tree();
        let program = source.path().join("twitbot.py");
        fs::set_permissions(&program, fs::Permissions::from_mode(0o600)).unwrap();

        let area = StagingArea::new().unwrap();
        let artifact = area
            .stage(
                &StageInput {
                    source: source.path(),
                    requirements: None,
                    config: None,
                },
                &PipResolver::default(),
            )
            .unwrap();

        let staged = fs::metadata(artifact.package_dir.join("twitbot.py")).unwrap();
        assert_eq!(staged.permissions().mode() & 0o777, 0o644);
        let lib = fs::metadata(artifact.package_dir.join("lib")).unwrap();
        assert_eq!(lib.permissions().mode() & 0o755, 0o755);
    }

    #[test]
    fn test_failed_resolution_still_cleans_up() {
        let source = source_tree();
        let parent = tempfile::tempdir().unwrap();

        let result = {
            let area = StagingArea::new_in(parent.path()).unwrap();
            area.stage(
                &StageInput {
                    source: source.path(),
                    requirements: Some(Path::new("requirements.txt")),
                    config: None,
                },
                &FailingResolver,
            )
        };

        let err = result.unwrap_err();
        assert!(matches!(err, StageError::Dependencies(_)));
        assert!(err.to_string().contains("python-twitter"));
        assert_eq!(fs::read_dir(parent.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_installer_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipResolver::new("feedbot-no-such-installer")
            .resolve(&dir.path().join("requirements.txt"), dir.path())
            .unwrap_err();
        assert!(err.to_string().contains("is not installed"));
    }

    #[test]
    fn test_missing_source_is_reported() {
        let area = StagingArea::new().unwrap();
        let err = area
            .stage(
                &StageInput {
                    source: Path::new("/nonexistent/bot"),
                    requirements: None,
                    config: None,
                },
                &PipResolver::default(),
            )
            .unwrap_err();
        assert!(matches!(err, StageError::MissingSource(_)));
    }

    #[test]
    fn test_close_removes_directory() {
        let area = StagingArea::new().unwrap();
        let path = area.path().to_path_buf();
        assert!(path.join("package").is_dir());
        assert!(path.join("scratch").is_dir());

        area.close().unwrap();
        assert!(!path.exists());
    }
}
