//! Configuration rendering and validation
//!
//! Templates use `{{ name }}` placeholders, optionally with a fallback:
//! `{{ name | default("value") }}`. Rendering is pure; validation either
//! checks the INI structure the bot expects or asks the program itself
//! (`--validate`) about a candidate file.

use reconcile::SudoProvider;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const PLACEHOLDER: &str =
    r#"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\|\s*default\(\s*"([^"]*)"\s*\)\s*)?\}\}"#;

/// Keys the `api` section must define
const API_KEYS: &[&str] = &[
    "access_token_key",
    "access_token_secret",
    "consumer_key",
    "consumer_secret",
    "mail_from",
];

/// Keys every topic section must define
const TOPIC_KEYS: &[&str] = &["mailto", "subject", "users"];

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("could not read template {}: {source}", path.display())]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template references undefined variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    #[error("invalid placeholder pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("configuration is invalid:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),

    #[error("{program} rejected the configuration: {output}")]
    Rejected { program: String, output: String },

    #[error("could not run {program}: {source}")]
    ValidatorUnavailable {
        program: String,
        #[source]
        source: anyhow::Error,
    },
}

impl RenderError {
    /// Whether the configuration itself was found wanting
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Invalid(_) | Self::Rejected { .. })
    }
}

/// Read a template file and render it
pub fn render_file(
    path: &Path,
    variables: &BTreeMap<String, String>,
) -> Result<String, RenderError> {
    let template = fs::read_to_string(path).map_err(|source| RenderError::Template {
        path: path.to_path_buf(),
        source,
    })?;
    render(&template, variables)
}

/// Replace every placeholder in `template`
///
/// Fails listing every variable that has neither a value nor a default.
pub fn render(template: &str, variables: &BTreeMap<String, String>) -> Result<String, RenderError> {
    let pattern = Regex::new(PLACEHOLDER)?;
    let mut missing = BTreeSet::new();

    let rendered = pattern.replace_all(template, |caps: &Captures| {
        let name = &caps[1];
        match (variables.get(name), caps.get(2)) {
            (Some(value), _) => value.clone(),
            (None, Some(fallback)) => fallback.as_str().to_string(),
            (None, None) => {
                missing.insert(name.to_string());
                String::new()
            }
        }
    });

    if !missing.is_empty() {
        return Err(RenderError::MissingVariables(missing.into_iter().collect()));
    }
    Ok(rendered.into_owned())
}

/// A parsed INI document: section name -> key -> value
pub type Sections = BTreeMap<String, BTreeMap<String, String>>;

/// Parse `[section]` / `key = value` documents
///
/// `;` and `#` start comment lines. Keys outside any section are reported
/// as findings rather than dropped silently.
pub fn parse_ini(content: &str) -> (Sections, Vec<String>) {
    let mut sections = Sections::new();
    let mut findings = Vec::new();
    let mut current: Option<String> = None;

    for (number, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }

        let Some((key, value)) = line.split_once('=').or_else(|| line.split_once(':')) else {
            findings.push(format!("line {}: expected 'key = value'", number + 1));
            continue;
        };

        match &current {
            Some(section) => {
                sections
                    .entry(section.clone())
                    .or_default()
                    .insert(key.trim().to_lowercase(), value.trim().to_string());
            }
            None => findings.push(format!(
                "line {}: '{}' appears before any section",
                number + 1,
                key.trim()
            )),
        }
    }

    (sections, findings)
}

/// Check the structure the bot expects, reporting every finding
pub fn check_structure(content: &str) -> Result<(), RenderError> {
    let (sections, mut findings) = parse_ini(content);

    match sections.get("api") {
        Some(api) => {
            for key in API_KEYS {
                if !api.contains_key(*key) {
                    findings.push(format!("api section is missing '{key}'"));
                }
            }
        }
        None => findings.push("api section missing from configuration".to_string()),
    }

    let topics: Vec<_> = sections.iter().filter(|(name, _)| *name != "api").collect();
    if topics.is_empty() {
        findings.push("no topic sections defined".to_string());
    }
    for (topic, options) in topics {
        for key in TOPIC_KEYS {
            if !options.contains_key(*key) {
                findings.push(format!("topic '{topic}' is missing '{key}'"));
            }
        }
        if let Some(users) = options.get("users")
            && users.split(',').all(|u| u.trim().is_empty())
        {
            findings.push(format!("topic '{topic}' has an empty user list"));
        }
    }

    if findings.is_empty() {
        Ok(())
    } else {
        Err(RenderError::Invalid(findings))
    }
}

/// The program's own `--validate` mode
#[derive(Debug, Clone)]
pub struct ProgramCheck {
    pub interpreter: String,
    pub program: PathBuf,
}

impl ProgramCheck {
    pub fn new(interpreter: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            program: program.into(),
        }
    }

    /// Run `<interpreter> <program> --config <config> --validate`
    pub fn validate(&self, runner: &dyn SudoProvider, config: &Path) -> Result<(), RenderError> {
        let program = self.program.to_string_lossy().to_string();
        let config = config.to_string_lossy();
        log::debug!("Validating {config} with {program}");

        let output = runner
            .run(
                &self.interpreter,
                &[&program, "--config", &config, "--validate"],
            )
            .map_err(|source| RenderError::ValidatorUnavailable {
                program: program.clone(),
                source,
            })?;

        if output.success {
            return Ok(());
        }

        let mut text = output.stdout_str();
        text.push_str(&output.stderr_str());
        Err(RenderError::Rejected {
            program,
            output: text.trim().to_string(),
        })
    }
}
