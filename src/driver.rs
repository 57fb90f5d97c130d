//! Deployment driver
//!
//! Picks the plan for a target and desired state and runs it end to end.
//! For `Present` the configuration is rendered and checked, the package is
//! staged, and the staging area is removed again before the driver returns,
//! whatever the outcome. `Absent` skips rendering and staging entirely.

use anyhow::anyhow;
use cloudkit::Provider;
use reconcile::{
    DesiredState, DirectRunner, ExecutionPlan, ProgressCallback, ReconcileError, ReconcileReport,
    ResourceDiff, SudoProvider,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{DeployConfig, Target};
use crate::plans::{self, Staged};
use crate::render::{self, ProgramCheck, RenderError};
use crate::stage::{DependencyResolver, PipResolver, StageError, StageInput, StagingArea};
use crate::state::RunRecord;
use crate::sudo::SudoContext;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("{0:#}")]
    Config(anyhow::Error),

    #[error("could not render configuration: {0}")]
    Render(#[source] RenderError),

    #[error("configuration rejected: {0}")]
    Validation(#[source] RenderError),

    #[error("staging failed: {0}")]
    Staging(#[from] StageError),

    #[error("step '{step}' failed: {source:#}")]
    Step {
        step: String,
        report: Box<ReconcileReport>,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Plan(ReconcileError),
}

impl DeployError {
    fn from_render(e: RenderError) -> Self {
        if e.is_validation() {
            Self::Validation(e)
        } else {
            Self::Render(e)
        }
    }

    fn from_reconcile(e: ReconcileError) -> Self {
        match e {
            ReconcileError::StepFailed {
                step,
                report,
                source,
            } => match source.downcast::<RenderError>() {
                Ok(rejected) if rejected.is_validation() => Self::Validation(rejected),
                Ok(other) => Self::Step {
                    step,
                    report,
                    source: other.into(),
                },
                Err(source) => Self::Step {
                    step,
                    report,
                    source,
                },
            },
            other => Self::Plan(other),
        }
    }

    /// Step the run stopped at
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::Step { step, .. } => Some(step),
            Self::Plan(e) => e.step(),
            _ => None,
        }
    }

    /// Steps completed before the failure
    pub fn report(&self) -> Option<&ReconcileReport> {
        match self {
            Self::Step { report, .. } => Some(report),
            _ => None,
        }
    }

    /// Provider error behind a failed step, if that is what stopped the run
    pub fn provider_error(&self) -> Option<&cloudkit::Error> {
        match self {
            Self::Step { source, .. } => source
                .chain()
                .find_map(|cause| cause.downcast_ref::<cloudkit::Error>()),
            _ => None,
        }
    }
}

/// How privileged host steps run their commands
#[derive(Clone, Default)]
pub enum Privileges {
    /// Validate sudo once per run, invalidate it afterwards
    #[default]
    Sudo,
    /// Run commands as the current user (already root)
    Direct,
    /// Caller-supplied runner
    Provided(Arc<dyn SudoProvider>),
}

pub struct Driver {
    config: DeployConfig,
    provider: Option<Arc<dyn Provider>>,
    resolver: Box<dyn DependencyResolver>,
    privileges: Privileges,
    state_dir: Option<PathBuf>,
}

impl Driver {
    pub fn new(config: DeployConfig) -> Self {
        let resolver = PipResolver::new(config.job.resolver.clone());
        let privileges = if config.host.use_sudo {
            Privileges::Sudo
        } else {
            Privileges::Direct
        };
        Self {
            config,
            provider: None,
            resolver: Box::new(resolver),
            privileges,
            state_dir: None,
        }
    }

    /// Provider backing the serverless target
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_resolver(mut self, resolver: Box<dyn DependencyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_privileges(mut self, privileges: Privileges) -> Self {
        self.privileges = privileges;
        self
    }

    /// Record every run in `dir`
    pub fn with_state_dir(mut self, dir: PathBuf) -> Self {
        self.state_dir = Some(dir);
        self
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Converge `target` to `desired`
    pub fn deploy<P: ProgressCallback>(
        &self,
        target: Target,
        desired: DesiredState,
        variables: &BTreeMap<String, String>,
        progress: &mut P,
    ) -> Result<ReconcileReport, DeployError> {
        log::info!("{} {} on {target}", verb(desired), self.config.job.name);

        let result = self.with_plan(target, desired, variables, |plan| {
            reconcile::reconcile(desired, plan, || self.acquire(), progress)
                .map_err(DeployError::from_reconcile)
        });

        self.record(target, desired, &result);
        result
    }

    /// What a run would change, without changing anything
    pub fn preview(
        &self,
        target: Target,
        desired: DesiredState,
        variables: &BTreeMap<String, String>,
    ) -> Result<Vec<ResourceDiff>, DeployError> {
        self.with_plan(target, desired, variables, |plan| {
            reconcile::compute_diffs(desired, plan).map_err(DeployError::Plan)
        })
    }

    /// Build the plan for a run and hand it to `f`
    ///
    /// The staging area a `Present` plan refers to lives exactly as long as
    /// this call.
    fn with_plan<T>(
        &self,
        target: Target,
        desired: DesiredState,
        variables: &BTreeMap<String, String>,
        f: impl FnOnce(&ExecutionPlan) -> Result<T, DeployError>,
    ) -> Result<T, DeployError> {
        if desired == DesiredState::Absent {
            let plan = match target {
                Target::Serverless => plans::serverless_delete(&self.config, self.provider()?),
                Target::Host => plans::host_delete(&self.config),
            };
            return f(&plan);
        }

        let rendered = render::render_file(&self.config.job.template, variables)
            .map_err(DeployError::from_render)?;
        render::check_structure(&rendered).map_err(DeployError::from_render)?;

        let staging = match &self.config.job.staging_dir {
            Some(parent) => StagingArea::new_in(parent)?,
            None => StagingArea::new()?,
        };
        let result = self
            .create_plan(target, &staging, &rendered)
            .and_then(|plan| f(&plan));

        if let Err(e) = staging.close() {
            log::warn!("{e}");
        }
        result
    }

    fn create_plan(
        &self,
        target: Target,
        staging: &StagingArea,
        rendered: &str,
    ) -> Result<ExecutionPlan, DeployError> {
        let job = &self.config.job;
        // The host target commits the configuration in its own step
        let config = match target {
            Target::Serverless => Some((job.config_name.as_str(), rendered)),
            Target::Host => None,
        };
        let input = StageInput {
            source: &job.source,
            requirements: job.requirements.as_deref(),
            config,
        };
        let artifact = staging.stage(&input, self.resolver.as_ref())?;

        Ok(match target {
            Target::Serverless => {
                // The package is the installed copy; nothing is uploaded
                // unless the program accepts the configuration inside it.
                ProgramCheck::new(
                    &job.interpreter,
                    artifact.package_dir.join(&job.entrypoint),
                )
                .validate(&DirectRunner, &artifact.package_dir.join(&job.config_name))
                .map_err(DeployError::from_render)?;
                plans::serverless_create(&self.config, self.provider()?, artifact)
            }
            Target::Host => {
                let scratch = staging.scratch_dir();
                plans::host_create(
                    &self.config,
                    Staged {
                        artifact: &artifact,
                        scratch: &scratch,
                        config: rendered,
                    },
                )
            }
        })
    }

    fn provider(&self) -> Result<Arc<dyn Provider>, DeployError> {
        self.provider.clone().ok_or_else(|| {
            DeployError::Config(anyhow!("no provider configured for the serverless target"))
        })
    }

    fn acquire(&self) -> anyhow::Result<Box<dyn SudoProvider>> {
        let runner: Box<dyn SudoProvider> = match &self.privileges {
            Privileges::Sudo => Box::new(SudoContext::acquire(&format!(
                "install {} on this host",
                self.config.job.name
            ))?),
            Privileges::Direct => Box::new(DirectRunner),
            Privileges::Provided(runner) => Box::new(Arc::clone(runner)),
        };
        Ok(runner)
    }

    fn record(
        &self,
        target: Target,
        desired: DesiredState,
        result: &Result<ReconcileReport, DeployError>,
    ) {
        let Some(dir) = &self.state_dir else {
            return;
        };
        let record = RunRecord::new(&self.config.job.name, target, desired, result);
        if let Err(e) = record.save(dir) {
            log::warn!("Could not record run: {e:#}");
        }
    }
}

fn verb(desired: DesiredState) -> &'static str {
    match desired {
        DesiredState::Present => "Deploying",
        DesiredState::Absent => "Tearing down",
    }
}
