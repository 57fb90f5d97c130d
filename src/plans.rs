//! Create and delete plans for each target
//!
//! A plan is picked once per run; the executor runs it forwards to create
//! and backwards to tear down. Delete plans hold the same steps as the
//! create plans minus the staged inputs, so the reverse order is the
//! mirror image of what a deployment builds.

use cloudkit::{CodeLocation, Provider};
use reconcile::ExecutionPlan;
use std::path::Path;
use std::sync::Arc;

use crate::config::DeployConfig;
use crate::render::ProgramCheck;
use crate::resource::{
    ArtifactUpload, ClearFunction, ConfigFile, CronEntry, CronJob, ExecutionRole, Function,
    FunctionSettings, HostAccount, InstallDir, InvokePermission, ProviderHandle, RolePolicy,
    ScheduleRule,
};
use crate::stage::Artifact;

/// Inputs that only exist while a staging area is open
#[derive(Debug, Clone, Copy)]
pub struct Staged<'a> {
    pub artifact: &'a Artifact,
    pub scratch: &'a Path,
    pub config: &'a str,
}

fn policy_name(config: &DeployConfig) -> String {
    format!("{}-logs", config.job.name)
}

fn function_settings(config: &DeployConfig) -> FunctionSettings {
    let s = &config.serverless;
    FunctionSettings {
        name: config.job.name.clone(),
        runtime: s.runtime.clone(),
        handler: s.handler.clone(),
        memory_mb: s.memory_mb,
        timeout_secs: s.timeout_secs,
        environment: s.environment.clone(),
        code: CodeLocation {
            bucket: config.bucket(),
            key: config.artifact_key(),
        },
    }
}

/// Role, grant, artifact, function, trigger and invoke grant
pub fn serverless_create(
    config: &DeployConfig,
    provider: Arc<dyn Provider>,
    artifact: Artifact,
) -> ExecutionPlan {
    let provider = ProviderHandle::new(provider);
    let name = &config.job.name;
    let mut plan = ExecutionPlan::new();

    plan.add(ExecutionRole::new(
        provider.clone(),
        name,
        config.trust_policy(),
    ));
    plan.add(RolePolicy::new(
        provider.clone(),
        name,
        &policy_name(config),
        config.log_policy(),
    ));
    plan.add(ArtifactUpload::new(
        provider.clone(),
        &config.bucket(),
        &config.artifact_key(),
        artifact,
    ));

    let mut function_after = vec!["role-policy"];
    if config.serverless.clear_stale_function {
        plan.add(ClearFunction::new(provider.clone(), name));
        function_after.push("clear-function");
    }
    plan.add_after(
        Function::new(provider.clone(), function_settings(config)),
        &function_after,
    );

    plan.add(ScheduleRule::new(
        provider.clone(),
        name,
        &config.serverless.schedule,
    ));
    plan.add(InvokePermission::new(provider, name));
    plan
}

/// The serverless graph as torn down: nothing staged, artifact kept
/// unless `purge_artifact` is set
pub fn serverless_delete(config: &DeployConfig, provider: Arc<dyn Provider>) -> ExecutionPlan {
    let provider = ProviderHandle::new(provider);
    let name = &config.job.name;
    let mut plan = ExecutionPlan::new();

    plan.add(ExecutionRole::new(
        provider.clone(),
        name,
        config.trust_policy(),
    ));
    plan.add(RolePolicy::new(
        provider.clone(),
        name,
        &policy_name(config),
        config.log_policy(),
    ));
    plan.add(ArtifactUpload::retained(
        provider.clone(),
        &config.bucket(),
        &config.artifact_key(),
        config.serverless.purge_artifact,
    ));
    plan.add_after(
        Function::new(provider.clone(), function_settings(config)),
        &["role-policy"],
    );
    plan.add(ScheduleRule::new(
        provider.clone(),
        name,
        &config.serverless.schedule,
    ));
    plan.add(InvokePermission::new(provider, name));
    plan
}

fn cron_job(config: &DeployConfig) -> CronJob {
    CronJob {
        schedule: config.host.schedule.clone(),
        interpreter: config.job.interpreter.clone(),
        entrypoint: config.job.entrypoint.clone(),
    }
}

/// Account, install directory, validated configuration and cron entry
pub fn host_create(config: &DeployConfig, staged: Staged<'_>) -> ExecutionPlan {
    let dir = config.install_dir();
    let mut plan = ExecutionPlan::new();

    plan.add(HostAccount::new(
        config.host_user(),
        &dir,
        &config.host.passwd_file,
    ));
    plan.add(
        InstallDir::new(&dir)
            .keeping(&config.job.config_name)
            .with_package(staged.artifact, staged.scratch),
    );
    plan.add(
        ConfigFile::new(&dir.join(&config.job.config_name)).with_content(
            staged.config,
            ProgramCheck::new(&config.job.interpreter, dir.join(&config.job.entrypoint)),
            staged.scratch,
        ),
    );
    plan.add(
        CronEntry::new(&config.host.cron_dir.join(&config.job.name), cron_job(config))
            .staged_in(staged.scratch),
    );
    plan
}

pub fn host_delete(config: &DeployConfig) -> ExecutionPlan {
    let dir = config.install_dir();
    let mut plan = ExecutionPlan::new();

    plan.add(HostAccount::new(
        config.host_user(),
        &dir,
        &config.host.passwd_file,
    ));
    plan.add(InstallDir::new(&dir));
    plan.add(ConfigFile::new(&dir.join(&config.job.config_name)));
    plan.add(CronEntry::new(
        &config.host.cron_dir.join(&config.job.name),
        cron_job(config),
    ));
    plan
}
