pub mod config;
pub mod deploy;
pub mod plan;
pub mod status;

use anyhow::{Context as _, Result};
use cloudkit::AwsCli;
use std::sync::Arc;

use crate::Context;
use crate::config::{DeployConfig, Target};
use crate::driver::Driver;
use crate::paths;

/// Load the deployment file named on the command line, or the default one
pub fn load_config(ctx: &Context) -> Result<DeployConfig> {
    let path = match &ctx.config_path {
        Some(path) => path.clone(),
        None => paths::default_config_file()?,
    };
    DeployConfig::load(&path)
}

/// Target picked on the command line, else the one in the file
pub fn target(ctx: &Context, config: &DeployConfig) -> Target {
    ctx.target.unwrap_or(config.job.target)
}

/// Driver wired to the real provider and the state directory
///
/// The `aws` CLI is only looked up for the serverless target.
pub fn driver(config: DeployConfig, target: Target) -> Result<Driver> {
    let mut driver = Driver::new(config);

    if target == Target::Serverless {
        let config = driver.config();
        let provider = AwsCli::new(
            config.serverless.region.clone(),
            config.serverless.profile.clone(),
        )
        .context("The serverless target needs the aws CLI")?
        .with_retry(config.retry.to_retry_config());
        driver = driver.with_provider(Arc::new(provider));
    }

    Ok(match paths::state_dir() {
        Ok(dir) => driver.with_state_dir(dir),
        Err(e) => {
            log::warn!("Runs will not be recorded: {e:#}");
            driver
        }
    })
}
