//! `render` and `check`

use anyhow::{Context as _, Result};
use reconcile::DirectRunner;
use std::fs;
use std::io::Write;

use crate::Context;
use crate::cli::{CheckArgs, RenderArgs};
use crate::config::DeployConfig;
use crate::render::{self, ProgramCheck};
use crate::ui;

fn rendered(ctx: &Context, vars: &[(String, String)]) -> Result<(DeployConfig, String)> {
    let config = super::load_config(ctx)?;
    let variables = config.resolve_variables(vars)?;
    let content = render::render_file(&config.job.template, &variables)?;
    Ok((config, content))
}

pub fn render(ctx: &Context, args: RenderArgs) -> Result<()> {
    let (_, content) = rendered(ctx, &args.vars.vars)?;

    match args.output {
        Some(path) => {
            fs::write(&path, &content)
                .with_context(|| format!("Could not write {}", path.display()))?;
            if !ctx.quiet {
                ui::success(&format!(
                    "Wrote {} ({})",
                    path.display(),
                    ui::format_size(content.len() as u64)
                ));
            }
        }
        None => print!("{content}"),
    }
    Ok(())
}

pub fn check(ctx: &Context, args: CheckArgs) -> Result<()> {
    let (config, content) = rendered(ctx, &args.vars.vars)?;
    render::check_structure(&content)?;
    ui::success("Configuration structure is valid");

    if args.validate {
        let program = config.job.source.join(&config.job.entrypoint);
        let mut candidate = tempfile::Builder::new()
            .prefix("feedbot-check-")
            .tempfile()
            .context("Could not create a temporary configuration file")?;
        candidate
            .write_all(content.as_bytes())
            .context("Could not write the temporary configuration file")?;

        ProgramCheck::new(&config.job.interpreter, &program)
            .validate(&DirectRunner, candidate.path())?;
        ui::success(&format!("{} accepts the configuration", program.display()));
    } else {
        ui::info("Pass --validate to run the program's own check as well");
    }
    Ok(())
}
