//! `apply` and `destroy`

use anyhow::Result;
use colored::Colorize;
use dialoguer::Confirm;
use reconcile::{DesiredState, DiffSummary, ReconcileReport};
use std::collections::BTreeMap;

use crate::Context;
use crate::cli::{ApplyArgs, DestroyArgs};
use crate::config::Target;
use crate::driver::Driver;
use crate::progress::StepSpinner;
use crate::ui;

use super::plan::display_diff;

pub fn apply(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let config = super::load_config(ctx)?;
    let target = super::target(ctx, &config);
    let variables = config.resolve_variables(&args.vars.vars)?;
    let driver = super::driver(config, target)?;
    run(ctx, &driver, target, DesiredState::Present, &variables, args.yes)
}

pub fn destroy(ctx: &Context, args: DestroyArgs) -> Result<()> {
    let config = super::load_config(ctx)?;
    let target = super::target(ctx, &config);
    let driver = super::driver(config, target)?;
    run(
        ctx,
        &driver,
        target,
        DesiredState::Absent,
        &BTreeMap::new(),
        args.yes,
    )
}

fn run(
    ctx: &Context,
    driver: &Driver,
    target: Target,
    desired: DesiredState,
    variables: &BTreeMap<String, String>,
    yes: bool,
) -> Result<()> {
    let name = &driver.config().job.name;
    let title = match desired {
        DesiredState::Present => format!("Deploying {name} to {target}"),
        DesiredState::Absent => format!("Removing {name} from {target}"),
    };
    if !ctx.quiet {
        ui::header(&title);
    }

    // --yes skips the preview, which stages the package as well
    if !yes {
        let diffs = driver.preview(target, desired, variables)?;
        display_diff(&diffs);
        if !DiffSummary::from_diffs(&diffs).has_changes() {
            return Ok(());
        }
        if !confirm_proceed()? {
            println!();
            println!("  {} Aborted", "✗".red());
            return Ok(());
        }
    }

    let mut spinner = StepSpinner::new(ctx.quiet);
    match driver.deploy(target, desired, variables, &mut spinner) {
        Ok(report) => {
            if !ctx.quiet {
                print_summary(&report);
            }
            Ok(())
        }
        Err(e) => {
            if let Some(report) = e.report() {
                print_partial(report);
            }
            if let Some(step) = e.step() {
                ui::dim(&format!(
                    "Stopped at '{step}'. Fix the cause and re-run; completed steps are kept."
                ));
            }
            if let Some(cause) = e.provider_error() {
                let category = cause.category();
                ui::dim(&format!("{}: {}", category.description(), category.advice()));
            }
            Err(e.into())
        }
    }
}

/// Confirm with user
fn confirm_proceed() -> Result<bool> {
    let confirmed = Confirm::new()
        .with_prompt("Continue?")
        .default(true)
        .interact()?;

    Ok(confirmed)
}

fn print_partial(report: &ReconcileReport) {
    if report.steps.is_empty() {
        return;
    }
    ui::warn(&format!(
        "{} of the steps completed before the failure:",
        report.steps.len()
    ));
    for step in &report.steps {
        ui::dim(&format!("{} {}", step.step, step.result));
    }
}

/// Print final summary
fn print_summary(report: &ReconcileReport) {
    let summary = &report.summary;
    println!();
    match report.desired {
        DesiredState::Present => println!("  {} Deployed successfully!", "✓".green().bold()),
        DesiredState::Absent => println!("  {} Removed successfully!", "✓".green().bold()),
    }

    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.modified > 0 {
        println!("    • {} resources updated", summary.modified);
    }
    if summary.removed > 0 {
        println!("    • {} resources removed", summary.removed);
    }
    if summary.skipped > 0 {
        println!("    • {} resources skipped", summary.skipped);
    }
    if summary.total_changes() == 0 {
        println!("    • nothing to change");
    }

    if !report.outputs.is_empty() {
        println!();
        for (slot, identifier) in report.outputs.iter() {
            ui::kv(slot, identifier);
        }
    }
}
