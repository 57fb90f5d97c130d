//! Change preview (`feedbot-deploy plan`)

use anyhow::Result;
use colored::Colorize;
use reconcile::{Change, DesiredState, DiffSummary, ResourceDiff, ResourceState, group_by_type};

use crate::Context;
use crate::cli::PlanArgs;
use crate::ui;

pub fn run(ctx: &Context, args: PlanArgs) -> Result<()> {
    let config = super::load_config(ctx)?;
    let target = super::target(ctx, &config);
    let desired = if args.destroy {
        DesiredState::Absent
    } else {
        DesiredState::Present
    };
    let variables = config.resolve_variables(&args.vars.vars)?;
    let name = config.job.name.clone();

    let driver = super::driver(config, target)?;
    let diffs = driver.preview(target, desired, &variables)?;

    ui::header(&format!("{name} on {target}"));
    display_diff(&diffs);
    Ok(())
}

fn type_name(resource_type: &str) -> &str {
    match resource_type {
        "iam_role" => "Execution role",
        "iam_role_policy" => "Role grants",
        "artifact_object" => "Artifact",
        "function" | "function_reset" => "Function",
        "schedule_rule" => "Schedule",
        "invoke_permission" => "Invoke permission",
        "host_account" => "Account",
        "install_dir" => "Install directory",
        "config_file" => "Configuration",
        "cron_entry" => "Cron",
        _ => resource_type,
    }
}

fn symbol(change: Change) -> colored::ColoredString {
    match change {
        Change::Create => "+".green(),
        Change::Update => "~".yellow(),
        Change::Delete => "-".red(),
        Change::Unknown => "?".dimmed(),
    }
}

fn state_desc(diff: &ResourceDiff) -> String {
    match (&diff.current, diff.change) {
        (_, Change::Unknown) => "(known after earlier steps)".to_string(),
        (ResourceState::Absent, _) => "(not deployed)".to_string(),
        (ResourceState::Modified { from, to }, _) => format!("{from} → {to}"),
        (_, Change::Delete) => "(will remove)".to_string(),
        (ResourceState::Present { details }, _) => details.clone().unwrap_or_default(),
        _ => String::new(),
    }
}

/// Print diffs grouped by resource type
pub fn display_diff(diffs: &[ResourceDiff]) {
    if diffs.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Deployment Diff".bold()
    );
    println!("│");

    for (resource_type, type_diffs) in group_by_type(diffs) {
        println!("│ {}", type_name(&resource_type).bold());
        for diff in type_diffs {
            let sudo_indicator = if diff.requires_sudo {
                " [sudo]".red().to_string()
            } else {
                String::new()
            };
            println!(
                "│   {} {:<16} {}{}",
                symbol(diff.change),
                diff.resource_id,
                ui::truncate(&state_desc(diff), 48).dimmed(),
                sudo_indicator
            );
        }
        println!("│");
    }

    let summary = DiffSummary::from_diffs(diffs);
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} to add, {} to change, {} to remove{}",
        summary.additions.to_string().green(),
        summary.modifications.to_string().yellow(),
        summary.removals.to_string().red(),
        if summary.unknown > 0 {
            format!(", {} pending", summary.unknown)
        } else {
            String::new()
        }
    );
    if summary.sudo_required > 0 {
        println!(
            "│ {} {} steps run through sudo",
            "⚠".yellow(),
            summary.sudo_required
        );
    }
    println!("└─────────────────────────────────────────────────────┘");
}
