use anyhow::Result;
use colored::Colorize;
use reconcile::DesiredState;

use crate::Context;
use crate::paths;
use crate::state::RunRecord;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let config = super::load_config(ctx)?;
    let target = super::target(ctx, &config);
    let name = &config.job.name;

    ui::header(&format!("{name} on {target}"));

    let Some(record) = RunRecord::load(&paths::state_dir()?, name, target)? else {
        ui::kv("Last run", &"never".dimmed().to_string());
        ui::dim("Run: feedbot-deploy apply");
        println!();
        return Ok(());
    };

    let action = match record.desired {
        DesiredState::Present => "apply",
        DesiredState::Absent => "destroy",
    };
    let outcome = if record.succeeded {
        "succeeded".green()
    } else {
        "failed".red()
    };
    ui::kv(
        "Last run",
        &format!(
            "{action} {outcome} at {}",
            record.finished_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
    );
    if let Some(step) = &record.failed_step {
        ui::kv("Stopped at", step);
    }
    if let Some(error) = &record.error {
        ui::kv("Error", error);
    }

    if !record.steps.is_empty() {
        ui::section("Steps");
        for step in &record.steps {
            println!(
                "  {:<14} {:<22} {}",
                step.step,
                step.result,
                ui::truncate(step.identifier.as_deref().unwrap_or(""), 48).dimmed()
            );
        }
    }

    if !record.outputs.is_empty() {
        ui::section("Identifiers");
        for (slot, identifier) in &record.outputs {
            ui::kv(slot, identifier);
        }
    }

    println!();
    Ok(())
}
