//! Execution engine - drives a plan to the desired state step by step

use crate::context::{ApplyContext, DirectRunner, NoProgress, ProgressCallback, SudoProvider};
use crate::error::ReconcileError;
use crate::planner::ExecutionPlan;
use crate::resource::{Resource, ResourceExt};
use crate::types::{ApplyResult, DesiredState, ReconcileReport, Slots, StepReport};

/// Reconcile a plan towards `desired`
///
/// # Type Parameters
/// * `S` - Sudo provider type
/// * `P` - Progress callback type
///
/// # Arguments
/// * `desired` - `Present` upserts in dependency order, `Absent` deletes in reverse
/// * `plan` - The execution plan to run
/// * `sudo_provider` - Provider for privileged steps (called once, only if needed)
/// * `progress` - Progress callback
///
/// Steps run strictly one after another. The first failing step stops the
/// run; steps that completed before it are not rolled back and are listed
/// in the error's report.
pub fn reconcile<S, P>(
    desired: DesiredState,
    plan: &ExecutionPlan,
    sudo_provider: impl FnOnce() -> anyhow::Result<S>,
    progress: &mut P,
) -> Result<ReconcileReport, ReconcileError>
where
    S: SudoProvider,
    P: ProgressCallback,
{
    let order = plan.order_for(desired)?;

    // Acquire sudo only when needed, once for the whole run
    let sudo = if order.iter().any(|r| r.requires_sudo()) {
        Some(sudo_provider().map_err(ReconcileError::Sudo)?)
    } else {
        None
    };

    let mut report = ReconcileReport::new(desired);
    progress.on_run_start(order.len(), desired);

    for resource in order {
        let id = resource.id();
        progress.on_step_start(&id, &resource.description());

        let privileged = if resource.requires_sudo() {
            sudo.as_ref().map(|s| s as &dyn SudoProvider)
        } else {
            None
        };

        let (result, identifier) = match run_step(resource, desired, &report.outputs, privileged)
        {
            Ok(done) => done,
            Err(source) => {
                log::error!("{id}: {source:#}");
                progress.on_step_failed(&id, &source);
                return Err(ReconcileError::StepFailed {
                    step: id,
                    report: Box::new(report),
                    source,
                });
            }
        };

        if desired == DesiredState::Present
            && let Some(slot) = resource.provides()
        {
            match &identifier {
                Some(value) => report.outputs.insert(slot, value.clone()),
                None => {
                    return Err(ReconcileError::MissingOutput {
                        step: id,
                        slot: slot.to_string(),
                    });
                }
            }
        }

        log::info!("{id}: {result}");
        progress.on_step_complete(&id, &result);
        report.record(StepReport {
            step: id,
            resource_type: resource.resource_type().to_string(),
            result,
            identifier,
        });
    }

    progress.on_run_complete();
    Ok(report)
}

/// Upsert or delete a single resource
fn run_step(
    resource: &dyn Resource,
    desired: DesiredState,
    slots: &Slots,
    sudo: Option<&dyn SudoProvider>,
) -> anyhow::Result<(ApplyResult, Option<String>)> {
    let mut ctx = match sudo {
        Some(s) => ApplyContext::with_sudo(slots, s),
        None => ApplyContext::new(slots),
    };

    match desired {
        DesiredState::Present => {
            log::debug!("upsert {}", resource.id());
            let outcome = resource.upsert(&mut ctx)?;
            Ok((outcome.result, outcome.identifier))
        }
        DesiredState::Absent => {
            log::debug!("delete {}", resource.id());
            Ok((resource.delete(&mut ctx)?, None))
        }
    }
}

/// Simple reconciliation without progress reporting
///
/// Privileged steps run their commands directly as the current user.
pub fn reconcile_simple(
    desired: DesiredState,
    plan: &ExecutionPlan,
) -> Result<ReconcileReport, ReconcileError> {
    reconcile(desired, plan, || Ok(DirectRunner), &mut NoProgress)
}
