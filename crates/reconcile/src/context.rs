//! Apply context and provider traits
//!
//! These traits allow the reconcile crate to be used without
//! depending on specific implementations of sudo, progress, etc.

use crate::types::{ApplyResult, CommandOutput, DesiredState, Slots};
use anyhow::Result;

/// Provider for elevated privilege operations
///
/// Implement this trait to provide sudo/admin capabilities.
/// The implementation handles privilege acquisition and release.
pub trait SudoProvider: Send + Sync {
    /// Run a command with elevated privileges
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Run a command and return just success/failure
    fn run_status(&self, cmd: &str, args: &[&str]) -> Result<bool> {
        Ok(self.run(cmd, args)?.success)
    }

    /// Run a command and capture stdout
    fn run_capture(&self, cmd: &str, args: &[&str]) -> Result<String> {
        let output = self.run(cmd, args)?;
        if !output.success {
            anyhow::bail!("Command failed: {}", output.stderr_str().trim());
        }
        Ok(output.stdout_str())
    }

    /// Run a command and fail with its stderr when it exits non-zero
    fn run_checked(&self, cmd: &str, args: &[&str]) -> Result<()> {
        self.run_capture(cmd, args).map(|_| ())
    }
}

impl<T: SudoProvider + ?Sized> SudoProvider for Box<T> {
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput> {
        (**self).run(cmd, args)
    }
}

impl<T: SudoProvider + ?Sized> SudoProvider for std::sync::Arc<T> {
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput> {
        (**self).run(cmd, args)
    }
}

/// Progress callback for reconciliation runs
///
/// Implement this trait to receive progress updates during execution.
pub trait ProgressCallback: Send {
    /// Called once before the first step
    fn on_run_start(&mut self, count: usize, desired: DesiredState);

    /// Called when starting a single step
    fn on_step_start(&mut self, id: &str, description: &str);

    /// Called when a step completes successfully
    fn on_step_complete(&mut self, id: &str, result: &ApplyResult);

    /// Called when a step fails; the run stops afterwards
    fn on_step_failed(&mut self, id: &str, error: &anyhow::Error);

    /// Called after the last step
    fn on_run_complete(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _count: usize, _desired: DesiredState) {}
    fn on_step_start(&mut self, _id: &str, _description: &str) {}
    fn on_step_complete(&mut self, _id: &str, _result: &ApplyResult) {}
    fn on_step_failed(&mut self, _id: &str, _error: &anyhow::Error) {}
    fn on_run_complete(&mut self) {}
}

/// Runs commands as the current user
///
/// Stands in for a sudo provider when the process already has the
/// privileges it needs (e.g. running as root).
pub struct DirectRunner;

impl SudoProvider for DirectRunner {
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = std::process::Command::new(cmd)
            .args(args)
            .output()
            .map_err(|e| anyhow::anyhow!("Failed to run {cmd}: {e}"))?;
        Ok(output.into())
    }
}

/// Context passed to resource upsert and delete operations
pub struct ApplyContext<'a> {
    /// Optional sudo provider for privileged operations
    pub sudo: Option<&'a dyn SudoProvider>,
    /// Identifiers produced by earlier steps of this run
    pub slots: &'a Slots,
}

impl<'a> ApplyContext<'a> {
    /// Create a new apply context
    pub fn new(slots: &'a Slots) -> Self {
        Self { sudo: None, slots }
    }

    /// Create a context with a sudo provider
    pub fn with_sudo(slots: &'a Slots, sudo: &'a dyn SudoProvider) -> Self {
        Self {
            sudo: Some(sudo),
            slots,
        }
    }

    /// Get the sudo provider, or error if not available
    pub fn require_sudo(&self) -> Result<&dyn SudoProvider> {
        self.sudo
            .ok_or_else(|| anyhow::anyhow!("Sudo required but not available"))
    }

    /// Identifier bound to `slot` by an earlier step
    pub fn input(&self, slot: &str) -> Result<&str> {
        self.slots
            .get(slot)
            .ok_or_else(|| anyhow::anyhow!("input '{slot}' has not been resolved"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_reports_unresolved_slot() {
        let mut slots = Slots::new();
        slots.insert("role_arn", "arn:role");
        let ctx = ApplyContext::new(&slots);

        assert_eq!(ctx.input("role_arn").unwrap(), "arn:role");
        let err = ctx.input("function_arn").unwrap_err();
        assert!(err.to_string().contains("function_arn"));
    }

    #[test]
    fn test_direct_runner_reports_exit_status() {
        assert!(DirectRunner.run_status("true", &[]).unwrap());
        assert!(!DirectRunner.run_status("false", &[]).unwrap());
        assert!(DirectRunner.run_checked("false", &[]).is_err());
    }

    #[test]
    fn test_require_sudo_without_provider() {
        let slots = Slots::new();
        let ctx = ApplyContext::new(&slots);
        assert!(ctx.require_sudo().is_err());
    }
}
