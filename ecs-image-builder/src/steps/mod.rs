//! Step trait and the concrete build steps.
//!
//! Steps are the reversible units of a build. `run` performs the forward
//! action and publishes its results on the [`RunContext`]; `cleanup` undoes
//! whatever the step allocated. Each step keeps the ids it needs for
//! cleanup in its own fields.

mod check_image_family;
mod check_source_image;
mod config_eip;
mod copy_image;
mod create_image;
mod create_instance;
mod delete_images;
mod provision;
mod run_instance;
mod stop_builder;
mod stop_instance;
mod tag_resources;

use async_trait::async_trait;
use std::fmt::Debug;

use crate::context::RunContext;
use crate::core::StepAction;
use crate::errors::BuildError;

pub use check_image_family::CheckImageFamily;
pub use check_source_image::CheckSourceImage;
pub use config_eip::ConfigureAddress;
pub use copy_image::{plan_copies, CopyImageToRegions, PlannedCopy};
pub use create_image::CreateImage;
pub use create_instance::CreateInstance;
pub use delete_images::DeleteImages;
pub use provision::{Provision, ProvisionTarget, Provisioner};
pub use run_instance::RunInstance;
pub use stop_builder::StopBuilder;
pub use stop_instance::StopInstance;
pub use tag_resources::TagResources;

/// One reversible unit of provisioning logic.
#[async_trait]
pub trait Step: Send + Debug {
    /// Returns the name of the step.
    fn name(&self) -> &str;

    /// Performs the forward action.
    ///
    /// # Returns
    ///
    /// `Continue` to proceed, `Halt` after recording the failure with
    /// [`RunContext::mark_halted`], or `Cancelled` once cancellation was
    /// observed.
    async fn run(&mut self, ctx: &mut RunContext) -> StepAction;

    /// Undoes what `run` allocated.
    ///
    /// Runs after `run` returned, whatever it returned, and must be a no-op
    /// if nothing was allocated. Failures are reported, never escalated.
    async fn cleanup(&mut self, ctx: &mut RunContext);
}

/// Records `err` as the reason the run stopped and returns the matching
/// action.
///
/// Cancellation observed inside a poll loop is not a failure: the run is
/// marked cancelled and nothing is reported. Everything else is shown to
/// the operator as `"{prefix}: {err}"` and halts the run.
pub(crate) fn halt(ctx: &mut RunContext, step: &str, err: BuildError, prefix: &str) -> StepAction {
    if err.is_cancelled() {
        tracing::info!(step, "Cancellation observed");
        ctx.mark_cancelled();
        return StepAction::Cancelled;
    }

    let message = if prefix.is_empty() {
        err.to_string()
    } else {
        format!("{prefix}: {err}")
    };
    tracing::warn!(step, error = %err, "Step halted");
    ctx.ui.error(&message);
    ctx.mark_halted(BuildError::Halted {
        step: step.to_string(),
        message,
        source: Some(Box::new(err)),
    });
    StepAction::Halt
}

/// The operator line a step prints before tearing down `module`.
pub(crate) fn cleanup_message(ctx: &RunContext, module: &str) -> String {
    if ctx.is_aborted() {
        format!("Deleting {module} because of cancellation or error...")
    } else {
        format!("Cleaning up '{module}'")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ProviderError, WaitError};
    use crate::testing::TestContext;
    use crate::ui::UiLevel;

    #[test]
    fn test_halt_reports_and_records() {
        let fixture = TestContext::new();
        let mut ctx = fixture.build();

        let action = halt(
            &mut ctx,
            "create_instance",
            ProviderError::new("Forbidden", "denied").into(),
            "Error creating instance",
        );

        assert_eq!(action, StepAction::Halt);
        assert!(ctx.halted());
        assert_eq!(
            fixture.ui.lines_at(UiLevel::Error),
            vec!["Error creating instance: [Forbidden] denied".to_string()]
        );
        let err = ctx.take_error().unwrap();
        assert_eq!(err.provider_code(), Some("Forbidden"));
        assert!(err.to_string().starts_with("create_instance: Error creating"));
    }

    #[test]
    fn test_halt_on_cancellation_is_silent() {
        let fixture = TestContext::new();
        let mut ctx = fixture.build();

        let action = halt(&mut ctx, "s", WaitError::Cancelled.into(), "Waiting");

        assert_eq!(action, StepAction::Cancelled);
        assert!(ctx.cancelled());
        assert!(!ctx.halted());
        assert!(ctx.error().is_none());
        assert!(fixture.ui.is_empty());
    }

    #[test]
    fn test_cleanup_message_depends_on_outcome() {
        let mut ctx = TestContext::new().build();
        assert_eq!(cleanup_message(&ctx, "instance"), "Cleaning up 'instance'");

        ctx.mark_cancelled();
        assert_eq!(
            cleanup_message(&ctx, "instance"),
            "Deleting instance because of cancellation or error..."
        );
    }
}
