use async_trait::async_trait;

use super::Step;
use crate::context::RunContext;
use crate::core::StepAction;
use crate::errors::BuildError;

/// A terminal step that always halts with a fixed reason.
///
/// Validation failures that can only be detected once the build is under
/// way end here, so they roll back through the same reverse cleanup as any
/// other halt.
#[derive(Debug, Clone)]
pub struct StopBuilder {
    reason: String,
}

impl StopBuilder {
    /// Creates a step halting with `reason`.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    /// Returns the halt reason.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

#[async_trait]
impl Step for StopBuilder {
    fn name(&self) -> &str {
        "stop_builder"
    }

    async fn run(&mut self, ctx: &mut RunContext) -> StepAction {
        let message = format!("build image stopped because: {}", self.reason);
        ctx.ui.error(&message);
        ctx.mark_halted(BuildError::Halted {
            step: self.name().to_string(),
            message,
            source: Some(Box::new(BuildError::precondition(self.reason.clone()))),
        });
        StepAction::Halt
    }

    async fn cleanup(&mut self, _ctx: &mut RunContext) {}
}
