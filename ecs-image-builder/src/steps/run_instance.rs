use async_trait::async_trait;

use super::{halt, Step};
use crate::client::{ClientExt, InstanceStatus};
use crate::context::RunContext;
use crate::core::StepAction;

/// Starts the stopped build instance and waits until it is running.
///
/// Deleting the instance is the job of `CreateInstance`'s cleanup.
#[derive(Debug, Default)]
pub struct RunInstance;

impl RunInstance {
    /// Creates the step.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Step for RunInstance {
    fn name(&self) -> &str {
        "run_instance"
    }

    async fn run(&mut self, ctx: &mut RunContext) -> StepAction {
        let instance_id = match ctx.instance() {
            Ok(instance) => instance.instance_id.clone(),
            Err(e) => return halt(ctx, self.name(), e.into(), "Error reading instance"),
        };
        let region = ctx.config.region.clone();

        ctx.ui.say(&format!("Starting instance: {instance_id}"));
        if let Err(e) = ctx.client.start_instance(&region, &instance_id).await {
            return halt(ctx, self.name(), e.into(), "Error starting instance");
        }

        let running = ctx
            .client
            .wait_for_instance_status(
                &region,
                &instance_id,
                InstanceStatus::Running,
                &ctx.retry.short,
                ctx.cancel_token(),
            )
            .await;
        let instance = match running {
            Ok(instance) => instance,
            Err(e) => {
                return halt(
                    ctx,
                    self.name(),
                    e.into(),
                    "Error waiting for instance to be running",
                )
            }
        };

        if let Err(e) = ctx.refresh_instance(instance) {
            return halt(ctx, self.name(), e.into(), "");
        }
        StepAction::Continue
    }

    async fn cleanup(&mut self, _ctx: &mut RunContext) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ops;
    use crate::errors::ProviderError;
    use crate::steps::CreateInstance;
    use crate::testing::TestContext;

    async fn stopped_instance(fixture: &TestContext) -> RunContext {
        let mut ctx = fixture.build();
        let image = fixture.client.image("ubuntu_20_04").unwrap();
        ctx.set_source_image(image).unwrap();
        CreateInstance::new().run(&mut ctx).await;
        ctx
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_instance() {
        let fixture = TestContext::new();
        let mut ctx = stopped_instance(&fixture).await;

        assert_eq!(RunInstance::new().run(&mut ctx).await, StepAction::Continue);

        let instance = ctx.instance().unwrap();
        assert_eq!(instance.status, InstanceStatus::Running);
        assert_eq!(
            fixture.client.instance(&instance.instance_id).unwrap().status,
            InstanceStatus::Running
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_error_halts() {
        let fixture = TestContext::new();
        let mut ctx = stopped_instance(&fixture).await;
        fixture
            .client
            .fail_next(ops::START_INSTANCE, ProviderError::new("Forbidden", "denied"));

        assert_eq!(RunInstance::new().run(&mut ctx).await, StepAction::Halt);
        assert!(fixture.ui.contains("Error starting instance: [Forbidden] denied"));
    }

    #[tokio::test]
    async fn test_without_instance_halts() {
        let mut ctx = TestContext::new().build();
        assert_eq!(RunInstance::new().run(&mut ctx).await, StepAction::Halt);
        assert!(ctx.error().unwrap().to_string().contains("instance"));
    }
}
