use async_trait::async_trait;

use super::{halt, Step};
use crate::client::{ClientExt, InstanceStatus};
use crate::context::RunContext;
use crate::core::StepAction;

/// Stops the customised instance so its disks can be captured.
#[derive(Debug, Default)]
pub struct StopInstance;

impl StopInstance {
    /// Creates the step.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Step for StopInstance {
    fn name(&self) -> &str {
        "stop_instance"
    }

    async fn run(&mut self, ctx: &mut RunContext) -> StepAction {
        let instance_id = match ctx.instance() {
            Ok(instance) => instance.instance_id.clone(),
            Err(e) => return halt(ctx, self.name(), e.into(), "Error reading instance"),
        };
        let region = ctx.config.region.clone();

        let current = match ctx.client.describe_instance(&region, &instance_id).await {
            Ok(instance) => instance,
            Err(e) => return halt(ctx, self.name(), e.into(), "Error describing instance"),
        };

        if current.status != InstanceStatus::Stopped {
            ctx.ui.say("Stopping instance...");
            if let Err(e) = ctx.client.stop_instance(&region, &instance_id, false).await {
                return halt(ctx, self.name(), e.into(), "Error stopping instance");
            }
        }

        ctx.ui.say("Waiting for instance to stop...");
        let stopped = ctx
            .client
            .wait_for_instance_status(
                &region,
                &instance_id,
                InstanceStatus::Stopped,
                &ctx.retry.short,
                ctx.cancel_token(),
            )
            .await;
        match stopped {
            Ok(instance) => {
                if let Err(e) = ctx.refresh_instance(instance) {
                    return halt(ctx, self.name(), e.into(), "");
                }
                StepAction::Continue
            }
            Err(e) => halt(
                ctx,
                self.name(),
                e.into(),
                "Error waiting for instance to stop",
            ),
        }
    }

    async fn cleanup(&mut self, _ctx: &mut RunContext) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ops;
    use crate::steps::{CreateInstance, RunInstance};
    use crate::testing::TestContext;

    async fn launched(fixture: &TestContext, start: bool) -> RunContext {
        let mut ctx = fixture.build();
        let image = fixture.client.image("ubuntu_20_04").unwrap();
        ctx.set_source_image(image).unwrap();
        CreateInstance::new().run(&mut ctx).await;
        if start {
            RunInstance::new().run(&mut ctx).await;
        }
        ctx
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_running_instance() {
        let fixture = TestContext::new();
        let mut ctx = launched(&fixture, true).await;
        let stops_before = fixture.client.calls_of(ops::STOP_INSTANCE);

        assert_eq!(StopInstance::new().run(&mut ctx).await, StepAction::Continue);

        assert_eq!(fixture.client.calls_of(ops::STOP_INSTANCE), stops_before + 1);
        assert_eq!(ctx.instance().unwrap().status, InstanceStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_stopped_instance_is_not_stopped_again() {
        let fixture = TestContext::new();
        let mut ctx = launched(&fixture, false).await;
        let stops_before = fixture.client.calls_of(ops::STOP_INSTANCE);

        assert_eq!(StopInstance::new().run(&mut ctx).await, StepAction::Continue);
        assert_eq!(fixture.client.calls_of(ops::STOP_INSTANCE), stops_before);
    }
}
