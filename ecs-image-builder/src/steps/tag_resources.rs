use async_trait::async_trait;

use super::{halt, Step};
use crate::client::TagResourceType;
use crate::context::RunContext;
use crate::core::StepAction;

/// Applies the configured tags to the image and each of its snapshots.
///
/// Unlike cleanup, tagging is not best-effort: a failure halts the build.
#[derive(Debug, Default)]
pub struct TagResources;

impl TagResources {
    /// Creates the step.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Step for TagResources {
    fn name(&self) -> &str {
        "tag_resources"
    }

    async fn run(&mut self, ctx: &mut RunContext) -> StepAction {
        if ctx.config.tags.is_empty() {
            return StepAction::Continue;
        }

        let image_id = match ctx.image_id() {
            Ok(id) => id.to_string(),
            Err(e) => return halt(ctx, self.name(), e.into(), "Error reading image"),
        };
        let snapshot_ids = match ctx.snapshot_ids() {
            Ok(ids) => ids.to_vec(),
            Err(e) => return halt(ctx, self.name(), e.into(), "Error reading snapshots"),
        };
        let region = ctx.config.region.clone();
        let tags = ctx.config.tags.clone();

        ctx.ui.say(&format!("Adding tags({tags:?}) to image: {image_id}"));
        if let Err(e) = ctx
            .client
            .add_tags(&region, TagResourceType::Image, &image_id, &tags)
            .await
        {
            return halt(ctx, self.name(), e.into(), "Error tagging image");
        }

        for snapshot_id in snapshot_ids {
            ctx.ui
                .say(&format!("Adding tags({tags:?}) to snapshot: {snapshot_id}"));
            if let Err(e) = ctx
                .client
                .add_tags(&region, TagResourceType::Snapshot, &snapshot_id, &tags)
                .await
            {
                return halt(ctx, self.name(), e.into(), "Error tagging snapshot");
            }
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
    use crate::testing::TestContext;
    use std::collections::BTreeMap;

    fn captured(fixture: &TestContext) -> RunContext {
        let mut ctx = fixture.build();
        ctx.set_image_id("ubuntu_20_04").unwrap();
        ctx.set_snapshot_ids(vec!["s-ubuntu_20_04".into()]).unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_tags_image_and_snapshots() {
        let fixture = TestContext::new().configure(|c| {
            c.tags.insert("team".into(), "infra".into());
            c.tags.insert("env".into(), "prod".into());
        });
        let mut ctx = captured(&fixture);

        assert_eq!(TagResources::new().run(&mut ctx).await, StepAction::Continue);

        let expected: BTreeMap<String, String> = [("env", "prod"), ("team", "infra")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(fixture.client.tags_of("ubuntu_20_04"), expected);
        assert_eq!(fixture.client.tags_of("s-ubuntu_20_04"), expected);
    }

    #[tokio::test]
    async fn test_empty_tags_is_a_no_op() {
        let fixture = TestContext::new();
        let mut ctx = fixture.build();

        assert_eq!(TagResources::new().run(&mut ctx).await, StepAction::Continue);
        assert_eq!(fixture.client.calls_of(ops::ADD_TAGS), 0);
    }

    #[tokio::test]
    async fn test_tagging_failure_halts() {
        let fixture = TestContext::new().configure(|c| {
            c.tags.insert("team".into(), "infra".into());
        });
        fixture
            .client
            .fail_next(ops::ADD_TAGS, ProviderError::new("InvalidTagKey", "bad key"));
        let mut ctx = captured(&fixture);

        assert_eq!(TagResources::new().run(&mut ctx).await, StepAction::Halt);
        assert_eq!(ctx.error().unwrap().provider_code(), Some("InvalidTagKey"));
        assert_eq!(fixture.client.calls_of(ops::ADD_TAGS), 1);
    }
}
