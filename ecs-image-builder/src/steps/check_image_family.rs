use async_trait::async_trait;

use super::{halt, Step, StopBuilder};
use crate::context::RunContext;
use crate::core::StepAction;
use crate::errors::BuildError;

/// Resolves the newest image of the configured family and publishes it as
/// the source image.
///
/// An empty family is not a provider error: the step hands over to
/// [`StopBuilder`] with the explanation.
#[derive(Debug, Default)]
pub struct CheckImageFamily;

impl CheckImageFamily {
    /// Creates the step.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Step for CheckImageFamily {
    fn name(&self) -> &str {
        "check_image_family"
    }

    async fn run(&mut self, ctx: &mut RunContext) -> StepAction {
        let Some(family) = ctx.config.image_family.clone() else {
            return halt(
                ctx,
                self.name(),
                BuildError::precondition("image_family is not configured"),
                "",
            );
        };

        ctx.ui
            .say(&format!("Checking image family: {family}..."));

        let found = ctx
            .client
            .describe_image_from_family(&ctx.config.region, &family)
            .await;
        let image = match found {
            Ok(Some(image)) => image,
            Ok(None) => {
                return StopBuilder::new(format!(
                    "No image was found matching image family: {family}"
                ))
                .run(ctx)
                .await;
            }
            Err(e) => {
                return halt(ctx, self.name(), e.into(), "Error querying image family");
            }
        };

        ctx.ui.message(&format!(
            "Found latest image: {} by image family: {family}",
            image.image_id
        ));
        if let Err(e) = ctx.set_source_image(image) {
            return halt(ctx, self.name(), e.into(), "");
        }
        StepAction::Continue
    }

    async fn cleanup(&mut self, _ctx: &mut RunContext) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestContext;

    fn family_fixture(family: &str) -> TestContext {
        let family = family.to_string();
        TestContext::new().configure(move |c| {
            c.source_image = None;
            c.image_family = Some(family);
        })
    }

    #[tokio::test]
    async fn test_picks_newest_image_of_family() {
        let fixture = family_fixture("ubuntu");
        fixture
            .client
            .seed_source_image("cn-beijing", "m-newer", Some("ubuntu"));
        let mut ctx = fixture.build();

        let action = CheckImageFamily::new().run(&mut ctx).await;

        assert_eq!(action, StepAction::Continue);
        assert_eq!(ctx.source_image().unwrap().image_id, "m-newer");
        assert!(fixture
            .ui
            .contains("Found latest image: m-newer by image family: ubuntu"));
    }

    #[tokio::test]
    async fn test_empty_family_stops_builder() {
        let fixture = family_fixture("centos");
        let mut ctx = fixture.build();

        let action = CheckImageFamily::new().run(&mut ctx).await;

        assert_eq!(action, StepAction::Halt);
        let err = ctx.error().unwrap();
        assert!(err.to_string().starts_with("stop_builder:"));
        assert!(err
            .to_string()
            .contains("No image was found matching image family: centos"));
    }
}
