use async_trait::async_trait;

use super::{halt, Step};
use crate::client::ImageFilter;
use crate::context::RunContext;
use crate::core::StepAction;
use crate::errors::BuildError;

/// Resolves the configured source image and publishes it.
#[derive(Debug, Default)]
pub struct CheckSourceImage;

impl CheckSourceImage {
    /// Creates the step.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Step for CheckSourceImage {
    fn name(&self) -> &str {
        "check_source_image"
    }

    async fn run(&mut self, ctx: &mut RunContext) -> StepAction {
        let Some(image_id) = ctx.config.source_image.clone() else {
            return halt(
                ctx,
                self.name(),
                BuildError::precondition("source_image is not configured"),
                "",
            );
        };

        let filter = ImageFilter::in_region(&ctx.config.region).with_image_id(&image_id);
        let images = match ctx.client.describe_images(&filter).await {
            Ok(images) => images,
            Err(e) => return halt(ctx, self.name(), e.into(), "Error querying source image"),
        };

        let Some(image) = images.into_iter().find(|i| i.image_id == image_id) else {
            let region = ctx.config.region.clone();
            return halt(
                ctx,
                self.name(),
                BuildError::precondition(format!(
                    "No image was found matching {image_id} in {region}"
                )),
                "",
            );
        };

        ctx.ui
            .message(&format!("Found image ID: {}", image.image_id));
        if let Err(e) = ctx.set_source_image(image) {
            return halt(ctx, self.name(), e.into(), "");
        }
        StepAction::Continue
    }

    async fn cleanup(&mut self, _ctx: &mut RunContext) {}
}
