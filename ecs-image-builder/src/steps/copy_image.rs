use async_trait::async_trait;

use super::{halt, Step};
use crate::client::{ClientExt, CopyImageRequest, ImageFilter, ImageStatus};
use crate::config::BuildConfig;
use crate::context::RunContext;
use crate::core::StepAction;

/// One copy the region-copy step will issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCopy {
    /// Destination region.
    pub region: String,
    /// Name of the copy; the provider keeps the source name when unset.
    pub name: Option<String>,
    /// KMS key encrypting the copy.
    pub kms_key_id: Option<String>,
}

/// Works out the destinations of the region copy.
///
/// A destination equal to the source region is skipped unless encryption
/// is requested. When it is, and the source image is not encrypted yet, the
/// source region is added (if missing) so the build region ends up with an
/// encrypted copy. Names and KMS keys are taken by destination index; a
/// region listed twice is copied once.
#[must_use]
pub fn plan_copies(config: &BuildConfig, source_region: &str, source_encrypted: bool) -> Vec<PlannedCopy> {
    let encrypt = config.image_encrypted.is_true();
    let non_empty = |values: &[String], index: usize| {
        values.get(index).filter(|v| !v.is_empty()).cloned()
    };

    let mut planned: Vec<PlannedCopy> = Vec::new();
    for (index, region) in config.image_copy_regions.iter().enumerate() {
        if region == source_region && !encrypt {
            continue;
        }
        if planned.iter().any(|p| p.region == *region) {
            continue;
        }
        planned.push(PlannedCopy {
            region: region.clone(),
            name: non_empty(&config.image_copy_names, index),
            kms_key_id: non_empty(&config.image_copy_kms_key_ids, index),
        });
    }

    if encrypt && !source_encrypted && !planned.iter().any(|p| p.region == source_region) {
        planned.push(PlannedCopy {
            region: source_region.to_string(),
            name: Some(config.image_name.clone()),
            kms_key_id: None,
        });
    }
    planned
}

/// Replicates the captured image into the configured regions.
///
/// Copies are fire-and-forget except the encrypted copy in the build
/// region, which is waited on. On a failed or cancelled build, every copy
/// recorded on the run is cancelled.
#[derive(Debug, Default)]
pub struct CopyImageToRegions {
    copied: Vec<(String, String)>,
}

impl CopyImageToRegions {
    /// Creates the step.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the `(region, image id)` pairs this step created.
    #[must_use]
    pub fn copied(&self) -> &[(String, String)] {
        &self.copied
    }
}

#[async_trait]
impl Step for CopyImageToRegions {
    fn name(&self) -> &str {
        "copy_image_to_regions"
    }

    async fn run(&mut self, ctx: &mut RunContext) -> StepAction {
        if ctx.config.image_copy_regions.is_empty() && !ctx.config.image_encrypted.is_true() {
            return StepAction::Continue;
        }

        let source_id = match ctx.image_id() {
            Ok(id) => id.to_string(),
            Err(e) => return halt(ctx, self.name(), e.into(), "Error reading image"),
        };
        let source_region = ctx.config.region.clone();

        let filter = ImageFilter::in_region(&source_region).with_image_id(&source_id);
        let source_encrypted = match ctx.client.describe_images(&filter).await {
            Ok(images) => images.first().is_some_and(|i| i.is_encrypted()),
            Err(e) => {
                tracing::warn!(image_id = %source_id, error = %e, "Could not describe source image");
                false
            }
        };

        let plan = plan_copies(&ctx.config, &source_region, source_encrypted);
        if plan.is_empty() {
            return StepAction::Continue;
        }
        let encrypted = ctx
            .config
            .image_encrypted
            .to_option()
            .unwrap_or(source_encrypted);

        ctx.ui
            .say(&format!("Copying image {source_id} from {source_region}..."));
        for copy in plan {
            let request = CopyImageRequest {
                region_id: source_region.clone(),
                image_id: source_id.clone(),
                destination_region_id: copy.region.clone(),
                destination_image_name: copy.name,
                encrypted,
                kms_key_id: copy.kms_key_id,
                resource_group_id: ctx.config.resource_group_id.clone(),
            };
            let new_id = match ctx.client.copy_image(&request).await {
                Ok(id) => id,
                Err(e) => return halt(ctx, self.name(), e.into(), "Error copying images"),
            };

            self.copied.push((copy.region.clone(), new_id.clone()));
            ctx.record_image(copy.region.clone(), new_id.clone());
            ctx.ui.message(&format!(
                "Copy image from {source_region}({source_id}) to {}({new_id})",
                copy.region
            ));
        }

        let in_place = self
            .copied
            .iter()
            .find(|(region, _)| *region == source_region)
            .map(|(_, id)| id.clone());
        if let Some(copy_id) = in_place {
            let retry = ctx
                .retry
                .long
                .clone()
                .with_timeout(ctx.config.copying_image_ready_timeout());
            let ready = ctx
                .client
                .wait_for_image_status(
                    &source_region,
                    &copy_id,
                    ImageStatus::Available,
                    &retry,
                    ctx.cancel_token(),
                )
                .await;
            if let Err(e) = ready {
                return halt(
                    ctx,
                    self.name(),
                    e.into(),
                    &format!("Timeout waiting image {copy_id} finish copying"),
                );
            }
        }

        StepAction::Continue
    }

    async fn cleanup(&mut self, ctx: &mut RunContext) {
        if !ctx.is_aborted() {
            return;
        }
        ctx.ui
            .say("Stopping copy image because cancellation or error...");

        let source_id = ctx.image_id().ok().map(str::to_string);
        let recorded: Vec<(String, String)> = ctx
            .images()
            .iter()
            .filter(|(_, id)| Some(*id) != source_id.as_ref())
            .map(|(region, id)| (region.clone(), id.clone()))
            .collect();

        for (region, image_id) in recorded {
            if let Err(e) = ctx.client.cancel_copy_image(&region, &image_id).await {
                ctx.ui
                    .error(&format!("Error cancelling copy image: {e}"));
            }
        }
        self.copied.clear();
    }
}
