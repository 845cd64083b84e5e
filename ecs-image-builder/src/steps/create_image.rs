use async_trait::async_trait;
use uuid::Uuid;

use super::{cleanup_message, halt, Step};
use crate::client::{
    codes, ClientExt, CreateImageRequest, ImageDiskSpec, ImageFilter, ImageStatus,
};
use crate::config::{BuildConfig, DiskMapping};
use crate::context::RunContext;
use crate::core::StepAction;
use crate::retry::{retry_on_codes, wait_for_expected};

/// Captures the image from the stopped instance and waits until it is
/// available.
///
/// When the system disk names a snapshot the image is assembled from the
/// configured snapshots instead. The image and its snapshots are deleted
/// on cleanup if the build did not succeed.
#[derive(Debug, Default)]
pub struct CreateImage {
    image_id: Option<String>,
}

impl CreateImage {
    /// Creates the step.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn disk_spec(disk: &DiskMapping) -> Option<ImageDiskSpec> {
    disk.disk_snapshot_id.as_ref().map(|snapshot_id| ImageDiskSpec {
        snapshot_id: snapshot_id.clone(),
        device: disk.disk_device.clone(),
        size: (disk.disk_size > 0).then_some(disk.disk_size),
    })
}

fn build_request(config: &BuildConfig, instance_id: &str) -> CreateImageRequest {
    let mut request = CreateImageRequest {
        client_token: Uuid::now_v7().to_string(),
        region_id: config.region.clone(),
        image_name: config.image_name.clone(),
        image_family: config.target_image_family.clone(),
        image_version: config.image_version.clone(),
        description: config.image_description.clone(),
        boot_mode: config.boot_mode.clone(),
        resource_group_id: config.resource_group_id.clone(),
        ..CreateImageRequest::default()
    };

    if config.system_disk_mapping.disk_snapshot_id.is_some() {
        request.disk_device_mappings = std::iter::once(&config.system_disk_mapping)
            .chain(&config.image_disk_mappings)
            .filter_map(disk_spec)
            .collect();
    } else {
        request.instance_id = Some(instance_id.to_string());
    }
    request
}

#[async_trait]
impl Step for CreateImage {
    fn name(&self) -> &str {
        "create_image"
    }

    async fn run(&mut self, ctx: &mut RunContext) -> StepAction {
        let instance_id = match ctx.instance() {
            Ok(instance) => instance.instance_id.clone(),
            Err(e) => return halt(ctx, self.name(), e.into(), "Error reading instance"),
        };
        let region = ctx.config.region.clone();
        let request = build_request(&ctx.config, &instance_id);

        ctx.ui
            .say(&format!("Creating image: {}", request.image_name));
        let created = wait_for_expected(
            &ctx.retry.default,
            ctx.cancel_token(),
            || ctx.client.create_image(&request),
            retry_on_codes(&[codes::IDEMPOTENT_PROCESSING]),
        )
        .await;
        let image_id = match created {
            Ok(id) => id,
            Err(e) => return halt(ctx, self.name(), e.into(), "Error creating image"),
        };
        self.image_id = Some(image_id.clone());

        let retry = ctx
            .retry
            .long
            .clone()
            .with_timeout(ctx.config.snapshot_ready_timeout());
        let ready = ctx
            .client
            .wait_for_image_status(
                &region,
                &image_id,
                ImageStatus::Available,
                &retry,
                ctx.cancel_token(),
            )
            .await;
        let image = match ready {
            Ok(image) => image,
            Err(e) => {
                return halt(
                    ctx,
                    self.name(),
                    e.into(),
                    "Timeout waiting for image to be created",
                )
            }
        };

        tracing::info!(step = self.name(), image_id = %image_id, "Image available");
        let published = ctx
            .set_image_id(image_id.clone())
            .and_then(|()| ctx.set_snapshot_ids(image.snapshot_ids()));
        if let Err(e) = published {
            return halt(ctx, self.name(), e.into(), "");
        }
        ctx.record_image(region, image_id.clone());
        ctx.ui.message(&format!("Created image: {image_id}"));
        StepAction::Continue
    }

    async fn cleanup(&mut self, ctx: &mut RunContext) {
        if !ctx.is_aborted() {
            return;
        }
        let Some(image_id) = self.image_id.take() else {
            return;
        };
        let region = ctx.config.region.clone();

        ctx.ui.say(&cleanup_message(ctx, "image"));

        let filter = ImageFilter::in_region(&region).with_image_id(&image_id);
        let image = match ctx.client.describe_images(&filter).await {
            Ok(images) => images.into_iter().next(),
            Err(e) => {
                ctx.ui
                    .error(&format!("Error describing image {image_id}: {e}"));
                return;
            }
        };
        let Some(image) = image else {
            return;
        };

        if let Err(e) = ctx.client.delete_image(&region, &image_id, true).await {
            ctx.ui
                .error(&format!("Failed to delete image {image_id}: {e}"));
            return;
        }
        for snapshot_id in image.snapshot_ids() {
            if let Err(e) = ctx.client.delete_snapshot(&region, &snapshot_id, true).await {
                ctx.ui
                    .error(&format!("Failed to delete snapshot {snapshot_id}: {e}"));
            }
        }
    }
}
