use async_trait::async_trait;

use super::{halt, Step};
use crate::client::{Image, ImageFilter};
use crate::config::BuildConfig;
use crate::context::RunContext;
use crate::core::StepAction;
use crate::errors::BuildError;

/// Clears the way for the images this build will create.
///
/// Images already carrying one of the target names halt the build unless
/// `image_force_delete` is set, in which case they are deleted, together
/// with their snapshots when `image_force_delete_snapshots` is set too.
#[derive(Debug, Default)]
pub struct DeleteImages;

impl DeleteImages {
    /// Creates the step.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// The `(region, image name)` pairs the build will produce.
fn target_names(config: &BuildConfig) -> Vec<(String, String)> {
    let mut targets = vec![(config.region.clone(), config.image_name.clone())];
    for (index, region) in config.image_copy_regions.iter().enumerate() {
        let name = config
            .image_copy_names
            .get(index)
            .filter(|n| !n.is_empty())
            .unwrap_or(&config.image_name);
        let target = (region.clone(), name.clone());
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    targets
}

#[async_trait]
impl Step for DeleteImages {
    fn name(&self) -> &str {
        "delete_images"
    }

    async fn run(&mut self, ctx: &mut RunContext) -> StepAction {
        let source_image_id = ctx.source_image().ok().map(|i| i.image_id.clone());

        for (region, name) in target_names(&ctx.config) {
            let filter = ImageFilter::in_region(&region).with_image_name(&name);
            let existing: Vec<Image> = match ctx.client.describe_images(&filter).await {
                Ok(images) => images
                    .into_iter()
                    .filter(|i| Some(&i.image_id) != source_image_id.as_ref())
                    .collect(),
                Err(e) => return halt(ctx, self.name(), e.into(), "Error querying images"),
            };

            for image in existing {
                if !ctx.config.image_force_delete {
                    return halt(
                        ctx,
                        self.name(),
                        BuildError::precondition(format!(
                            "Image name {name} is used by an existing image: {} in {region}; \
                             set image_force_delete to replace it",
                            image.image_id
                        )),
                        "",
                    );
                }

                ctx.ui.say(&format!(
                    "Deleting duplicated image {} in {region}...",
                    image.image_id
                ));
                if let Err(e) = ctx.client.delete_image(&region, &image.image_id, true).await {
                    return halt(ctx, self.name(), e.into(), "Failed to delete image");
                }

                if ctx.config.image_force_delete_snapshots {
                    for snapshot_id in image.snapshot_ids() {
                        if let Err(e) = ctx.client.delete_snapshot(&region, &snapshot_id, true).await
                        {
                            return halt(ctx, self.name(), e.into(), "Failed to delete snapshot");
                        }
                    }
                }
                ctx.ui
                    .message(&format!("Deleted image: {}", image.image_id));
            }
        }

        StepAction::Continue
    }

    async fn cleanup(&mut self, _ctx: &mut RunContext) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ops, DiskDeviceMapping, ImageStatus};
    use crate::testing::TestContext;
    use pretty_assertions::assert_eq;

    fn leftover(region: &str, id: &str, name: &str) -> Image {
        Image {
            image_id: id.into(),
            image_name: name.into(),
            region_id: region.into(),
            status: ImageStatus::Available,
            image_family: None,
            disk_device_mappings: vec![DiskDeviceMapping {
                snapshot_id: format!("s-{id}"),
                device: "/dev/xvda".into(),
                size: 40,
                encrypted: false,
            }],
        }
    }

    #[test]
    fn test_target_names_follow_copy_names() {
        let config = crate::testing::test_config().with_copies([
            ("cn-hangzhou", "copy-a"),
            ("cn-shenzhen", ""),
            ("cn-hangzhou", "copy-a"),
        ]);

        assert_eq!(
            target_names(&config),
            vec![
                ("cn-beijing".to_string(), "golden-image".to_string()),
                ("cn-hangzhou".to_string(), "copy-a".to_string()),
                ("cn-shenzhen".to_string(), "golden-image".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_duplicates_continues() {
        let fixture = TestContext::new();
        let mut ctx = fixture.build();

        assert_eq!(DeleteImages::new().run(&mut ctx).await, StepAction::Continue);
        assert_eq!(fixture.client.calls_of(ops::DELETE_IMAGE), 0);
    }

    #[tokio::test]
    async fn test_duplicate_without_force_halts() {
        let fixture = TestContext::new();
        fixture
            .client
            .seed_image(leftover("cn-beijing", "m-old", "golden-image"));
        let mut ctx = fixture.build();

        assert_eq!(DeleteImages::new().run(&mut ctx).await, StepAction::Halt);
        assert!(ctx
            .error()
            .unwrap()
            .to_string()
            .contains("used by an existing image: m-old"));
        assert!(fixture.client.image("m-old").is_some());
    }

    #[tokio::test]
    async fn test_force_delete_with_snapshots() {
        let fixture = TestContext::new().configure(|c| {
            c.image_force_delete = true;
            c.image_force_delete_snapshots = true;
            c.image_copy_regions = vec!["cn-hangzhou".into()];
        });
        fixture
            .client
            .seed_image(leftover("cn-beijing", "m-old", "golden-image"));
        fixture
            .client
            .seed_image(leftover("cn-hangzhou", "m-old-hz", "golden-image"));
        let mut ctx = fixture.build();

        assert_eq!(DeleteImages::new().run(&mut ctx).await, StepAction::Continue);

        assert!(fixture.client.image("m-old").is_none());
        assert!(fixture.client.image("m-old-hz").is_none());
        assert!(!fixture.client.snapshot_exists("s-m-old"));
        assert!(!fixture.client.snapshot_exists("s-m-old-hz"));
        assert!(fixture.client.image("ubuntu_20_04").is_some());
    }

    #[tokio::test]
    async fn test_force_delete_keeps_snapshots_by_default() {
        let fixture = TestContext::new().configure(|c| c.image_force_delete = true);
        fixture
            .client
            .seed_image(leftover("cn-beijing", "m-old", "golden-image"));
        let mut ctx = fixture.build();

        assert_eq!(DeleteImages::new().run(&mut ctx).await, StepAction::Continue);
        assert!(fixture.client.image("m-old").is_none());
        assert!(fixture.client.snapshot_exists("s-m-old"));
    }
}
