//! The build artifact: one image per region.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::client::EcsClient;
use crate::errors::{BuildError, BuildResult};
use crate::ui::Ui;

/// Identifies artifacts produced by this builder.
pub const BUILDER_ID: &str = "ecs.image-builder";

/// The images a successful build produced, keyed by region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Builder that produced the artifact.
    pub builder_id: String,
    /// Region to image id.
    pub images: BTreeMap<String, String>,
    /// When the artifact was assembled.
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Assembles an artifact from the images recorded during a build.
    ///
    /// Returns `None` when no image was produced.
    #[must_use]
    pub fn from_images(images: BTreeMap<String, String>) -> Option<Self> {
        if images.is_empty() {
            return None;
        }
        Some(Self {
            builder_id: BUILDER_ID.to_string(),
            images,
            created_at: Utc::now(),
        })
    }

    /// Returns `region:image` pairs joined by commas, sorted by region.
    #[must_use]
    pub fn id(&self) -> String {
        self.images
            .iter()
            .map(|(region, image)| format!("{region}:{image}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Returns the image produced in `region`.
    #[must_use]
    pub fn image_in(&self, region: &str) -> Option<&str> {
        self.images.get(region).map(String::as_str)
    }

    /// Serialises the artifact for manifest writers.
    pub fn to_manifest(&self) -> BuildResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deletes every image of the artifact.
    ///
    /// All deletions are attempted; failures are reported together.
    pub async fn destroy(&self, client: &dyn EcsClient, ui: &dyn Ui) -> BuildResult<()> {
        let mut failures = Vec::new();

        for (region, image_id) in &self.images {
            ui.say(&format!("Deleting image {image_id} in {region}"));
            if let Err(e) = client.delete_image(region, image_id, true).await {
                ui.error(&format!("Failed to delete image {image_id}: {e}"));
                failures.push(format!("{region}:{image_id}: {e}"));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(BuildError::Destroy(failures))
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ECS images were created:")?;
        writeln!(f)?;
        for (region, image) in &self.images {
            writeln!(f, "{region}: {image}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ops, ImageStatus};
    use crate::errors::ProviderError;
    use crate::testing::FakeEcsClient;
    use crate::ui::CollectingUi;
    use pretty_assertions::assert_eq;

    fn images(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(r, i)| ((*r).to_string(), (*i).to_string()))
            .collect()
    }

    #[test]
    fn test_empty_images_produce_no_artifact() {
        assert!(Artifact::from_images(BTreeMap::new()).is_none());
    }

    #[test]
    fn test_id_is_sorted_by_region() {
        let artifact =
            Artifact::from_images(images(&[("cn-shenzhen", "m-3"), ("cn-beijing", "m-1")]))
                .unwrap();

        assert_eq!(artifact.id(), "cn-beijing:m-1,cn-shenzhen:m-3");
        assert_eq!(artifact.builder_id, BUILDER_ID);
        assert_eq!(artifact.image_in("cn-shenzhen"), Some("m-3"));
    }

    #[test]
    fn test_display_lists_every_region() {
        let artifact = Artifact::from_images(images(&[("cn-beijing", "m-1")])).unwrap();
        let text = artifact.to_string();
        assert!(text.starts_with("ECS images were created:"));
        assert!(text.contains("cn-beijing: m-1"));
    }

    #[test]
    fn test_manifest_round_trips() {
        let artifact = Artifact::from_images(images(&[("cn-beijing", "m-1")])).unwrap();
        let json = artifact.to_manifest().unwrap();
        let parsed: Artifact = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, artifact);
    }

    #[tokio::test]
    async fn test_destroy_reports_failures_and_continues() {
        let client = FakeEcsClient::new();
        client.seed_source_image("cn-beijing", "m-1", None);
        client.seed_source_image("cn-hangzhou", "m-2", None);
        client.fail_next(ops::DELETE_IMAGE, ProviderError::new("Forbidden", "nope"));
        let ui = CollectingUi::new();

        let artifact =
            Artifact::from_images(images(&[("cn-beijing", "m-1"), ("cn-hangzhou", "m-2")]))
                .unwrap();
        let err = artifact.destroy(&client, &ui).await.unwrap_err();

        match err {
            BuildError::Destroy(failures) => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].starts_with("cn-beijing:m-1"));
            }
            other => panic!("expected destroy error, got {other:?}"),
        }
        assert_eq!(client.calls_of(ops::DELETE_IMAGE), 2);
        assert!(client.image("m-1").is_some_and(|i| i.status == ImageStatus::Available));
        assert!(client.image("m-2").is_none());
        assert!(ui.contains("Failed to delete image m-1"));
    }
}
