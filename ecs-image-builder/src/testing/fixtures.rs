//! Test fixtures for step and build testing.

use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::config::BuildConfig;
use crate::context::RunContext;
use crate::retry::RetryProfiles;
use crate::ui::CollectingUi;

use super::FakeEcsClient;

/// Region every fixture builds in.
pub const TEST_REGION: &str = "cn-beijing";
/// Source image seeded by [`TestContext::new`].
pub const TEST_SOURCE_IMAGE: &str = "ubuntu_20_04";

/// A valid VPC build of [`TEST_SOURCE_IMAGE`] in [`TEST_REGION`].
#[must_use]
pub fn test_config() -> BuildConfig {
    BuildConfig::new(TEST_REGION, "ecs.n1.tiny", "golden-image")
        .with_source_image(TEST_SOURCE_IMAGE)
        .with_security_group("sg-1")
        .with_vpc("vpc-1", "vsw-1")
}

/// Retry profiles with a one second interval, for paused-clock tests.
#[must_use]
pub fn fast_retry_profiles() -> RetryProfiles {
    RetryProfiles::default().with_interval_ms(1_000)
}

/// Wires a [`RunContext`] to in-memory collaborators.
///
/// The collaborators stay reachable through the public fields so a test
/// can inject failures before the run and inspect the control plane and
/// the operator output afterwards.
#[derive(Debug)]
pub struct TestContext {
    /// Configuration handed to the context.
    pub config: BuildConfig,
    /// In-memory control plane.
    pub client: Arc<FakeEcsClient>,
    /// Recorded operator output.
    pub ui: Arc<CollectingUi>,
    /// Cancellation token shared with the context.
    pub cancel: Arc<CancellationToken>,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    /// Creates a fixture with [`test_config`] and the source image seeded.
    #[must_use]
    pub fn new() -> Self {
        Self::with_client(FakeEcsClient::new())
    }

    /// Creates a fixture around a preconfigured control plane.
    #[must_use]
    pub fn with_client(client: FakeEcsClient) -> Self {
        client.seed_source_image(TEST_REGION, TEST_SOURCE_IMAGE, Some("ubuntu"));
        Self {
            config: test_config(),
            client: Arc::new(client),
            ui: Arc::new(CollectingUi::new()),
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    /// Replaces the configuration.
    #[must_use]
    pub fn with_config(mut self, config: BuildConfig) -> Self {
        self.config = config;
        self
    }

    /// Edits the configuration in place.
    #[must_use]
    pub fn configure(mut self, edit: impl FnOnce(&mut BuildConfig)) -> Self {
        edit(&mut self.config);
        self
    }

    /// Builds a fresh run context over the fixture's collaborators.
    #[must_use]
    pub fn build(&self) -> RunContext {
        RunContext::new(
            Arc::new(self.config.clone()),
            self.client.clone(),
            self.ui.clone(),
            self.cancel.clone(),
        )
        .with_retry_profiles(fast_retry_profiles())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_config_is_valid() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_fixture_seeds_source_image() {
        let fixture = TestContext::new();
        assert!(fixture.client.image(TEST_SOURCE_IMAGE).is_some());
        assert!(fixture.client.snapshot_exists("s-ubuntu_20_04"));
    }

    #[test]
    fn test_build_shares_collaborators() {
        let fixture = TestContext::new().configure(|c| c.image_name = "other".into());
        let ctx = fixture.build();

        assert_eq!(ctx.config.image_name, "other");
        fixture.cancel.cancel("stop");
        assert!(ctx.cancellation.is_cancelled());
        assert_eq!(ctx.retry.default.base_delay_ms, 1_000);
    }
}
