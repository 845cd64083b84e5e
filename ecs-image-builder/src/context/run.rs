//! Typed run state shared by the steps of one build.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::cancellation::CancellationToken;
use crate::client::{EcsClient, Image, Instance};
use crate::config::BuildConfig;
use crate::errors::{BuildError, ContextError};
use crate::retry::RetryProfiles;
use crate::ui::Ui;

/// The run state of one build.
///
/// Collaborators (config, client, ui, cancellation, retry profiles) are
/// fixed at construction. Resources are published by the step that owns
/// them: each accessor returns [`ContextError::Missing`] until then, and
/// write-once setters refuse a second publication.
pub struct RunContext {
    run_id: Uuid,
    /// The validated configuration.
    pub config: Arc<BuildConfig>,
    /// Control-plane access.
    pub client: Arc<dyn EcsClient>,
    /// Operator progress sink.
    pub ui: Arc<dyn Ui>,
    /// Operator cancellation.
    pub cancellation: Arc<CancellationToken>,
    /// Retry policies steps choose from.
    pub retry: RetryProfiles,

    source_image: Option<Image>,
    instance: Option<Instance>,
    ip_address: Option<String>,
    image_id: Option<String>,
    snapshot_ids: Option<Vec<String>>,
    images: BTreeMap<String, String>,

    error: Option<BuildError>,
    halted: bool,
    cancelled: bool,
}

impl RunContext {
    /// Creates the run state for a build.
    pub fn new(
        config: Arc<BuildConfig>,
        client: Arc<dyn EcsClient>,
        ui: Arc<dyn Ui>,
        cancellation: Arc<CancellationToken>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            config,
            client,
            ui,
            cancellation,
            retry: RetryProfiles::default(),
            source_image: None,
            instance: None,
            ip_address: None,
            image_id: None,
            snapshot_ids: None,
            images: BTreeMap::new(),
            error: None,
            halted: false,
            cancelled: false,
        }
    }

    /// Replaces the retry profiles.
    #[must_use]
    pub fn with_retry_profiles(mut self, retry: RetryProfiles) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the run id used in logs.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the token for poll loops that observe cancellation.
    #[must_use]
    pub fn cancel_token(&self) -> Option<&CancellationToken> {
        Some(self.cancellation.as_ref())
    }

    /// Returns the image the instance boots from.
    pub fn source_image(&self) -> Result<&Image, ContextError> {
        self.source_image
            .as_ref()
            .ok_or(ContextError::Missing("source_image"))
    }

    /// Publishes the source image.
    pub fn set_source_image(&mut self, image: Image) -> Result<(), ContextError> {
        set_once(&mut self.source_image, image, "source_image")
    }

    /// Returns the build instance.
    pub fn instance(&self) -> Result<&Instance, ContextError> {
        self.instance.as_ref().ok_or(ContextError::Missing("instance"))
    }

    /// Publishes the build instance.
    pub fn set_instance(&mut self, instance: Instance) -> Result<(), ContextError> {
        set_once(&mut self.instance, instance, "instance")
    }

    /// Replaces the published instance with a freshly described one.
    pub fn refresh_instance(&mut self, instance: Instance) -> Result<(), ContextError> {
        match &mut self.instance {
            Some(current) if current.instance_id == instance.instance_id => {
                *current = instance;
                Ok(())
            }
            Some(_) => Err(ContextError::AlreadySet("instance")),
            None => Err(ContextError::Missing("instance")),
        }
    }

    /// Returns the address the communicator connects to.
    pub fn ip_address(&self) -> Result<&str, ContextError> {
        self.ip_address
            .as_deref()
            .ok_or(ContextError::Missing("ip_address"))
    }

    /// Publishes the communicator address.
    pub fn set_ip_address(&mut self, ip_address: impl Into<String>) -> Result<(), ContextError> {
        set_once(&mut self.ip_address, ip_address.into(), "ip_address")
    }

    /// Returns the image captured in the build region.
    pub fn image_id(&self) -> Result<&str, ContextError> {
        self.image_id.as_deref().ok_or(ContextError::Missing("image_id"))
    }

    /// Publishes the captured image.
    pub fn set_image_id(&mut self, image_id: impl Into<String>) -> Result<(), ContextError> {
        set_once(&mut self.image_id, image_id.into(), "image_id")
    }

    /// Returns the snapshots backing the captured image.
    pub fn snapshot_ids(&self) -> Result<&[String], ContextError> {
        self.snapshot_ids
            .as_deref()
            .ok_or(ContextError::Missing("snapshot_ids"))
    }

    /// Publishes the snapshots of the captured image.
    pub fn set_snapshot_ids(&mut self, snapshot_ids: Vec<String>) -> Result<(), ContextError> {
        set_once(&mut self.snapshot_ids, snapshot_ids, "snapshot_ids")
    }

    /// Returns the image recorded for every region so far.
    #[must_use]
    pub fn images(&self) -> &BTreeMap<String, String> {
        &self.images
    }

    /// Records the image of a region; a later record for the same region
    /// (an encrypted in-place copy) replaces the earlier one.
    pub fn record_image(&mut self, region: impl Into<String>, image_id: impl Into<String>) {
        self.images.insert(region.into(), image_id.into());
    }

    /// Marks the run halted. The first error is the one reported.
    pub fn mark_halted(&mut self, error: BuildError) {
        self.halted = true;
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Marks the run cancelled.
    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Returns true once a step halted the run.
    #[must_use]
    pub fn halted(&self) -> bool {
        self.halted
    }

    /// Returns true once cancellation stopped the run.
    #[must_use]
    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    /// Returns true if cleanup should roll back what the run produced.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.halted || self.cancelled
    }

    /// Returns the error that halted the run.
    #[must_use]
    pub fn error(&self) -> Option<&BuildError> {
        self.error.as_ref()
    }

    /// Takes the error that halted the run.
    pub fn take_error(&mut self) -> Option<BuildError> {
        self.error.take()
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, key: &'static str) -> Result<(), ContextError> {
    if slot.is_some() {
        return Err(ContextError::AlreadySet(key));
    }
    *slot = Some(value);
    Ok(())
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("instance", &self.instance.as_ref().map(|i| &i.instance_id))
            .field("ip_address", &self.ip_address)
            .field("image_id", &self.image_id)
            .field("images", &self.images)
            .field("halted", &self.halted)
            .field("cancelled", &self.cancelled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InstanceStatus;
    use crate::testing::TestContext;

    fn instance(id: &str, status: InstanceStatus) -> Instance {
        Instance {
            instance_id: id.into(),
            region_id: "cn-beijing".into(),
            zone_id: String::new(),
            status,
            instance_type: "ecs.n1.tiny".into(),
            public_ip_addresses: Vec::new(),
            private_ip_addresses: Vec::new(),
        }
    }

    #[test]
    fn test_read_before_publish_is_missing() {
        let ctx = TestContext::new().build();
        assert_eq!(ctx.instance().unwrap_err(), ContextError::Missing("instance"));
        assert_eq!(ctx.ip_address().unwrap_err(), ContextError::Missing("ip_address"));
        assert_eq!(ctx.image_id().unwrap_err(), ContextError::Missing("image_id"));
        assert!(ctx.images().is_empty());
    }

    #[test]
    fn test_write_once() {
        let mut ctx = TestContext::new().build();
        ctx.set_ip_address("10.0.0.1").unwrap();
        assert_eq!(
            ctx.set_ip_address("10.0.0.2"),
            Err(ContextError::AlreadySet("ip_address"))
        );
        assert_eq!(ctx.ip_address().unwrap(), "10.0.0.1");
    }

    #[test]
    fn test_refresh_instance() {
        let mut ctx = TestContext::new().build();
        assert_eq!(
            ctx.refresh_instance(instance("i-1", InstanceStatus::Running)),
            Err(ContextError::Missing("instance"))
        );

        ctx.set_instance(instance("i-1", InstanceStatus::Stopped)).unwrap();
        ctx.refresh_instance(instance("i-1", InstanceStatus::Running))
            .unwrap();
        assert_eq!(ctx.instance().unwrap().status, InstanceStatus::Running);

        assert!(ctx
            .refresh_instance(instance("i-2", InstanceStatus::Running))
            .is_err());
    }

    #[test]
    fn test_first_halt_error_wins() {
        let mut ctx = TestContext::new().build();
        assert!(!ctx.is_aborted());

        ctx.mark_halted(BuildError::precondition("first"));
        ctx.mark_halted(BuildError::precondition("second"));

        assert!(ctx.halted());
        assert!(ctx.is_aborted());
        assert_eq!(ctx.take_error().unwrap().to_string(), "first");
    }

    #[test]
    fn test_record_image_replaces_region() {
        let mut ctx = TestContext::new().build();
        ctx.record_image("cn-beijing", "m-1");
        ctx.record_image("cn-hangzhou", "m-2");
        ctx.record_image("cn-beijing", "m-3");

        assert_eq!(ctx.images().len(), 2);
        assert_eq!(ctx.images()["cn-beijing"], "m-3");
    }
}
