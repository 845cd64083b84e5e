//! Build entry point.
//!
//! The [`Builder`] turns a validated configuration into the step sequence,
//! drives it with the [`Runner`] and assembles the [`Artifact`] from the
//! images the run recorded.


use std::fmt;
use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::client::EcsClient;
use crate::config::BuildConfig;
use crate::context::RunContext;
use crate::core::Artifact;
use crate::errors::{BuildError, BuildResult};
use crate::retry::RetryProfiles;
use crate::runner::{RunStatus, Runner};
use crate::steps::{
    CheckImageFamily, CheckSourceImage, ConfigureAddress, CopyImageToRegions, CreateImage,
    CreateInstance, DeleteImages, Provision, Provisioner, RunInstance, Step, StopInstance,
    TagResources,
};
use crate::ui::Ui;

/// Builds one image from a configuration.
#[derive(Clone)]
pub struct Builder {
    config: Arc<BuildConfig>,
    provisioner: Option<Arc<dyn Provisioner>>,
    retry: RetryProfiles,
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("region", &self.config.region)
            .field("image_name", &self.config.image_name)
            .field("has_provisioner", &self.provisioner.is_some())
            .finish_non_exhaustive()
    }
}

impl Builder {
    /// Creates a builder for `config`.
    #[must_use]
    pub fn new(config: BuildConfig) -> Self {
        Self {
            config: Arc::new(config),
            provisioner: None,
            retry: RetryProfiles::default(),
        }
    }

    /// Sets the collaborator that customises the running instance.
    #[must_use]
    pub fn with_provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Replaces the retry profiles used by every wait.
    #[must_use]
    pub fn with_retry_profiles(mut self, retry: RetryProfiles) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Assembles the step sequence for the configuration.
    #[must_use]
    pub fn steps(&self) -> Vec<Box<dyn Step>> {
        let source: Box<dyn Step> = if self.config.image_family.is_some() {
            Box::new(CheckImageFamily::new())
        } else {
            Box::new(CheckSourceImage::new())
        };

        vec![
            source,
            Box::new(CreateInstance::new()),
            Box::new(ConfigureAddress::new()),
            Box::new(RunInstance::new()),
            Box::new(Provision::new(self.provisioner.clone())),
            Box::new(StopInstance::new()),
            Box::new(DeleteImages::new()),
            Box::new(CreateImage::new()),
            Box::new(TagResources::new()),
            Box::new(CopyImageToRegions::new()),
        ]
    }

    /// Runs the build.
    ///
    /// Returns the artifact on success, `None` when the run completed
    /// without producing an image, and the halting error (or
    /// [`BuildError::Cancelled`]) otherwise. Everything the run allocated
    /// has been cleaned up by the time this returns.
    pub async fn run(
        &self,
        client: Arc<dyn EcsClient>,
        ui: Arc<dyn Ui>,
        cancel: Arc<CancellationToken>,
    ) -> BuildResult<Option<Artifact>> {
        self.config.validate()?;

        let mut ctx = RunContext::new(Arc::clone(&self.config), client, ui, Arc::clone(&cancel))
            .with_retry_profiles(self.retry.clone());
        tracing::info!(
            run_id = %ctx.run_id(),
            region = %self.config.region,
            image_name = %self.config.image_name,
            "Starting build"
        );

        let outcome = Runner::new(self.steps()).run(&mut ctx).await;

        match outcome.status {
            RunStatus::Cancelled => Err(BuildError::Cancelled(
                cancel
                    .reason()
                    .unwrap_or_else(|| "cancellation observed".to_string()),
            )),
            RunStatus::Halted => Err(ctx
                .take_error()
                .unwrap_or_else(|| BuildError::precondition("build halted"))),
            RunStatus::Completed => {
                let artifact = Artifact::from_images(ctx.images().clone());
                if let Some(artifact) = &artifact {
                    ctx.ui.say(&artifact.to_string());
                }
                Ok(artifact)
            }
        }
    }
}
