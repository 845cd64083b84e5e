//! # ECS Image Builder
//!
//! Provisions an ephemeral ECS instance, customises it, captures it as a
//! machine image and optionally replicates the image into other regions.
//!
//! The crate is organised around:
//!
//! - **Steps**: reversible units of provisioning logic with `run`/`cleanup`
//! - **Runner**: drives the steps in order and rolls back in reverse order
//! - **Poll-retry engine**: turns "accepted" responses into completed states
//! - **Cancellation**: cooperative, observed inside every poll loop
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ecs_image_builder::prelude::*;
//!
//! let config = BuildConfig::new("cn-beijing", "ecs.n1.tiny", "golden-image")
//!     .with_source_image("ubuntu_20_04")
//!     .with_security_group("sg-1")
//!     .with_vpc("vpc-1", "vsw-1");
//!
//! let artifact = Builder::new(config)
//!     .run(client, Arc::new(TracingUi::new()), Arc::new(CancellationToken::new()))
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod builder;
pub mod cancellation;
pub mod client;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod observability;
pub mod retry;
pub mod runner;
pub mod steps;
pub mod testing;
pub mod ui;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::builder::Builder;
    pub use crate::cancellation::CancellationToken;
    pub use crate::client::{ClientExt, EcsClient};
    pub use crate::config::{BuildConfig, DiskMapping};
    pub use crate::context::RunContext;
    pub use crate::core::{Artifact, StepAction, StepStatus, Trilean};
    pub use crate::errors::{BuildError, BuildResult, ProviderError, WaitError};
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::retry::{wait_for_expected, RetryConfig, RetryProfiles, WaitResult};
    pub use crate::runner::{RunOutcome, RunStatus, Runner};
    pub use crate::steps::{Provisioner, ProvisionTarget, Step};
    pub use crate::ui::{TracingUi, Ui};
}
