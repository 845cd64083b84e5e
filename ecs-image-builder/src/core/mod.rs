//! Core domain types shared by every step.
//!
//! This module contains:
//! - Step actions and statuses
//! - The three-valued `Trilean` setting
//! - The build `Artifact`

mod artifact;
mod status;
mod trilean;

pub use artifact::{Artifact, BUILDER_ID};
pub use status::{StepAction, StepStatus};
pub use trilean::Trilean;
