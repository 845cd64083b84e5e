//! Observability utilities.
//!
//! Diagnostic logging goes through `tracing`; operator-facing progress goes
//! through [`crate::ui::Ui`]. This module installs the subscriber and times
//! steps.

mod logging;
mod timer;

pub use logging::{init_logging, LogFormat};
pub use timer::StepTimer;
