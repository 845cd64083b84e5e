//! Build configuration: serde loading, defaults and validation.

mod build;
mod validate;

pub use build::{
    BuildConfig, CommunicatorConfig, DiskMapping, NetworkConfig, NetworkType,
    DEFAULT_INTERNET_CHARGE_TYPE, DEFAULT_INTERNET_MAX_BANDWIDTH_OUT,
    DEFAULT_WAIT_READY_TIMEOUT_SECS,
};
pub use validate::{validate_image_family, BOOT_MODES};
