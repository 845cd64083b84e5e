//! Testing utilities for builds.
//!
//! This module provides:
//! - An in-memory control plane implementing `EcsClient`
//! - Fixtures wiring a `RunContext` to it
//! - Journaling mock steps for runner tests

mod fake_client;
mod fixtures;
mod mocks;

pub use fake_client::{FakeCall, FakeEcsClient};
pub use fixtures::{fast_retry_profiles, test_config, TestContext, TEST_REGION, TEST_SOURCE_IMAGE};
pub use mocks::{journal, Journal, MockBehavior, MockStep};
