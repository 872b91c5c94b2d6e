//! Utilities for testing stages and replay journals.
//!
//! This module provides mock stages and temporary-workspace fixtures for
//! writing tests against the stage lifecycle without a real model
//! installation.

mod fixtures;
mod mocks;

pub use fixtures::{init_test_logging, TestRun};
pub use mocks::{shell, HookLog, ProbeStage};
