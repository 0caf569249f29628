//! Common test utilities for content-press integration tests

#[allow(dead_code)]
pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::*;
