//! Acceleration Integration Tests
//!
//! End-to-end behavior through the public facade:
//! - Scenario: KNN, graph and geo batches routed by the registry
//! - Fallback: callers retrying on the CPU after a device failure
//! - Plugins: static plugins, verification outcomes in the capability report
//! - Config: registries built from `strata-accel.toml`

#[path = "../common/mod.rs"]
mod common;

mod config;
mod fallback;
mod plugins;
mod scenario;
