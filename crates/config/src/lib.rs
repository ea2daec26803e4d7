//! Configuration loading and management for cryo
//!
//! This crate resolves the effective [`ReportsConfig`] from defaults, a JSON
//! configuration file and `CRYO_*` environment variables.

pub mod config;
pub mod loader;

mod config_tests;

pub use config::{ConfigSource, ReportsConfig, ReportsConfigBuilder};
pub use loader::ConfigLoader;
