// src/config/mod.rs

//! Configuration loading and validation for traind.
//!
//! Responsibilities:
//! - Define the TOML-backed raw model and the validated `Config` (`model.rs`).
//! - Load an optional file and overlay environment variables (`loader.rs`).
//! - Apply defaults and check invariants (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{apply_env, load_and_validate, load_from_path, load_with_env};
pub use model::{
    Config, DaemonConfig, PluginConfig, RawConfig, ServiceBusConfig, StorageQueueConfig,
};
