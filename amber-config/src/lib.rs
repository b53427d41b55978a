//! Shared configuration library for Amber.
//!
//! This crate centralizes config loading and validation for the daemon. A
//! TOML file and the process environment are merged into one validated
//! [`Config`] so there is a single source of truth for defaults, precedence,
//! and guard rails.

pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{ConfigLoadError, ConfigLoader};
pub use models::{
    Config, ConfigMetadata, DaemonConfig, EnvConfig, FileConfig, ServerConfig,
    StoreConfig,
};
pub use validation::{ConfigWarning, ConfigWarnings};
