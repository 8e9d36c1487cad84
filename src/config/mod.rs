// src/config/mod.rs

//! Configuration loading for backdag.
//!
//! - [`model`] is the direct serde mapping of the TOML file.
//! - [`loader`] reads and deserializes a file.
//! - [`validate`] runs semantic checks (duplicate ids/paths, dangling
//!   references, dependency cycles) before anything is built from it.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{
    ConfigFile, Defaults, ExecConfig, GroupConfig, ObjectConfig, SettingsSection, StepConfig,
    TaskConfig,
};
pub use validate::validate_config;
