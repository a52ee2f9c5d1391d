//! Configuration loading and validation

pub mod loader;
pub mod settings;

pub use loader::{config_path, CONFIG_ENV_VAR};
pub use settings::*;
