//! Configuration for adgate: typed schema, file discovery (TOML, YAML or
//! JSON) and environment overrides.

pub mod loader;
pub mod schema;

use std::path::PathBuf;

pub use {
    loader::{apply_env_overrides, discover_config_file, load, load_config_file},
    schema::*,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("unsupported config format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: String, value: String },
}
