//! Config file discovery, parsing and environment overrides.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{AdgateConfig, ConfigError, Environment};

/// File names probed during discovery, in order.
pub const CONFIG_FILENAMES: &[&str] = &["adgate.toml", "adgate.yaml", "adgate.yml", "adgate.json"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("yaml" | "yml") => Ok(Self::Yaml),
            Some("json") => Ok(Self::Json),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// The per-user config directory (`~/.config/adgate` on Linux).
pub fn user_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "adgate").map(|d| d.config_dir().to_path_buf())
}

/// First existing config file across `dirs`, probing [`CONFIG_FILENAMES`].
pub fn discover_in(dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)))
        .find(|path| path.is_file())
}

/// Discover a config file in the working directory, then the user config dir.
pub fn discover_config_file() -> Option<PathBuf> {
    let mut dirs = vec![PathBuf::from(".")];
    dirs.extend(user_config_dir());
    discover_in(&dirs)
}

pub fn parse_config(raw: &str, format: ConfigFormat) -> Result<AdgateConfig, String> {
    match format {
        ConfigFormat::Toml => toml::from_str(raw).map_err(|e| e.to_string()),
        ConfigFormat::Yaml => {
            // An empty YAML document is `null`, not an empty mapping.
            if raw.trim().is_empty() {
                return Ok(AdgateConfig::default());
            }
            serde_yaml::from_str(raw).map_err(|e| e.to_string())
        },
        ConfigFormat::Json => serde_json::from_str(raw).map_err(|e| e.to_string()),
    }
}

pub fn load_config_file(path: &Path) -> Result<AdgateConfig, ConfigError> {
    let format = ConfigFormat::from_path(path)?;
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&raw, format).map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })
}

/// Load configuration: `explicit` path if given (it must exist), otherwise
/// the first discovered file, otherwise defaults. Process environment
/// overrides are applied last.
pub fn load(explicit: Option<&Path>) -> Result<AdgateConfig, ConfigError> {
    let mut config = match explicit {
        Some(path) if !path.is_file() => return Err(ConfigError::NotFound(path.to_path_buf())),
        Some(path) => load_config_file(path)?,
        None => match discover_config_file() {
            Some(path) => {
                info!(path = %path.display(), "loading config file");
                load_config_file(&path)?
            },
            None => {
                debug!("no config file found, using defaults");
                AdgateConfig::default()
            },
        },
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Apply environment overrides through `lookup`:
///
/// | variable | field |
/// |---|---|
/// | `PORT` | `server.port` |
/// | `ADGATE_BIND` | `server.bind` |
/// | `ADGATE_ENV`, then `NODE_ENV` | `server.environment` |
/// | `ADGATE_LISTS_DIR` | `lists.dir` |
/// | `ADGATE_REMOTE_URL` | `remote.url` (empty disables) |
/// | `ADGATE_LOG` | `logging.level` |
pub fn apply_env_overrides(
    config: &mut AdgateConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(port) = lookup("PORT") {
        config.server.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            key: "PORT".into(),
            value: port.clone(),
        })?;
    }
    if let Some(bind) = lookup("ADGATE_BIND").filter(|v| !v.trim().is_empty()) {
        config.server.bind = bind;
    }
    if let Some(env) = lookup("ADGATE_ENV").or_else(|| lookup("NODE_ENV")) {
        config.server.environment = env.parse().unwrap_or(Environment::Development);
    }
    if let Some(dir) = lookup("ADGATE_LISTS_DIR").filter(|v| !v.trim().is_empty()) {
        config.lists.dir = Some(PathBuf::from(dir));
    }
    if let Some(url) = lookup("ADGATE_REMOTE_URL") {
        config.remote.url = (!url.trim().is_empty()).then_some(url);
    }
    if let Some(level) = lookup("ADGATE_LOG").filter(|v| !v.trim().is_empty()) {
        config.logging.level = level;
    }
    Ok(())
}
