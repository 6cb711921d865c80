//! Configuration schema. Every section has defaults, so an empty file (or
//! no file at all) yields a working setup.

use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use {
    adgate_filter::{DEFAULT_REMOTE_LIST_URL, DEFAULT_REMOTE_TIMEOUT_SECS, DomainMatchMode, EngineOptions},
    serde::{Deserialize, Serialize},
};

/// Default proxy listen port.
pub const DEFAULT_PORT: u16 = 3000;
/// Default cap on buffered request bodies (10 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
/// Default interval between remote list refreshes (one day).
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 86_400;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdgateConfig {
    pub server: ServerConfig,
    pub lists: ListsConfig,
    pub remote: RemoteConfig,
    pub proxy: ProxyConfig,
    pub logging: LoggingConfig,
}

impl AdgateConfig {
    /// Engine construction options derived from the `lists` and `remote` sections.
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            lists_dir: Some(self.lists.resolved_dir()),
            match_mode: self.lists.match_mode,
            persist_changes: self.lists.persist_changes,
            remote_url: self.remote.url.clone().filter(|url| !url.trim().is_empty()),
            remote_timeout: Duration::from_secs(self.remote.timeout_secs),
        }
    }
}

// ── Server ──────────────────────────────────────────────────────────────────

/// Deployment environment. Production hides internal error details.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

impl FromStr for Environment {
    type Err = std::convert::Infallible;

    /// Case-insensitive; anything unrecognised is development.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "test" => Self::Test,
            _ => Self::Development,
        })
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => f.write_str("development"),
            Self::Production => f.write_str("production"),
            Self::Test => f.write_str("test"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub environment: Environment,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            environment: Environment::default(),
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

// ── Lists ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListsConfig {
    /// Directory holding `domains.txt`, `patterns.txt` and `whitelist.txt`.
    /// Defaults to the platform data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Rewrite the list files when domains are added or removed at runtime.
    pub persist_changes: bool,
    pub match_mode: DomainMatchMode,
}

impl ListsConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(default_lists_dir)
    }
}

/// `<data dir>/blocklists`, or `./data/blocklists` when no home directory exists.
pub fn default_lists_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "adgate")
        .map(|d| d.data_dir().join("blocklists"))
        .unwrap_or_else(|| Path::new("data").join("blocklists"))
}

// ── Remote ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Filter list URL; `None` or empty disables remote refresh.
    pub url: Option<String>,
    pub timeout_secs: u64,
    /// Seconds between background refreshes; `0` disables them.
    pub refresh_interval_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: Some(DEFAULT_REMOTE_LIST_URL.into()),
            timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
        }
    }
}

impl RemoteConfig {
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }
}

// ── Proxy / logging ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub max_body_bytes: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
