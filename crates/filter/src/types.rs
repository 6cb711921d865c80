//! Core types shared by the classification engine, the stats aggregator and
//! the gateway.

use {
    serde::{Deserialize, Serialize},
    time::OffsetDateTime,
};

/// Default remote filter list (EasyList).
pub const DEFAULT_REMOTE_LIST_URL: &str = "https://easylist.to/easylist/easylist.txt";

/// Default timeout for fetching the remote filter list.
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 30;

// ── Verdict ─────────────────────────────────────────────────────────────────

/// Why a URL was blocked or allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockReason {
    /// Host is on the whitelist; nothing else is checked.
    Whitelisted,
    /// Host matched an entry of the domain blocklist.
    DomainMatch,
    /// Full URL matched one of the compiled patterns.
    PatternMatch,
    /// User agent looks like a bot, crawler, scraper or spider.
    SuspiciousAgent,
    /// No rule applied.
    None,
}

impl BlockReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Whitelisted => "whitelisted",
            Self::DomainMatch => "domain-match",
            Self::PatternMatch => "pattern-match",
            Self::SuspiciousAgent => "suspicious-agent",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The rule responsible for a verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum BlockRule {
    Domain(String),
    Pattern(String),
}

/// Classification outcome for one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub blocked: bool,
    pub reason: BlockReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<BlockRule>,
}

impl Verdict {
    #[must_use]
    pub fn allowed(reason: BlockReason) -> Self {
        Self {
            blocked: false,
            reason,
            rule: None,
        }
    }

    #[must_use]
    pub fn blocked(reason: BlockReason, rule: Option<BlockRule>) -> Self {
        Self {
            blocked: true,
            reason,
            rule,
        }
    }

    /// Verdict used when classification could not complete.
    #[must_use]
    pub fn fail_open() -> Self {
        Self::allowed(BlockReason::None)
    }
}

/// Request metadata that participates in classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer: Option<String>,
}

// ── Domain matching ─────────────────────────────────────────────────────────

/// How hostnames are compared against list entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainMatchMode {
    /// Blocklist: either string contains the other. Whitelist: either string
    /// ends with the other. Broad; `ads.example.com` on the blocklist also
    /// blocks `example.com`.
    #[default]
    Substring,
    /// Host equals the entry or is a dot-separated subdomain of it.
    Suffix,
}

impl DomainMatchMode {
    /// Check a hostname against a blocklist entry.
    pub fn blocks(self, host: &str, entry: &str) -> bool {
        match self {
            Self::Substring => host.contains(entry) || entry.contains(host),
            Self::Suffix => is_same_or_subdomain(host, entry),
        }
    }

    /// Check a hostname against a whitelist entry.
    pub fn exempts(self, host: &str, entry: &str) -> bool {
        match self {
            Self::Substring => host.ends_with(entry) || entry.ends_with(host),
            Self::Suffix => is_same_or_subdomain(host, entry),
        }
    }
}

fn is_same_or_subdomain(host: &str, entry: &str) -> bool {
    host == entry
        || host
            .strip_suffix(entry)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

impl std::fmt::Display for DomainMatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Substring => write!(f, "substring"),
            Self::Suffix => write!(f, "suffix"),
        }
    }
}

// ── Remote source / status ──────────────────────────────────────────────────

/// Freshness and health of the remote filter list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteListSource {
    pub url: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_fetch_time: Option<OffsetDateTime>,
    pub last_error: Option<String>,
}

impl RemoteListSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            last_fetch_time: None,
            last_error: None,
        }
    }
}

/// Snapshot of the engine's list sizes and readiness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlocklistStatus {
    pub blocked_domains: usize,
    pub blocked_patterns: usize,
    pub whitelisted_domains: usize,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_update: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub initialized: bool,
}

// ── Tests ───────────────────────────────────────────────────────────────────
