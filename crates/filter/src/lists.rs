//! In-memory filter lists and the classification algorithm.
//!
//! [`FilterLists`] owns the domain blocklist, the whitelist and the compiled
//! URL patterns. It is plain data: the engine wraps it in a lock and every
//! classify call runs against one consistent view.

use std::collections::HashSet;

use {regex::RegexBuilder, tracing::warn, url::Url};

use crate::{BlockReason, BlockRule, DomainMatchMode, Error, RequestContext, Result, Verdict};

/// Common ad and tracking domains used when no local list exists.
pub const DEFAULT_BLOCKED_DOMAINS: &[&str] = &[
    "doubleclick.net",
    "googlesyndication.com",
    "googleadservices.com",
    "facebook.com/tr",
    "google-analytics.com",
    "googletagmanager.com",
    "ads.twitter.com",
    "amazon-adsystem.com",
    "adsystem.com",
    "adsense.com",
    "adnxs.com",
    "outbrain.com",
    "taboola.com",
    "scorecardresearch.com",
    "quantserve.com",
    "chartbeat.com",
];

/// URL fragments used when no local pattern list exists.
pub const DEFAULT_BLOCKED_PATTERNS: &[&str] = &[
    "/ads/",
    "/advertising/",
    "/banner/",
    "/popup/",
    "/tracking/",
    "googleads",
    "facebook.*ads",
    "amazon.*ads",
    "twitter.*ads",
];

/// User-agent fragments that mark automated clients.
const SUSPICIOUS_AGENT_MARKERS: &[&str] = &["bot", "crawler", "scraper", "spider"];

// ── Patterns ────────────────────────────────────────────────────────────────

/// A case-insensitive URL pattern, compiled once.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    source: String,
    regex: regex::Regex,
}

impl CompiledPattern {
    pub fn compile(source: &str) -> Result<Self> {
        let source = source.trim();
        let regex = RegexBuilder::new(source)
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::InvalidPattern {
                pattern: source.to_string(),
                source: e,
            })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, url: &str) -> bool {
        self.regex.is_match(url)
    }
}

/// Compile every pattern, skipping (and logging) the ones that fail.
pub fn compile_patterns<'a>(sources: impl IntoIterator<Item = &'a str>) -> Vec<CompiledPattern> {
    sources
        .into_iter()
        .filter_map(|source| match CompiledPattern::compile(source) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!(error = %e, "skipping invalid block pattern");
                None
            },
        })
        .collect()
}

// ── Target parsing ──────────────────────────────────────────────────────────

/// Parse a classification target. Bare hosts get an `http://` scheme.
pub fn parse_target(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::classification(raw, "empty target"));
    }
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    let url = Url::parse(&candidate).map_err(|e| Error::classification(raw, e.to_string()))?;
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(Error::classification(raw, "target has no host")),
    }
}

/// Hostname of a classification target, if it parses.
pub fn target_host(raw: &str) -> Option<String> {
    parse_target(raw)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string))
}

fn normalize_domain(domain: &str) -> Option<String> {
    let domain = domain.trim().to_lowercase();
    (!domain.is_empty()).then_some(domain)
}

fn is_suspicious_agent(user_agent: &str) -> bool {
    let user_agent = user_agent.to_lowercase();
    SUSPICIOUS_AGENT_MARKERS
        .iter()
        .any(|marker| user_agent.contains(marker))
}

// ── Lists ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct FilterLists {
    domains: HashSet<String>,
    patterns: Vec<CompiledPattern>,
    whitelist: HashSet<String>,
    match_mode: DomainMatchMode,
}

impl FilterLists {
    pub fn new(match_mode: DomainMatchMode) -> Self {
        Self {
            match_mode,
            ..Self::default()
        }
    }

    /// Lists populated with the built-in domains and patterns.
    pub fn with_defaults(match_mode: DomainMatchMode) -> Self {
        let mut lists = Self::new(match_mode);
        lists.merge_domains(DEFAULT_BLOCKED_DOMAINS.iter().copied());
        lists.set_patterns(compile_patterns(DEFAULT_BLOCKED_PATTERNS.iter().copied()));
        lists
    }

    pub fn match_mode(&self) -> DomainMatchMode {
        self.match_mode
    }

    /// Classify `raw` (a bare host or a full URL).
    ///
    /// Order: whitelist, domain blocklist, URL patterns, user agent.
    pub fn classify(&self, raw: &str, ctx: &RequestContext) -> Result<Verdict> {
        let url = parse_target(raw)?;
        let host = url.host_str().unwrap_or_default().to_lowercase();

        if self.is_whitelisted(&host) {
            return Ok(Verdict::allowed(BlockReason::Whitelisted));
        }
        if let Some(entry) = self.blocking_domain(&host) {
            return Ok(Verdict::blocked(
                BlockReason::DomainMatch,
                Some(BlockRule::Domain(entry.to_string())),
            ));
        }
        if let Some(pattern) = self.blocking_pattern(url.as_str()) {
            return Ok(Verdict::blocked(
                BlockReason::PatternMatch,
                Some(BlockRule::Pattern(pattern.source().to_string())),
            ));
        }
        if ctx.user_agent.as_deref().is_some_and(is_suspicious_agent) {
            return Ok(Verdict::blocked(BlockReason::SuspiciousAgent, None));
        }
        Ok(Verdict::allowed(BlockReason::None))
    }

    pub fn is_whitelisted(&self, host: &str) -> bool {
        self.whitelist.contains(host)
            || self
                .whitelist
                .iter()
                .any(|entry| self.match_mode.exempts(host, entry))
    }

    /// The blocklist entry matching `host`, if any.
    pub fn blocking_domain(&self, host: &str) -> Option<&str> {
        if let Some(entry) = self.domains.get(host) {
            return Some(entry.as_str());
        }
        self.domains
            .iter()
            .find(|entry| self.match_mode.blocks(host, entry))
            .map(String::as_str)
    }

    pub fn blocking_pattern(&self, url: &str) -> Option<&CompiledPattern> {
        self.patterns.iter().find(|p| p.is_match(url))
    }

    // ── Mutation ────────────────────────────────────────────────────────────

    /// Add a domain to the blocklist. Returns `false` if it was already there.
    pub fn add_domain(&mut self, domain: &str) -> Result<bool> {
        let domain =
            normalize_domain(domain).ok_or_else(|| Error::validation("Domain is required"))?;
        Ok(self.domains.insert(domain))
    }

    /// Remove a domain from the blocklist. Returns `false` if it was absent.
    pub fn remove_domain(&mut self, domain: &str) -> Result<bool> {
        let domain =
            normalize_domain(domain).ok_or_else(|| Error::validation("Domain is required"))?;
        Ok(self.domains.remove(&domain))
    }

    /// Add a domain to the whitelist. Returns `false` if it was already there.
    pub fn add_whitelist_domain(&mut self, domain: &str) -> Result<bool> {
        let domain =
            normalize_domain(domain).ok_or_else(|| Error::validation("Domain is required"))?;
        Ok(self.whitelist.insert(domain))
    }

    /// Remove a domain from the whitelist. Returns `false` if it was absent.
    pub fn remove_whitelist_domain(&mut self, domain: &str) -> Result<bool> {
        let domain =
            normalize_domain(domain).ok_or_else(|| Error::validation("Domain is required"))?;
        Ok(self.whitelist.remove(&domain))
    }

    /// Append domains to the blocklist; returns how many were new.
    pub fn merge_domains<'a>(&mut self, domains: impl IntoIterator<Item = &'a str>) -> usize {
        domains
            .into_iter()
            .filter_map(normalize_domain)
            .filter(|d| self.domains.insert(d.clone()))
            .count()
    }

    /// Append domains to the whitelist; returns how many were new.
    pub fn merge_whitelist<'a>(&mut self, domains: impl IntoIterator<Item = &'a str>) -> usize {
        domains
            .into_iter()
            .filter_map(normalize_domain)
            .filter(|d| self.whitelist.insert(d.clone()))
            .count()
    }

    pub fn set_patterns(&mut self, patterns: Vec<CompiledPattern>) {
        self.patterns = patterns;
    }

    // ── Introspection ───────────────────────────────────────────────────────

    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn whitelist_count(&self) -> usize {
        self.whitelist.len()
    }

    /// Blocked domains in sorted order.
    pub fn domains_sorted(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.domains.iter().cloned().collect();
        domains.sort();
        domains
    }

    /// Whitelisted domains in sorted order.
    pub fn whitelist_sorted(&self) -> Vec<String> {
        let mut domains: Vec<String> = self.whitelist.iter().cloned().collect();
        domains.sort();
        domains
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
