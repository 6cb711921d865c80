//! Flat-file persistence for the filter lists.
//!
//! A list directory holds three line-oriented files: `domains.txt`,
//! `patterns.txt` and `whitelist.txt`. One entry per line; blank lines and
//! lines starting with `#` are ignored.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use crate::{
    DomainMatchMode, Error, Result,
    lists::{DEFAULT_BLOCKED_DOMAINS, DEFAULT_BLOCKED_PATTERNS, FilterLists, compile_patterns},
};

pub const DOMAINS_FILE: &str = "domains.txt";
pub const PATTERNS_FILE: &str = "patterns.txt";
pub const WHITELIST_FILE: &str = "whitelist.txt";

/// Extract list entries from file contents.
pub fn parse_list(contents: &str) -> Vec<&str> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .collect()
}

/// Reads and writes the flat list files of one directory.
#[derive(Debug, Clone)]
pub struct ListStore {
    dir: PathBuf,
}

impl ListStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    async fn read(&self, file: &str) -> Result<String> {
        let path = self.path(file);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::ConfigurationMissing(path)),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, file: &str, entries: &[String]) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut contents = entries.join("\n");
        contents.push('\n');
        tokio::fs::write(self.path(file), contents).await?;
        Ok(())
    }

    /// Load all three lists. Missing domain or pattern files are replaced
    /// by the built-in defaults, which are written back to the directory.
    pub async fn load(&self, match_mode: DomainMatchMode) -> Result<FilterLists> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut lists = FilterLists::new(match_mode);

        match self.read(DOMAINS_FILE).await {
            Ok(contents) => {
                let added = lists.merge_domains(parse_list(&contents));
                info!(count = added, "loaded blocked domains");
            },
            Err(Error::ConfigurationMissing(path)) => {
                warn!(path = %path.display(), "no local domain list, creating default");
                lists.merge_domains(DEFAULT_BLOCKED_DOMAINS.iter().copied());
                self.save_domains(&lists).await?;
            },
            Err(e) => return Err(e),
        }

        match self.read(PATTERNS_FILE).await {
            Ok(contents) => {
                let entries = parse_list(&contents);
                let patterns = compile_patterns(entries.iter().copied());
                if patterns.len() < entries.len() {
                    warn!(
                        skipped = entries.len() - patterns.len(),
                        "some block patterns failed to compile"
                    );
                }
                info!(count = patterns.len(), "loaded blocked patterns");
                lists.set_patterns(patterns);
            },
            Err(Error::ConfigurationMissing(path)) => {
                warn!(path = %path.display(), "no local pattern list, creating default");
                lists.set_patterns(compile_patterns(DEFAULT_BLOCKED_PATTERNS.iter().copied()));
                let defaults: Vec<String> = DEFAULT_BLOCKED_PATTERNS
                    .iter()
                    .map(|p| p.to_string())
                    .collect();
                self.write(PATTERNS_FILE, &defaults).await?;
            },
            Err(e) => return Err(e),
        }

        match self.read(WHITELIST_FILE).await {
            Ok(contents) => {
                let added = lists.merge_whitelist(parse_list(&contents));
                info!(count = added, "loaded whitelisted domains");
            },
            Err(Error::ConfigurationMissing(_)) => warn!("no whitelist found"),
            Err(e) => return Err(e),
        }

        Ok(lists)
    }

    /// Rewrite `domains.txt` from the current blocklist.
    pub async fn save_domains(&self, lists: &FilterLists) -> Result<()> {
        self.write(DOMAINS_FILE, &lists.domains_sorted()).await
    }

    /// Rewrite `whitelist.txt` from the current whitelist.
    pub async fn save_whitelist(&self, lists: &FilterLists) -> Result<()> {
        self.write(WHITELIST_FILE, &lists.whitelist_sorted()).await
    }
}
