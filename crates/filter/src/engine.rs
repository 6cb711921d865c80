//! The classification engine: lists, persistence and remote refresh behind
//! one shared handle.

use std::{
    path::PathBuf,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use {
    tokio::sync::{Mutex, OnceCell},
    tracing::{debug, error, info, instrument, warn},
};

#[cfg(feature = "metrics")]
use adgate_metrics::{counter, names};

use crate::{
    BlocklistStatus, DEFAULT_REMOTE_LIST_URL, DEFAULT_REMOTE_TIMEOUT_SECS, DomainMatchMode, Error,
    RequestContext, Result, Verdict, lists::FilterLists, remote::RemoteListUpdater,
    store::ListStore,
};

/// How a [`BlocklistEngine`] is assembled.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Directory holding the flat list files. `None` keeps everything in
    /// memory, seeded with the built-in defaults.
    pub lists_dir: Option<PathBuf>,
    pub match_mode: DomainMatchMode,
    /// Rewrite the flat lists after admin mutations.
    pub persist_changes: bool,
    /// Remote filter list. `None` disables remote refresh.
    pub remote_url: Option<String>,
    pub remote_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            lists_dir: None,
            match_mode: DomainMatchMode::default(),
            persist_changes: false,
            remote_url: Some(DEFAULT_REMOTE_LIST_URL.to_string()),
            remote_timeout: Duration::from_secs(DEFAULT_REMOTE_TIMEOUT_SECS),
        }
    }
}

/// Which flat file an admin mutation touches.
#[derive(Clone, Copy)]
enum ListKind {
    Domains,
    Whitelist,
}

pub struct BlocklistEngine {
    lists: RwLock<FilterLists>,
    store: Option<ListStore>,
    remote: Option<RemoteListUpdater>,
    persist_changes: bool,
    /// Held across an admin mutation and its save so files are written in
    /// mutation order.
    admin: Mutex<()>,
    ready: OnceCell<()>,
}

impl BlocklistEngine {
    pub fn new(options: EngineOptions) -> Result<Self> {
        let remote = options
            .remote_url
            .filter(|url| !url.trim().is_empty())
            .map(|url| RemoteListUpdater::new(url, options.remote_timeout))
            .transpose()?;
        Ok(Self {
            lists: RwLock::new(FilterLists::new(options.match_mode)),
            store: options.lists_dir.map(ListStore::new),
            remote,
            persist_changes: options.persist_changes,
            admin: Mutex::new(()),
            ready: OnceCell::new(),
        })
    }

    fn read_lists(&self) -> RwLockReadGuard<'_, FilterLists> {
        self.lists.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_lists(&self) -> RwLockWriteGuard<'_, FilterLists> {
        self.lists.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Load the local lists and run the first remote refresh. Runs once;
    /// concurrent and later callers wait for the first run to finish.
    pub async fn initialize(&self) {
        self.ready.get_or_init(|| self.load()).await;
    }

    pub fn is_initialized(&self) -> bool {
        self.ready.initialized()
    }

    async fn load(&self) {
        let match_mode = self.read_lists().match_mode();
        let lists = match &self.store {
            Some(store) => match store.load(match_mode).await {
                Ok(lists) => lists,
                Err(e) => {
                    error!(error = %e, dir = %store.dir().display(), "failed to load local lists, using defaults");
                    FilterLists::with_defaults(match_mode)
                },
            },
            None => FilterLists::with_defaults(match_mode),
        };
        *self.write_lists() = lists;

        if self.remote.is_some()
            && let Err(e) = self.merge_remote().await
        {
            warn!(error = %e, "initial remote refresh failed, continuing with local lists");
        }

        let lists = self.read_lists();
        info!(
            domains = lists.domain_count(),
            patterns = lists.pattern_count(),
            whitelist = lists.whitelist_count(),
            mode = %lists.match_mode(),
            "blocklist engine initialized"
        );
    }

    // ── Classification ──────────────────────────────────────────────────────

    /// Classify a URL or bare host. Waits for initialization on first use.
    pub async fn classify(&self, url: &str, ctx: &RequestContext) -> Result<Verdict> {
        self.initialize().await;
        let verdict = self.read_lists().classify(url, ctx)?;

        #[cfg(feature = "metrics")]
        counter!(
            names::CLASSIFICATIONS_TOTAL,
            "result" => if verdict.blocked { "blocked" } else { "allowed" },
            "reason" => verdict.reason.as_str()
        )
        .increment(1);

        debug!(url, blocked = verdict.blocked, reason = %verdict.reason, "classified");
        Ok(verdict)
    }

    /// Classify with the fail-open policy: errors yield an allowed verdict.
    pub async fn check(&self, url: &str, ctx: &RequestContext) -> Verdict {
        match self.classify(url, ctx).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "classification failed, allowing request");
                #[cfg(feature = "metrics")]
                counter!(names::CLASSIFICATION_ERRORS_TOTAL).increment(1);
                Verdict::fail_open()
            },
        }
    }

    // ── Admin ───────────────────────────────────────────────────────────────

    /// Add a domain to the blocklist. Returns `false` if already present.
    #[instrument(skip(self))]
    pub async fn add_domain(&self, domain: &str) -> Result<bool> {
        let added = self
            .mutate(
                ListKind::Domains,
                |lists| lists.add_domain(domain),
                |lists| lists.remove_domain(domain),
            )
            .await?;
        info!(added, "blocklist domain added");
        Ok(added)
    }

    /// Remove a domain from the blocklist. Returns `false` if it was absent.
    #[instrument(skip(self))]
    pub async fn remove_domain(&self, domain: &str) -> Result<bool> {
        let removed = self
            .mutate(
                ListKind::Domains,
                |lists| lists.remove_domain(domain),
                |lists| lists.add_domain(domain),
            )
            .await?;
        info!(removed, "blocklist domain removed");
        Ok(removed)
    }

    /// Exempt a domain from blocking. Returns `false` if already present.
    #[instrument(skip(self))]
    pub async fn add_whitelist_domain(&self, domain: &str) -> Result<bool> {
        let added = self
            .mutate(
                ListKind::Whitelist,
                |lists| lists.add_whitelist_domain(domain),
                |lists| lists.remove_whitelist_domain(domain),
            )
            .await?;
        info!(added, "whitelist domain added");
        Ok(added)
    }

    /// Apply `change`, then save. A failed save runs `revert` so memory
    /// keeps matching the files.
    async fn mutate(
        &self,
        kind: ListKind,
        change: impl FnOnce(&mut FilterLists) -> Result<bool>,
        revert: impl FnOnce(&mut FilterLists) -> Result<bool>,
    ) -> Result<bool> {
        self.initialize().await;
        let _admin = self.admin.lock().await;
        let changed = change(&mut *self.write_lists())?;
        if !changed {
            return Ok(false);
        }
        if let Err(e) = self.persist(kind).await {
            if let Err(revert_err) = revert(&mut *self.write_lists()) {
                error!(error = %revert_err, "failed to revert list change");
            }
            warn!(error = %e, "failed to save lists, change reverted");
            return Err(e);
        }
        Ok(true)
    }

    async fn persist(&self, kind: ListKind) -> Result<()> {
        let Some(store) = self.store.as_ref().filter(|_| self.persist_changes) else {
            return Ok(());
        };
        // Snapshot under the lock, write without it.
        let snapshot = self.read_lists().clone();
        match kind {
            ListKind::Domains => store.save_domains(&snapshot).await,
            ListKind::Whitelist => store.save_whitelist(&snapshot).await,
        }
    }

    // ── Remote ──────────────────────────────────────────────────────────────

    /// Fetch the remote list and merge its domains. Returns how many were new.
    /// Waits for initialization so the merge is not overwritten by the
    /// initial load.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<usize> {
        self.initialize().await;
        self.merge_remote().await
    }

    async fn merge_remote(&self) -> Result<usize> {
        let remote = self.remote.as_ref().ok_or(Error::RemoteDisabled)?;
        let domains = match remote.fetch().await {
            Ok(domains) => domains,
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(names::REMOTE_REFRESH_TOTAL, "result" => "error").increment(1);
                return Err(e);
            },
        };
        let added = self
            .write_lists()
            .merge_domains(domains.iter().map(String::as_str));

        #[cfg(feature = "metrics")]
        {
            counter!(names::REMOTE_REFRESH_TOTAL, "result" => "ok").increment(1);
            counter!(names::REMOTE_DOMAINS_ADDED_TOTAL).increment(added as u64);
        }

        info!(added, fetched = domains.len(), "remote filter list merged");
        Ok(added)
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    // ── Introspection ───────────────────────────────────────────────────────

    pub fn status(&self) -> BlocklistStatus {
        let (last_update, last_error) = self
            .remote
            .as_ref()
            .map(|remote| {
                let source = remote.source();
                (source.last_fetch_time, source.last_error)
            })
            .unwrap_or_default();
        let lists = self.read_lists();
        BlocklistStatus {
            blocked_domains: lists.domain_count(),
            blocked_patterns: lists.pattern_count(),
            whitelisted_domains: lists.whitelist_count(),
            last_update,
            last_error,
            initialized: self.is_initialized(),
        }
    }
}

impl std::fmt::Debug for BlocklistEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlocklistEngine")
            .field("store", &self.store)
            .field("remote", &self.remote.as_ref().map(|r| r.source().url))
            .field("persist_changes", &self.persist_changes)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {super::*, crate::BlockReason};

    fn offline() -> EngineOptions {
        EngineOptions {
            remote_url: None,
            ..EngineOptions::default()
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::default()
    }

    #[tokio::test]
    async fn classify_initializes_lazily() {
        let engine = BlocklistEngine::new(offline()).unwrap();
        assert!(!engine.status().initialized);

        let verdict = engine.classify("https://doubleclick.net/ad", &ctx()).await.unwrap();
        assert!(verdict.blocked);
        assert_eq!(verdict.reason, BlockReason::DomainMatch);

        let status = engine.status();
        assert!(status.initialized);
        assert!(status.blocked_domains > 0);
        assert!(status.last_update.is_none());
    }

    #[tokio::test]
    async fn check_fails_open_on_malformed_input() {
        let engine = BlocklistEngine::new(offline()).unwrap();
        assert!(engine.classify("http://", &ctx()).await.is_err());

        let verdict = engine.check("http://", &ctx()).await;
        assert_eq!(verdict, Verdict::fail_open());
        let verdict = engine.check("", &ctx()).await;
        assert!(!verdict.blocked);
    }

    #[tokio::test]
    async fn admin_changes_apply_immediately() {
        let engine = BlocklistEngine::new(offline()).unwrap();
        assert!(!engine.check("https://evil-ads.com/x", &ctx()).await.blocked);

        assert!(engine.add_domain("Evil-Ads.com").await.unwrap());
        assert!(!engine.add_domain("evil-ads.com").await.unwrap());
        let verdict = engine.check("https://evil-ads.com/x", &ctx()).await;
        assert!(verdict.blocked);
        assert_eq!(verdict.reason, BlockReason::DomainMatch);

        assert!(engine.remove_domain("evil-ads.com").await.unwrap());
        assert!(!engine.check("https://evil-ads.com/x", &ctx()).await.blocked);

        assert!(engine.add_whitelist_domain("doubleclick.net").await.unwrap());
        let verdict = engine.check("https://doubleclick.net/", &ctx()).await;
        assert!(!verdict.blocked);
        assert_eq!(verdict.reason, BlockReason::Whitelisted);
    }

    #[tokio::test]
    async fn empty_domain_is_a_validation_error() {
        let engine = BlocklistEngine::new(offline()).unwrap();
        let err = engine.add_domain("  ").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn persisted_changes_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let options = EngineOptions {
            lists_dir: Some(dir.path().to_path_buf()),
            persist_changes: true,
            ..offline()
        };

        let engine = BlocklistEngine::new(options.clone()).unwrap();
        engine.add_domain("evil-ads.com").await.unwrap();
        engine.add_whitelist_domain("example.com").await.unwrap();

        let restarted = BlocklistEngine::new(options).unwrap();
        assert!(restarted.check("https://evil-ads.com/", &ctx()).await.blocked);
        assert_eq!(restarted.status().whitelisted_domains, 1);
    }

    #[tokio::test]
    async fn unpersisted_changes_stay_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let options = EngineOptions {
            lists_dir: Some(dir.path().to_path_buf()),
            ..offline()
        };

        let engine = BlocklistEngine::new(options.clone()).unwrap();
        engine.add_domain("evil-ads.com").await.unwrap();

        let restarted = BlocklistEngine::new(options).unwrap();
        assert!(!restarted.check("https://evil-ads.com/", &ctx()).await.blocked);
    }

    #[tokio::test]
    async fn refresh_without_remote_is_an_error() {
        let engine = BlocklistEngine::new(offline()).unwrap();
        assert!(!engine.has_remote());
        assert!(matches!(engine.refresh().await, Err(Error::RemoteDisabled)));
    }

    #[tokio::test]
    async fn refresh_merges_new_domains_once() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/list.txt")
            .with_status(200)
            .with_body("! EasyList\n||ads.example.com^\n||tracker.io^$third-party\n||doubleclick.net^\n")
            .expect_at_least(1)
            .create_async()
            .await;

        let engine = BlocklistEngine::new(EngineOptions {
            remote_url: Some(format!("{}/list.txt", server.url())),
            ..EngineOptions::default()
        })
        .unwrap();

        // First refresh happens during initialization.
        engine.initialize().await;
        let status = engine.status();
        assert!(status.last_update.is_some());
        assert!(status.last_error.is_none());
        let after_init = status.blocked_domains;

        // The same list again adds nothing.
        assert_eq!(engine.refresh().await.unwrap(), 0);
        assert_eq!(engine.status().blocked_domains, after_init);
        assert!(engine.check("https://ads.example.com/", &ctx()).await.blocked);
    }

    #[tokio::test]
    async fn failed_refresh_leaves_lists_untouched() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/list.txt")
            .with_status(503)
            .create_async()
            .await;

        let engine = BlocklistEngine::new(EngineOptions {
            remote_url: Some(format!("{}/list.txt", server.url())),
            ..EngineOptions::default()
        })
        .unwrap();
        engine.initialize().await;
        let before = engine.status();
        assert!(before.initialized);
        assert!(before.last_error.is_some());

        let err = engine.refresh().await.unwrap_err();
        assert!(matches!(err, Error::RemoteStatus(503)));
        let after = engine.status();
        assert_eq!(after.blocked_domains, before.blocked_domains);
        assert!(after.last_update.is_none());
    }

    /// Engine whose list directory turns into a plain file after loading,
    /// so every later save fails.
    async fn engine_with_unwritable_lists(dir: &std::path::Path) -> BlocklistEngine {
        let lists = dir.join("lists");
        let engine = BlocklistEngine::new(EngineOptions {
            lists_dir: Some(lists.clone()),
            persist_changes: true,
            ..offline()
        })
        .unwrap();
        engine.initialize().await;
        std::fs::remove_dir_all(&lists).unwrap();
        std::fs::write(&lists, "").unwrap();
        engine
    }

    #[tokio::test]
    async fn failed_save_reverts_the_change() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with_unwritable_lists(dir.path()).await;
        let domains_before = engine.status().blocked_domains;

        let err = engine.add_domain("evil-ads.com").await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(!engine.check("https://evil-ads.com/x", &ctx()).await.blocked);
        assert_eq!(engine.status().blocked_domains, domains_before);

        assert!(engine.remove_domain("doubleclick.net").await.is_err());
        let verdict = engine.check("https://doubleclick.net/", &ctx()).await;
        assert_eq!(verdict.reason, BlockReason::DomainMatch);

        assert!(engine.add_whitelist_domain("doubleclick.net").await.is_err());
        assert_eq!(engine.status().whitelisted_domains, 0);
        assert!(engine.check("https://doubleclick.net/", &ctx()).await.blocked);
    }

    #[tokio::test]
    async fn concurrent_admin_saves_keep_every_change() {
        let dir = tempfile::tempdir().unwrap();
        let engine = std::sync::Arc::new(
            BlocklistEngine::new(EngineOptions {
                lists_dir: Some(dir.path().to_path_buf()),
                persist_changes: true,
                ..offline()
            })
            .unwrap(),
        );

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let engine = std::sync::Arc::clone(&engine);
                tokio::spawn(async move { engine.add_domain(&format!("ads{i}.example.net")).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().unwrap());
        }

        let saved = std::fs::read_to_string(dir.path().join("domains.txt")).unwrap();
        for i in 0..16 {
            let domain = format!("ads{i}.example.net");
            assert!(saved.lines().any(|l| l == domain), "{domain} missing from file");
        }
    }

    #[tokio::test]
    async fn refresh_waits_for_initialization() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/list.txt")
            .with_status(200)
            .with_body("||ads.example.com^\n||tracker.io^\n")
            .expect(2)
            .create_async()
            .await;

        let engine = BlocklistEngine::new(EngineOptions {
            remote_url: Some(format!("{}/list.txt", server.url())),
            ..EngineOptions::default()
        })
        .unwrap();
        assert!(!engine.is_initialized());

        // Initialization merges the list first, so the explicit refresh finds
        // nothing new and its merge is not overwritten by the initial load.
        assert_eq!(engine.refresh().await.unwrap(), 0);
        assert!(engine.is_initialized());
        assert!(engine.check("https://tracker.io/p", &ctx()).await.blocked);
        assert!(engine.status().blocked_domains > crate::lists::DEFAULT_BLOCKED_DOMAINS.len());
    }
}
