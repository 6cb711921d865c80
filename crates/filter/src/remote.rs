//! Remote filter list (EasyList) fetching.
//!
//! Only network-level domain anchors (`||host^`) are extracted; cosmetic
//! rules, exceptions and option-qualified rules are ignored.

use std::{
    sync::{PoisonError, RwLock},
    time::Duration,
};

use {
    time::OffsetDateTime,
    tracing::{debug, info, instrument, warn},
};

use crate::{Error, RemoteListSource, Result};

/// Extract the domains of `||host^` rules from filter-list text.
///
/// The token between `||` and the first `^` is cut at the first `/`; it is
/// kept only if it looks like a hostname (contains a dot, no wildcards).
pub fn parse_filter_list(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("||")?;
            let end = rest.find('^')?;
            let token = &rest[..end];
            let host = token.split('/').next().unwrap_or_default();
            is_plain_host(host).then(|| host.to_lowercase())
        })
        .collect()
}

fn is_plain_host(host: &str) -> bool {
    host.contains('.')
        && !host.starts_with('.')
        && !host.ends_with('.')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

/// Downloads the remote filter list and tracks fetch health.
#[derive(Debug)]
pub struct RemoteListUpdater {
    client: reqwest::Client,
    source: RwLock<RemoteListSource>,
}

impl RemoteListUpdater {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("adgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            source: RwLock::new(RemoteListSource::new(url)),
        })
    }

    pub fn source(&self) -> RemoteListSource {
        self.source
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Fetch and parse the remote list. Records the fetch time on success
    /// and the error message on failure; list state is not touched here.
    #[instrument(skip(self), fields(url))]
    pub async fn fetch(&self) -> Result<Vec<String>> {
        let url = self.source().url;
        tracing::Span::current().record("url", url.as_str());

        match self.download(&url).await {
            Ok(domains) => {
                let mut source = self.source.write().unwrap_or_else(PoisonError::into_inner);
                source.last_fetch_time = Some(OffsetDateTime::now_utc());
                source.last_error = None;
                info!(domains = domains.len(), "fetched remote filter list");
                Ok(domains)
            },
            Err(e) => {
                warn!(error = %e, "remote filter list fetch failed");
                self.source
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .last_error = Some(e.to_string());
                Err(e)
            },
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<String>> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::RemoteStatus(status.as_u16()));
        }
        let body = resp.text().await?;
        debug!(bytes = body.len(), "downloaded filter list");
        Ok(parse_filter_list(&body))
    }
}
