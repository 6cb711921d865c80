use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A local list file does not exist. Recovered by synthesizing defaults.
    #[error("list file not found: {}", .0.display())]
    ConfigurationMissing(PathBuf),

    #[error("remote list fetch failed: {0}")]
    RemoteFetch(#[from] reqwest::Error),

    #[error("remote list source answered with HTTP {0}")]
    RemoteStatus(u16),

    #[error("no remote list source configured")]
    RemoteDisabled,

    #[error("cannot classify {url:?}: {reason}")]
    Classification { url: String, reason: String },

    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Message(String),
}

impl Error {
    #[must_use]
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }

    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    #[must_use]
    pub fn classification(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Classification {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
