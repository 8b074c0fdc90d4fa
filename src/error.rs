use reqwest::StatusCode;
use thiserror::Error;

/// Error taxonomy for the crawl.
///
/// `Fetch` and `Status` are transport-level and retryable in principle;
/// `Parse` signals the site layout drifted away from our selectors;
/// `Normalize` drops a single film; `Sink` is isolated to one write path.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP status {status} for {url}")]
    Status { status: StatusCode, url: String },

    #[error("parse error at {url}: {reason}")]
    Parse { url: String, reason: String },

    #[error("normalization failed for '{title}': {reason}")]
    Normalize { title: String, reason: String },

    #[error("{sink} sink error: {cause}")]
    Sink {
        sink: &'static str,
        cause: anyhow::Error,
    },
}

impl ScrapeError {
    pub fn parse(url: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn normalize(title: &str, reason: impl Into<String>) -> Self {
        Self::Normalize {
            title: title.to_string(),
            reason: reason.into(),
        }
    }
}
