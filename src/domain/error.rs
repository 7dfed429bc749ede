//! Error taxonomy for the crawl pipeline
//!
//! Failure classes differ in blast radius:
//! - `AuthError` is fatal for one source's units only,
//! - `FetchError` aborts pagination for one unit, keeping collected pages,
//! - `ParseError` drops one item,
//! - `PersistenceError` degrades to per-record writes before skipping,
//! - `SetupError` is the only run-fatal class and occurs before any
//!   source I/O.

use thiserror::Error;

/// Session/token acquisition failed. Fails every unit of the source.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("landing page for '{source}' unreachable: {reason}")]
    LandingUnreachable { source: String, reason: String },

    #[error("no anti-forgery token found for '{source}' after {attempts} attempts")]
    TokenNotFound { source: String, attempts: u32 },
}

/// Transient request or page-level parse failure mid-pagination.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("page {page} could not be parsed")]
    PageParse {
        page: u32,
        #[source]
        source: ParseError,
    },

    #[error("fetch cancelled by run deadline")]
    Cancelled,
}

impl FetchError {
    /// Map a transport error, keeping the URL for context.
    pub fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Transport {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// A single raw item (or one page payload) could not be interpreted.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("malformed payload: {reason}")]
    MalformedPayload { reason: String },

    #[error("item has no title")]
    MissingTitle,

    #[error("no numeric external id in item '{title}'")]
    MissingExternalId { title: String },
}

/// A store write or query failed.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database path '{path}' is not usable: {reason}")]
    BadPath { path: String, reason: String },
}

/// Fatal setup failure. The only class that aborts the whole run.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("configuration could not be loaded from '{path}': {reason}")]
    Config { path: String, reason: String },

    #[error("backing store unreachable")]
    StoreUnreachable(#[source] PersistenceError),

    #[error("logging initialization failed: {reason}")]
    Logging { reason: String },
}

