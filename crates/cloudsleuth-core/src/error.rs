//! Error types for crawling, checkpointing and reporting.
//!
//! Ownership-verification misses and per-leaf inspection failures are not
//! errors: the first is a control-flow decision inside the crawler, the
//! second is recorded on the leaf itself.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a [`RemoteStore`](crate::remote::RemoteStore) call.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The access token expired. Recoverable once via token refresh.
    #[error("authorization expired")]
    AuthExpired,

    /// The requested path, id, link or cursor does not exist.
    #[error("not found: {what}")]
    NotFound { what: String },

    /// The provider rejected the call.
    #[error("remote API error: {message}")]
    Api { message: String },

    /// Token refresh itself failed.
    #[error("token refresh failed: {message}")]
    RefreshFailed { message: String },

    /// Local I/O while reading or writing content.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Shorthand for a [`RemoteError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }
}

/// Errors loading or persisting the checkpoint artifact.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid checkpoint mapping (truncated, hand-edited,
    /// written by an incompatible version).
    #[error("malformed checkpoint {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A record references a parent that is not part of the checkpoint.
    #[error("checkpoint record {id} references unknown parent {parent}")]
    Orphan { id: String, parent: String },

    /// No record for the walk root.
    #[error("checkpoint {path} has no root record")]
    MissingRoot { path: PathBuf },
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors writing or verifying the report artifact.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("report I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The report holds fewer rows than the checkpoint says were written.
    #[error("report {path} has {found} rows but the checkpoint expects {expected}")]
    Inconsistent {
        path: PathBuf,
        expected: u64,
        found: u64,
    },
}

impl ReportError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failure inspecting one leaf. Recorded on the leaf, never propagated.
#[derive(Debug, Error)]
pub enum InspectError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("scratch file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a readable document: {0}")]
    Archive(#[from] zip::result::ZipError),
}

/// Top-level error for a crawl run.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Report(#[from] ReportError),

    /// The operator interrupted the run. The last checkpoint is the resume point.
    #[error("crawl interrupted")]
    Interrupted,

    /// No team member matched the requested name or email.
    #[error("no team member matches {identity:?}")]
    UnknownMember { identity: String },

    /// No team folder matched the requested name.
    #[error("no team folder named {name:?}")]
    UnknownTeamFolder { name: String },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CrawlError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
