// Error types for the download pipeline

use std::fmt;

use thiserror::Error;

/// Every way a download session can fail.
///
/// Each variant carries the original cause message so the caller can
/// show it directly. None of them are retried inside the core.
#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// Metadata for the URL could not be retrieved, or it has no playable formats
    #[error("{0}")]
    SourceLookup(String),

    /// The requested quality label has no matching source encoding
    #[error("No encoding found for {0}")]
    EncodingNotFound(String),

    /// A byte stream or its sink failed mid-transfer
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// The external mux step exited abnormally
    #[error("Merge failed: {0}")]
    Merge(String),
}

/// Discriminant of [`DownloadError`], used as the payload of a failed session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    SourceLookup,
    EncodingNotFound,
    Transfer,
    Merge,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceLookup => write!(f, "source-lookup"),
            Self::EncodingNotFound => write!(f, "encoding-not-found"),
            Self::Transfer => write!(f, "transfer"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

impl DownloadError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::SourceLookup(_) => FailureKind::SourceLookup,
            Self::EncodingNotFound(_) => FailureKind::EncodingNotFound,
            Self::Transfer(_) => FailureKind::Transfer,
            Self::Merge(_) => FailureKind::Merge,
        }
    }

    /// Wrap a transfer failure with the path or channel it happened on
    pub fn transfer(context: impl fmt::Display, cause: impl fmt::Display) -> Self {
        Self::Transfer(format!("{}: {}", context, cause))
    }
}

// I/O on a sink only happens while streaming bytes
impl From<std::io::Error> for DownloadError {
    fn from(e: std::io::Error) -> Self {
        Self::Transfer(e.to_string())
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transfer(e.to_string())
    }
}
