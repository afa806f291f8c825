//! Typed errors for the ingestion and blob-fetch paths.
//!
//! Search paths never surface these to callers: failures there are logged
//! and converted to empty or degraded results. Ingestion raises
//! [`IngestError`] only for input that is invalid before any work begins
//! (unsupported format, oversize upload, unknown document id) or for
//! storage I/O failures.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the lexical chunk store's ingestion and deletion paths.
#[derive(Error, Debug)]
pub enum IngestError {
    /// The uploaded file's extension is not in the allow-list.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The upload exceeds `lexical.max_upload_bytes`.
    #[error("upload too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// Tenant ids become directory names, so only `[A-Za-z0-9_-]` is accepted.
    #[error("invalid tenant id: {0:?}")]
    InvalidTenant(String),

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        source: serde_json::Error,
        path: PathBuf,
    },
}

impl IngestError {
    pub(crate) fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        Self::Io {
            source,
            context: context.into(),
        }
    }
}

/// Text extraction failure. Recorded on the document, never raised to search callers.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("DOCX extraction failed: {0}")]
    Docx(String),

    #[error("text is not valid UTF-8: {0}")]
    Encoding(String),
}

/// Errors from a remote blob store.
#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("missing credentials: {0}")]
    Credentials(String),

    #[error("blob request failed: {0}")]
    Http(String),

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },
}
