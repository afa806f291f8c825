//! Core data models shared by the lexical store, the vector store, and the
//! unified merge.
//!
//! [`Document`] and [`Chunk`] are persisted as JSON in each tenant's tree.
//! [`SearchResult`] is output-only and built fresh per query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who may see a document's chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            other => Err(format!(
                "unknown visibility '{}': expected public or private",
                other
            )),
        }
    }
}

/// Accepted upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Text,
    Markdown,
    Pdf,
    Docx,
}

impl FileType {
    /// Map a filename to its file type by extension (case-insensitive).
    ///
    /// Returns `None` for anything outside the allow-list.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "txt" => Some(FileType::Text),
            "md" | "markdown" => Some(FileType::Markdown),
            "pdf" => Some(FileType::Pdf),
            "docx" => Some(FileType::Docx),
            _ => None,
        }
    }

    /// Canonical extension used for the stored copy of the upload.
    pub fn extension(&self) -> &'static str {
        match self {
            FileType::Text => "txt",
            FileType::Markdown => "md",
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Indexed,
    Error,
}

/// One uploaded tenant artifact.
///
/// `status == Indexed` implies `chunk_count > 0`; `status == Error`
/// implies `error_message.is_some()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub visibility: Visibility,
    pub file_type: FileType,
    pub size_bytes: u64,
    pub status: DocumentStatus,
    #[serde(default)]
    pub chunk_count: usize,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub indexed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// A contiguous, overlapping word window of a document's extracted text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    /// Lowercased, trimmed `content`, computed once at ingestion.
    pub normalized_content: String,
    pub category: String,
    pub visibility: Visibility,
}

/// Which knowledge source produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Local,
    Global,
}

/// A single scored retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub content: String,
    /// Normalized relevance in `[0.0, 1.0]`.
    pub score: f64,
    pub source: ResultSource,
    /// Owning document id (local) or lookup-table reference (global).
    pub reference: String,
    /// Chunk index (local) or index slot (global).
    pub position: usize,
    pub source_title: Option<String>,
}
