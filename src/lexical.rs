//! Per-tenant lexical chunk store.
//!
//! Each tenant owns a directory tree under `lexical.root`:
//!
//! ```text
//! <root>/<tenant>/
//! ├── files/<document-id>.<ext>   original uploads
//! ├── chunks.json                 every chunk of every indexed document
//! └── metadata.json               { documents: [...], updated_at }
//! ```
//!
//! `metadata.json` and `chunks.json` are read whole, mutated in memory,
//! and rewritten whole (temp file + rename). Every read-modify-write cycle
//! runs under a process-wide lock keyed by the tenant directory, so two
//! handles on the same tenant cannot lose each other's updates. Searches
//! read without the lock; the rename makes each rewrite atomic.
//!
//! # Search
//!
//! Scores are the Jaccard similarity of the query's word set and the
//! chunk's word set. A chunk whose normalized text contains the whole
//! normalized query verbatim gets `substring_boost` added (capped at 1.0).
//! Chunks sharing no words with the query are never returned.
//!
//! # Deletion
//!
//! Chunks cannot be removed incrementally. Deleting a document drops its
//! file and record, then re-extracts and re-chunks every remaining indexed
//! document to regenerate `chunks.json` from scratch.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use crate::chunk::{chunk_words, normalize};
use crate::config::LexicalConfig;
use crate::error::IngestError;
use crate::extract::extract_text;
use crate::models::{
    Chunk, Document, DocumentStatus, FileType, ResultSource, SearchResult, Visibility,
};

const METADATA_FILE: &str = "metadata.json";
const CHUNKS_FILE: &str = "chunks.json";
const FILES_DIR: &str = "files";

/// On-disk shape of `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Metadata {
    documents: Vec<Document>,
    updated_at: DateTime<Utc>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Inputs for [`LexicalStore::search`].
#[derive(Debug, Clone)]
pub struct LexicalQuery<'a> {
    pub text: &'a str,
    pub top_k: usize,
    pub category: Option<&'a str>,
    pub visibility: Option<Visibility>,
    pub min_score: f64,
}

impl<'a> LexicalQuery<'a> {
    pub fn new(text: &'a str, top_k: usize, min_score: f64) -> Self {
        Self {
            text,
            top_k,
            category: None,
            visibility: None,
            min_score,
        }
    }
}

/// Document and chunk counts for one tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LexicalStats {
    pub documents: usize,
    pub indexed: usize,
    pub pending: usize,
    pub errored: usize,
    pub chunks: usize,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A handle on one tenant's lexical store.
pub struct LexicalStore {
    tenant_id: String,
    dir: PathBuf,
    config: LexicalConfig,
    lock: Arc<Mutex<()>>,
}

fn tenant_lock(dir: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let mut locks = LOCKS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    locks.entry(dir.to_path_buf()).or_default().clone()
}

fn valid_tenant_id(tenant_id: &str) -> bool {
    !tenant_id.is_empty()
        && tenant_id.len() <= 128
        && tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl LexicalStore {
    /// Open (creating if needed) the store for `tenant_id`.
    pub fn open(config: &LexicalConfig, tenant_id: &str) -> Result<Self, IngestError> {
        if !valid_tenant_id(tenant_id) {
            return Err(IngestError::InvalidTenant(tenant_id.to_string()));
        }
        let dir = config.root.join(tenant_id);
        let files = dir.join(FILES_DIR);
        std::fs::create_dir_all(&files).map_err(|e| {
            IngestError::io(e, format!("Failed to create {}", files.display()))
        })?;

        Ok(Self {
            tenant_id: tenant_id.to_string(),
            lock: tenant_lock(&dir),
            dir,
            config: config.clone(),
        })
    }

    /// Validate and store an upload as a `pending` document.
    ///
    /// Unsupported extensions and oversize uploads are rejected before
    /// anything is written.
    pub fn add_document(
        &self,
        filename: &str,
        bytes: &[u8],
        category: &str,
        tags: Vec<String>,
        visibility: Visibility,
    ) -> Result<Document, IngestError> {
        let file_type = FileType::from_filename(filename)
            .ok_or_else(|| IngestError::UnsupportedFormat(filename.to_string()))?;
        let size = bytes.len() as u64;
        if size > self.config.max_upload_bytes {
            return Err(IngestError::TooLarge {
                size,
                limit: self.config.max_upload_bytes,
            });
        }

        let doc = Document {
            id: uuid::Uuid::new_v4().simple().to_string(),
            filename: filename.to_string(),
            category: category.to_string(),
            tags,
            visibility,
            file_type,
            size_bytes: size,
            status: DocumentStatus::Pending,
            chunk_count: 0,
            uploaded_at: Utc::now(),
            indexed_at: None,
            error_message: None,
        };

        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.file_path(&doc);
        write_atomic(&path, bytes)?;

        let mut meta = self.load_metadata()?;
        meta.documents.push(doc.clone());
        self.save_metadata(&mut meta)?;

        tracing::info!(
            tenant = %self.tenant_id,
            document_id = %doc.id,
            filename = %doc.filename,
            size,
            "document stored"
        );
        Ok(doc)
    }

    /// Extract and chunk a stored document, appending its chunks.
    ///
    /// Extraction failures are recorded on the document (`status = error`)
    /// and returned as `Ok`; only storage failures and unknown ids are `Err`.
    pub fn index_document(&self, document_id: &str) -> Result<Document, IngestError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut meta = self.load_metadata()?;
        let pos = meta
            .documents
            .iter()
            .position(|d| d.id == document_id)
            .ok_or_else(|| IngestError::DocumentNotFound(document_id.to_string()))?;

        let mut chunks: Vec<Chunk> = self.load_chunks()?;
        chunks.retain(|c| c.document_id != document_id);

        let doc = &mut meta.documents[pos];
        match self.chunk_document(doc) {
            Ok(new_chunks) => {
                doc.status = DocumentStatus::Indexed;
                doc.chunk_count = new_chunks.len();
                doc.indexed_at = Some(Utc::now());
                doc.error_message = None;
                chunks.extend(new_chunks);
                tracing::info!(
                    tenant = %self.tenant_id,
                    document_id,
                    chunks = doc.chunk_count,
                    "document indexed"
                );
            }
            Err(message) => {
                doc.status = DocumentStatus::Error;
                doc.chunk_count = 0;
                doc.error_message = Some(message);
                tracing::warn!(
                    tenant = %self.tenant_id,
                    document_id,
                    error = doc.error_message.as_deref().unwrap_or_default(),
                    "document indexing failed"
                );
            }
        }
        let doc = doc.clone();

        self.save_chunks(&chunks)?;
        self.save_metadata(&mut meta)?;
        Ok(doc)
    }

    /// [`add_document`](Self::add_document) followed by [`index_document`](Self::index_document).
    pub fn ingest(
        &self,
        filename: &str,
        bytes: &[u8],
        category: &str,
        tags: Vec<String>,
        visibility: Visibility,
    ) -> Result<Document, IngestError> {
        let doc = self.add_document(filename, bytes, category, tags, visibility)?;
        self.index_document(&doc.id)
    }

    /// Drop a document's record, rebuild every chunk, then remove its file.
    pub fn delete_document(&self, document_id: &str) -> Result<(), IngestError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut meta = self.load_metadata()?;
        let pos = meta
            .documents
            .iter()
            .position(|d| d.id == document_id)
            .ok_or_else(|| IngestError::DocumentNotFound(document_id.to_string()))?;
        let doc = meta.documents.remove(pos);
        let chunk_count = self.rebuild_locked(&mut meta)?;

        // The stored file outlives the record until both JSON files are saved.
        let path = self.file_path(&doc);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "stored file already missing");
            }
            Err(e) => {
                return Err(IngestError::io(
                    e,
                    format!("Failed to remove {}", path.display()),
                ))
            }
        }

        tracing::info!(
            tenant = %self.tenant_id,
            document_id,
            remaining_chunks = chunk_count,
            "document deleted; chunks rebuilt"
        );
        Ok(())
    }

    /// Regenerate `chunks.json` from every indexed document's stored file.
    ///
    /// Returns the new total chunk count.
    pub fn rebuild(&self) -> Result<usize, IngestError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut meta = self.load_metadata()?;
        self.rebuild_locked(&mut meta)
    }

    fn rebuild_locked(&self, meta: &mut Metadata) -> Result<usize, IngestError> {
        let mut chunks = Vec::new();
        for doc in meta
            .documents
            .iter_mut()
            .filter(|d| d.status == DocumentStatus::Indexed)
        {
            match self.chunk_document(doc) {
                Ok(doc_chunks) => {
                    doc.chunk_count = doc_chunks.len();
                    chunks.extend(doc_chunks);
                }
                Err(message) => {
                    tracing::warn!(
                        tenant = %self.tenant_id,
                        document_id = %doc.id,
                        error = %message,
                        "re-extraction failed during rebuild"
                    );
                    doc.status = DocumentStatus::Error;
                    doc.chunk_count = 0;
                    doc.error_message = Some(message);
                }
            }
        }

        self.save_chunks(&chunks)?;
        self.save_metadata(meta)?;
        Ok(chunks.len())
    }

    /// Read, extract, and chunk one document's stored file.
    ///
    /// Errors are returned as messages destined for `error_message`.
    fn chunk_document(&self, doc: &Document) -> Result<Vec<Chunk>, String> {
        let path = self.file_path(doc);
        let bytes = std::fs::read(&path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        let text = extract_text(&bytes, doc.file_type).map_err(|e| e.to_string())?;
        let chunks = chunk_words(
            &doc.id,
            &text,
            self.config.chunk_size,
            self.config.overlap,
            &doc.category,
            doc.visibility,
        );
        if chunks.is_empty() {
            return Err("no text could be extracted".to_string());
        }
        Ok(chunks)
    }

    /// Keyword search over this tenant's chunks.
    ///
    /// Never fails: an unreadable chunk file is logged and yields no results.
    pub fn search(&self, query: &LexicalQuery<'_>) -> Vec<SearchResult> {
        let normalized_query = normalize(query.text);
        let query_tokens = tokenize(&normalized_query);
        if query_tokens.is_empty() || query.top_k == 0 {
            return Vec::new();
        }

        let chunks: Vec<Chunk> = match self.load_chunks() {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!(tenant = %self.tenant_id, error = %e, "failed to load chunks");
                return Vec::new();
            }
        };
        let titles: HashMap<String, String> = match self.load_metadata() {
            Ok(meta) => meta
                .documents
                .into_iter()
                .map(|d| (d.id, d.filename))
                .collect(),
            Err(e) => {
                tracing::warn!(tenant = %self.tenant_id, error = %e, "failed to load metadata");
                HashMap::new()
            }
        };

        let mut results: Vec<SearchResult> = chunks
            .into_iter()
            .filter(|c| query.category.map_or(true, |cat| c.category == cat))
            .filter(|c| query.visibility.map_or(true, |vis| c.visibility == vis))
            .filter_map(|c| {
                let score = score_chunk(
                    &query_tokens,
                    &normalized_query,
                    &c.normalized_content,
                    self.config.substring_boost,
                )?;
                if score < query.min_score {
                    return None;
                }
                Some(SearchResult {
                    source_title: titles.get(&c.document_id).cloned(),
                    content: c.content,
                    score,
                    source: ResultSource::Local,
                    reference: c.document_id,
                    position: c.chunk_index,
                })
            })
            .collect();

        // Stable: equal scores keep chunk-file order.
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(query.top_k);
        results
    }

    pub fn list_documents(
        &self,
        category: Option<&str>,
        visibility: Option<Visibility>,
    ) -> Result<Vec<Document>, IngestError> {
        let meta = self.load_metadata()?;
        Ok(meta
            .documents
            .into_iter()
            .filter(|d| category.map_or(true, |cat| d.category == cat))
            .filter(|d| visibility.map_or(true, |vis| d.visibility == vis))
            .collect())
    }

    pub fn get_document(&self, document_id: &str) -> Result<Option<Document>, IngestError> {
        let meta = self.load_metadata()?;
        Ok(meta.documents.into_iter().find(|d| d.id == document_id))
    }

    pub fn chunks(&self) -> Result<Vec<Chunk>, IngestError> {
        self.load_chunks()
    }

    pub fn stats(&self) -> Result<LexicalStats, IngestError> {
        let meta = self.load_metadata()?;
        let chunks = self.load_chunks()?;
        let count = |status: DocumentStatus| {
            meta.documents
                .iter()
                .filter(|d| d.status == status)
                .count()
        };
        Ok(LexicalStats {
            documents: meta.documents.len(),
            indexed: count(DocumentStatus::Indexed),
            pending: count(DocumentStatus::Pending),
            errored: count(DocumentStatus::Error),
            chunks: chunks.len(),
            updated_at: self
                .metadata_path()
                .exists()
                .then_some(meta.updated_at),
        })
    }

    // ============ File layout ============

    fn file_path(&self, doc: &Document) -> PathBuf {
        self.dir
            .join(FILES_DIR)
            .join(format!("{}.{}", doc.id, doc.file_type.extension()))
    }

    fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    fn chunks_path(&self) -> PathBuf {
        self.dir.join(CHUNKS_FILE)
    }

    fn load_metadata(&self) -> Result<Metadata, IngestError> {
        Ok(read_json(&self.metadata_path())?.unwrap_or_default())
    }

    fn save_metadata(&self, meta: &mut Metadata) -> Result<(), IngestError> {
        meta.updated_at = Utc::now();
        write_json(&self.metadata_path(), meta)
    }

    fn load_chunks(&self) -> Result<Vec<Chunk>, IngestError> {
        Ok(read_json(&self.chunks_path())?.unwrap_or_default())
    }

    fn save_chunks(&self, chunks: &[Chunk]) -> Result<(), IngestError> {
        write_json(&self.chunks_path(), &chunks)
    }
}

/// Split normalized text into its set of words.
///
/// Leading and trailing punctuation is stripped from each word so
/// `"resorts."` and `"resorts"` match.
pub fn tokenize(normalized: &str) -> HashSet<String> {
    normalized
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Score one chunk against a query.
///
/// Returns `None` when the two share no words.
pub fn score_chunk(
    query_tokens: &HashSet<String>,
    normalized_query: &str,
    normalized_chunk: &str,
    substring_boost: f64,
) -> Option<f64> {
    let chunk_tokens = tokenize(normalized_chunk);
    let intersection = query_tokens.intersection(&chunk_tokens).count();
    if intersection == 0 {
        return None;
    }
    let union = query_tokens.union(&chunk_tokens).count();
    let mut score = intersection as f64 / union as f64;

    if !normalized_query.is_empty() && normalized_chunk.contains(normalized_query) {
        score = (score + substring_boost).min(1.0);
    }
    Some(score)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, IngestError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(IngestError::io(
                e,
                format!("Failed to read {}", path.display()),
            ))
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| IngestError::Json {
            source,
            path: path.to_path_buf(),
        })
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), IngestError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| IngestError::Json {
        source,
        path: path.to_path_buf(),
    })?;
    write_atomic(path, &bytes)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IngestError> {
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    std::fs::write(&tmp, bytes)
        .map_err(|e| IngestError::io(e, format!("Failed to write {}", tmp.display())))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        IngestError::io(
            e,
            format!("Failed to rename {} -> {}", tmp.display(), path.display()),
        )
    })
}
