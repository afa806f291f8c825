//! Shared, tenant-agnostic vector index loaded lazily from blob storage.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ──initialize()──► Ready(index, lookup)
//!       │
//!       └──────── failure ──────────► Failed(message)   (sticky)
//!
//! reset() ─► Uninitialized
//! ```
//!
//! Initialization runs at most once at a time: callers check the state,
//! take the init lock, and check again before doing any I/O. A failure is
//! recorded and returned to every later caller until [`VectorIndexStore::reset`].
//!
//! # Cache
//!
//! The index and lookup blobs are cached under `[index].cache_dir` by
//! blob name. A cached copy older than `max_cache_age_hours` is fetched
//! again; staleness is only checked during initialization.
//!
//! # Scoring
//!
//! Nearest neighbours come back as L2 distances `d`, reported as
//! `score = 1 / (1 + d)`, which lies in `(0, 1]` and falls as `d` grows.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, RwLock};

use crate::blob::BlobStore;
use crate::config::{IndexConfig, RetrievalConfig};
use crate::embedding::Embedder;
use crate::flat_index::FlatIndex;
use crate::lookup::LookupTable;
use crate::mmr;
use crate::models::{ResultSource, SearchResult};

struct LoadedIndex {
    index: FlatIndex,
    lookup: LookupTable,
    loaded_at: DateTime<Utc>,
}

enum StoreState {
    Uninitialized,
    Ready(Arc<LoadedIndex>),
    Failed(String),
}

/// Health snapshot returned by [`VectorIndexStore::status`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IndexStatus {
    pub initialized: bool,
    pub error: Option<String>,
    pub vector_count: usize,
    pub document_count: usize,
    pub dims: Option<usize>,
    pub loaded_at: Option<DateTime<Utc>>,
}

/// Options for [`VectorIndexStore::search_with_context`].
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    pub min_score: f64,
    pub use_mmr: bool,
    pub lambda: f64,
    pub fetch_k: usize,
    /// Result floor applied when `min_score` filters too aggressively.
    pub min_context: usize,
    /// Characters of each candidate re-embedded for MMR.
    pub prefix_chars: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::from_config(&RetrievalConfig::default())
    }
}

impl SearchOptions {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            min_score: config.min_score,
            use_mmr: false,
            lambda: config.mmr_lambda,
            fetch_k: config.fetch_k,
            min_context: config.min_context,
            prefix_chars: config.mmr_prefix_chars,
        }
    }

    /// Override the MMR trade-off. `lambda` must lie in `[0.0, 1.0]`.
    pub fn set_lambda(&mut self, lambda: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&lambda) {
            bail!("lambda must be in [0.0, 1.0], got {}", lambda);
        }
        self.lambda = lambda;
        Ok(())
    }
}

/// Process-wide vector index. Share it behind an `Arc`.
pub struct VectorIndexStore {
    config: IndexConfig,
    blob: Option<Arc<dyn BlobStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    init_lock: Mutex<()>,
    state: RwLock<StoreState>,
}

impl VectorIndexStore {
    /// Create an uninitialized store. Missing collaborators are reported
    /// as a sticky error by the first [`initialize`](Self::initialize).
    pub fn new(
        config: IndexConfig,
        blob: Option<Arc<dyn BlobStore>>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Self {
        Self {
            config,
            blob,
            embedder,
            init_lock: Mutex::new(()),
            state: RwLock::new(StoreState::Uninitialized),
        }
    }

    /// Load the index once. Returns `true` when the store is ready.
    ///
    /// Already-ready stores return `true` without touching the network;
    /// stores with a recorded error return `false` without retrying.
    pub async fn initialize(&self) -> bool {
        if let Some(ready) = self.settled().await {
            return ready;
        }

        let _guard = self.init_lock.lock().await;
        if let Some(ready) = self.settled().await {
            return ready;
        }

        match self.load().await {
            Ok(loaded) => {
                tracing::info!(
                    vectors = loaded.index.len(),
                    documents = loaded.lookup.document_count(),
                    dims = loaded.index.dims(),
                    "vector index ready"
                );
                *self.state.write().await = StoreState::Ready(Arc::new(loaded));
                true
            }
            Err(e) => {
                let message = format!("{:#}", e);
                tracing::warn!(error = %message, "vector index initialization failed");
                *self.state.write().await = StoreState::Failed(message);
                false
            }
        }
    }

    /// Clear any loaded index or recorded error.
    pub async fn reset(&self) {
        let _guard = self.init_lock.lock().await;
        *self.state.write().await = StoreState::Uninitialized;
        tracing::info!("vector index reset");
    }

    pub async fn status(&self) -> IndexStatus {
        match &*self.state.read().await {
            StoreState::Uninitialized => IndexStatus {
                initialized: false,
                error: None,
                vector_count: 0,
                document_count: 0,
                dims: None,
                loaded_at: None,
            },
            StoreState::Ready(loaded) => IndexStatus {
                initialized: true,
                error: None,
                vector_count: loaded.index.len(),
                document_count: loaded.lookup.document_count(),
                dims: Some(loaded.index.dims()),
                loaded_at: Some(loaded.loaded_at),
            },
            StoreState::Failed(message) => IndexStatus {
                initialized: false,
                error: Some(message.clone()),
                vector_count: 0,
                document_count: 0,
                dims: None,
                loaded_at: None,
            },
        }
    }

    /// Top-`top_k` nearest passages for `query`.
    ///
    /// Returns an empty list when the store is not ready or the query
    /// cannot be embedded. Slots missing from the lookup table are skipped.
    pub async fn search(&self, query: &str, top_k: usize) -> Vec<SearchResult> {
        let (Some(loaded), Some(embedder)) = (self.loaded().await, self.embedder.as_ref()) else {
            return Vec::new();
        };

        let vector = match embedder.embed_one(query).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed");
                return Vec::new();
            }
        };

        loaded
            .index
            .search(&vector, top_k)
            .into_iter()
            .filter_map(|(slot, distance)| {
                let entry = loaded.lookup.resolve(slot as i64)?;
                Some(SearchResult {
                    content: entry.content.clone(),
                    score: distance_to_score(distance),
                    source: ResultSource::Global,
                    reference: entry.reference.clone(),
                    position: slot,
                    source_title: entry.title.clone(),
                })
            })
            .collect()
    }

    /// Search with a score floor, optional MMR diversification, and a
    /// minimum amount of context.
    ///
    /// When fewer than `min_context` results clear `min_score`, the floor
    /// is dropped and the first `min_context` candidates (or the whole
    /// pool, if smaller) are returned instead.
    pub async fn search_with_context(&self, query: &str, options: &SearchOptions) -> Vec<SearchResult> {
        let candidates = if options.use_mmr {
            mmr::mmr_search(
                self,
                query,
                options.top_k,
                options.lambda,
                options.fetch_k,
                options.prefix_chars,
            )
            .await
        } else {
            self.search(query, options.top_k).await
        };

        let filtered: Vec<SearchResult> = candidates
            .iter()
            .filter(|r| r.score >= options.min_score)
            .cloned()
            .collect();

        if filtered.len() >= options.min_context || filtered.len() == candidates.len() {
            return filtered;
        }

        tracing::debug!(
            kept = filtered.len(),
            pool = candidates.len(),
            "score floor too strict, returning top candidates"
        );
        candidates.into_iter().take(options.min_context).collect()
    }

    pub(crate) fn embedder(&self) -> Option<&Arc<dyn Embedder>> {
        self.embedder.as_ref()
    }

    async fn loaded(&self) -> Option<Arc<LoadedIndex>> {
        match &*self.state.read().await {
            StoreState::Ready(loaded) => Some(loaded.clone()),
            _ => None,
        }
    }

    /// `Some(ready)` once initialization has succeeded or failed.
    async fn settled(&self) -> Option<bool> {
        match &*self.state.read().await {
            StoreState::Uninitialized => None,
            StoreState::Ready(_) => Some(true),
            StoreState::Failed(_) => Some(false),
        }
    }

    async fn load(&self) -> Result<LoadedIndex> {
        let blob = self
            .blob
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no blob store configured"))?;
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("no embedding provider configured"))?;

        tokio::fs::create_dir_all(&self.config.cache_dir)
            .await
            .with_context(|| {
                format!(
                    "Failed to create cache dir: {}",
                    self.config.cache_dir.display()
                )
            })?;

        let max_age = Duration::from_secs(self.config.max_cache_age_hours * 3600);
        let index_path = self
            .cached_blob(blob.as_ref(), &self.config.index_blob, max_age)
            .await?;
        let lookup_path = self
            .cached_blob(blob.as_ref(), &self.config.lookup_blob, max_age)
            .await?;

        let index_bytes = tokio::fs::read(&index_path)
            .await
            .with_context(|| format!("Failed to read {}", index_path.display()))?;
        let index = FlatIndex::decode(&index_bytes).context("Failed to decode vector index")?;

        let lookup_bytes = tokio::fs::read(&lookup_path)
            .await
            .with_context(|| format!("Failed to read {}", lookup_path.display()))?;
        let lookup =
            LookupTable::from_json_bytes(&lookup_bytes).context("Failed to parse lookup table")?;

        if index.is_empty() {
            tracing::warn!(blob = %self.config.index_blob, "vector index holds no vectors");
        }
        if let Some(dims) = embedder.dims() {
            if dims != index.dims() {
                bail!(
                    "embedding model {} produces {} dims but the index has {}",
                    embedder.model_name(),
                    dims,
                    index.dims()
                );
            }
        }

        Ok(LoadedIndex {
            index,
            lookup,
            loaded_at: Utc::now(),
        })
    }

    /// Local path of `name`, downloading it when absent or stale.
    async fn cached_blob(
        &self,
        blob: &dyn BlobStore,
        name: &str,
        max_age: Duration,
    ) -> Result<PathBuf> {
        let path = self.config.cache_dir.join(cache_file_name(name));
        if is_fresh(&path, max_age).await {
            tracing::debug!(blob = name, path = %path.display(), "using cached blob");
            return Ok(path);
        }

        if !blob.exists(name).await? {
            bail!("blob {} not found in {}", name, blob.describe());
        }
        let bytes = blob.fetch(name).await?;

        let tmp = path.with_extension("download");
        tokio::fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move {} into place", tmp.display()))?;

        tracing::info!(blob = name, bytes = bytes.len(), "downloaded blob");
        Ok(path)
    }
}

/// Map an L2 distance to a similarity in `(0, 1]`.
pub fn distance_to_score(distance: f32) -> f64 {
    1.0 / (1.0 + distance.max(0.0) as f64)
}

fn cache_file_name(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

async fn is_fresh(path: &Path, max_age: Duration) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    match SystemTime::now().duration_since(modified) {
        Ok(age) => age <= max_age,
        // mtime in the future
        Err(_) => true,
    }
}
