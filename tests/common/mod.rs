//! Shared fakes for integration tests.

#![allow(dead_code)]

use agency_retrieval::blob::BlobStore;
use agency_retrieval::config::{IndexConfig, LexicalConfig};
use agency_retrieval::embedding::Embedder;
use agency_retrieval::error::BlobError;
use agency_retrieval::flat_index::FlatIndex;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Embeds by table lookup; unknown text maps to the zero vector.
pub struct TableEmbedder {
    pub dims: usize,
    pub table: HashMap<String, Vec<f32>>,
    /// When set, batch calls fail while single-text calls still succeed.
    pub fail_batches: bool,
}

impl TableEmbedder {
    pub fn new(dims: usize, entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            dims,
            table: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            fail_batches: false,
        }
    }

    fn lookup(&self, text: &str) -> Vec<f32> {
        self.table
            .get(text)
            .cloned()
            .unwrap_or_else(|| vec![0.0; self.dims])
    }
}

#[async_trait]
impl Embedder for TableEmbedder {
    fn model_name(&self) -> &str {
        "table"
    }

    fn dims(&self) -> Option<usize> {
        Some(self.dims)
    }

    async fn embed_many(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if self.fail_batches {
            anyhow::bail!("batch embedding unavailable");
        }
        Ok(texts.iter().map(|t| self.lookup(t)).collect())
    }

    async fn embed_one(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(self.lookup(text))
    }
}

/// Embedder whose every call fails.
pub struct BrokenEmbedder;

#[async_trait]
impl Embedder for BrokenEmbedder {
    fn model_name(&self) -> &str {
        "broken"
    }

    fn dims(&self) -> Option<usize> {
        None
    }

    async fn embed_many(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        anyhow::bail!("embedding service unreachable")
    }
}

/// Wraps a blob store and counts downloads.
pub struct CountingBlobStore {
    pub inner: Arc<dyn BlobStore>,
    pub fetches: AtomicUsize,
}

impl CountingBlobStore {
    pub fn new(inner: Arc<dyn BlobStore>) -> Self {
        Self {
            inner,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for CountingBlobStore {
    fn describe(&self) -> String {
        self.inner.describe()
    }

    async fn exists(&self, name: &str) -> Result<bool, BlobError> {
        self.inner.exists(name).await
    }

    async fn fetch(&self, name: &str) -> Result<Vec<u8>, BlobError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        // Widen the window in which concurrent initializers could race.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        self.inner.fetch(name).await
    }
}

/// Write an index blob and a sequence-shaped lookup blob into `dir`.
pub fn write_index_blobs(dir: &Path, dims: usize, rows: &[Vec<f32>], contents: &[&str]) {
    let index = FlatIndex::from_rows(dims, rows).unwrap();
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("knowledge.index"), index.encode()).unwrap();
    let lookup: Vec<serde_json::Value> = contents
        .iter()
        .enumerate()
        .map(|(i, c)| {
            serde_json::json!({
                "page_content": c,
                "metadata": { "title": format!("doc-{}", i) }
            })
        })
        .collect();
    std::fs::write(
        dir.join("knowledge.lookup.json"),
        serde_json::to_vec(&lookup).unwrap(),
    )
    .unwrap();
}

pub fn index_config(cache_dir: &Path) -> IndexConfig {
    IndexConfig {
        cache_dir: cache_dir.to_path_buf(),
        ..IndexConfig::default()
    }
}

pub fn lexical_config(root: &Path) -> LexicalConfig {
    LexicalConfig {
        root: root.to_path_buf(),
        ..LexicalConfig::default()
    }
}
