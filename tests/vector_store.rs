mod common;

use agency_retrieval::blob::{BlobStore, DirBlobStore};
use agency_retrieval::embedding::Embedder;
use agency_retrieval::mmr::mmr_search;
use agency_retrieval::models::ResultSource;
use agency_retrieval::vector_store::{SearchOptions, VectorIndexStore};
use common::{index_config, write_index_blobs, BrokenEmbedder, CountingBlobStore, TableEmbedder};
use std::sync::Arc;
use tempfile::TempDir;

fn line_rows() -> Vec<Vec<f32>> {
    vec![
        vec![0.0, 0.0],
        vec![1.0, 0.0],
        vec![3.0, 0.0],
        vec![10.0, 0.0],
    ]
}

fn store_with(
    tmp: &TempDir,
    embedder: Arc<dyn Embedder>,
) -> VectorIndexStore {
    let blob: Arc<dyn BlobStore> = Arc::new(DirBlobStore::new(tmp.path().join("blobs")));
    VectorIndexStore::new(
        index_config(&tmp.path().join("cache")),
        Some(blob),
        Some(embedder),
    )
}

fn query_embedder() -> Arc<dyn Embedder> {
    Arc::new(TableEmbedder::new(2, &[("beach resorts", vec![0.0, 0.0])]))
}

#[tokio::test]
async fn missing_blob_fails_closed() {
    let tmp = TempDir::new().unwrap();
    let store = store_with(&tmp, query_embedder());

    assert!(!store.initialize().await);
    let status = store.status().await;
    assert!(!status.initialized);
    let error = status.error.expect("error recorded");
    assert!(error.contains("not found"), "unexpected error: {}", error);
    assert!(store.search("beach resorts", 5).await.is_empty());
    assert!(store
        .search_with_context("beach resorts", &SearchOptions::default())
        .await
        .is_empty());

    // Sticky: the blobs appearing later does not help until reset.
    write_index_blobs(&tmp.path().join("blobs"), 2, &line_rows(), &["a", "b", "c", "d"]);
    assert!(!store.initialize().await);

    store.reset().await;
    assert!(store.initialize().await);
    assert!(store.status().await.initialized);
}

#[tokio::test]
async fn scores_bounded_and_decreasing_with_distance() {
    let tmp = TempDir::new().unwrap();
    write_index_blobs(&tmp.path().join("blobs"), 2, &line_rows(), &["a", "b", "c", "d"]);
    let store = store_with(&tmp, query_embedder());
    assert!(store.initialize().await);

    let results = store.search("beach resorts", 10).await;
    assert_eq!(results.len(), 4);
    let expected = [1.0, 0.5, 0.25, 1.0 / 11.0];
    for (r, want) in results.iter().zip(expected) {
        assert!((r.score - want).abs() < 1e-9, "{} vs {}", r.score, want);
        assert!(r.score > 0.0 && r.score <= 1.0);
        assert_eq!(r.source, ResultSource::Global);
    }
    assert!(results.windows(2).all(|w| w[0].score > w[1].score));
    assert_eq!(results[0].content, "a");
    assert_eq!(results[0].source_title.as_deref(), Some("doc-0"));
    assert_eq!(results[2].position, 2);

    let status = store.status().await;
    assert_eq!(status.vector_count, 4);
    assert_eq!(status.document_count, 4);
    assert_eq!(status.dims, Some(2));
    assert!(status.loaded_at.is_some());
}

#[tokio::test]
async fn unmapped_slots_are_skipped() {
    let tmp = TempDir::new().unwrap();
    write_index_blobs(&tmp.path().join("blobs"), 2, &line_rows(), &["a", "b"]);
    let store = store_with(&tmp, query_embedder());
    assert!(store.initialize().await);

    let results = store.search("beach resorts", 10).await;
    let contents: Vec<_> = results.iter().map(|r| r.content.as_str()).collect();
    assert_eq!(contents, vec!["a", "b"]);
}

#[tokio::test]
async fn query_embedding_failure_returns_empty() {
    let tmp = TempDir::new().unwrap();
    write_index_blobs(&tmp.path().join("blobs"), 2, &line_rows(), &["a", "b", "c", "d"]);
    let store = store_with(&tmp, Arc::new(BrokenEmbedder));
    assert!(store.initialize().await);
    assert!(store.search("beach resorts", 3).await.is_empty());
}

#[tokio::test]
async fn context_floor_overrides_min_score() {
    let tmp = TempDir::new().unwrap();
    write_index_blobs(&tmp.path().join("blobs"), 2, &line_rows(), &["a", "b", "c", "d"]);
    let store = store_with(&tmp, query_embedder());
    assert!(store.initialize().await);

    let mut options = SearchOptions {
        top_k: 4,
        min_score: 0.99,
        ..SearchOptions::default()
    };
    // Only slot 0 clears the floor, so the top three come back instead.
    let results = store.search_with_context("beach resorts", &options).await;
    let contents: Vec<_> = results.iter().map(|r| r.content.as_str()).collect();
    assert_eq!(contents, vec!["a", "b", "c"]);

    // Nothing clears the floor and the pool is smaller than three.
    options.min_score = 1.1;
    options.top_k = 2;
    let results = store.search_with_context("beach resorts", &options).await;
    assert_eq!(results.len(), 2);

    // Enough results clear the floor: it applies normally.
    options.min_score = 0.2;
    options.top_k = 4;
    let results = store.search_with_context("beach resorts", &options).await;
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.score >= 0.2));
}

#[tokio::test]
async fn mmr_skips_duplicate_content() {
    let tmp = TempDir::new().unwrap();
    let rows = vec![vec![0.0, 0.0], vec![0.1, 0.0], vec![0.5, 0.0]];
    let contents = ["Overwater villas", "Overwater villas", "Ski chalets"];
    write_index_blobs(&tmp.path().join("blobs"), 2, &rows, &contents);

    let embedder = TableEmbedder::new(
        2,
        &[
            ("q", vec![0.0, 0.0]),
            ("Overwater villas", vec![1.0, 0.0]),
            ("Ski chalets", vec![0.0, 1.0]),
        ],
    );
    let store = store_with(&tmp, Arc::new(embedder));
    assert!(store.initialize().await);

    let options = SearchOptions {
        top_k: 2,
        min_score: 0.0,
        use_mmr: true,
        lambda: 0.0,
        fetch_k: 3,
        ..SearchOptions::default()
    };
    let results = store.search_with_context("q", &options).await;
    let slots: Vec<_> = results.iter().map(|r| r.position).collect();
    assert_eq!(slots, vec![0, 2]);

    // Pure relevance keeps the near-duplicate.
    let options = SearchOptions {
        lambda: 1.0,
        ..options
    };
    let results = store.search_with_context("q", &options).await;
    let slots: Vec<_> = results.iter().map(|r| r.position).collect();
    assert_eq!(slots, vec![0, 1]);
}

#[tokio::test]
async fn mmr_falls_back_to_relevance_order() {
    let tmp = TempDir::new().unwrap();
    let rows = vec![vec![0.0, 0.0], vec![0.1, 0.0], vec![0.5, 0.0]];
    write_index_blobs(&tmp.path().join("blobs"), 2, &rows, &["a", "a", "b"]);

    let mut embedder = TableEmbedder::new(2, &[("q", vec![0.0, 0.0])]);
    embedder.fail_batches = true;
    let store = store_with(&tmp, Arc::new(embedder));
    assert!(store.initialize().await);

    let options = SearchOptions {
        top_k: 2,
        min_score: 0.0,
        use_mmr: true,
        lambda: 0.0,
        fetch_k: 3,
        ..SearchOptions::default()
    };
    let results = store.search_with_context("q", &options).await;
    let slots: Vec<_> = results.iter().map(|r| r.position).collect();
    assert_eq!(slots, vec![0, 1]);
}

#[tokio::test]
async fn mmr_respects_zero_top_k_with_single_candidate() {
    let tmp = TempDir::new().unwrap();
    write_index_blobs(&tmp.path().join("blobs"), 2, &[vec![0.0, 0.0]], &["only"]);
    let store = store_with(&tmp, query_embedder());
    assert!(store.initialize().await);

    assert!(mmr_search(&store, "beach resorts", 0, 0.7, 15, 500)
        .await
        .is_empty());
    let one = mmr_search(&store, "beach resorts", 1, 0.7, 15, 500).await;
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].content, "only");
}

#[tokio::test]
async fn dimension_mismatch_is_sticky_error() {
    let tmp = TempDir::new().unwrap();
    write_index_blobs(&tmp.path().join("blobs"), 2, &line_rows(), &["a", "b", "c", "d"]);
    let store = store_with(&tmp, Arc::new(TableEmbedder::new(3, &[])));

    assert!(!store.initialize().await);
    let error = store.status().await.error.unwrap();
    assert!(error.contains("dims"), "unexpected error: {}", error);
}

#[tokio::test]
async fn fresh_cache_survives_missing_blobs() {
    let tmp = TempDir::new().unwrap();
    let blob_dir = tmp.path().join("blobs");
    write_index_blobs(&blob_dir, 2, &line_rows(), &["a", "b", "c", "d"]);
    let store = store_with(&tmp, query_embedder());
    assert!(store.initialize().await);

    std::fs::remove_dir_all(&blob_dir).unwrap();
    store.reset().await;
    assert!(store.initialize().await);
    assert_eq!(store.search("beach resorts", 1).await.len(), 1);
}

#[tokio::test]
async fn stale_cache_is_refetched() {
    let tmp = TempDir::new().unwrap();
    let blob_dir = tmp.path().join("blobs");
    write_index_blobs(&blob_dir, 2, &line_rows(), &["a", "b", "c", "d"]);

    let mut config = index_config(&tmp.path().join("cache"));
    config.max_cache_age_hours = 0;
    let blob: Arc<dyn BlobStore> = Arc::new(DirBlobStore::new(blob_dir.clone()));
    let store = VectorIndexStore::new(config, Some(blob), Some(query_embedder()));
    assert!(store.initialize().await);

    std::thread::sleep(std::time::Duration::from_millis(20));
    std::fs::remove_dir_all(&blob_dir).unwrap();
    store.reset().await;
    assert!(!store.initialize().await);
}

#[tokio::test]
async fn concurrent_initialize_downloads_once() {
    let tmp = TempDir::new().unwrap();
    write_index_blobs(&tmp.path().join("blobs"), 2, &line_rows(), &["a", "b", "c", "d"]);

    let counting = Arc::new(CountingBlobStore::new(Arc::new(DirBlobStore::new(
        tmp.path().join("blobs"),
    ))));
    let blob: Arc<dyn BlobStore> = counting.clone();
    let store = Arc::new(VectorIndexStore::new(
        index_config(&tmp.path().join("cache")),
        Some(blob),
        Some(query_embedder()),
    ));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.initialize().await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap());
    }
    assert_eq!(counting.fetch_count(), 2);
}
