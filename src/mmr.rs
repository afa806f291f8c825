//! Maximal Marginal Relevance re-ranking.
//!
//! Greedy selection over a candidate pool:
//!
//! ```text
//! first  = argmax relevance(i)
//! next   = argmax  λ·relevance(i) − (1−λ)·max_{s∈selected} cos(v_i, v_s)
//! ```
//!
//! Comparison vectors come from re-embedding the first `prefix_chars`
//! characters of each candidate, since the index only returns distances.

use anyhow::{bail, Result};

use crate::embedding::cosine_similarity;
use crate::models::SearchResult;
use crate::vector_store::VectorIndexStore;

/// Pick up to `top_k` candidate positions in selection order.
///
/// `relevance` and `vectors` are parallel; extra entries in the longer
/// slice are ignored. Ties go to the earlier candidate.
pub fn mmr_select(relevance: &[f64], vectors: &[Vec<f32>], lambda: f64, top_k: usize) -> Vec<usize> {
    let n = relevance.len().min(vectors.len());
    if n == 0 || top_k == 0 {
        return Vec::new();
    }

    let mut remaining: Vec<usize> = (0..n).collect();
    let mut selected: Vec<usize> = Vec::with_capacity(top_k.min(n));

    let first = argmax(&remaining, |i| relevance[i]);
    selected.push(first);
    remaining.retain(|&i| i != first);

    while selected.len() < top_k && !remaining.is_empty() {
        let pick = argmax(&remaining, |i| {
            let redundancy = selected
                .iter()
                .map(|&s| cosine_similarity(&vectors[i], &vectors[s]) as f64)
                .fold(f64::NEG_INFINITY, f64::max);
            lambda * relevance[i] - (1.0 - lambda) * redundancy
        });
        selected.push(pick);
        remaining.retain(|&i| i != pick);
    }

    selected
}

fn argmax(candidates: &[usize], score: impl Fn(usize) -> f64) -> usize {
    let mut best = candidates[0];
    let mut best_score = score(best);
    for &i in &candidates[1..] {
        let s = score(i);
        if s > best_score {
            best = i;
            best_score = s;
        }
    }
    best
}

/// Diversified search: fetch `fetch_k` candidates, re-embed them, select `top_k`.
///
/// Any failure while diversifying falls back to the plain top-`top_k`
/// results for the same query.
pub async fn mmr_search(
    store: &VectorIndexStore,
    query: &str,
    top_k: usize,
    lambda: f64,
    fetch_k: usize,
    prefix_chars: usize,
) -> Vec<SearchResult> {
    let mut candidates = store.search(query, fetch_k.max(top_k)).await;
    if candidates.len() <= 1 {
        candidates.truncate(top_k);
        return candidates;
    }

    match diversify(store, &candidates, top_k, lambda, prefix_chars).await {
        Ok(picked) => picked,
        Err(e) => {
            tracing::warn!(error = %e, "MMR re-ranking failed, using relevance order");
            candidates.truncate(top_k);
            candidates
        }
    }
}

async fn diversify(
    store: &VectorIndexStore,
    candidates: &[SearchResult],
    top_k: usize,
    lambda: f64,
    prefix_chars: usize,
) -> Result<Vec<SearchResult>> {
    let Some(embedder) = store.embedder() else {
        bail!("no embedding provider");
    };

    let prefixes: Vec<String> = candidates
        .iter()
        .map(|c| c.content.chars().take(prefix_chars).collect())
        .collect();
    let vectors = embedder.embed_many(&prefixes).await?;
    if vectors.len() != candidates.len() {
        bail!(
            "expected {} embeddings, got {}",
            candidates.len(),
            vectors.len()
        );
    }

    let relevance: Vec<f64> = candidates.iter().map(|c| c.score).collect();
    Ok(mmr_select(&relevance, &vectors, lambda, top_k)
        .into_iter()
        .map(|i| candidates[i].clone())
        .collect())
}
