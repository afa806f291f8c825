//! Unified retrieval across a tenant's lexical store and the remote
//! hybrid-retrieval service.
//!
//! Both searches are dispatched together and awaited together. Then:
//!
//! - **Pass-through**: global search is on, the remote service produced an
//!   answer, and local search is off or came back empty. The remote
//!   answer, confidence, and quality score are returned as-is.
//! - **Merge**: otherwise local hits and remote citations are pooled,
//!   sorted by score, and truncated to `top_k`. Up to
//!   [`MAX_CITATIONS`] citations are cut from the head of that list.
//!
//! Neither side can fail the call. A side that errors contributes nothing,
//! and when nothing at all is found the response carries
//! [`NO_INFORMATION_ANSWER`] with zero confidence.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{LexicalConfig, RetrievalConfig};
use crate::lexical::{LexicalQuery, LexicalStore};
use crate::models::{ResultSource, SearchResult, Visibility};
use crate::remote::{HybridRetrieval, RemoteOutcome};

pub const MAX_CITATIONS: usize = 5;
pub const CITATION_CHARS: usize = 500;
pub const NO_INFORMATION_ANSWER: &str =
    "I couldn't find any information about that in the knowledge base.";

fn default_true() -> bool {
    true
}

/// A unified query as accepted by `POST /search` and `retrieval ask`.
#[derive(Debug, Clone, Deserialize)]
pub struct UnifiedRequest {
    pub query: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default = "default_true")]
    pub include_local: bool,
    #[serde(default = "default_true")]
    pub include_global: bool,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub local_top_k: Option<usize>,
    #[serde(default)]
    pub global_top_k: Option<usize>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub visibility: Option<Visibility>,
}

impl UnifiedRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            tenant_id: None,
            include_local: true,
            include_global: true,
            top_k: None,
            local_top_k: None,
            global_top_k: None,
            category: None,
            visibility: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub content: String,
    pub score: f64,
    pub source: ResultSource,
    pub reference: String,
    pub source_title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceCounts {
    pub local: usize,
    pub global: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnifiedResponse {
    /// Generated answer, when the remote service produced one or nothing
    /// was found at all.
    pub answer: Option<String>,
    pub confidence: f64,
    pub quality_score: Option<f64>,
    pub citations: Vec<Citation>,
    pub sources: SourceCounts,
    pub latency_ms: u64,
    pub query_id: String,
    /// The ranked list the citations were cut from.
    pub results: Vec<SearchResult>,
}

/// Fans a query out to local and remote sources and merges the results.
pub struct UnifiedRetriever {
    lexical: LexicalConfig,
    retrieval: RetrievalConfig,
    remote: Option<Arc<dyn HybridRetrieval>>,
}

impl UnifiedRetriever {
    pub fn new(
        lexical: LexicalConfig,
        retrieval: RetrievalConfig,
        remote: Option<Arc<dyn HybridRetrieval>>,
    ) -> Self {
        Self {
            lexical,
            retrieval,
            remote,
        }
    }

    pub async fn search(&self, request: &UnifiedRequest) -> UnifiedResponse {
        let started = Instant::now();
        let query_id = make_query_id(&request.query, request.tenant_id.as_deref());

        let top_k = request
            .top_k
            .unwrap_or(self.retrieval.top_k)
            .clamp(1, self.retrieval.max_top_k);
        let local_top_k = request.local_top_k.unwrap_or(self.retrieval.local_top_k);
        let global_top_k = request.global_top_k.unwrap_or(self.retrieval.global_top_k);

        let (local, remote) = tokio::join!(
            self.local_search(request, local_top_k, &query_id),
            self.remote_search(request, global_top_k),
        );

        if request.include_global && local.is_empty() {
            if let Some(answer) = remote.answer.clone() {
                tracing::debug!(query_id = %query_id, "passing remote answer through");
                let results = remote_results(&remote);
                return UnifiedResponse {
                    answer: Some(answer),
                    confidence: remote.confidence.unwrap_or(0.0),
                    quality_score: remote.quality_score,
                    citations: build_citations(&results),
                    sources: SourceCounts {
                        local: 0,
                        global: results.len(),
                    },
                    latency_ms: elapsed_ms(started),
                    query_id,
                    results,
                };
            }
        }

        let mut results = local;
        results.extend(remote_results(&remote));
        // Stable: equal scores keep local hits ahead of remote ones.
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);

        let sources = SourceCounts {
            local: results
                .iter()
                .filter(|r| r.source == ResultSource::Local)
                .count(),
            global: results
                .iter()
                .filter(|r| r.source == ResultSource::Global)
                .count(),
        };

        let (answer, confidence) = if results.is_empty() {
            tracing::info!(query_id = %query_id, "no results from any source");
            (Some(NO_INFORMATION_ANSWER.to_string()), 0.0)
        } else {
            let top = results.first().map(|r| r.score).unwrap_or(0.0);
            (remote.answer.clone(), remote.confidence.unwrap_or(top))
        };

        UnifiedResponse {
            answer,
            confidence,
            quality_score: remote.quality_score,
            citations: build_citations(&results),
            sources,
            latency_ms: elapsed_ms(started),
            query_id,
            results,
        }
    }

    async fn local_search(
        &self,
        request: &UnifiedRequest,
        top_k: usize,
        query_id: &str,
    ) -> Vec<SearchResult> {
        if !request.include_local {
            return Vec::new();
        }
        let Some(tenant_id) = request.tenant_id.clone() else {
            tracing::debug!(query_id, "local search requested without a tenant");
            return Vec::new();
        };

        let config = self.lexical.clone();
        let text = request.query.clone();
        let category = request.category.clone();
        let visibility = request.visibility;
        let min_score = self.lexical.min_score;

        let task = tokio::task::spawn_blocking(move || {
            let store = LexicalStore::open(&config, &tenant_id)?;
            let mut query = LexicalQuery::new(&text, top_k, min_score);
            query.category = category.as_deref();
            query.visibility = visibility;
            Ok::<_, crate::error::IngestError>(store.search(&query))
        });

        match task.await {
            Ok(Ok(results)) => results,
            Ok(Err(e)) => {
                tracing::warn!(query_id, error = %e, "local search failed");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(query_id, error = %e, "local search task panicked");
                Vec::new()
            }
        }
    }

    async fn remote_search(&self, request: &UnifiedRequest, top_k: usize) -> RemoteOutcome {
        if !request.include_global {
            return RemoteOutcome::default();
        }
        match &self.remote {
            Some(remote) => remote.retrieve(&request.query, top_k).await,
            None => RemoteOutcome::default(),
        }
    }
}

fn remote_results(outcome: &RemoteOutcome) -> Vec<SearchResult> {
    outcome
        .citations
        .iter()
        .enumerate()
        .map(|(position, c)| SearchResult {
            content: c.content.clone(),
            score: c.score.unwrap_or(0.0).clamp(0.0, 1.0),
            source: ResultSource::Global,
            reference: c.reference.clone().unwrap_or_default(),
            position,
            source_title: c.source_title.clone(),
        })
        .collect()
}

fn build_citations(results: &[SearchResult]) -> Vec<Citation> {
    results
        .iter()
        .take(MAX_CITATIONS)
        .map(|r| Citation {
            content: r.content.chars().take(CITATION_CHARS).collect(),
            score: r.score,
            source: r.source,
            reference: r.reference.clone(),
            source_title: r.source_title.clone(),
        })
        .collect()
}

/// Short correlation id from the query, tenant, and current time.
pub fn make_query_id(query: &str, tenant_id: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update([0u8]);
    hasher.update(tenant_id.unwrap_or_default().as_bytes());
    hasher.update([0u8]);
    hasher.update(
        chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_le_bytes(),
    );
    hex::encode(&hasher.finalize()[..6])
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteCitation;

    fn result(score: f64, source: ResultSource) -> SearchResult {
        SearchResult {
            content: "x".repeat(800),
            score,
            source,
            reference: "r".to_string(),
            position: 0,
            source_title: None,
        }
    }

    #[test]
    fn citations_capped_and_truncated() {
        let results: Vec<_> = (0..8).map(|_| result(0.5, ResultSource::Local)).collect();
        let citations = build_citations(&results);
        assert_eq!(citations.len(), MAX_CITATIONS);
        assert!(citations.iter().all(|c| c.content.chars().count() == CITATION_CHARS));
    }

    #[test]
    fn remote_citations_without_score_rank_last() {
        let outcome = RemoteOutcome {
            citations: vec![
                RemoteCitation {
                    content: "unscored".into(),
                    ..Default::default()
                },
                RemoteCitation {
                    content: "scored".into(),
                    score: Some(1.7),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let results = remote_results(&outcome);
        assert_eq!(results[0].score, 0.0);
        assert_eq!(results[1].score, 1.0);
        assert_eq!(results[1].position, 1);
    }

    #[test]
    fn query_id_is_short_hex() {
        let id = make_query_id("maldives", Some("acme"));
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn nothing_found_yields_default_answer() {
        let retriever = UnifiedRetriever::new(
            LexicalConfig::default(),
            RetrievalConfig::default(),
            None,
        );
        let mut request = UnifiedRequest::new("anything");
        request.include_local = false;

        let response = retriever.search(&request).await;
        assert_eq!(response.answer.as_deref(), Some(NO_INFORMATION_ANSWER));
        assert_eq!(response.confidence, 0.0);
        assert!(response.citations.is_empty());
        assert_eq!(response.sources, SourceCounts::default());
    }
}
