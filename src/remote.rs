//! Client for the remote hybrid-retrieval service.
//!
//! The service runs vector search, reranking, and answer generation over
//! the shared knowledge base. This crate only consumes its JSON response:
//!
//! ```json
//! {
//!   "answer": "…",
//!   "confidence": 0.8,
//!   "quality_score": 0.74,
//!   "citations": [ { "content": "…", "score": 0.91, "source_title": "…", "reference": "…" } ]
//! }
//! ```
//!
//! Every field is optional. Timeouts, connection errors, non-2xx statuses,
//! and malformed bodies all produce an empty [`RemoteOutcome`] with
//! `failed = true`; nothing is raised to the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::RemoteConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteCitation {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub source_title: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

/// What the remote service returned for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteOutcome {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub citations: Vec<RemoteCitation>,
    /// Set when the call itself failed; never part of the wire format.
    #[serde(skip)]
    pub failed: bool,
}

impl RemoteOutcome {
    pub fn failure() -> Self {
        Self {
            failed: true,
            ..Self::default()
        }
    }
}

/// A hybrid retrieval backend queried by the unified merge.
#[async_trait]
pub trait HybridRetrieval: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: usize) -> RemoteOutcome;
}

#[derive(Serialize)]
struct RemoteRequest<'a> {
    query: &'a str,
    top_k: usize,
}

/// [`HybridRetrieval`] over HTTP: `POST <url>` with `{ "query", "top_k" }`.
pub struct HttpHybridRetrieval {
    url: String,
    client: reqwest::Client,
}

impl HttpHybridRetrieval {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// `Ok(None)` when no `[remote].url` is configured.
    pub fn from_config(config: &RemoteConfig) -> anyhow::Result<Option<Self>> {
        match &config.url {
            Some(url) => Ok(Some(Self::new(
                url.clone(),
                Duration::from_secs(config.timeout_secs),
            )?)),
            None => Ok(None),
        }
    }

    async fn call(&self, query: &str, top_k: usize) -> anyhow::Result<RemoteOutcome> {
        let response = self
            .client
            .post(&self.url)
            .json(&RemoteRequest { query, top_k })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("remote retrieval returned {}: {}", status, body);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl HybridRetrieval for HttpHybridRetrieval {
    async fn retrieve(&self, query: &str, top_k: usize) -> RemoteOutcome {
        match self.call(query, top_k).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.downcast_ref::<reqwest::Error>()
                    .is_some_and(|re| re.is_timeout())
                {
                    tracing::warn!(url = %self.url, "remote retrieval timed out");
                } else {
                    tracing::warn!(url = %self.url, error = %e, "remote retrieval failed");
                }
                RemoteOutcome::failure()
            }
        }
    }
}
