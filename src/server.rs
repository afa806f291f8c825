//! JSON HTTP interface.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Vector index status |
//! | `POST` | `/search` | Unified local + global search |
//! | `POST` | `/global/search` | Vector search with context floor / MMR |
//! | `POST` | `/tenants/{tenant}/search` | Lexical search in one tenant |
//! | `GET`  | `/tenants/{tenant}/documents` | List a tenant's documents |
//! | `POST` | `/tenants/{tenant}/documents` | Upload (base64) and index a document |
//! | `DELETE` | `/tenants/{tenant}/documents/{id}` | Delete a document and rebuild chunks |
//! | `POST` | `/admin/index/reset` | Clear the vector index state |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `unsupported_format` (415), `internal` (500). Search endpoints only
//! reject malformed requests; retrieval failures come back as empty results.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::blob::create_blob_store;
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::error::IngestError;
use crate::remote::{HttpHybridRetrieval, HybridRetrieval};
use crate::lexical::{LexicalQuery, LexicalStore};
use crate::models::{Document, SearchResult, Visibility};
use crate::unified::{UnifiedRequest, UnifiedResponse, UnifiedRetriever};
use crate::vector_store::{IndexStatus, SearchOptions, VectorIndexStore};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub vector: Arc<VectorIndexStore>,
    pub unified: Arc<UnifiedRetriever>,
}

impl AppState {
    /// Wire up blob store, embedder, vector store, and remote client from config.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let blob = create_blob_store(&config.blob)?;
        let embedder = create_embedder(&config.embedding)?;
        let vector = Arc::new(VectorIndexStore::new(
            config.index.clone(),
            blob,
            embedder,
        ));

        let remote = HttpHybridRetrieval::from_config(&config.remote)?
            .map(|client| Arc::new(client) as Arc<dyn HybridRetrieval>);
        let unified = Arc::new(UnifiedRetriever::new(
            config.lexical.clone(),
            config.retrieval.clone(),
            remote,
        ));

        Ok(Self {
            config: Arc::new(config.clone()),
            vector,
            unified,
        })
    }
}

/// Build the router. Exposed separately from [`run_server`] for in-process tests.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/search", post(handle_unified_search))
        .route("/global/search", post(handle_global_search))
        .route("/tenants/{tenant}/search", post(handle_tenant_search))
        .route(
            "/tenants/{tenant}/documents",
            get(handle_list_documents).post(handle_upload_document),
        )
        .route(
            "/tenants/{tenant}/documents/{id}",
            delete(handle_delete_document),
        )
        .route("/admin/index/reset", post(handle_reset_index))
        .layer(cors)
        .with_state(state)
}

/// Serve on `[server].bind` until the process is terminated.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();

    // Warm the index in the background; requests before it finishes see an empty index.
    let vector = state.vector.clone();
    tokio::spawn(async move {
        vector.initialize().await;
    });

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "retrieval server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        let message = err.to_string();
        match err {
            IngestError::UnsupportedFormat(_) => AppError {
                status: StatusCode::UNSUPPORTED_MEDIA_TYPE,
                code: "unsupported_format",
                message,
            },
            IngestError::TooLarge { .. } | IngestError::InvalidTenant(_) => bad_request(message),
            IngestError::DocumentNotFound(_) => AppError {
                status: StatusCode::NOT_FOUND,
                code: "not_found",
                message,
            },
            IngestError::Io { .. } | IngestError::Json { .. } => {
                tracing::error!(error = %message, "storage failure");
                internal(message)
            }
        }
    }
}

/// Run blocking lexical-store work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, IngestError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| internal(format!("task failed: {}", e)))?
        .map_err(AppError::from)
}

fn require_query(query: &str) -> Result<(), AppError> {
    if query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    Ok(())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    index: IndexStatus,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        index: state.vector.status().await,
    })
}

// ============ POST /search ============

async fn handle_unified_search(
    State(state): State<AppState>,
    Json(request): Json<UnifiedRequest>,
) -> Result<Json<UnifiedResponse>, AppError> {
    require_query(&request.query)?;
    Ok(Json(state.unified.search(&request).await))
}

// ============ POST /global/search ============

#[derive(Deserialize)]
struct GlobalSearchRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    min_score: Option<f64>,
    #[serde(default)]
    use_mmr: bool,
    #[serde(default)]
    lambda: Option<f64>,
    #[serde(default)]
    fetch_k: Option<usize>,
}

#[derive(Serialize)]
struct ResultsResponse {
    results: Vec<SearchResult>,
}

async fn handle_global_search(
    State(state): State<AppState>,
    Json(request): Json<GlobalSearchRequest>,
) -> Result<Json<ResultsResponse>, AppError> {
    require_query(&request.query)?;
    let retrieval = &state.config.retrieval;

    let mut options = SearchOptions::from_config(retrieval);
    if let Some(top_k) = request.top_k {
        options.top_k = top_k.clamp(1, retrieval.max_top_k);
    }
    if let Some(min_score) = request.min_score {
        options.min_score = min_score;
    }
    if let Some(lambda) = request.lambda {
        options
            .set_lambda(lambda)
            .map_err(|e| bad_request(e.to_string()))?;
    }
    if let Some(fetch_k) = request.fetch_k {
        options.fetch_k = fetch_k;
    }
    options.use_mmr = request.use_mmr;

    state.vector.initialize().await;
    let results = state
        .vector
        .search_with_context(&request.query, &options)
        .await;
    Ok(Json(ResultsResponse { results }))
}

// ============ POST /tenants/{tenant}/search ============

#[derive(Deserialize)]
struct TenantSearchRequest {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    visibility: Option<Visibility>,
    #[serde(default)]
    min_score: Option<f64>,
}

async fn handle_tenant_search(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(request): Json<TenantSearchRequest>,
) -> Result<Json<ResultsResponse>, AppError> {
    require_query(&request.query)?;
    let config = state.config.clone();
    let top_k = request
        .top_k
        .unwrap_or(config.retrieval.local_top_k)
        .clamp(1, config.retrieval.max_top_k);

    let results = blocking(move || {
        let store = LexicalStore::open(&config.lexical, &tenant)?;
        let mut query = LexicalQuery::new(
            &request.query,
            top_k,
            request.min_score.unwrap_or(config.lexical.min_score),
        );
        query.category = request.category.as_deref();
        query.visibility = request.visibility;
        Ok(store.search(&query))
    })
    .await?;

    Ok(Json(ResultsResponse { results }))
}

// ============ /tenants/{tenant}/documents ============

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    visibility: Option<Visibility>,
}

#[derive(Serialize)]
struct DocumentsResponse {
    documents: Vec<Document>,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<DocumentsResponse>, AppError> {
    let config = state.config.clone();
    let documents = blocking(move || {
        let store = LexicalStore::open(&config.lexical, &tenant)?;
        store.list_documents(params.category.as_deref(), params.visibility)
    })
    .await?;
    Ok(Json(DocumentsResponse { documents }))
}

#[derive(Deserialize)]
struct UploadRequest {
    filename: String,
    /// File bytes, standard base64.
    content_base64: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default = "default_visibility")]
    visibility: Visibility,
}

fn default_visibility() -> Visibility {
    Visibility::Private
}

async fn handle_upload_document(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(request): Json<UploadRequest>,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(request.content_base64.as_bytes())
        .map_err(|e| bad_request(format!("content_base64 is not valid base64: {}", e)))?;

    let config = state.config.clone();
    let doc = blocking(move || {
        let store = LexicalStore::open(&config.lexical, &tenant)?;
        store.ingest(
            &request.filename,
            &bytes,
            &request.category,
            request.tags,
            request.visibility,
        )
    })
    .await?;

    Ok((StatusCode::CREATED, Json(doc)))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let config = state.config.clone();
    blocking(move || {
        let store = LexicalStore::open(&config.lexical, &tenant)?;
        store.delete_document(&id)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ POST /admin/index/reset ============

async fn handle_reset_index(State(state): State<AppState>) -> Json<IndexStatus> {
    state.vector.reset().await;
    Json(state.vector.status().await)
}
