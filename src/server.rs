//! HTTP search surface.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service banner |
//! | `POST` | `/v1/search` | Vector search: `{query, limit?}` → `{count, chunks}` |
//!
//! All origins are permitted so browser-based clients can call the API
//! directly.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::client::EmbeddingApi;
use crate::error::RagError;
use crate::models::Chunk;
use crate::search;
use crate::store::Store;

#[derive(Clone)]
struct AppState {
    store: Store,
    embedder: Arc<dyn EmbeddingApi>,
}

/// Starts the HTTP server and runs until the process terminates.
pub async fn run_server(
    store: Store,
    embedder: Arc<dyn EmbeddingApi>,
    bind: &str,
) -> anyhow::Result<()> {
    let state = AppState { store, embedder };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(handle_home))
        .route("/v1/search", post(handle_search))
        .layer(cors)
        .with_state(state);

    info!(bind, "http server listening");
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

struct AppError(RagError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RagError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RagError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(e: RagError) -> Self {
        Self(e)
    }
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Serialize)]
struct SearchResponse {
    count: usize,
    chunks: Vec<Chunk>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let limit = match req.limit {
        Some(l) if l > 0 => l as usize,
        _ => 10,
    };

    let chunks =
        search::query_chunks(&state.store, state.embedder.as_ref(), &req.query, limit).await?;
    Ok(Json(SearchResponse {
        count: chunks.len(),
        chunks,
    }))
}

async fn handle_home() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "mdrag",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
