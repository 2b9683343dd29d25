//! HTTP routes.
//!
//! | Route | Form |
//! |-------|------|
//! | `GET /query?endpoint=…&period=…` | textual |
//! | `GET /{*path}` | path, e.g. `/cpu/process/nginx?period=600` |
//!
//! Both forms answer `_config/metrics` with the metric catalog as JSON.

use std::sync::Arc;

use axum::extract::{RawQuery, State};
use axum::http::{header, Uri};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, Router};
use axum::Json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::access::enforce_access;
use crate::query::{rewrite_path, Query};
use crate::state::AppState;

/// Content type of rendered charts.
pub const SVG_CONTENT_TYPE: &str = "image/svg+xml";

/// Creates the router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", get(textual_query))
        .route("/{*path}", get(path_query))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), enforce_access))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// GET /query
async fn textual_query(
    State(state): State<Arc<AppState>>,
    RawQuery(params): RawQuery,
) -> Response {
    answer(&state, params.as_deref().unwrap_or_default()).await
}

/// GET /{*path}
async fn path_query(State(state): State<Arc<AppState>>, uri: Uri) -> Response {
    let target = uri
        .path_and_query()
        .map_or_else(|| uri.path(), |pq| pq.as_str());
    answer(&state, &rewrite_path(target)).await
}

async fn answer(state: &AppState, params: &str) -> Response {
    let query = match Query::from_params(params) {
        Ok(query) => query,
        Err(e) => return e.into_response(),
    };

    if query.is_catalog() {
        return Json(state.handler().catalog()).into_response();
    }

    match state.handler().handle(&query).await {
        Ok(svg) => ([(header::CONTENT_TYPE, SVG_CONTENT_TYPE)], svg).into_response(),
        Err(e) => e.into_response(),
    }
}
