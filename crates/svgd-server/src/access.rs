//! Client address filtering.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

use crate::state::AppState;

/// Rejects clients outside the access policy with `403 {"error":"forbidden"}`.
///
/// A request without a known peer address is only let through when the
/// policy allows everyone.
pub async fn enforce_access(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let allowed = match peer {
        Some(ip) => state.access().permits(ip),
        None => state.access().networks().is_empty(),
    };

    if allowed {
        next.run(request).await
    } else {
        warn!(peer = ?peer, uri = %request.uri(), "rejected client");
        (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": "forbidden" })),
        )
            .into_response()
    }
}
