//! Server startup.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::error::{ServerError, ServerResult};
use crate::routes::create_router;
use crate::state::AppState;

/// Serves queries on `addr` until `shutdown` completes.
///
/// # Errors
///
/// Returns an error if binding fails or the server stops abnormally.
pub async fn serve<F>(state: Arc<AppState>, addr: SocketAddr, shutdown: F) -> ServerResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind {
            addr,
            reason: e.to_string(),
        })?;
    serve_listener(state, listener, shutdown).await
}

/// Serves queries on an already bound listener.
///
/// # Errors
///
/// Returns an error if the server stops abnormally.
pub async fn serve_listener<F>(
    state: Arc<AppState>,
    listener: TcpListener,
    shutdown: F,
) -> ServerResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "svgd listening");
    }

    let app = create_router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ServerError::Serve {
            reason: e.to_string(),
        })?;

    info!("svgd shut down");
    Ok(())
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    } else {
        // no signal handler; run until the process is killed
        std::future::pending::<()>().await;
    }
}
