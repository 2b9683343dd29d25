//! # svgd-server
//!
//! The svgd query handler and its HTTP transport.
//!
//! A query names a metric endpoint and a look-back period. The handler
//! resolves the endpoint against the [`MetricRegistry`](svgd_metrics::MetricRegistry),
//! fetches the archive at a resolution that fits the window, transforms the
//! samples and renders them to SVG with the configured chart script.
//!
//! ## Endpoints
//!
//! | Request | Response |
//! |---------|----------|
//! | `/query?endpoint=cpu/process/nginx&period=600` | `image/svg+xml` |
//! | `/cpu/process/nginx?period=600` | `image/svg+xml` |
//! | `/_config/metrics` | metric catalog as JSON |
//!
//! Failures are JSON: `{"error": "<code>", "message": "..."}`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod config;
pub mod error;
pub mod handler;
pub mod query;
pub mod routes;
pub mod server;
pub mod state;

pub use config::ServiceConfig;
pub use error::{QueryError, ServerError, ServerResult};
pub use handler::{QueryHandler, QueryStage};
pub use query::{rewrite_path, Query, CATALOG_ENDPOINT, DEFAULT_PERIOD, MAX_PERIOD};
pub use routes::create_router;
pub use server::{serve, serve_listener, shutdown_signal};
pub use state::AppState;
