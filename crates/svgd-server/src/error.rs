//! Error types for the svgd server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use svgd_archive::ArchiveError;
use svgd_metrics::MetricsError;
use svgd_render::RenderError;
use thiserror::Error;

/// Result type alias for server setup.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that stop the server from starting or serving.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configuration file exists but could not be read.
    #[error("failed to read config file '{path}': {reason}")]
    ConfigRead {
        /// Path of the file.
        path: String,
        /// The underlying error.
        reason: String,
    },

    /// The configuration file is not valid JSON.
    #[error("invalid config: {reason}")]
    ConfigParse {
        /// Parser message.
        reason: String,
    },

    /// A global configuration value is unusable.
    #[error("invalid config value for {field}: {reason}")]
    InvalidConfig {
        /// The offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Binding the listen socket failed.
    #[error("failed to bind to {addr}: {reason}")]
    Bind {
        /// The address.
        addr: std::net::SocketAddr,
        /// The underlying error.
        reason: String,
    },

    /// The HTTP server stopped with an error.
    #[error("server error: {reason}")]
    Serve {
        /// The underlying error.
        reason: String,
    },
}

/// Client-visible query failures.
///
/// Every variant maps to a stable machine-readable code and HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// No configured metric matches the endpoint.
    #[error("unknown endpoint: {endpoint}")]
    UnknownEndpoint {
        /// The requested endpoint.
        endpoint: String,
    },

    /// The matched metric needs a path parameter.
    #[error("endpoint {endpoint} requires parameter '{param_name}'")]
    MissingParameter {
        /// Endpoint of the matched metric.
        endpoint: String,
        /// Name of the required parameter.
        param_name: String,
    },

    /// The path parameter is not usable.
    #[error("invalid parameter '{param}': {reason}")]
    InvalidParameter {
        /// The parameter.
        param: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The request itself is malformed.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// What is wrong with it.
        reason: String,
    },

    /// The archive does not exist.
    #[error("no archive data: {archive}")]
    NoArchiveData {
        /// The archive path.
        archive: String,
    },

    /// Neither backend could serve the archive.
    #[error("backend unavailable: {reason}")]
    BackendUnavailable {
        /// The last backend error.
        reason: String,
    },

    /// Every sample was invalid after cleaning.
    #[error("failed to fetch metric data: no valid samples for {endpoint}")]
    EmptyResult {
        /// The metric endpoint.
        endpoint: String,
    },

    /// The render script failed.
    #[error("render failed: {reason}")]
    Render {
        /// The render error.
        reason: String,
    },

    /// The request did not finish within its deadline.
    #[error("query exceeded its deadline of {timeout_ms} ms")]
    DeadlineExceeded {
        /// The deadline in milliseconds.
        timeout_ms: u64,
    },

    /// An unexpected internal failure.
    #[error("internal error: {reason}")]
    Internal {
        /// Description.
        reason: String,
    },
}

impl QueryError {
    /// Returns the machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnknownEndpoint { .. } => "unknown_endpoint",
            Self::MissingParameter { .. } => "missing_parameter",
            Self::InvalidParameter { .. } => "invalid_parameter",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::NoArchiveData { .. } => "no_archive_data",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::EmptyResult { .. } => "empty_result",
            Self::Render { .. } => "render_error",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Returns the HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::UnknownEndpoint { .. } | Self::NoArchiveData { .. } | Self::EmptyResult { .. } => {
                StatusCode::NOT_FOUND
            }
            Self::MissingParameter { .. }
            | Self::InvalidParameter { .. }
            | Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Render { .. } | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<MetricsError> for QueryError {
    fn from(err: MetricsError) -> Self {
        match err {
            MetricsError::UnknownEndpoint { endpoint } => Self::UnknownEndpoint { endpoint },
            MetricsError::MissingParameter {
                endpoint,
                param_name,
            } => Self::MissingParameter {
                endpoint,
                param_name,
            },
            MetricsError::InvalidParameter { param, reason } => {
                Self::InvalidParameter { param, reason }
            }
            MetricsError::EmptyResult { endpoint } => Self::EmptyResult { endpoint },
            window @ MetricsError::InvalidTimeWindow { .. } => Self::InvalidRequest {
                reason: window.to_string(),
            },
            other => Self::Internal {
                reason: other.to_string(),
            },
        }
    }
}

impl From<ArchiveError> for QueryError {
    fn from(err: ArchiveError) -> Self {
        match err {
            ArchiveError::NotFound { path } => Self::NoArchiveData { archive: path },
            other => Self::BackendUnavailable {
                reason: other.to_string(),
            },
        }
    }
}

impl From<RenderError> for QueryError {
    fn from(err: RenderError) -> Self {
        Self::Render {
            reason: err.to_string(),
        }
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };
        (self.status(), axum::Json(body)).into_response()
    }
}
