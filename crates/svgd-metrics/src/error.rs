//! Error types for the svgd-metrics crate.

use thiserror::Error;

/// Errors that can occur while resolving, validating or transforming metrics.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricsError {
    /// No configured metric matches the requested endpoint.
    #[error("unknown endpoint: {endpoint}")]
    UnknownEndpoint {
        /// The endpoint that was requested.
        endpoint: String,
    },

    /// The matched metric needs a path parameter but none was supplied.
    #[error("endpoint {endpoint} requires parameter '{param_name}'")]
    MissingParameter {
        /// The endpoint of the matched metric.
        endpoint: String,
        /// The name of the required parameter.
        param_name: String,
    },

    /// The supplied path parameter cannot be used to build an archive path.
    #[error("invalid parameter '{param}': {reason}")]
    InvalidParameter {
        /// The rejected parameter.
        param: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A path or text template could not be parsed.
    #[error("invalid template '{template}': {reason}")]
    InvalidTemplate {
        /// The raw template string.
        template: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A metric definition failed validation.
    #[error("invalid metric '{endpoint}': {reason}")]
    InvalidMetric {
        /// The endpoint of the offending definition.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Two definitions share the same endpoint.
    #[error("duplicate endpoint: {endpoint}")]
    DuplicateEndpoint {
        /// The duplicated endpoint.
        endpoint: String,
    },

    /// A numeric value format string is not supported.
    #[error("invalid value format '{format}': {reason}")]
    InvalidValueFormat {
        /// The raw format string.
        format: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The time window is invalid (start after end).
    #[error("invalid time window: start={start}, end={end}")]
    InvalidTimeWindow {
        /// Start timestamp.
        start: i64,
        /// End timestamp.
        end: i64,
    },

    /// A series violates the ordering or value invariants.
    #[error("invalid series '{name}': {reason}")]
    InvalidSeries {
        /// The series name.
        name: String,
        /// The violated invariant.
        reason: String,
    },

    /// Every sample was discarded during cleaning.
    #[error("no valid samples for {endpoint}")]
    EmptyResult {
        /// The endpoint being transformed.
        endpoint: String,
    },

    /// An access policy entry is neither an address nor a network.
    #[error("invalid access policy entry '{entry}': {reason}")]
    InvalidAccessPolicy {
        /// The rejected entry.
        entry: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Selector thresholds are inconsistent.
    #[error("invalid selector configuration: {reason}")]
    InvalidSelectorConfig {
        /// Why the configuration was rejected.
        reason: String,
    },
}

/// Result type for metrics operations.
pub type Result<T> = std::result::Result<T, MetricsError>;
