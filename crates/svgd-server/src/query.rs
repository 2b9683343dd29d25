//! Query parsing.
//!
//! Requests arrive either in the textual form
//! `endpoint=cpu/process/nginx&period=600` or as a path
//! (`/cpu/process/nginx?period=600`). [`rewrite_path`] turns the path form
//! into the textual form so both go through [`Query::from_params`].

use svgd_metrics::TimeWindow;

use crate::error::QueryError;

/// Look-back used when a request has no `period`.
pub const DEFAULT_PERIOD: u64 = 3600;

/// Longest look-back accepted, ten years.
pub const MAX_PERIOD: u64 = 10 * 366 * 86_400;

/// The special endpoint listing the metric catalog.
pub const CATALOG_ENDPOINT: &str = "_config/metrics";

/// One parsed query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Requested endpoint, without leading or trailing slashes.
    pub endpoint: String,
    /// Look-back window in seconds.
    pub period: u64,
}

impl Query {
    /// Creates a query.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, period: u64) -> Self {
        Self {
            endpoint: endpoint.into().trim_matches('/').to_string(),
            period,
        }
    }

    /// Parses `endpoint=…&period=…`.
    ///
    /// Values are URL-decoded. The first occurrence of a key wins; unknown
    /// keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidRequest` when `endpoint` is missing or
    /// empty, or `period` is not an integer in `1..=MAX_PERIOD`.
    pub fn from_params(params: &str) -> Result<Self, QueryError> {
        let mut endpoint = None;
        let mut period = None;
        for (key, value) in url::form_urlencoded::parse(params.trim_start_matches('?').as_bytes()) {
            match key.as_ref() {
                "endpoint" if endpoint.is_none() => endpoint = Some(value.into_owned()),
                "period" if period.is_none() => period = Some(value.into_owned()),
                _ => {}
            }
        }

        let endpoint = endpoint
            .map(|e| e.trim().trim_matches('/').to_string())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| QueryError::InvalidRequest {
                reason: "missing endpoint".to_string(),
            })?;

        let period = match period {
            None => DEFAULT_PERIOD,
            Some(raw) => parse_period(&raw)?,
        };

        Ok(Self { endpoint, period })
    }

    /// Returns true for the catalog listing.
    #[must_use]
    pub fn is_catalog(&self) -> bool {
        self.endpoint == CATALOG_ENDPOINT
    }

    /// Returns the window of `period` seconds ending at `now`.
    #[must_use]
    pub fn window_ending(&self, now: i64) -> TimeWindow {
        TimeWindow::ending_at(now, self.period)
    }
}

fn parse_period(raw: &str) -> Result<u64, QueryError> {
    match raw.trim().parse::<u64>() {
        Ok(period) if period > MAX_PERIOD => Err(QueryError::InvalidRequest {
            reason: format!("period must be at most {MAX_PERIOD} seconds, got {period}"),
        }),
        Ok(period) if period > 0 => Ok(period),
        _ => Err(QueryError::InvalidRequest {
            reason: format!("period must be a positive number of seconds, got '{raw}'"),
        }),
    }
}

/// Rewrites a path-form request into the textual form.
///
/// `/cpu/process/nginx?period=600` becomes
/// `endpoint=cpu/process/nginx&period=600`. The path is kept as sent, so
/// percent-encoding is undone by [`Query::from_params`].
#[must_use]
pub fn rewrite_path(path_and_query: &str) -> String {
    let (path, query) = path_and_query
        .split_once('?')
        .unwrap_or((path_and_query, ""));
    let endpoint = path.trim_matches('/');

    if query.is_empty() {
        format!("endpoint={endpoint}")
    } else {
        format!("endpoint={endpoint}&{query}")
    }
}
