//! The query handler.
//!
//! Drives one query through the pipeline: resolve the endpoint, select a
//! step and fetch the archive, transform, render. The handler only moves
//! forward; each component retries internally, and the first failure ends
//! the query.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use svgd_archive::SeriesFetcher;
use svgd_metrics::{transform, CatalogEntry, MetricRegistry, SelectorConfig};
use svgd_render::{RenderRequest, RendererPool};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{ServiceConfig, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::error::{QueryError, ServerError, ServerResult};
use crate::query::Query;

/// How far a query got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryStage {
    /// Parsed, nothing done yet.
    Received,
    /// Endpoint matched a metric.
    Resolved,
    /// A step was chosen for the archive.
    StepSelected,
    /// Raw samples fetched.
    Fetched,
    /// Samples cleaned and transformed.
    Transformed,
    /// Chart rendered.
    Rendered,
    /// Response handed back.
    Responded,
    /// Failed.
    Errored,
}

impl QueryStage {
    /// Returns the stage name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Resolved => "resolved",
            Self::StepSelected => "step_selected",
            Self::Fetched => "fetched",
            Self::Transformed => "transformed",
            Self::Rendered => "rendered",
            Self::Responded => "responded",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answers chart queries.
///
/// Cloning is cheap; clones share the registry, fetcher and renderer pool.
#[derive(Debug, Clone)]
pub struct QueryHandler {
    registry: Arc<MetricRegistry>,
    fetcher: SeriesFetcher,
    renderer: RendererPool,
    selector: SelectorConfig,
    timeout: Duration,
}

impl QueryHandler {
    /// Creates a handler with the default selector and deadline.
    #[must_use]
    pub fn new(registry: Arc<MetricRegistry>, fetcher: SeriesFetcher, renderer: RendererPool) -> Self {
        Self {
            registry,
            fetcher,
            renderer,
            selector: SelectorConfig::default(),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Builds the standard handler: `rrdtool` plus the configured cache
    /// daemon, and a renderer pool over the configured script.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::InvalidConfig` for a malformed daemon address.
    pub fn from_config(config: &ServiceConfig) -> ServerResult<Self> {
        let settings = config.registry.settings();
        let fetcher = SeriesFetcher::standard(&config.rrdtool_path, settings.cache_daemon.as_deref())
            .map_err(|e| ServerError::InvalidConfig {
                field: "archive.rrdcached_addr".to_string(),
                reason: e.to_string(),
            })?;
        let renderer = RendererPool::from_path(&settings.renderer_script, config.renderer.clone());

        Ok(Self::new(Arc::new(config.registry.clone()), fetcher, renderer)
            .with_selector(config.selector)
            .with_timeout(config.request_timeout))
    }

    /// Set the selector constants.
    #[must_use]
    pub const fn with_selector(mut self, selector: SelectorConfig) -> Self {
        self.selector = selector;
        self
    }

    /// Set the per-query deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the registry.
    #[must_use]
    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    /// Returns the renderer pool.
    #[must_use]
    pub const fn renderer(&self) -> &RendererPool {
        &self.renderer
    }

    /// Returns the metric listing served at `_config/metrics`.
    #[must_use]
    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.registry.catalog()
    }

    /// Runs `query` and returns the rendered chart.
    ///
    /// The whole pipeline runs under the handler's deadline; when it expires
    /// the in-flight fetch or render wait is dropped.
    ///
    /// # Errors
    ///
    /// Returns the first failure as a [`QueryError`].
    pub async fn handle(&self, query: &Query) -> Result<String, QueryError> {
        self.handle_at(query, chrono::Utc::now().timestamp()).await
    }

    /// Runs `query` with its window ending at `now`.
    ///
    /// # Errors
    ///
    /// As for [`QueryHandler::handle`].
    pub async fn handle_at(&self, query: &Query, now: i64) -> Result<String, QueryError> {
        let span = info_span!(
            "query",
            request_id = %Uuid::new_v4(),
            endpoint = %query.endpoint,
            period = query.period,
        );

        async {
            let started = Instant::now();
            let mut stage = QueryStage::Received;
            let result = match tokio::time::timeout(self.timeout, self.run(query, now, &mut stage)).await {
                Ok(result) => result,
                Err(_) => Err(QueryError::DeadlineExceeded {
                    timeout_ms: self.timeout.as_millis() as u64,
                }),
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(svg) => {
                    stage = QueryStage::Responded;
                    debug!(%stage, bytes = svg.len(), elapsed_ms, "query answered");
                }
                Err(e) => {
                    warn!(
                        stage = %stage,
                        code = e.code(),
                        error = %e,
                        elapsed_ms,
                        "query failed"
                    );
                    stage = QueryStage::Errored;
                    debug!(%stage, "query closed");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    /// The pipeline. `stage` is left at the last stage reached.
    async fn run(&self, query: &Query, now: i64, stage: &mut QueryStage) -> Result<String, QueryError> {
        let resolved = self.registry.resolve(&query.endpoint)?;
        let definition = resolved.definition();
        let archive = self.registry.archive_path(&resolved)?;
        *stage = QueryStage::Resolved;
        debug!(metric = %definition.endpoint(), archive = %archive.display(), "resolved");

        let window = query.window_ending(now);
        let outcome = self.fetcher.fetch(&archive, window, &self.selector).await?;
        *stage = QueryStage::StepSelected;
        debug!(
            step = outcome.selection.step,
            reason = %outcome.selection.reason,
            "step selected"
        );
        *stage = QueryStage::Fetched;
        debug!(
            step = outcome.step,
            backend = outcome.backend,
            series = outcome.series.len(),
            "fetched"
        );

        let series = transform(&outcome.series, definition)?;
        *stage = QueryStage::Transformed;

        let request = RenderRequest::new(series, definition, resolved.param());
        let svg = self.renderer.render(request).await?;
        *stage = QueryStage::Rendered;
        Ok(svg)
    }
}
