//! The series fetcher.
//!
//! Runs a read on the preferred backend (the cache daemon when one is
//! configured, the direct store otherwise): read metadata, select a step,
//! fetch with retry and normalize the rows onto a regular grid. When the
//! cache fails for any reason other than a missing archive, the whole read
//! is repeated on the direct store.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use svgd_metrics::{
    select_step, ArchiveInfo, DataPoint, RawSeries, SelectionReason, SelectorConfig,
    StepSelection, TimeWindow,
};
use tracing::{debug, warn};

use crate::backend::{ArchiveBackend, BackendConnector, FetchedRows};
use crate::cached::{CacheDaemon, DaemonAddr};
use crate::direct::DirectStore;
use crate::error::{ArchiveError, Result};
use crate::retry::RetryPolicy;

/// Most rows laid out per data source. Longer grids keep the latest rows.
pub const MAX_ROWS: usize = 100_000;

/// Result of a selected fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    /// Step chosen by the selector.
    pub selection: StepSelection,
    /// Step the rows are laid out on.
    pub step: u64,
    /// One series per data source, on a dense grid.
    pub series: Vec<RawSeries>,
    /// Backend that served the rows.
    pub backend: &'static str,
}

/// What to read once a session is open.
#[derive(Debug, Clone, Copy)]
enum Plan<'a> {
    /// Select a step from the archive metadata.
    Select(&'a SelectorConfig),
    /// Read at the given step.
    Fixed(u64),
}

/// Fetches raw series with backend fallback and retry.
#[derive(Clone)]
pub struct SeriesFetcher {
    direct: Arc<dyn BackendConnector>,
    cache: Option<Arc<dyn BackendConnector>>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for SeriesFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesFetcher")
            .field("direct", &self.direct.name())
            .field("cache", &self.cache.as_ref().map(|c| c.name()))
            .field("retry", &self.retry)
            .finish()
    }
}

impl SeriesFetcher {
    /// Creates a fetcher reading through `direct` only.
    #[must_use]
    pub fn new(direct: Arc<dyn BackendConnector>) -> Self {
        Self {
            direct,
            cache: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Builds the standard fetcher: `rrdtool` at `program`, plus the cache
    /// daemon when an address is given.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::InvalidAddress` if the daemon address is malformed.
    pub fn standard(program: &Path, daemon: Option<&str>) -> Result<Self> {
        let fetcher = Self::new(Arc::new(DirectStore::new(program)));
        match daemon {
            Some(addr) => {
                let addr = DaemonAddr::parse(addr)?;
                Ok(fetcher.with_cache(Arc::new(CacheDaemon::new(addr))))
            }
            None => Ok(fetcher),
        }
    }

    /// Set the preferred cache backend.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn BackendConnector>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Selects a step for `window` and fetches the archive at it.
    ///
    /// The window start is moved up to the oldest sample the archive holds.
    /// Metadata failures on the direct store do not fail the fetch; the
    /// selector falls back to its floor step. When `validate_step` is set and
    /// the chosen step yields no valid sample, the fetch is repeated once at
    /// the floor step.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::NotFound` when the archive does not exist and
    /// `ArchiveError::Unavailable` when no backend could serve it.
    pub async fn fetch(
        &self,
        path: &Path,
        window: TimeWindow,
        selector: &SelectorConfig,
    ) -> Result<FetchOutcome> {
        let started = Instant::now();
        let result = self.run(path, window, Plan::Select(selector)).await;

        if let Ok(outcome) = &result {
            debug!(
                archive = %path.display(),
                step = outcome.step,
                reason = %outcome.selection.reason,
                backend = outcome.backend,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "fetched archive"
            );
        }
        result
    }

    /// Fetches the archive at a fixed step.
    ///
    /// Returns `ceil((end - aligned_start) / step)` points per data source,
    /// at most [`MAX_ROWS`], where `aligned_start` is `window.start` rounded
    /// down to the step. Rows the backend did not return are NaN.
    ///
    /// # Errors
    ///
    /// As for [`SeriesFetcher::fetch`].
    pub async fn fetch_at(&self, path: &Path, window: TimeWindow, step: u64) -> Result<Vec<RawSeries>> {
        self.run(path, window, Plan::Fixed(step))
            .await
            .map(|outcome| outcome.series)
    }

    /// Runs `plan` on the cache, then on the direct store if needed.
    async fn run(&self, path: &Path, window: TimeWindow, plan: Plan<'_>) -> Result<FetchOutcome> {
        if let Some(cache) = &self.cache {
            match self.run_on(cache.as_ref(), path, window, plan, true).await {
                Err(e) if !e.is_missing_data() => warn!(
                    archive = %path.display(),
                    backend = cache.name(),
                    error = %e,
                    "cache backend failed, falling back to direct store"
                ),
                done => return done,
            }
        }
        self.run_on(self.direct.as_ref(), path, window, plan, false)
            .await
    }

    /// Opens one session on `connector`, runs `plan` and closes the session.
    ///
    /// With `metadata_required`, a metadata failure fails the run instead of
    /// falling back to the floor step.
    async fn run_on(
        &self,
        connector: &dyn BackendConnector,
        path: &Path,
        window: TimeWindow,
        plan: Plan<'_>,
        metadata_required: bool,
    ) -> Result<FetchOutcome> {
        let mut session = open(connector, path).await?;

        let result = match plan {
            Plan::Select(selector) => {
                self.select_and_fetch(connector, &mut session, path, window, selector, metadata_required)
                    .await
            }
            Plan::Fixed(step) => self
                .fetch_with_retry(connector, &mut session, path, window, step)
                .await
                .map(|(answered, rows)| FetchOutcome {
                    selection: StepSelection {
                        step,
                        reason: SelectionReason::Fixed,
                    },
                    step: answered,
                    series: normalize(&rows, window, answered),
                    backend: session.name(),
                }),
        };
        close(session).await;
        result
    }

    async fn select_and_fetch(
        &self,
        connector: &dyn BackendConnector,
        session: &mut Box<dyn ArchiveBackend>,
        path: &Path,
        window: TimeWindow,
        selector: &SelectorConfig,
        metadata_required: bool,
    ) -> Result<FetchOutcome> {
        let info = match session.info(path).await {
            Ok(info) => Some(info),
            Err(e) if e.is_missing_data() || metadata_required => return Err(e),
            Err(e) => {
                warn!(archive = %path.display(), backend = session.name(), error = %e, "cannot read archive metadata");
                None
            }
        };
        let window = info
            .as_ref()
            .and_then(ArchiveInfo::earliest_timestamp)
            .map_or(window, |earliest| window.clamp_start(earliest));

        let selection = select_step(info.as_ref(), window, selector);
        debug!(archive = %path.display(), step = selection.step, reason = %selection.reason, "selected step");

        let (mut step, rows) = self
            .fetch_with_retry(connector, session, path, window, selection.step)
            .await?;
        let mut series = normalize(&rows, window, step);

        let floor = selector.min_step.max(1);
        if selector.validate_step && step != floor && series.iter().all(|s| s.valid_count() == 0) {
            warn!(
                archive = %path.display(),
                step,
                floor,
                "no valid samples at selected step, refetching at floor"
            );
            let (floor_step, rows) = self
                .fetch_with_retry(connector, session, path, window, floor)
                .await?;
            step = floor_step;
            series = normalize(&rows, window, step);
        }

        Ok(FetchOutcome {
            selection,
            step,
            series,
            backend: session.name(),
        })
    }

    /// Fetches with retry, reopening the session on `connector` between
    /// attempts.
    ///
    /// Returns the step the rows are laid out on with the rows.
    async fn fetch_with_retry(
        &self,
        connector: &dyn BackendConnector,
        session: &mut Box<dyn ArchiveBackend>,
        path: &Path,
        window: TimeWindow,
        step: u64,
    ) -> Result<(u64, FetchedRows)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match session.fetch(path, window, step).await {
                Ok(rows) => {
                    let answered = rows.step.filter(|s| *s > 0).unwrap_or(step);
                    return Ok((answered, rows));
                }
                Err(e) if self.retry.should_retry(attempt, &e) => {
                    warn!(
                        archive = %path.display(),
                        backend = session.name(),
                        attempt,
                        error = %e,
                        "fetch failed, retrying"
                    );
                    tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                    let stale = std::mem::replace(session, open(connector, path).await?);
                    close(stale).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(ArchiveError::Unavailable {
                        reason: format!("fetch failed after {attempt} attempts: {e}"),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Opens a session; any failure but a missing archive is `Unavailable`.
async fn open(connector: &dyn BackendConnector, path: &Path) -> Result<Box<dyn ArchiveBackend>> {
    connector.open(path).await.map_err(|e| {
        if e.is_missing_data() {
            e
        } else {
            ArchiveError::Unavailable {
                reason: format!("{}: {e}", connector.name()),
            }
        }
    })
}

async fn close(mut session: Box<dyn ArchiveBackend>) {
    if let Err(e) = session.disconnect().await {
        debug!(backend = session.name(), error = %e, "disconnect failed");
    }
}

/// Lays rows out on the grid `aligned_start + i * step`, keeping at most
/// [`MAX_ROWS`] slots that end at `window.end`.
fn normalize(rows: &FetchedRows, window: TimeWindow, step: u64) -> Vec<RawSeries> {
    let step = step.max(1);
    let step_secs = i64::try_from(step).unwrap_or(i64::MAX);
    let mut aligned_start = window.start.saturating_sub(window.start.rem_euclid(step_secs));
    let span = u64::try_from(window.end.saturating_sub(aligned_start)).unwrap_or_default();
    let mut count = usize::try_from(span.div_ceil(step)).unwrap_or(usize::MAX);

    if count > MAX_ROWS {
        let last = window.end - 1;
        let last_slot = last - last.rem_euclid(step_secs);
        let keep = i64::try_from(MAX_ROWS - 1).unwrap_or(i64::MAX);
        aligned_start = last_slot.saturating_sub(keep.saturating_mul(step_secs));
        count = MAX_ROWS;
    }

    let mut columns = vec![vec![f64::NAN; count]; rows.names.len()];
    let mut filled = vec![false; count];
    for (timestamp, values) in &rows.rows {
        let offset = timestamp.saturating_sub(aligned_start);
        if offset < 0 {
            continue;
        }
        let Ok(slot) = usize::try_from(offset / step_secs) else {
            continue;
        };
        if slot >= count || filled[slot] {
            continue;
        }
        filled[slot] = true;
        for (column, value) in columns.iter_mut().zip(values) {
            column[slot] = *value;
        }
    }

    rows.names
        .iter()
        .zip(columns)
        .map(|(name, column)| {
            let points = column
                .into_iter()
                .enumerate()
                .map(|(i, value)| {
                    let timestamp = aligned_start.saturating_add((i as i64).saturating_mul(step_secs));
                    DataPoint::new(timestamp, value)
                })
                .collect();
            RawSeries::new(name.clone(), points)
        })
        .collect()
}
