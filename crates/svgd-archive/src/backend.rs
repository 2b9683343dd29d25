//! Backend abstraction.
//!
//! A [`BackendConnector`] opens an [`ArchiveBackend`] session for one archive.
//! Sessions are used by a single request and closed with
//! [`ArchiveBackend::disconnect`]; dropping a session also closes any
//! underlying connection.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use svgd_metrics::{ArchiveInfo, TimeWindow};

use crate::error::Result;

/// Boxed future returned by backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Rows exactly as a backend returned them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchedRows {
    /// Step the backend answered with, if it said so.
    pub step: Option<u64>,
    /// Data source names, in column order.
    pub names: Vec<String>,
    /// `(timestamp, values)` rows; one value per data source.
    pub rows: Vec<(i64, Vec<f64>)>,
}

/// An open session on one archive.
pub trait ArchiveBackend: Send {
    /// Short backend name for logging.
    fn name(&self) -> &'static str;

    /// Reads the archive's consolidation metadata.
    fn info<'a>(&'a mut self, path: &'a Path) -> BackendFuture<'a, ArchiveInfo>;

    /// Fetches averaged rows for `window` at `step` seconds.
    ///
    /// A backend that picks its own resolution may ignore `step`; it reports
    /// the step it used in [`FetchedRows::step`].
    fn fetch<'a>(
        &'a mut self,
        path: &'a Path,
        window: TimeWindow,
        step: u64,
    ) -> BackendFuture<'a, FetchedRows>;

    /// Releases the session.
    fn disconnect(&mut self) -> BackendFuture<'_, ()>;
}

/// Opens backend sessions.
pub trait BackendConnector: Send + Sync {
    /// Short backend name for logging.
    fn name(&self) -> &'static str;

    /// Opens a session for the archive at `path`.
    fn open<'a>(&'a self, path: &'a Path) -> BackendFuture<'a, Box<dyn ArchiveBackend>>;
}
