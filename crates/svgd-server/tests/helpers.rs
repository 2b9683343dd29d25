//! Test helpers: an in-memory archive store behind the backend traits.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use svgd_archive::{ArchiveBackend, ArchiveError, BackendConnector, BackendFuture, FetchedRows, SeriesFetcher};
use svgd_metrics::{
    builtin_definitions, ArchiveInfo, ArchiveLevel, Consolidation, MetricRegistry, Settings,
    TimeWindow,
};
use svgd_render::{RendererConfig, RendererPool, ScriptSource};
use svgd_server::QueryHandler;

/// Fixed "now" for every query.
pub const NOW: i64 = 1_700_000_000;

/// Archive base used by [`fake_registry`].
pub const BASE: &str = "/var/lib/collectd/rrd/testhost";

/// Chart script echoing what it received.
pub const ECHO_SCRIPT: &str = r#"
fn generate_svg(series, options) {
    let param = if "param1" in options { options.param1 } else { "" };
    let out = `<svg type="${options.metricType}" param="${param}" title="${options.title}">`;
    for s in series {
        out += `<series name="${s.name}" points="${s.data.len()}"`;
        if s.data.len() > 0 {
            out += ` last="${format_value(s.data[s.data.len() - 1].value, options.valueFormat)}"`;
        }
        out += "/>";
    }
    out + "</svg>"
}
"#;

/// One fake archive: constant values per column.
#[derive(Debug, Clone)]
pub struct FakeArchive {
    /// `(data source name, value)`; NaN columns stay NaN.
    pub columns: Vec<(&'static str, f64)>,
    /// Delay before each fetch answers.
    pub delay: Duration,
}

impl FakeArchive {
    pub fn constant(columns: Vec<(&'static str, f64)>) -> Self {
        Self {
            columns,
            delay: Duration::ZERO,
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// collectd's default layout: 10 s × 1 day, 1 min × 4 days, 1 h × 1 year.
pub fn collectd_info() -> ArchiveInfo {
    let level = |index, pdp_per_row, rows| ArchiveLevel {
        index,
        consolidation: Consolidation::Average,
        pdp_per_row,
        rows,
        base_step: 10,
    };
    ArchiveInfo {
        base_step: 10,
        last_update: NOW,
        levels: vec![level(0, 1, 8640), level(1, 6, 5760), level(2, 360, 8760)],
    }
}

/// Archives keyed by absolute path; records every opened path.
#[derive(Debug, Default)]
pub struct FakeStore {
    archives: HashMap<PathBuf, FakeArchive>,
    opened: Mutex<Vec<PathBuf>>,
}

impl FakeStore {
    pub fn with_archive(mut self, relative: &str, archive: FakeArchive) -> Self {
        self.archives.insert(Path::new(BASE).join(relative), archive);
        self
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().clone()
    }
}

struct FakeSession {
    archive: FakeArchive,
}

impl BackendConnector for FakeStore {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn open<'a>(&'a self, path: &'a Path) -> BackendFuture<'a, Box<dyn ArchiveBackend>> {
        Box::pin(async move {
            self.opened.lock().push(path.to_path_buf());
            match self.archives.get(path) {
                Some(archive) => Ok(Box::new(FakeSession {
                    archive: archive.clone(),
                }) as Box<dyn ArchiveBackend>),
                None => Err(ArchiveError::NotFound {
                    path: path.display().to_string(),
                }),
            }
        })
    }
}

impl ArchiveBackend for FakeSession {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn info<'a>(&'a mut self, _path: &'a Path) -> BackendFuture<'a, ArchiveInfo> {
        Box::pin(async move { Ok(collectd_info()) })
    }

    fn fetch<'a>(
        &'a mut self,
        _path: &'a Path,
        window: TimeWindow,
        step: u64,
    ) -> BackendFuture<'a, FetchedRows> {
        Box::pin(async move {
            if !self.archive.delay.is_zero() {
                tokio::time::sleep(self.archive.delay).await;
            }
            let step_secs = step as i64;
            let mut rows = Vec::new();
            let mut t = window.start - window.start.rem_euclid(step_secs);
            while t < window.end {
                rows.push((t, self.archive.columns.iter().map(|&(_, v)| v).collect()));
                t += step_secs;
            }
            Ok(FetchedRows {
                step: Some(step),
                names: self.archive.columns.iter().map(|&(n, _)| n.to_string()).collect(),
                rows,
            })
        })
    }

    fn disconnect(&mut self) -> BackendFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// The built-in metrics rooted at [`BASE`].
pub fn fake_registry() -> MetricRegistry {
    MetricRegistry::new(Settings::default().with_archive_base(BASE), builtin_definitions()).unwrap()
}

/// A handler over `store` rendering with [`ECHO_SCRIPT`].
pub fn fake_handler(store: Arc<FakeStore>) -> QueryHandler {
    QueryHandler::new(
        Arc::new(fake_registry()),
        SeriesFetcher::new(store),
        RendererPool::new(
            ScriptSource::inline("<echo>", ECHO_SCRIPT),
            RendererConfig::default().with_workers(4),
        ),
    )
}

/// A store holding RSS archives for the given processes, `MiB` each.
pub fn rss_store(processes: &[(&str, f64)]) -> FakeStore {
    processes.iter().fold(FakeStore::default(), |store, &(name, mib)| {
        store.with_archive(
            &format!("processes-{name}/ps_rss.rrd"),
            FakeArchive::constant(vec![("value", mib * 1024.0 * 1024.0)]),
        )
    })
}
