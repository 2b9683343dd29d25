//! The renderer pool.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::context::{with_context, EngineLimits, RenderContext};
use crate::error::{RenderError, Result};
use crate::request::RenderRequest;
use crate::script::ScriptSource;

/// Default name of the script function called for each chart.
pub const DEFAULT_ENTRY_POINT: &str = "generate_svg";

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Renderer pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererConfig {
    /// Script function called for each chart.
    pub entry_point: String,
    /// Maximum renders running at once.
    pub workers: usize,
    /// Engine safety limits.
    pub limits: EngineLimits,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            workers: std::thread::available_parallelism().map_or(4, usize::from),
            limits: EngineLimits::default(),
        }
    }
}

impl RendererConfig {
    /// Set the entry point.
    #[must_use]
    pub fn with_entry_point(mut self, name: impl Into<String>) -> Self {
        self.entry_point = name.into();
        self
    }

    /// Set the worker count.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the engine limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: EngineLimits) -> Self {
        self.limits = limits;
        self
    }
}

#[derive(Debug)]
struct PoolInner {
    id: u64,
    script: ScriptSource,
    entry_point: String,
    limits: EngineLimits,
    contexts_built: AtomicUsize,
    renders: AtomicU64,
}

impl PoolInner {
    fn render(&self, request: &RenderRequest) -> Result<String> {
        let build = || {
            let script = self.script.load()?;
            let context = RenderContext::new(self.id, &script, self.limits)?;
            self.contexts_built.fetch_add(1, Ordering::Relaxed);
            Ok(context)
        };
        let output = with_context(self.id, build, |ctx| ctx.render(&self.entry_point, request))?;
        self.renders.fetch_add(1, Ordering::Relaxed);
        Ok(output)
    }
}

/// Renders charts on worker threads, each holding its own engine context.
///
/// Cloning is cheap and clones share the script cache and worker limit.
#[derive(Debug, Clone)]
pub struct RendererPool {
    inner: Arc<PoolInner>,
    permits: Arc<Semaphore>,
}

impl RendererPool {
    /// Creates a pool rendering with `script`.
    #[must_use]
    pub fn new(script: ScriptSource, config: RendererConfig) -> Self {
        let workers = config.workers.max(1);
        Self {
            inner: Arc::new(PoolInner {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                script,
                entry_point: config.entry_point,
                limits: config.limits,
                contexts_built: AtomicUsize::new(0),
                renders: AtomicU64::new(0),
            }),
            permits: Arc::new(Semaphore::new(workers)),
        }
    }

    /// Creates a pool reading its script from `path` on first use.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>, config: RendererConfig) -> Self {
        Self::new(ScriptSource::from_path(path), config)
    }

    /// Reads and compiles the script now, so errors surface at startup.
    ///
    /// # Errors
    ///
    /// Returns the load or compile error.
    pub fn preload(&self) -> Result<()> {
        let script = self.inner.script.load()?;
        RenderContext::new(self.inner.id, &script, self.inner.limits).map(|_| ())
    }

    /// Renders on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns a [`RenderError`]; the thread's context stays usable.
    pub fn render_blocking(&self, request: &RenderRequest) -> Result<String> {
        self.inner.render(request)
    }

    /// Renders on the blocking thread pool, at most `workers` at a time.
    ///
    /// # Errors
    ///
    /// Returns a [`RenderError`]; the worker's context stays usable.
    pub async fn render(&self, request: RenderRequest) -> Result<String> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| RenderError::Worker {
                reason: e.to_string(),
            })?;

        let inner = Arc::clone(&self.inner);
        let started = Instant::now();
        let points = request.point_count();
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            inner.render(&request)
        })
        .await
        .map_err(|e| RenderError::Worker {
            reason: e.to_string(),
        })?;

        match &result {
            Ok(svg) => debug!(
                points,
                bytes = svg.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "rendered chart"
            ),
            Err(e) => warn!(error = %e, "render failed"),
        }
        result
    }

    /// Returns the entry point name.
    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.inner.entry_point
    }

    /// Returns how many thread contexts this pool has built.
    #[must_use]
    pub fn contexts_built(&self) -> usize {
        self.inner.contexts_built.load(Ordering::Relaxed)
    }

    /// Returns how many renders succeeded.
    #[must_use]
    pub fn renders(&self) -> u64 {
        self.inner.renders.load(Ordering::Relaxed)
    }

    /// Returns the number of renders that may run at once.
    #[must_use]
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }
}
