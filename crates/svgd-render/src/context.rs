//! Per-thread render contexts.
//!
//! Building a scripting engine and compiling the chart script is expensive,
//! and the engine is not meant to be shared between threads. Each worker
//! thread therefore keeps one context in thread-local storage and reuses it
//! for every render it performs.

use std::cell::RefCell;

use rhai::{Dynamic, Engine, EvalAltResult, Scope, AST};
use svgd_metrics::ValueFormat;
use tracing::debug;

use crate::error::{RenderError, Result};
use crate::request::RenderRequest;

/// Safety limits applied to every engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    /// Operations a single render may perform.
    pub max_operations: u64,
    /// Maximum function call nesting.
    pub max_call_levels: usize,
    /// Largest string a script may build, in bytes.
    pub max_string_size: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_operations: 5_000_000,
            max_call_levels: 64,
            max_string_size: 8 * 1024 * 1024,
        }
    }
}

/// Builds an engine with limits and native helpers registered.
pub(crate) fn build_engine(limits: EngineLimits) -> Engine {
    let mut engine = Engine::new();
    engine
        .set_max_operations(limits.max_operations)
        .set_max_call_levels(limits.max_call_levels)
        .set_max_string_size(limits.max_string_size);

    engine.register_fn("format_value", format_value);
    engine.register_fn("format_value", |value: i64, format: &str| {
        format_value(value as f64, format)
    });
    engine
}

/// `format_value(value, "%.1f MB")` for scripts.
fn format_value(value: f64, format: &str) -> std::result::Result<String, Box<EvalAltResult>> {
    ValueFormat::parse(format)
        .map(|f| f.apply(value))
        .map_err(|e| e.to_string().into())
}

/// An engine with the compiled script of one pool.
pub(crate) struct RenderContext {
    pool_id: u64,
    engine: Engine,
    ast: AST,
}

impl RenderContext {
    pub(crate) fn new(pool_id: u64, script: &str, limits: EngineLimits) -> Result<Self> {
        let engine = build_engine(limits);
        let ast = engine.compile(script).map_err(|e| RenderError::Compile {
            reason: e.to_string(),
        })?;
        Ok(Self {
            pool_id,
            engine,
            ast,
        })
    }

    /// Calls `entry_point(series, options)` and expects a string back.
    pub(crate) fn render(&self, entry_point: &str, request: &RenderRequest) -> Result<String> {
        let mut scope = Scope::new();
        let args = (
            Dynamic::from_array(request.series_arg()),
            Dynamic::from_map(request.options_arg()),
        );

        let result = self
            .engine
            .call_fn::<Dynamic>(&mut scope, &self.ast, entry_point, args)
            .map_err(|e| map_eval_error(entry_point, &e))?;

        if result.is_string() {
            result.into_string().map_err(|actual| RenderError::ResultType {
                actual: actual.to_string(),
            })
        } else {
            Err(RenderError::ResultType {
                actual: result.type_name().to_string(),
            })
        }
    }
}

fn map_eval_error(entry_point: &str, error: &EvalAltResult) -> RenderError {
    match error {
        EvalAltResult::ErrorFunctionNotFound(signature, _) if signature.starts_with(entry_point) => {
            RenderError::MissingEntryPoint {
                name: entry_point.to_string(),
            }
        }
        other => RenderError::Script {
            reason: other.to_string(),
        },
    }
}

thread_local! {
    static CONTEXT: RefCell<Option<RenderContext>> = const { RefCell::new(None) };
}

/// Runs `f` with this thread's context for `pool_id`, building it first if
/// the thread has none or holds one for another pool.
///
/// `build` is only called when a new context is needed. A failed build
/// leaves the thread without a context so the next call tries again.
pub(crate) fn with_context<T>(
    pool_id: u64,
    build: impl FnOnce() -> Result<RenderContext>,
    f: impl FnOnce(&RenderContext) -> Result<T>,
) -> Result<T> {
    CONTEXT.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.as_ref().is_none_or(|ctx| ctx.pool_id != pool_id) {
            *slot = None;
            debug!(pool_id, "building render context");
            *slot = Some(build()?);
        }
        match slot.as_ref() {
            Some(ctx) => f(ctx),
            None => Err(RenderError::Worker {
                reason: "render context missing after build".to_string(),
            }),
        }
    })
}
