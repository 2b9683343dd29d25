//! Script-driven chart rendering for svgd.
//!
//! Charts are drawn by a user-replaceable [rhai](https://rhai.rs) script. The
//! script source is read once per process; every worker thread compiles it
//! into its own engine context and keeps that context for its lifetime.
//!
//! # Example
//!
//! ```rust
//! use svgd_render::{RendererConfig, RendererPool, ScriptSource};
//!
//! let script = ScriptSource::inline("<doc>", r#"fn generate_svg(series, options) { "<svg/>" }"#);
//! let pool = RendererPool::new(script, RendererConfig::default());
//! assert!(pool.preload().is_ok());
//! ```
#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod context;
pub mod error;
pub mod pool;
pub mod request;
pub mod script;

pub use context::EngineLimits;
pub use error::{RenderError, Result};
pub use pool::{RendererConfig, RendererPool, DEFAULT_ENTRY_POINT};
pub use request::RenderRequest;
pub use script::ScriptSource;
