//! Metric registry and series pipeline primitives for svgd.
#![forbid(unsafe_code)]
//!
//! `svgd-metrics` holds everything in the chart pipeline that does not touch
//! the network or the filesystem:
//!
//! - **Registry**: maps logical endpoints such as `cpu/process/nginx` to a
//!   [`MetricDefinition`] and the archive it reads from
//! - **Resolution selection**: picks the consolidation level of an archive
//!   whose point count best fits a target budget
//! - **Transforms**: cleans raw archive rows and turns them into the
//!   [`NamedSeries`] handed to the renderer
//!
//! # Example
//!
//! ```rust
//! use svgd_metrics::{MetricDefinition, MetricRegistry, Settings};
//!
//! let ram = MetricDefinition::new("ram/process", "processes-%s/ps_rss.rrd")
//!     .unwrap()
//!     .with_param_name("process_name");
//! let registry = MetricRegistry::new(Settings::default(), vec![ram]).unwrap();
//!
//! let resolved = registry.resolve("ram/process/postgres").unwrap();
//! assert_eq!(resolved.param(), Some("postgres"));
//! let path = registry.archive_path(&resolved).unwrap();
//! assert!(path.ends_with("processes-postgres/ps_rss.rrd"));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod format;
pub mod registry;
pub mod resolution;
pub mod settings;
pub mod template;
pub mod transform;
pub mod types;

// Re-export main types at crate root
pub use error::{MetricsError, Result};
pub use format::ValueFormat;
pub use registry::{
    builtin_definitions, CatalogEntry, MetricDefinition, MetricRegistry, Resolved, TransformKind,
};
pub use resolution::{select_step, SelectionReason, SelectorConfig, StepSelection};
pub use settings::{AccessPolicy, Settings};
pub use template::Template;
pub use transform::transform;
pub use types::{
    ArchiveInfo, ArchiveLevel, Consolidation, DataPoint, NamedSeries, RawSeries, TimeWindow,
};
