//! Archive access for svgd.
//!
//! Two interchangeable backends read time-series archives:
//!
//! - [`CacheDaemon`]: the write-through cache daemon, preferred when
//!   configured. Opening a session flushes pending writes for the archive.
//! - [`DirectStore`]: runs the archive tool against the file directly.
//!
//! [`SeriesFetcher`] ties them together: it falls back from the cache to the
//! direct store, retries transient failures and lays the result out on a
//! regular time grid.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod cached;
pub mod direct;
pub mod error;
pub mod fetcher;
pub mod parse;
pub mod retry;

pub use backend::{ArchiveBackend, BackendConnector, BackendFuture, FetchedRows};
pub use cached::{CacheDaemon, CachedSession, DaemonAddr, DEFAULT_DAEMON_PORT};
pub use direct::{DirectStore, DEFAULT_RRDTOOL};
pub use error::{ArchiveError, Result};
pub use fetcher::{FetchOutcome, SeriesFetcher};
pub use retry::RetryPolicy;
