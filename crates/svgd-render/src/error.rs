//! Error types for the svgd-render crate.

use thiserror::Error;

/// Errors that can occur while rendering a chart.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// The render script could not be read.
    #[error("cannot load render script {path}: {reason}")]
    ScriptLoad {
        /// Script path.
        path: String,
        /// The underlying error.
        reason: String,
    },

    /// The render script does not parse.
    #[error("render script does not compile: {reason}")]
    Compile {
        /// The parse error.
        reason: String,
    },

    /// The script does not define the entry point.
    #[error("render script has no entry point '{name}'")]
    MissingEntryPoint {
        /// The expected function name.
        name: String,
    },

    /// The script raised an error or hit an engine limit.
    #[error("render script failed: {reason}")]
    Script {
        /// The engine's error message.
        reason: String,
    },

    /// The entry point returned something other than a string.
    #[error("render script returned {actual}, expected a string")]
    ResultType {
        /// Type name of the returned value.
        actual: String,
    },

    /// The render worker could not run the job.
    #[error("render worker failed: {reason}")]
    Worker {
        /// Why the job did not complete.
        reason: String,
    },
}

/// Result type for render operations.
pub type Result<T> = std::result::Result<T, RenderError>;
