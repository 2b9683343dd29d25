//! Render script source cache.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::info;

use crate::error::{RenderError, Result};

/// Lazily loaded script text, read from disk at most once.
#[derive(Debug)]
pub struct ScriptSource {
    path: PathBuf,
    text: OnceCell<Arc<str>>,
}

impl ScriptSource {
    /// A script read from `path` on first use.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            text: OnceCell::new(),
        }
    }

    /// A script given directly; `name` is used in messages only.
    #[must_use]
    pub fn inline(name: impl Into<PathBuf>, text: &str) -> Self {
        Self {
            path: name.into(),
            text: OnceCell::with_value(Arc::from(text)),
        }
    }

    /// Returns the script path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true once the text has been read.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.text.get().is_some()
    }

    /// Returns the script text, reading the file if no caller has yet.
    ///
    /// Concurrent first callers block until one of them has read the file.
    /// A failed read is not cached.
    pub fn load(&self) -> Result<Arc<str>> {
        self.text
            .get_or_try_init(|| {
                let text = std::fs::read_to_string(&self.path).map_err(|e| {
                    RenderError::ScriptLoad {
                        path: self.path.display().to_string(),
                        reason: e.to_string(),
                    }
                })?;
                info!(path = %self.path.display(), bytes = text.len(), "loaded render script");
                Ok(Arc::from(text))
            })
            .map(Arc::clone)
    }
}
