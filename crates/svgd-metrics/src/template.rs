//! Single-placeholder string templates.
//!
//! Archive paths and chart titles may embed one `%s` placeholder that is
//! replaced by the parameter extracted from the request path. Templates are
//! parsed once at configuration time so that rendering is infallible.

use std::fmt;

use crate::error::{MetricsError, Result};

/// The placeholder substituted by [`Template::render`].
pub const PLACEHOLDER: &str = "%s";

/// A string that is either fixed or takes exactly one parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Template {
    /// A fixed string, used verbatim.
    Literal(String),
    /// A string with one parameter slot between `prefix` and `suffix`.
    Parametrized {
        /// Text before the placeholder.
        prefix: String,
        /// Text after the placeholder.
        suffix: String,
    },
}

impl Template {
    /// Parses an archive path template.
    ///
    /// Path templates are strict: at most one `%s`, no other `%` directive,
    /// and the rendered path must stay relative.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidTemplate` if the template is empty,
    /// absolute, or uses unsupported directives.
    pub fn path(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| MetricsError::InvalidTemplate {
            template: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.trim().is_empty() {
            return Err(invalid("template cannot be empty"));
        }
        if raw.starts_with('/') {
            return Err(invalid("template must be relative to the archive base path"));
        }

        let template = Self::text(raw)?;
        let has_stray_percent = match &template {
            Self::Literal(s) => s.contains('%'),
            Self::Parametrized { prefix, suffix } => prefix.contains('%') || suffix.contains('%'),
        };
        if has_stray_percent {
            return Err(invalid("only a single %s directive is supported"));
        }

        Ok(template)
    }

    /// Parses a display template.
    ///
    /// The first `%s` is the placeholder; any other `%` is kept as text, so
    /// labels like `Usage (%)` need no escaping.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidTemplate` if more than one `%s` appears.
    pub fn text(raw: &str) -> Result<Self> {
        match raw.matches(PLACEHOLDER).count() {
            0 => Ok(Self::Literal(raw.to_string())),
            1 => {
                let (prefix, suffix) = raw.split_once(PLACEHOLDER).unwrap_or((raw, ""));
                Ok(Self::Parametrized {
                    prefix: prefix.to_string(),
                    suffix: suffix.to_string(),
                })
            }
            _ => Err(MetricsError::InvalidTemplate {
                template: raw.to_string(),
                reason: "more than one %s placeholder".to_string(),
            }),
        }
    }

    /// Returns true if the template has a parameter slot.
    #[must_use]
    pub const fn is_parametrized(&self) -> bool {
        matches!(self, Self::Parametrized { .. })
    }

    /// Renders the template. A missing parameter renders as an empty string.
    #[must_use]
    pub fn render(&self, param: Option<&str>) -> String {
        match self {
            Self::Literal(s) => s.clone(),
            Self::Parametrized { prefix, suffix } => {
                format!("{prefix}{}{suffix}", param.unwrap_or_default())
            }
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => f.write_str(s),
            Self::Parametrized { prefix, suffix } => write!(f, "{prefix}{PLACEHOLDER}{suffix}"),
        }
    }
}
