//! Numeric display formats.
//!
//! Metrics declare how their values should be printed on chart axes using a
//! small printf subset: `%d` or `%.Nf`, optionally surrounded by literal text
//! (`"%.1f MB"`). Formats are validated at load time and applied by the
//! renderer.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Serialize, Serializer};

use crate::error::{MetricsError, Result};

/// Largest supported precision for `%.Nf`.
pub const MAX_PRECISION: usize = 12;

/// printf default precision for a bare `%f`.
const DEFAULT_FLOAT_PRECISION: usize = 6;

/// Regex for the supported directive with optional literal prefix and suffix.
static FORMAT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<prefix>[^%]*)%(?:\.(?P<precision>\d{1,2}))?(?P<kind>[df])(?P<suffix>[^%]*)$")
        .unwrap_or_else(|_| unreachable!())
});

/// A validated numeric format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueFormat {
    raw: String,
    prefix: String,
    suffix: String,
    /// `None` means integer output.
    precision: Option<usize>,
}

impl ValueFormat {
    /// Parses a format string.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidValueFormat` for anything other than a
    /// single `%d` / `%f` / `%.Nf` directive.
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: String| MetricsError::InvalidValueFormat {
            format: raw.to_string(),
            reason,
        };

        let caps = FORMAT_REGEX
            .captures(raw)
            .ok_or_else(|| invalid("expected a single %d or %.Nf directive".to_string()))?;

        let is_integer = &caps["kind"] == "d";
        let precision = match caps.name("precision") {
            Some(_) if is_integer => {
                return Err(invalid("%d does not take a precision".to_string()));
            }
            Some(p) => {
                let precision: usize = p
                    .as_str()
                    .parse()
                    .map_err(|e| invalid(format!("bad precision: {e}")))?;
                if precision > MAX_PRECISION {
                    return Err(invalid(format!("precision exceeds {MAX_PRECISION}")));
                }
                Some(precision)
            }
            None if is_integer => None,
            None => Some(DEFAULT_FLOAT_PRECISION),
        };

        Ok(Self {
            raw: raw.to_string(),
            prefix: caps["prefix"].to_string(),
            suffix: caps["suffix"].to_string(),
            precision,
        })
    }

    /// Formats a value.
    #[must_use]
    pub fn apply(&self, value: f64) -> String {
        match self.precision {
            Some(precision) => format!("{}{value:.precision$}{}", self.prefix, self.suffix),
            None => format!("{}{}{}", self.prefix, value.round() as i64, self.suffix),
        }
    }

    /// Returns the format string as configured.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Default for ValueFormat {
    fn default() -> Self {
        Self {
            raw: "%.1f".to_string(),
            prefix: String::new(),
            suffix: String::new(),
            precision: Some(1),
        }
    }
}

impl fmt::Display for ValueFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for ValueFormat {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}
