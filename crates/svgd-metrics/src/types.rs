//! Core types for the chart pipeline.
//!
//! This module provides the fundamental types used throughout svgd:
//! - [`DataPoint`]: A single `(timestamp, value)` sample
//! - [`TimeWindow`]: The look-back window of a query
//! - [`ArchiveLevel`] / [`ArchiveInfo`]: Consolidation metadata of an archive
//! - [`RawSeries`]: One data source as returned by a backend
//! - [`NamedSeries`]: A cleaned series ready for rendering

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, Result};

/// A single sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    /// The sampled value. May be NaN in raw series.
    pub value: f64,
}

impl DataPoint {
    /// Creates a new data point.
    #[must_use]
    pub const fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Returns true if the value is usable for charting (finite and non-negative).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.value.is_finite() && self.value >= 0.0
    }
}

/// A query time window.
///
/// Both bounds are Unix timestamps in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Window start (inclusive).
    pub start: i64,
    /// Window end.
    pub end: i64,
}

impl TimeWindow {
    /// Creates a new time window.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidTimeWindow` if start > end.
    pub const fn new(start: i64, end: i64) -> Result<Self> {
        if start > end {
            return Err(MetricsError::InvalidTimeWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Creates a window of `period` seconds ending at `end`.
    ///
    /// Periods reaching past the representable range start at `i64::MIN`.
    #[must_use]
    pub fn ending_at(end: i64, period: u64) -> Self {
        let period = i64::try_from(period).unwrap_or(i64::MAX);
        Self {
            start: end.saturating_sub(period),
            end,
        }
    }

    /// Returns the window with its start moved up to `earliest`, never past
    /// the end.
    #[must_use]
    pub fn clamp_start(self, earliest: i64) -> Self {
        Self {
            start: self.start.max(earliest.min(self.end)),
            end: self.end,
        }
    }

    /// Creates a window covering the last `period` seconds.
    #[must_use]
    pub fn last_seconds(period: u64) -> Self {
        Self::ending_at(chrono::Utc::now().timestamp(), period)
    }

    /// Returns the window length in seconds.
    #[must_use]
    pub const fn duration(&self) -> i64 {
        self.end - self.start
    }
}

/// Consolidation function of an archive level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Consolidation {
    /// Mean of the merged samples.
    Average,
    /// Minimum of the merged samples.
    Min,
    /// Maximum of the merged samples.
    Max,
    /// Last merged sample.
    Last,
}

impl Consolidation {
    /// Returns the name used by the archive tooling.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Average => "AVERAGE",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Last => "LAST",
        }
    }
}

impl fmt::Display for Consolidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Consolidation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().trim_matches('"').to_ascii_uppercase().as_str() {
            "AVERAGE" => Ok(Self::Average),
            "MIN" => Ok(Self::Min),
            "MAX" => Ok(Self::Max),
            "LAST" => Ok(Self::Last),
            other => Err(format!("unknown consolidation function: {other}")),
        }
    }
}

/// One stored resolution tier of an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveLevel {
    /// Position of the level inside the archive.
    pub index: usize,
    /// Consolidation function.
    pub consolidation: Consolidation,
    /// Primary data points merged into one stored row.
    pub pdp_per_row: u64,
    /// Number of rows retained.
    pub rows: u64,
    /// Base step of the archive in seconds.
    pub base_step: u64,
}

impl ArchiveLevel {
    /// Returns `pdp_per_row × base_step`, or `None` on overflow.
    #[must_use]
    pub const fn effective_step(&self) -> Option<u64> {
        self.pdp_per_row.checked_mul(self.base_step)
    }

    /// Returns how many seconds of history the level keeps.
    #[must_use]
    pub fn retention(&self) -> Option<u64> {
        self.effective_step()?.checked_mul(self.rows)
    }

    /// Returns the oldest timestamp still held by this level.
    #[must_use]
    pub fn earliest_timestamp(&self, last_update: i64) -> Option<i64> {
        let step = i64::try_from(self.effective_step()?).ok()?;
        if step == 0 || self.rows == 0 {
            return None;
        }
        let rows = i64::try_from(self.rows).ok()?;
        let last_row = last_update.div_euclid(step) * step;
        Some(last_row - (rows - 1) * step)
    }
}

/// Metadata of one archive, as needed by the resolution selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveInfo {
    /// Base step in seconds.
    pub base_step: u64,
    /// Timestamp of the most recent update.
    pub last_update: i64,
    /// All consolidation levels, in archive order.
    pub levels: Vec<ArchiveLevel>,
}

impl ArchiveInfo {
    /// Returns the oldest timestamp held by any level.
    #[must_use]
    pub fn earliest_timestamp(&self) -> Option<i64> {
        self.levels
            .iter()
            .filter_map(|level| level.earliest_timestamp(self.last_update))
            .min()
    }
}

/// One data source of a fetch result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSeries {
    /// Data source name.
    pub name: String,
    /// Samples in timestamp order. Values may be NaN.
    pub points: Vec<DataPoint>,
}

impl RawSeries {
    /// Creates a new raw series.
    #[must_use]
    pub fn new(name: impl Into<String>, points: Vec<DataPoint>) -> Self {
        Self {
            name: name.into(),
            points,
        }
    }

    /// Returns the number of valid samples.
    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.points.iter().filter(|p| p.is_valid()).count()
    }
}

/// A cleaned, non-empty series ready for rendering.
///
/// Invariants: at least one point, timestamps strictly increasing, values
/// finite and non-negative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedSeries {
    name: String,
    points: Vec<DataPoint>,
}

impl NamedSeries {
    /// Creates a named series, checking its invariants.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidSeries` if the points are empty, out of
    /// order, or contain NaN/negative values.
    pub fn try_new(name: impl Into<String>, points: Vec<DataPoint>) -> Result<Self> {
        let name = name.into();
        let invalid = |reason: &str| MetricsError::InvalidSeries {
            name: name.clone(),
            reason: reason.to_string(),
        };

        if points.is_empty() {
            return Err(invalid("series has no points"));
        }
        if points.iter().any(|p| !p.is_valid()) {
            return Err(invalid("series contains NaN or negative values"));
        }
        if points.windows(2).any(|w| w[0].timestamp >= w[1].timestamp) {
            return Err(invalid("timestamps are not strictly increasing"));
        }

        Ok(Self { name, points })
    }

    /// Returns the series name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the samples.
    #[must_use]
    pub fn points(&self) -> &[DataPoint] {
        &self.points
    }

    /// Returns the number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
