//! Sampling resolution selection.
//!
//! An archive stores the same series at several consolidation levels. For a
//! query window the selector picks the level whose point count lands inside
//! a target band, so charts are neither oversized nor empty.
//!
//! The selector never fails and never returns a zero step: when the archive
//! metadata gives no usable answer it falls back to configured constants.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MetricsError, Result};
use crate::types::{ArchiveInfo, ArchiveLevel, Consolidation, TimeWindow};

/// Tunable constants of the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Lower bound of the target point band.
    pub min_points: u64,
    /// Upper bound of the target point band.
    pub max_points: u64,
    /// Finest step the selector will choose (the floor).
    pub min_step: u64,
    /// Levels with a larger effective step are treated as corrupt.
    pub max_step: u64,
    /// Step used when the clamped window is empty.
    pub fallback_step: u64,
    /// Look-back used when the archive does not reveal its earliest sample.
    pub default_window: u64,
    /// Refetch at the floor step when the chosen step yields no valid samples.
    pub validate_step: bool,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            min_points: 100,
            max_points: 1000,
            min_step: 10,
            max_step: 1_000_000,
            fallback_step: 60,
            default_window: 86_400,
            validate_step: true,
        }
    }
}

impl SelectorConfig {
    /// Checks the constants are consistent.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidSelectorConfig` on an empty band or a
    /// zero step.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| MetricsError::InvalidSelectorConfig {
            reason: reason.to_string(),
        };

        if self.min_points > self.max_points {
            return Err(invalid("min_points must not exceed max_points"));
        }
        if self.min_step == 0 {
            return Err(invalid("min_step must be positive"));
        }
        if self.fallback_step == 0 {
            return Err(invalid("fallback_step must be positive"));
        }
        if self.max_step < self.min_step {
            return Err(invalid("max_step must not be below min_step"));
        }
        Ok(())
    }

    fn in_band(&self, points: u64) -> bool {
        (self.min_points..=self.max_points).contains(&points)
    }
}

/// Which rule produced a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectionReason {
    /// A level's point count is inside the band.
    InBand,
    /// The level closest to the band from below.
    UnderBand,
    /// The finest level among those above the band.
    OverBand,
    /// The window fits in the shortest retention; finest stored level used.
    FinestLevel,
    /// No level qualified; the floor step is used.
    Floor,
    /// The clamped window is empty.
    EmptyRange,
    /// Archive metadata could not be read.
    NoMetadata,
    /// The caller asked for this step.
    Fixed,
}

impl SelectionReason {
    /// Returns a short name for logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InBand => "in_band",
            Self::UnderBand => "under_band",
            Self::OverBand => "over_band",
            Self::FinestLevel => "finest_level",
            Self::Floor => "floor",
            Self::EmptyRange => "empty_range",
            Self::NoMetadata => "no_metadata",
            Self::Fixed => "fixed",
        }
    }
}

impl fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The selected step and the rule that chose it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSelection {
    /// Step in seconds, never zero.
    pub step: u64,
    /// Rule that produced the step.
    pub reason: SelectionReason,
}

impl StepSelection {
    fn new(step: u64, reason: SelectionReason) -> Self {
        Self {
            step: step.max(1),
            reason,
        }
    }
}

/// A usable average level with its effective step.
struct Candidate<'a> {
    level: &'a ArchiveLevel,
    step: u64,
}

/// Picks the sampling step for `window`.
///
/// `info` is `None` when the archive metadata could not be read, in which
/// case the floor step is returned.
#[must_use]
pub fn select_step(
    info: Option<&ArchiveInfo>,
    window: TimeWindow,
    config: &SelectorConfig,
) -> StepSelection {
    let Some(info) = info else {
        return StepSelection::new(config.min_step, SelectionReason::NoMetadata);
    };

    let candidates: Vec<Candidate<'_>> = info
        .levels
        .iter()
        .filter(|level| level.consolidation == Consolidation::Average)
        .filter_map(|level| {
            level
                .effective_step()
                .filter(|&step| step > 0 && step <= config.max_step)
                .map(|step| Candidate { level, step })
        })
        .collect();

    let finest = candidates.iter().find(|c| c.level.pdp_per_row == 1);

    let default_window = i64::try_from(config.default_window).unwrap_or(i64::MAX);
    let earliest = finest
        .and_then(|c| c.level.earliest_timestamp(info.last_update))
        .unwrap_or_else(|| window.end.saturating_sub(default_window));

    let start = window.start.max(earliest);
    let range = match u64::try_from(window.end.saturating_sub(start)) {
        Ok(range) if range > 0 => range,
        _ => {
            debug!(start, end = window.end, "empty selection range");
            return StepSelection::new(config.fallback_step, SelectionReason::EmptyRange);
        }
    };

    let eligible: Vec<(u64, u64)> = candidates
        .iter()
        .filter(|c| c.step >= config.min_step)
        .map(|c| (c.step, range.div_ceil(c.step)))
        .collect();

    if let Some(&(step, points)) = eligible.iter().find(|(_, points)| config.in_band(*points)) {
        debug!(step, points, range, "selected in-band level");
        return StepSelection::new(step, SelectionReason::InBand);
    }

    let mut under: Option<(u64, u64)> = None;
    for &(step, points) in eligible.iter().filter(|(_, points)| *points < config.min_points) {
        if under.is_none_or(|(_, best)| points > best) {
            under = Some((step, points));
        }
    }
    if let Some((step, points)) = under {
        debug!(step, points, range, "selected level closest below band");
        return StepSelection::new(step, SelectionReason::UnderBand);
    }

    if let Some(step) = eligible
        .iter()
        .filter(|(_, points)| *points > config.max_points)
        .map(|(step, _)| *step)
        .min()
    {
        debug!(step, range, "selected finest level above band");
        return StepSelection::new(step, SelectionReason::OverBand);
    }

    let shortest_retention = candidates.iter().filter_map(|c| c.level.retention()).min();
    if let (Some(retention), Some(finest)) = (shortest_retention, finest) {
        if range <= retention {
            debug!(step = finest.step, range, retention, "falling back to finest level");
            return StepSelection::new(finest.step, SelectionReason::FinestLevel);
        }
    }

    debug!(step = config.min_step, range, "falling back to floor step");
    StepSelection::new(config.min_step, SelectionReason::Floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    const LAST_UPDATE: i64 = 1_700_000_000;

    fn level(index: usize, pdp_per_row: u64, rows: u64) -> ArchiveLevel {
        ArchiveLevel {
            index,
            consolidation: Consolidation::Average,
            pdp_per_row,
            rows,
            base_step: 10,
        }
    }

    /// 10 s × 8640, 60 s × 5760, 3600 s × 8760.
    fn collectd_archive() -> ArchiveInfo {
        ArchiveInfo {
            base_step: 10,
            last_update: LAST_UPDATE,
            levels: vec![level(0, 1, 8640), level(1, 6, 5760), level(2, 360, 8760)],
        }
    }

    fn last(period: u64) -> TimeWindow {
        TimeWindow::ending_at(LAST_UPDATE, period)
    }

    mod config_tests {
        use super::*;

        #[test]
        fn default_is_valid() {
            assert!(SelectorConfig::default().validate().is_ok());
        }

        #[test]
        fn inverted_band_rejected() {
            let config = SelectorConfig {
                min_points: 500,
                max_points: 100,
                ..SelectorConfig::default()
            };
            assert!(config.validate().is_err());
        }

        #[test]
        fn zero_floor_rejected() {
            let config = SelectorConfig {
                min_step: 0,
                ..SelectorConfig::default()
            };
            assert!(config.validate().is_err());
        }

        #[test]
        fn partial_json_uses_defaults() {
            let config: SelectorConfig = serde_json::from_str(r#"{"min_points": 50}"#).unwrap();
            assert_eq!(config.min_points, 50);
            assert_eq!(config.max_points, 1000);
        }
    }

    mod select_tests {
        use super::*;
        use test_case::test_case;

        #[test_case(3_600, 10, SelectionReason::InBand ; "one hour")]
        #[test_case(21_600, 60, SelectionReason::InBand ; "six hours")]
        #[test_case(86_400, 3_600, SelectionReason::UnderBand ; "one day")]
        #[test_case(604_800, 3_600, SelectionReason::UnderBand ; "one week clamped to finest retention")]
        fn collectd_layout(period: u64, step: u64, reason: SelectionReason) {
            let selection =
                select_step(Some(&collectd_archive()), last(period), &SelectorConfig::default());
            assert_eq!(selection, StepSelection { step, reason });
        }

        #[test]
        fn no_metadata_uses_floor() {
            let selection = select_step(None, last(3_600), &SelectorConfig::default());
            assert_eq!(selection.step, 10);
            assert_eq!(selection.reason, SelectionReason::NoMetadata);
        }

        #[test]
        fn window_after_last_update_is_empty() {
            let window = TimeWindow::new(LAST_UPDATE + 100, LAST_UPDATE + 100).unwrap();
            let selection =
                select_step(Some(&collectd_archive()), window, &SelectorConfig::default());
            assert_eq!(selection.step, 60);
            assert_eq!(selection.reason, SelectionReason::EmptyRange);
        }

        #[test]
        fn non_average_levels_ignored() {
            let mut info = collectd_archive();
            info.levels[0].consolidation = Consolidation::Max;
            let selection = select_step(Some(&info), last(3_600), &SelectorConfig::default());
            // 60 s gives 60 points: under band, and the only eligible level below it
            assert_eq!(selection.step, 60);
        }

        #[test]
        fn corrupt_steps_ignored() {
            let info = ArchiveInfo {
                base_step: 10,
                last_update: LAST_UPDATE,
                levels: vec![level(0, 0, 100), level(1, 1_000_000, 10), level(2, 6, 600)],
            };
            let selection = select_step(Some(&info), last(36_000), &SelectorConfig::default());
            assert_eq!(selection.step, 60);
        }

        #[test]
        fn first_in_band_level_wins() {
            let config = SelectorConfig {
                min_points: 10,
                max_points: 1000,
                ..SelectorConfig::default()
            };
            let selection = select_step(Some(&collectd_archive()), last(3_600), &config);
            // both 10 s (360) and 60 s (60) are in band; archive order decides
            assert_eq!(selection.step, 10);
        }

        #[test]
        fn over_band_prefers_smallest_step() {
            let config = SelectorConfig {
                min_points: 1,
                max_points: 5,
                ..SelectorConfig::default()
            };
            let info = ArchiveInfo {
                base_step: 10,
                last_update: LAST_UPDATE,
                levels: vec![level(0, 6, 10_000), level(1, 1, 10_000)],
            };
            let selection = select_step(Some(&info), last(3_600), &config);
            assert_eq!(selection, StepSelection { step: 10, reason: SelectionReason::OverBand });
        }

        #[test]
        fn fine_levels_below_floor_use_finest_fallback() {
            // only a 1 s level exists and the floor excludes it
            let info = ArchiveInfo {
                base_step: 1,
                last_update: LAST_UPDATE,
                levels: vec![ArchiveLevel {
                    index: 0,
                    consolidation: Consolidation::Average,
                    pdp_per_row: 1,
                    rows: 86_400,
                    base_step: 1,
                }],
            };
            let selection = select_step(Some(&info), last(3_600), &SelectorConfig::default());
            assert_eq!(selection, StepSelection { step: 1, reason: SelectionReason::FinestLevel });
        }

        #[test]
        fn no_levels_uses_floor() {
            let info = ArchiveInfo {
                base_step: 10,
                last_update: LAST_UPDATE,
                levels: vec![],
            };
            let selection = select_step(Some(&info), last(3_600), &SelectorConfig::default());
            assert_eq!(selection, StepSelection { step: 10, reason: SelectionReason::Floor });
        }

        #[test]
        fn start_clamped_to_retention() {
            // a 30 day window on 10 s × 100 rows covers only 990 s, 99 points
            let info = ArchiveInfo {
                base_step: 10,
                last_update: LAST_UPDATE,
                levels: vec![level(0, 1, 100)],
            };
            let selection = select_step(Some(&info), last(2_592_000), &SelectorConfig::default());
            assert_eq!(selection, StepSelection { step: 10, reason: SelectionReason::UnderBand });
        }
    }

    mod property_tests {
        use super::*;

        fn arb_level() -> impl Strategy<Value = ArchiveLevel> {
            (0u64..10_000, 0u64..100_000, 0u64..100, prop::bool::ANY).prop_map(
                |(pdp, rows, base, average)| ArchiveLevel {
                    index: 0,
                    consolidation: if average { Consolidation::Average } else { Consolidation::Max },
                    pdp_per_row: pdp,
                    rows,
                    base_step: base,
                },
            )
        }

        proptest! {
            #[test]
            fn step_is_never_zero(
                levels in prop::collection::vec(arb_level(), 0..6),
                last_update in 0i64..2_000_000_000,
                period in 0u64..10_000_000,
                offset in -100_000i64..100_000,
            ) {
                let info = ArchiveInfo { base_step: 10, last_update, levels };
                let window = TimeWindow::ending_at(last_update + offset, period);
                let selection = select_step(Some(&info), window, &SelectorConfig::default());
                prop_assert!(selection.step > 0);
            }

            #[test]
            fn step_is_never_zero_with_zero_constants(
                levels in prop::collection::vec(arb_level(), 0..6),
                period in 0u64..1_000_000,
            ) {
                let config = SelectorConfig { min_step: 0, fallback_step: 0, ..SelectorConfig::default() };
                let info = ArchiveInfo { base_step: 10, last_update: LAST_UPDATE, levels };
                let selection = select_step(Some(&info), last(period), &config);
                prop_assert!(selection.step > 0);
            }
        }
    }
}
