//! Cleaning and numeric transforms.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{MetricsError, Result};
use crate::registry::{MetricDefinition, TransformKind};
use crate::types::{DataPoint, NamedSeries, RawSeries};

/// Name of the series produced by [`TransformKind::SumFields`].
pub const SUM_SERIES_NAME: &str = "total";

/// Cleans `raw` and applies the definition's transform.
///
/// Series left without samples are omitted.
///
/// # Errors
///
/// Returns `MetricsError::EmptyResult` when no output series has a valid
/// sample.
pub fn transform(raw: &[RawSeries], definition: &MetricDefinition) -> Result<Vec<NamedSeries>> {
    let series = match definition.transform() {
        TransformKind::Identity => raw
            .iter()
            .map(|s| (s.name.clone(), clean(&s.points)))
            .collect::<Vec<_>>(),
        TransformKind::Scale => {
            let factor = definition.multiplier() / definition.divisor();
            raw.iter()
                .map(|s| (s.name.clone(), scale(clean(&s.points), factor)))
                .collect()
        }
        TransformKind::SumFields => vec![(SUM_SERIES_NAME.to_string(), sum_fields(raw))],
    };

    let output = series
        .into_iter()
        .filter(|(_, points)| !points.is_empty())
        .map(|(name, points)| NamedSeries::try_new(name, points))
        .collect::<Result<Vec<_>>>()?;

    if output.is_empty() {
        return Err(MetricsError::EmptyResult {
            endpoint: definition.endpoint().to_string(),
        });
    }

    debug!(
        endpoint = %definition.endpoint(),
        transform = definition.transform().as_str(),
        series = output.len(),
        points = output.iter().map(NamedSeries::len).sum::<usize>(),
        "transformed series"
    );
    Ok(output)
}

/// Drops invalid samples and any sample not after the previous kept one.
fn clean(points: &[DataPoint]) -> Vec<DataPoint> {
    let mut kept: Vec<DataPoint> = Vec::with_capacity(points.len());
    for point in points.iter().filter(|p| p.is_valid()) {
        if kept.last().is_none_or(|last| point.timestamp > last.timestamp) {
            kept.push(*point);
        }
    }
    kept
}

fn scale(points: Vec<DataPoint>, factor: f64) -> Vec<DataPoint> {
    points
        .into_iter()
        .map(|p| DataPoint::new(p.timestamp, p.value * factor))
        .filter(DataPoint::is_valid)
        .collect()
}

/// Sums the first two sources row by row, invalid sub-values counting as zero.
fn sum_fields(raw: &[RawSeries]) -> Vec<DataPoint> {
    let mut rows: BTreeMap<i64, Option<f64>> = BTreeMap::new();
    for source in raw.iter().take(2) {
        for point in &source.points {
            let entry = rows.entry(point.timestamp).or_insert(None);
            if point.is_valid() {
                *entry = Some(entry.unwrap_or(0.0) + point.value);
            }
        }
    }

    rows.into_iter()
        .filter_map(|(timestamp, sum)| sum.map(|value| DataPoint::new(timestamp, value)))
        .filter(DataPoint::is_valid)
        .collect()
}
