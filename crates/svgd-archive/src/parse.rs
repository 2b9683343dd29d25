//! Parsers for archive metadata and fetch output.
//!
//! Both backends speak text. `rrdtool info` prints `key = value` lines while
//! the cache daemon prints `key type value`; `rrdtool fetch` prints a column
//! header followed by rows, the daemon prefixes the rows with `Key: value`
//! headers. The parsers here accept either form.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use svgd_metrics::{ArchiveInfo, ArchiveLevel, Consolidation};
use tracing::debug;

use crate::backend::FetchedRows;
use crate::error::{ArchiveError, Result};

static RRA_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^rra\[(?P<index>\d+)\]\.(?P<field>cf|rows|pdp_per_row)$")
        .unwrap_or_else(|_| unreachable!())
});

fn parse_error(reason: impl Into<String>) -> ArchiveError {
    ArchiveError::Parse {
        reason: reason.into(),
    }
}

/// Splits one metadata line into key and value.
fn info_pair(line: &str) -> Option<(&str, &str)> {
    if let Some((key, value)) = line.split_once(" = ") {
        return Some((key.trim(), value.trim().trim_matches('"')));
    }
    // daemon form: key, type tag, value
    let mut parts = line.splitn(3, char::is_whitespace);
    let key = parts.next()?;
    let _kind = parts.next()?;
    let value = parts.next()?;
    Some((key.trim(), value.trim().trim_matches('"')))
}

#[derive(Default)]
struct PartialLevel {
    consolidation: Option<Consolidation>,
    rows: Option<u64>,
    pdp_per_row: Option<u64>,
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    // the daemon prints counters as floats ("8640.0000000000")
    value
        .parse::<T>()
        .or_else(|_| {
            value
                .split_once('.')
                .filter(|(_, fraction)| fraction.chars().all(|c| c == '0'))
                .ok_or(())
                .and_then(|(whole, _)| whole.parse::<T>().map_err(|_| ()))
        })
        .map_err(|()| parse_error(format!("bad value for {key}: {value}")))
}

/// Parses archive metadata.
///
/// # Errors
///
/// Returns `ArchiveError::Parse` if `step` or `last_update` is missing or
/// malformed.
pub fn parse_info(text: &str) -> Result<ArchiveInfo> {
    let mut base_step = None;
    let mut last_update = None;
    let mut partial: BTreeMap<usize, PartialLevel> = BTreeMap::new();

    for (key, value) in text.lines().filter_map(info_pair) {
        match key {
            "step" => base_step = Some(parse_number::<u64>(key, value)?),
            "last_update" => last_update = Some(parse_number::<i64>(key, value)?),
            _ => {
                let Some(caps) = RRA_KEY.captures(key) else {
                    continue;
                };
                let index: usize = parse_number("rra index", &caps["index"])?;
                let level = partial.entry(index).or_default();
                match &caps["field"] {
                    "cf" => level.consolidation = value.parse().ok(),
                    "rows" => level.rows = Some(parse_number(key, value)?),
                    _ => level.pdp_per_row = Some(parse_number(key, value)?),
                }
            }
        }
    }

    let base_step = base_step.ok_or_else(|| parse_error("metadata has no step"))?;
    let last_update = last_update.ok_or_else(|| parse_error("metadata has no last_update"))?;

    let levels = partial
        .into_iter()
        .filter_map(|(index, level)| match level {
            PartialLevel {
                consolidation: Some(consolidation),
                rows: Some(rows),
                pdp_per_row: Some(pdp_per_row),
            } => Some(ArchiveLevel {
                index,
                consolidation,
                pdp_per_row,
                rows,
                base_step,
            }),
            _ => {
                debug!(index, "skipping incomplete consolidation level");
                None
            }
        })
        .collect();

    Ok(ArchiveInfo {
        base_step,
        last_update,
        levels,
    })
}

fn parse_value(token: &str) -> f64 {
    if token.to_ascii_lowercase().contains("nan") {
        return f64::NAN;
    }
    token.parse().unwrap_or(f64::NAN)
}

/// Parses fetch output.
///
/// When the output carries no `Step:` header the step is inferred from the
/// first two rows.
///
/// # Errors
///
/// Returns `ArchiveError::Parse` when a row's column count does not match the
/// data source names, or when no names are present.
pub fn parse_fetch(text: &str) -> Result<FetchedRows> {
    let mut fetched = FetchedRows::default();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

        if let Some(timestamp) = head.strip_suffix(':').and_then(|t| t.parse::<i64>().ok()) {
            let values: Vec<f64> = rest.split_whitespace().map(parse_value).collect();
            if values.len() != fetched.names.len() {
                return Err(parse_error(format!(
                    "row {timestamp} has {} values for {} data sources",
                    values.len(),
                    fetched.names.len()
                )));
            }
            fetched.rows.push((timestamp, values));
            continue;
        }

        match head {
            "DSName:" => fetched.names = rest.split_whitespace().map(str::to_string).collect(),
            "Step:" => fetched.step = rest.trim().parse().ok(),
            "FlushVersion:" | "Start:" | "End:" | "DSCount:" => {}
            _ if fetched.names.is_empty() => {
                fetched.names = line.split_whitespace().map(str::to_string).collect();
            }
            _ => return Err(parse_error(format!("unexpected line: {line}"))),
        }
    }

    if fetched.names.is_empty() {
        return Err(parse_error("fetch output names no data sources"));
    }

    if fetched.step.is_none() {
        if let [(first, _), (second, _), ..] = fetched.rows.as_slice() {
            fetched.step = u64::try_from(second - first).ok().filter(|s| *s > 0);
        }
    }

    Ok(fetched)
}
