//! The metric registry.
//!
//! The registry is built once at startup and never mutated afterwards, so it
//! can be shared behind an `Arc` and read from any number of request tasks
//! without locking.
//!
//! # Resolution order
//!
//! [`MetricRegistry::resolve`] matches in two phases:
//!
//! 1. Exact match of the request path against every configured endpoint.
//! 2. Prefix match against definitions that take a parameter: the path must
//!    start with the endpoint followed by `/`, and the remainder is the
//!    parameter.
//!
//! Within a phase the first definition in registry order wins. This order is
//! visible to clients and must not change.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MetricsError, Result};
use crate::format::ValueFormat;
use crate::settings::Settings;
use crate::template::Template;

/// Divisor implied by the legacy `bytes_to_mb` transform.
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Default name of the path parameter.
pub const DEFAULT_PARAM_NAME: &str = "param";

/// Numeric transform applied to fetched samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformKind {
    /// One output series per data source, values unchanged.
    #[default]
    Identity,
    /// The first two data sources summed into a single `total` series.
    SumFields,
    /// Every value multiplied by the multiplier and divided by the divisor.
    Scale,
}

impl TransformKind {
    /// Parses a transform name, accepting legacy aliases.
    ///
    /// Returns the kind and, for aliases that imply one, a default divisor.
    #[must_use]
    pub fn parse(name: &str) -> Option<(Self, Option<f64>)> {
        match name.trim() {
            "identity" | "none" => Some((Self::Identity, None)),
            "sum-fields" | "sum_fields" | "ps_cputime_sum" => Some((Self::SumFields, None)),
            "scale" | "multiply" => Some((Self::Scale, None)),
            "bytes_to_mb" => Some((Self::Scale, Some(BYTES_PER_MB))),
            _ => None,
        }
    }

    /// Returns the canonical name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::SumFields => "sum-fields",
            Self::Scale => "scale",
        }
    }
}

/// A configured metric.
///
/// Immutable once the registry is built.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDefinition {
    endpoint: String,
    archive: Template,
    requires_param: bool,
    param_name: String,
    title: Template,
    y_label: Template,
    is_percentage: bool,
    transform: TransformKind,
    multiplier: f64,
    divisor: f64,
    value_format: ValueFormat,
}

impl MetricDefinition {
    /// Creates a definition for `endpoint` reading the archive at `archive`
    /// (relative to the archive base path).
    ///
    /// A parametrized archive template makes the definition require a
    /// parameter. The title defaults to the endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is empty or the template is invalid.
    pub fn new(endpoint: impl Into<String>, archive: &str) -> Result<Self> {
        let endpoint = endpoint.into().trim_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(MetricsError::InvalidMetric {
                endpoint,
                reason: "endpoint cannot be empty".to_string(),
            });
        }

        let archive = Template::path(archive)?;
        Ok(Self {
            requires_param: archive.is_parametrized(),
            title: Template::Literal(endpoint.clone()),
            endpoint,
            archive,
            param_name: DEFAULT_PARAM_NAME.to_string(),
            y_label: Template::Literal("Value".to_string()),
            is_percentage: false,
            transform: TransformKind::Identity,
            multiplier: 1.0,
            divisor: 1.0,
            value_format: ValueFormat::default(),
        })
    }

    /// Set whether a path parameter is required.
    #[must_use]
    pub const fn with_requires_param(mut self, requires: bool) -> Self {
        self.requires_param = requires;
        self
    }

    /// Set the parameter name; implies the metric requires a parameter.
    #[must_use]
    pub fn with_param_name(mut self, name: impl Into<String>) -> Self {
        self.param_name = name.into();
        self.requires_param = true;
        self
    }

    /// Set the chart title template.
    #[must_use]
    pub fn with_title(mut self, title: Template) -> Self {
        self.title = title;
        self
    }

    /// Set the y-axis label template.
    #[must_use]
    pub fn with_y_label(mut self, label: Template) -> Self {
        self.y_label = label;
        self
    }

    /// Mark the metric as a 0-100 percentage.
    #[must_use]
    pub const fn with_percentage(mut self, is_percentage: bool) -> Self {
        self.is_percentage = is_percentage;
        self
    }

    /// Set the transform kind.
    #[must_use]
    pub const fn with_transform(mut self, transform: TransformKind) -> Self {
        self.transform = transform;
        self
    }

    /// Set the scale multiplier.
    #[must_use]
    pub const fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the scale divisor.
    #[must_use]
    pub const fn with_divisor(mut self, divisor: f64) -> Self {
        self.divisor = divisor;
        self
    }

    /// Set the axis value format.
    #[must_use]
    pub fn with_value_format(mut self, format: ValueFormat) -> Self {
        self.value_format = format;
        self
    }

    /// Checks cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidMetric` describing the first problem.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| MetricsError::InvalidMetric {
            endpoint: self.endpoint.clone(),
            reason: reason.to_string(),
        };

        if self.archive.is_parametrized() && !self.requires_param {
            return Err(invalid("archive template has %s but no parameter is required"));
        }
        if self.requires_param && self.param_name.trim().is_empty() {
            return Err(invalid("param_name cannot be empty"));
        }
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            return Err(invalid("value_multiplier must be a positive number"));
        }
        if !self.divisor.is_finite() || self.divisor <= 0.0 {
            return Err(invalid("transform_divisor must be a positive number"));
        }
        Ok(())
    }

    /// Returns the endpoint name.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the archive path template.
    #[must_use]
    pub const fn archive(&self) -> &Template {
        &self.archive
    }

    /// Returns true if the endpoint takes a path parameter.
    #[must_use]
    pub const fn requires_param(&self) -> bool {
        self.requires_param
    }

    /// Returns the parameter name.
    #[must_use]
    pub fn param_name(&self) -> &str {
        &self.param_name
    }

    /// Returns the title template.
    #[must_use]
    pub const fn title(&self) -> &Template {
        &self.title
    }

    /// Returns the y-axis label template.
    #[must_use]
    pub const fn y_label(&self) -> &Template {
        &self.y_label
    }

    /// Returns true for 0-100 percentage metrics.
    #[must_use]
    pub const fn is_percentage(&self) -> bool {
        self.is_percentage
    }

    /// Returns the transform kind.
    #[must_use]
    pub const fn transform(&self) -> TransformKind {
        self.transform
    }

    /// Returns the scale multiplier.
    #[must_use]
    pub const fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Returns the scale divisor.
    #[must_use]
    pub const fn divisor(&self) -> f64 {
        self.divisor
    }

    /// Returns the axis value format.
    #[must_use]
    pub const fn value_format(&self) -> &ValueFormat {
        &self.value_format
    }

    /// Returns the identifier handed to the renderer (`cpu/process` → `cpu_process`).
    #[must_use]
    pub fn metric_type(&self) -> String {
        self.endpoint.replace('/', "_")
    }
}

/// The outcome of resolving a request path.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<'a> {
    definition: &'a MetricDefinition,
    param: Option<String>,
}

impl<'a> Resolved<'a> {
    /// Returns the matched definition.
    #[must_use]
    pub const fn definition(&self) -> &'a MetricDefinition {
        self.definition
    }

    /// Returns the extracted path parameter, if any.
    #[must_use]
    pub fn param(&self) -> Option<&str> {
        self.param.as_deref()
    }
}

/// One entry of the `_config/metrics` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    /// Endpoint name.
    pub endpoint: String,
    /// Whether a path parameter is required.
    pub requires_param: bool,
    /// Parameter name, when one is required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param_name: Option<String>,
    /// Title template.
    pub title: String,
    /// Y-axis label template.
    pub y_label: String,
    /// Whether values are percentages.
    pub is_percentage: bool,
}

/// Ordered, immutable collection of metric definitions plus global settings.
#[derive(Debug, Clone)]
pub struct MetricRegistry {
    settings: Settings,
    definitions: Vec<MetricDefinition>,
}

impl MetricRegistry {
    /// Builds a registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a definition fails validation or two definitions
    /// share an endpoint.
    pub fn new(settings: Settings, definitions: Vec<MetricDefinition>) -> Result<Self> {
        let mut seen = HashSet::new();
        for definition in &definitions {
            definition.validate()?;
            if !seen.insert(definition.endpoint()) {
                return Err(MetricsError::DuplicateEndpoint {
                    endpoint: definition.endpoint().to_string(),
                });
            }
        }

        Ok(Self {
            settings,
            definitions,
        })
    }

    /// Returns the global settings.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Returns the definitions in registry order.
    #[must_use]
    pub fn definitions(&self) -> &[MetricDefinition] {
        &self.definitions
    }

    /// Returns the number of definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Returns true if no metric is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Resolves a request path to a definition and its parameter.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::UnknownEndpoint` if nothing matches, and
    /// `MetricsError::MissingParameter` if the match requires a parameter
    /// that the path does not carry.
    pub fn resolve(&self, endpoint_path: &str) -> Result<Resolved<'_>> {
        let path = endpoint_path.trim_start_matches('/');

        if let Some(definition) = self.definitions.iter().find(|d| d.endpoint == path) {
            if definition.requires_param {
                return Err(missing_parameter(definition));
            }
            debug!(endpoint = %path, "resolved exact endpoint");
            return Ok(Resolved {
                definition,
                param: None,
            });
        }

        for definition in self.definitions.iter().filter(|d| d.requires_param) {
            let Some(rest) = path.strip_prefix(definition.endpoint.as_str()) else {
                continue;
            };
            let Some(param) = rest.strip_prefix('/') else {
                continue;
            };
            if param.is_empty() {
                return Err(missing_parameter(definition));
            }
            debug!(endpoint = %definition.endpoint, param = %param, "resolved parametrized endpoint");
            return Ok(Resolved {
                definition,
                param: Some(param.to_string()),
            });
        }

        Err(MetricsError::UnknownEndpoint {
            endpoint: path.to_string(),
        })
    }

    /// Builds the archive path for a resolved request.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidParameter` if the parameter could escape
    /// the archive base directory.
    pub fn archive_path(&self, resolved: &Resolved<'_>) -> Result<PathBuf> {
        if let Some(param) = resolved.param() {
            validate_param(param)?;
        }
        let relative = resolved.definition.archive.render(resolved.param());
        Ok(self.settings.archive_base.join(relative))
    }

    /// Returns the public metric listing in registry order.
    #[must_use]
    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.definitions
            .iter()
            .map(|d| CatalogEntry {
                endpoint: d.endpoint.clone(),
                requires_param: d.requires_param,
                param_name: d.requires_param.then(|| d.param_name.clone()),
                title: d.title.to_string(),
                y_label: d.y_label.to_string(),
                is_percentage: d.is_percentage,
            })
            .collect()
    }
}

fn missing_parameter(definition: &MetricDefinition) -> MetricsError {
    MetricsError::MissingParameter {
        endpoint: definition.endpoint.clone(),
        param_name: definition.param_name.clone(),
    }
}

fn validate_param(param: &str) -> Result<()> {
    let reason = if param.contains('/') || param.contains('\\') {
        Some("path separators are not allowed")
    } else if param.contains("..") {
        Some("parent directory references are not allowed")
    } else if param.chars().any(char::is_control) {
        Some("control characters are not allowed")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(MetricsError::InvalidParameter {
            param: param.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// The metric set used when the configuration does not list any.
///
/// Paths follow the collectd RRD layout.
#[must_use]
pub fn builtin_definitions() -> Vec<MetricDefinition> {
    let text = |s: &str| Template::text(s).unwrap_or_else(|_| Template::Literal(s.to_string()));
    let metric = |endpoint: &str, archive: &str, title: &str, y_label: &str| {
        MetricDefinition::new(endpoint, archive)
            .ok()
            .map(|d| d.with_title(text(title)).with_y_label(text(y_label)))
    };

    [
        metric("cpu", "cpu-total/percent-active.rrd", "CPU Utilization", "Usage (%)")
            .map(|d| d.with_percentage(true)),
        metric(
            "cpu/process",
            "processes-%s/ps_cputime.rrd",
            "CPU Utilization for %s",
            "CPU Time (s)",
        )
        .map(|d| {
            d.with_param_name("process_name")
                .with_transform(TransformKind::SumFields)
        }),
        metric("ram", "memory/percent-used.rrd", "RAM Utilization", "Usage (%)")
            .map(|d| d.with_percentage(true)),
        metric(
            "ram/process",
            "processes-%s/ps_rss.rrd",
            "Memory Usage for %s",
            "Memory (MB)",
        )
        .map(|d| {
            d.with_param_name("process_name")
                .with_transform(TransformKind::Scale)
                .with_divisor(BYTES_PER_MB)
        }),
        metric(
            "network",
            "interface-%s/if_octets.rrd",
            "Network Traffic for %s",
            "Traffic (bytes/s)",
        )
        .map(|d| d.with_param_name("interface")),
        metric(
            "disk",
            "disk-%s/disk_ops.rrd",
            "Disk Operations for %s",
            "Operations/s",
        )
        .map(|d| d.with_param_name("disk")),
        metric(
            "postgresql/connections",
            "postgresql-iqchannels/pg_numbackends.rrd",
            "PostgreSQL Connections",
            "Connections",
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn test_registry() -> MetricRegistry {
        let settings = Settings::default().with_archive_base("/var/rrd");
        MetricRegistry::new(settings, builtin_definitions()).unwrap()
    }

    mod transform_kind_tests {
        use super::*;
        use test_case::test_case;

        #[test_case("identity", TransformKind::Identity, None ; "identity")]
        #[test_case("none", TransformKind::Identity, None ; "legacy none")]
        #[test_case("sum-fields", TransformKind::SumFields, None ; "sum fields")]
        #[test_case("ps_cputime_sum", TransformKind::SumFields, None ; "legacy cputime")]
        #[test_case("multiply", TransformKind::Scale, None ; "legacy multiply")]
        #[test_case("bytes_to_mb", TransformKind::Scale, Some(BYTES_PER_MB) ; "legacy bytes")]
        fn parse_transform(name: &str, kind: TransformKind, divisor: Option<f64>) {
            assert_eq!(TransformKind::parse(name), Some((kind, divisor)));
        }

        #[test]
        fn parse_unknown_transform() {
            assert_eq!(TransformKind::parse("log"), None);
        }

        #[test]
        fn serde_uses_kebab_case() {
            let json = serde_json::to_string(&TransformKind::SumFields).unwrap();
            assert_eq!(json, "\"sum-fields\"");
        }
    }

    mod definition_tests {
        use super::*;
        use test_case::test_case;

        #[test]
        fn parametrized_template_requires_param() {
            let def = MetricDefinition::new("disk", "disk-%s/disk_ops.rrd").unwrap();
            assert!(def.requires_param());
            assert_eq!(def.param_name(), DEFAULT_PARAM_NAME);
        }

        #[test]
        fn endpoint_slashes_trimmed() {
            let def = MetricDefinition::new("/cpu/", "cpu.rrd").unwrap();
            assert_eq!(def.endpoint(), "cpu");
        }

        #[test]
        fn empty_endpoint_rejected() {
            assert!(MetricDefinition::new("", "cpu.rrd").is_err());
        }

        #[test]
        fn placeholder_without_param_is_invalid() {
            let def = MetricDefinition::new("disk", "disk-%s/disk_ops.rrd")
                .unwrap()
                .with_requires_param(false);
            assert!(def.validate().is_err());
        }

        #[test_case(0.0 ; "zero")]
        #[test_case(-2.0 ; "negative")]
        #[test_case(f64::NAN ; "nan")]
        fn bad_divisor_is_invalid(divisor: f64) {
            let def = MetricDefinition::new("ram", "memory.rrd")
                .unwrap()
                .with_divisor(divisor);
            assert!(def.validate().is_err());
        }

        #[test]
        fn metric_type_replaces_slashes() {
            let def = MetricDefinition::new("postgresql/connections", "pg.rrd").unwrap();
            assert_eq!(def.metric_type(), "postgresql_connections");
        }
    }

    mod resolve_tests {
        use super::*;
        use test_case::test_case;

        #[test]
        fn every_plain_endpoint_resolves_exactly() {
            let registry = test_registry();
            for def in registry.definitions().iter().filter(|d| !d.requires_param()) {
                let resolved = registry.resolve(def.endpoint()).unwrap();
                assert_eq!(resolved.definition(), def);
                assert_eq!(resolved.param(), None);
            }
        }

        #[test]
        fn parametrized_endpoint_extracts_param() {
            let registry = test_registry();
            let resolved = registry.resolve("cpu/process/nginx").unwrap();
            assert_eq!(resolved.definition().endpoint(), "cpu/process");
            assert_eq!(resolved.param(), Some("nginx"));
        }

        #[test]
        fn leading_slash_is_ignored() {
            let registry = test_registry();
            let resolved = registry.resolve("/network/eth0").unwrap();
            assert_eq!(resolved.param(), Some("eth0"));
        }

        #[test]
        fn exact_match_wins_over_prefix() {
            // "cpu" is exact; it must not be taken as "cpu/process" or vice versa
            let registry = test_registry();
            let resolved = registry.resolve("cpu").unwrap();
            assert_eq!(resolved.definition().endpoint(), "cpu");
        }

        #[test_case("cpu/process" ; "no trailing segment")]
        #[test_case("cpu/process/" ; "empty trailing segment")]
        fn missing_parameter(path: &str) {
            let registry = test_registry();
            assert!(matches!(
                registry.resolve(path),
                Err(MetricsError::MissingParameter { ref endpoint, ref param_name })
                    if endpoint == "cpu/process" && param_name == "process_name"
            ));
        }

        #[test_case("unknown/thing" ; "unknown")]
        #[test_case("cpu/extra" ; "plain endpoint with suffix")]
        #[test_case("cpux" ; "prefix without boundary")]
        #[test_case("" ; "empty")]
        fn unknown_endpoint(path: &str) {
            let registry = test_registry();
            assert!(matches!(
                registry.resolve(path),
                Err(MetricsError::UnknownEndpoint { .. })
            ));
        }

        #[test]
        fn first_definition_in_order_wins() {
            let first = MetricDefinition::new("app", "first-%s.rrd").unwrap();
            let second = MetricDefinition::new("app/stats", "second-%s.rrd").unwrap();
            let registry = MetricRegistry::new(Settings::default(), vec![first, second]).unwrap();

            let resolved = registry.resolve("app/stats/x").unwrap();
            assert_eq!(resolved.definition().endpoint(), "app");
            assert_eq!(resolved.param(), Some("stats/x"));
        }
    }

    mod archive_path_tests {
        use super::*;
        use test_case::test_case;

        #[test]
        fn substitutes_param() {
            let registry = test_registry();
            let resolved = registry.resolve("ram/process/postgres").unwrap();
            assert_eq!(
                registry.archive_path(&resolved).unwrap(),
                PathBuf::from("/var/rrd/processes-postgres/ps_rss.rrd")
            );
        }

        #[test]
        fn literal_template_used_verbatim() {
            let registry = test_registry();
            let resolved = registry.resolve("ram").unwrap();
            assert_eq!(
                registry.archive_path(&resolved).unwrap(),
                PathBuf::from("/var/rrd/memory/percent-used.rrd")
            );
        }

        #[test_case("cpu/process/../../etc" ; "parent reference")]
        #[test_case("cpu/process/a/b" ; "nested path")]
        fn rejects_escaping_params(path: &str) {
            let registry = test_registry();
            let resolved = registry.resolve(path).unwrap();
            assert!(matches!(
                registry.archive_path(&resolved),
                Err(MetricsError::InvalidParameter { .. })
            ));
        }
    }

    mod registry_tests {
        use super::*;
        use test_case::test_case;

        #[test]
        fn duplicate_endpoints_rejected() {
            let a = MetricDefinition::new("cpu", "a.rrd").unwrap();
            let b = MetricDefinition::new("cpu", "b.rrd").unwrap();
            assert!(matches!(
                MetricRegistry::new(Settings::default(), vec![a, b]),
                Err(MetricsError::DuplicateEndpoint { .. })
            ));
        }

        #[test]
        fn builtin_set_is_complete() {
            let registry = test_registry();
            assert_eq!(registry.len(), 7);
            let endpoints: Vec<_> = registry.definitions().iter().map(MetricDefinition::endpoint).collect();
            assert_eq!(
                endpoints,
                vec!["cpu", "cpu/process", "ram", "ram/process", "network", "disk", "postgresql/connections"]
            );
        }

        #[test_case("cpu", "", true, TransformKind::Identity, 1.0 ; "cpu")]
        #[test_case("cpu/process", "process_name", false, TransformKind::SumFields, 1.0 ; "process cpu")]
        #[test_case("ram/process", "process_name", false, TransformKind::Scale, BYTES_PER_MB ; "process ram")]
        #[test_case("network", "interface", false, TransformKind::Identity, 1.0 ; "network")]
        #[test_case("disk", "disk", false, TransformKind::Identity, 1.0 ; "disk")]
        fn builtin_fields(endpoint: &str, param: &str, percent: bool, kind: TransformKind, divisor: f64) {
            let def = builtin_definitions()
                .into_iter()
                .find(|d| d.endpoint() == endpoint)
                .unwrap();
            assert_eq!(def.requires_param(), !param.is_empty());
            if !param.is_empty() {
                assert_eq!(def.param_name(), param);
            }
            assert_eq!(def.is_percentage(), percent);
            assert_eq!(def.transform(), kind);
            assert_eq!(def.divisor(), divisor);
        }

        #[test]
        fn catalog_lists_in_order() {
            let registry = test_registry();
            let catalog = registry.catalog();
            assert_eq!(catalog.len(), registry.len());
            assert_eq!(catalog[1].endpoint, "cpu/process");
            assert!(catalog[1].requires_param);
            assert_eq!(catalog[1].param_name.as_deref(), Some("process_name"));
            assert_eq!(catalog[1].title, "CPU Utilization for %s");
            assert!(catalog[0].param_name.is_none());
            assert!(catalog[0].is_percentage);
        }

        #[test]
        fn catalog_serializes_without_absent_param() {
            let registry = test_registry();
            let json = serde_json::to_value(&registry.catalog()[0]).unwrap();
            assert!(json.get("param_name").is_none());
            assert_eq!(json["endpoint"], "cpu");
        }
    }
}
