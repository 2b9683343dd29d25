//! Startup configuration.
//!
//! The configuration file is JSON with `server`, `archive`, `renderer`,
//! `selector` and `metrics` sections, all optional. Invalid metric entries
//! are dropped with a warning; invalid global values stop startup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use svgd_metrics::settings::{DEFAULT_ARCHIVE_BASE, DEFAULT_LISTEN_PORT, DEFAULT_RENDERER_SCRIPT};
use svgd_metrics::{
    builtin_definitions, AccessPolicy, MetricDefinition, MetricRegistry, MetricsError,
    SelectorConfig, Settings, Template, TransformKind, ValueFormat,
};
use svgd_archive::DEFAULT_RRDTOOL;
use svgd_render::{RendererConfig, DEFAULT_ENTRY_POINT};
use tracing::{info, warn};

use crate::error::{ServerError, ServerResult};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/svgd/config.json";

/// Default per-request deadline in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Addresses as a comma-separated string or a JSON list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum AddressList {
    Joined(String),
    List(Vec<String>),
}

impl AddressList {
    fn joined(&self) -> String {
        match self {
            Self::Joined(s) => s.clone(),
            Self::List(items) => items.join(","),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ServerSection {
    tcp_port: Option<u16>,
    allowed_ips: Option<AddressList>,
    request_timeout_secs: Option<u64>,
    render_workers: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ArchiveSection {
    base_path: Option<PathBuf>,
    rrdcached_addr: Option<String>,
    rrdtool_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RendererSection {
    script_path: Option<PathBuf>,
    entry_point: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerSection,
    archive: ArchiveSection,
    renderer: RendererSection,
    selector: SelectorConfig,
    metrics: Option<Vec<serde_json::Value>>,
}

/// One `metrics` entry as written in the file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct MetricEntry {
    endpoint: Option<String>,
    rrd_path: Option<String>,
    requires_param: Option<bool>,
    param_name: Option<String>,
    title: Option<String>,
    y_label: Option<String>,
    is_percentage: Option<bool>,
    transform_type: Option<String>,
    value_multiplier: Option<f64>,
    transform_divisor: Option<f64>,
    value_format: Option<String>,
}

impl MetricEntry {
    fn into_definition(self) -> svgd_metrics::Result<MetricDefinition> {
        let endpoint = self.endpoint.unwrap_or_default();
        let invalid = |reason: &str| MetricsError::InvalidMetric {
            endpoint: endpoint.clone(),
            reason: reason.to_string(),
        };

        if endpoint.trim().trim_matches('/').is_empty() {
            return Err(invalid("missing endpoint"));
        }
        let Some(rrd_path) = self.rrd_path.filter(|p| !p.trim().is_empty()) else {
            return Err(invalid("missing rrd_path"));
        };

        let (transform, implied_divisor) = match self.transform_type.as_deref() {
            None => (TransformKind::Identity, None),
            Some(name) => TransformKind::parse(name)
                .ok_or_else(|| invalid(&format!("unknown transform_type '{name}'")))?,
        };

        let mut definition = MetricDefinition::new(endpoint.clone(), &rrd_path)?;
        let requires_param = self
            .requires_param
            .unwrap_or_else(|| definition.archive().is_parametrized());
        if let Some(name) = self.param_name {
            definition = definition.with_param_name(name);
        }
        definition = definition
            .with_requires_param(requires_param)
            .with_percentage(self.is_percentage.unwrap_or(false))
            .with_transform(transform)
            .with_multiplier(self.value_multiplier.unwrap_or(1.0))
            .with_divisor(self.transform_divisor.or(implied_divisor).unwrap_or(1.0));

        if let Some(title) = self.title {
            definition = definition.with_title(Template::text(&title)?);
        }
        if let Some(label) = self.y_label {
            definition = definition.with_y_label(Template::text(&label)?);
        }
        if let Some(format) = self.value_format {
            definition = definition.with_value_format(ValueFormat::parse(&format)?);
        }

        definition.validate()?;
        Ok(definition)
    }
}

/// Everything the server needs, loaded and validated.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Metric definitions plus global settings.
    pub registry: MetricRegistry,
    /// Resolution selector constants.
    pub selector: SelectorConfig,
    /// Renderer pool settings.
    pub renderer: RendererConfig,
    /// Archive tool used by the direct backend.
    pub rrdtool_path: PathBuf,
    /// Deadline for one query.
    pub request_timeout: Duration,
}

impl ServiceConfig {
    /// Loads the configuration at `path`.
    ///
    /// A missing file is not an error: the built-in defaults are used.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or a global
    /// value is invalid.
    pub fn load(path: impl AsRef<Path>) -> ServerResult<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let config = Self::from_json(&text)?;
                info!(
                    path = %path.display(),
                    metrics = config.registry.len(),
                    "loaded configuration"
                );
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "config file not found, using defaults");
                Self::from_file(ConfigFile::default())
            }
            Err(e) => Err(ServerError::ConfigRead {
                path: path.display().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Parses a configuration document.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::ConfigParse` for invalid JSON and
    /// `ServerError::InvalidConfig` for an invalid global value.
    pub fn from_json(text: &str) -> ServerResult<Self> {
        let file: ConfigFile = serde_json::from_str(text).map_err(|e| ServerError::ConfigParse {
            reason: e.to_string(),
        })?;
        Self::from_file(file)
    }

    /// Returns the listen port.
    #[must_use]
    pub const fn listen_port(&self) -> u16 {
        self.registry.settings().listen_port
    }

    fn from_file(file: ConfigFile) -> ServerResult<Self> {
        let ConfigFile {
            server,
            archive,
            renderer,
            selector,
            metrics,
        } = file;

        let access = match &server.allowed_ips {
            Some(list) => AccessPolicy::parse(&list.joined()),
            None => AccessPolicy::parse("127.0.0.1"),
        }
        .map_err(|e| invalid("server.allowed_ips", &e))?;

        selector.validate().map_err(|e| invalid("selector", &e))?;

        let timeout_secs = server
            .request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ServerError::InvalidConfig {
                field: "server.request_timeout_secs".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let mut renderer_config = RendererConfig::default()
            .with_entry_point(renderer.entry_point.unwrap_or_else(|| DEFAULT_ENTRY_POINT.to_string()));
        if let Some(workers) = server.render_workers {
            if workers == 0 {
                return Err(ServerError::InvalidConfig {
                    field: "server.render_workers".to_string(),
                    reason: "must be positive".to_string(),
                });
            }
            renderer_config = renderer_config.with_workers(workers);
        }

        let mut settings = Settings::default()
            .with_listen_port(server.tcp_port.unwrap_or(DEFAULT_LISTEN_PORT))
            .with_access(access)
            .with_archive_base(
                archive
                    .base_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_ARCHIVE_BASE)),
            )
            .with_renderer_script(
                renderer
                    .script_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_RENDERER_SCRIPT)),
            );
        if let Some(addr) = archive.rrdcached_addr.filter(|a| !a.trim().is_empty()) {
            settings = settings.with_cache_daemon(addr);
        }

        let definitions = match metrics {
            Some(entries) => load_metrics(entries),
            None => builtin_definitions(),
        };
        if definitions.is_empty() {
            warn!("no usable metric definitions configured");
        }
        let registry = MetricRegistry::new(settings, definitions)
            .map_err(|e| invalid("metrics", &e))?;

        Ok(Self {
            registry,
            selector,
            renderer: renderer_config,
            rrdtool_path: archive
                .rrdtool_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RRDTOOL)),
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        // the built-in defaults always validate
        Self::from_file(ConfigFile::default()).unwrap_or_else(|_| unreachable!())
    }
}

fn invalid(field: &str, err: &MetricsError) -> ServerError {
    ServerError::InvalidConfig {
        field: field.to_string(),
        reason: err.to_string(),
    }
}

/// Converts metric entries, dropping the ones that do not validate.
fn load_metrics(entries: Vec<serde_json::Value>) -> Vec<MetricDefinition> {
    let mut seen = HashSet::new();
    let mut definitions = Vec::with_capacity(entries.len());

    for (index, value) in entries.into_iter().enumerate() {
        let entry: MetricEntry = match serde_json::from_value(value) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(index, error = %e, "dropping malformed metric entry");
                continue;
            }
        };
        let definition = match entry.into_definition() {
            Ok(definition) => definition,
            Err(e) => {
                warn!(index, error = %e, "dropping invalid metric entry");
                continue;
            }
        };
        if !seen.insert(definition.endpoint().to_string()) {
            warn!(index, endpoint = %definition.endpoint(), "dropping duplicate metric entry");
            continue;
        }
        definitions.push(definition);
    }

    definitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use test_case::test_case;

    fn endpoints(config: &ServiceConfig) -> Vec<&str> {
        config
            .registry
            .definitions()
            .iter()
            .map(MetricDefinition::endpoint)
            .collect()
    }

    mod defaults_tests {
        use super::*;

        #[test]
        fn empty_document_uses_defaults() {
            let config = ServiceConfig::from_json("{}").unwrap();
            let settings = config.registry.settings();
            assert_eq!(settings.listen_port, 8080);
            assert_eq!(settings.archive_base, PathBuf::from(DEFAULT_ARCHIVE_BASE));
            assert_eq!(settings.cache_daemon, None);
            assert!(settings.access.permits("127.0.0.1".parse().unwrap()));
            assert!(!settings.access.permits("10.1.2.3".parse().unwrap()));
            assert_eq!(config.selector, SelectorConfig::default());
            assert_eq!(config.request_timeout, Duration::from_secs(10));
            assert_eq!(config.renderer.entry_point, "generate_svg");
            assert_eq!(config.rrdtool_path, PathBuf::from("rrdtool"));
            assert_eq!(
                endpoints(&config),
                vec!["cpu", "cpu/process", "ram", "ram/process", "network", "disk", "postgresql/connections"]
            );
        }

        #[test]
        fn default_impl_matches_empty_document() {
            let config = ServiceConfig::default();
            assert_eq!(config.listen_port(), DEFAULT_LISTEN_PORT);
            assert_eq!(config.registry.len(), 7);
        }

        #[test]
        fn missing_file_uses_defaults() {
            let config = ServiceConfig::load("/nonexistent/svgd/config.json").unwrap();
            assert_eq!(config.registry.len(), 7);
        }

        #[test]
        fn load_reads_file() {
            let mut file = NamedTempFile::new().unwrap();
            write!(file, r#"{{"server": {{"tcp_port": 9090}}}}"#).unwrap();
            let config = ServiceConfig::load(file.path()).unwrap();
            assert_eq!(config.listen_port(), 9090);
        }

        #[test]
        fn invalid_json_is_fatal() {
            let mut file = NamedTempFile::new().unwrap();
            write!(file, "{{ not json").unwrap();
            assert!(matches!(
                ServiceConfig::load(file.path()),
                Err(ServerError::ConfigParse { .. })
            ));
        }
    }

    mod sections_tests {
        use super::*;
        use test_case::test_case;

        #[test]
        fn full_document() {
            let config = ServiceConfig::from_json(
                r#"{
                    "server": { "tcp_port": 8181, "allowed_ips": "127.0.0.1, 10.0.0.0/8", "request_timeout_secs": 3, "render_workers": 2 },
                    "archive": { "base_path": "/srv/rrd", "rrdcached_addr": "unix:/run/rrdcached.sock", "rrdtool_path": "/usr/bin/rrdtool" },
                    "renderer": { "script_path": "/etc/svgd/chart.rhai", "entry_point": "draw" },
                    "selector": { "min_points": 50, "max_points": 500 },
                    "metrics": [ { "endpoint": "load", "rrd_path": "load/load.rrd" } ]
                }"#,
            )
            .unwrap();

            let settings = config.registry.settings();
            assert_eq!(settings.listen_port, 8181);
            assert!(settings.access.permits("10.20.30.40".parse().unwrap()));
            assert_eq!(settings.archive_base, PathBuf::from("/srv/rrd"));
            assert_eq!(settings.cache_daemon.as_deref(), Some("unix:/run/rrdcached.sock"));
            assert_eq!(settings.renderer_script, PathBuf::from("/etc/svgd/chart.rhai"));
            assert_eq!(config.request_timeout, Duration::from_secs(3));
            assert_eq!(config.renderer.workers, 2);
            assert_eq!(config.renderer.entry_point, "draw");
            assert_eq!(config.rrdtool_path, PathBuf::from("/usr/bin/rrdtool"));
            assert_eq!(config.selector.min_points, 50);
            assert_eq!(config.selector.max_points, 500);
            assert_eq!(config.selector.min_step, 10);
            assert_eq!(endpoints(&config), vec!["load"]);
        }

        #[test]
        fn allowed_ips_as_list() {
            let config =
                ServiceConfig::from_json(r#"{"server": {"allowed_ips": ["192.168.1.0/24"]}}"#).unwrap();
            let access = &config.registry.settings().access;
            assert!(access.permits("192.168.1.7".parse().unwrap()));
            assert!(!access.permits("127.0.0.1".parse().unwrap()));
        }

        #[test]
        fn empty_allowed_ips_allows_everyone() {
            let config = ServiceConfig::from_json(r#"{"server": {"allowed_ips": ""}}"#).unwrap();
            assert!(config.registry.settings().access.permits("8.8.8.8".parse().unwrap()));
        }

        #[test_case(r#"{"server": {"allowed_ips": "not-an-ip"}}"# ; "bad address")]
        #[test_case(r#"{"selector": {"min_points": 2000, "max_points": 1000}}"# ; "inverted band")]
        #[test_case(r#"{"selector": {"min_step": 0}}"# ; "zero floor step")]
        #[test_case(r#"{"server": {"render_workers": 0}}"# ; "zero workers")]
        #[test_case(r#"{"server": {"request_timeout_secs": 0}}"# ; "zero timeout")]
        fn fatal_global_errors(doc: &str) {
            assert!(matches!(
                ServiceConfig::from_json(doc),
                Err(ServerError::InvalidConfig { .. })
            ));
        }
    }

    mod metrics_tests {
        use super::*;
        use test_case::test_case;

        fn single(entry: &str) -> Vec<MetricDefinition> {
            let config = ServiceConfig::from_json(&format!(r#"{{"metrics": [{entry}]}}"#)).unwrap();
            config.registry.definitions().to_vec()
        }

        #[test]
        fn entry_defaults() {
            let defs = single(r#"{"endpoint": "/load/", "rrd_path": "load/load.rrd"}"#);
            let def = &defs[0];
            assert_eq!(def.endpoint(), "load");
            assert!(!def.requires_param());
            assert_eq!(def.param_name(), "param");
            assert_eq!(def.title().to_string(), "load");
            assert_eq!(def.y_label().to_string(), "Value");
            assert!(!def.is_percentage());
            assert_eq!(def.transform(), TransformKind::Identity);
            assert_eq!(def.value_format().as_str(), "%.1f");
        }

        #[test]
        fn placeholder_implies_parameter() {
            let defs = single(r#"{"endpoint": "interface", "rrd_path": "interface-%s/if_octets.rrd"}"#);
            assert!(defs[0].requires_param());
        }

        #[test]
        fn explicit_fields() {
            let defs = single(
                r#"{"endpoint": "ram/process", "rrd_path": "processes-%s/ps_rss.rrd",
                    "param_name": "process_name", "title": "Memory Usage for %s",
                    "y_label": "Memory (MB)", "transform_type": "bytes_to_mb", "value_format": "%.2f MB"}"#,
            );
            let def = &defs[0];
            assert_eq!(def.param_name(), "process_name");
            assert_eq!(def.title().render(Some("postgres")), "Memory Usage for postgres");
            assert_eq!(def.transform(), TransformKind::Scale);
            assert_eq!(def.divisor(), 1024.0 * 1024.0);
            assert_eq!(def.value_format().as_str(), "%.2f MB");
        }

        #[test_case("none", TransformKind::Identity ; "none alias")]
        #[test_case("ps_cputime_sum", TransformKind::SumFields ; "cputime alias")]
        #[test_case("multiply", TransformKind::Scale ; "multiply alias")]
        #[test_case("sum-fields", TransformKind::SumFields ; "canonical")]
        fn transform_aliases(name: &str, kind: TransformKind) {
            let defs = single(&format!(
                r#"{{"endpoint": "m", "rrd_path": "m.rrd", "transform_type": "{name}"}}"#
            ));
            assert_eq!(defs[0].transform(), kind);
        }

        #[test]
        fn explicit_divisor_beats_alias() {
            let defs = single(
                r#"{"endpoint": "m", "rrd_path": "m.rrd", "transform_type": "bytes_to_mb", "transform_divisor": 1000.0}"#,
            );
            assert_eq!(defs[0].divisor(), 1000.0);
        }

        #[test_case(r#"{"rrd_path": "a.rrd"}"# ; "missing endpoint")]
        #[test_case(r#"{"endpoint": "", "rrd_path": "a.rrd"}"# ; "empty endpoint")]
        #[test_case(r#"{"endpoint": "a"}"# ; "missing path")]
        #[test_case(r#"{"endpoint": "a", "rrd_path": "%s/%s.rrd"}"# ; "two placeholders")]
        #[test_case(r#"{"endpoint": "a", "rrd_path": "a-%d.rrd"}"# ; "other directive")]
        #[test_case(r#"{"endpoint": "a", "rrd_path": "a-%s.rrd", "requires_param": false}"# ; "placeholder without parameter")]
        #[test_case(r#"{"endpoint": "a", "rrd_path": "a.rrd", "transform_type": "median"}"# ; "unknown transform")]
        #[test_case(r#"{"endpoint": "a", "rrd_path": "a.rrd", "transform_divisor": 0.0}"# ; "zero divisor")]
        #[test_case(r#"{"endpoint": "a", "rrd_path": "a.rrd", "value_multiplier": -2.0}"# ; "negative multiplier")]
        #[test_case(r#"{"endpoint": "a", "rrd_path": "a.rrd", "value_format": "%s"}"# ; "bad format")]
        #[test_case(r#"{"endpoint": 5, "rrd_path": "a.rrd"}"# ; "wrong type")]
        fn invalid_entry_dropped(entry: &str) {
            let config = ServiceConfig::from_json(&format!(
                r#"{{"metrics": [{entry}, {{"endpoint": "ok", "rrd_path": "ok.rrd"}}]}}"#
            ))
            .unwrap();
            assert_eq!(endpoints(&config), vec!["ok"]);
        }

        #[test]
        fn later_duplicate_dropped() {
            let config = ServiceConfig::from_json(
                r#"{"metrics": [
                    {"endpoint": "cpu", "rrd_path": "first.rrd"},
                    {"endpoint": "cpu", "rrd_path": "second.rrd"}
                ]}"#,
            )
            .unwrap();
            assert_eq!(config.registry.len(), 1);
            assert_eq!(config.registry.definitions()[0].archive().to_string(), "first.rrd");
        }

        #[test]
        fn empty_list_is_not_the_builtin_list() {
            let config = ServiceConfig::from_json(r#"{"metrics": []}"#).unwrap();
            assert!(config.registry.is_empty());
        }
    }
}
