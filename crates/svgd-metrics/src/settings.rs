//! Process-wide settings held alongside the metric definitions.

use std::net::IpAddr;
use std::path::PathBuf;

use ipnet::IpNet;
use serde::Serialize;

use crate::error::{MetricsError, Result};

/// Default archive root used by collectd.
pub const DEFAULT_ARCHIVE_BASE: &str = "/opt/collectd/var/lib/collectd/rrd/localhost";

/// Default render script location.
pub const DEFAULT_RENDERER_SCRIPT: &str = "scripts/render_chart.rhai";

/// Default listen port.
pub const DEFAULT_LISTEN_PORT: u16 = 8080;

/// Which client addresses may issue queries.
///
/// An empty policy allows every client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccessPolicy {
    allowed: Vec<IpNet>,
}

impl AccessPolicy {
    /// Creates a policy from a list of networks.
    #[must_use]
    pub const fn new(allowed: Vec<IpNet>) -> Self {
        Self { allowed }
    }

    /// Parses a comma- or whitespace-separated list of addresses and CIDR networks.
    ///
    /// # Errors
    ///
    /// Returns `MetricsError::InvalidAccessPolicy` for an entry that is
    /// neither an IP address nor a network.
    pub fn parse(list: &str) -> Result<Self> {
        let allowed = list
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                entry
                    .parse::<IpNet>()
                    .or_else(|_| entry.parse::<IpAddr>().map(IpNet::from))
                    .map_err(|e| MetricsError::InvalidAccessPolicy {
                        entry: entry.to_string(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { allowed })
    }

    /// Returns true if the client address is allowed.
    #[must_use]
    pub fn permits(&self, addr: IpAddr) -> bool {
        if self.allowed.is_empty() {
            return true;
        }
        let addr = addr.to_canonical();
        self.allowed.iter().any(|net| net.contains(&addr))
    }

    /// Returns the configured networks.
    #[must_use]
    pub fn networks(&self) -> &[IpNet] {
        &self.allowed
    }
}

/// Global settings shared by every query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Port the transport listens on.
    pub listen_port: u16,
    /// Clients allowed to query.
    pub access: AccessPolicy,
    /// Directory archive templates are resolved against.
    pub archive_base: PathBuf,
    /// Cache daemon address (`host:port` or `unix:/path`), if any.
    pub cache_daemon: Option<String>,
    /// Render script location.
    pub renderer_script: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            access: AccessPolicy::new(vec![IpNet::from(IpAddr::from([127, 0, 0, 1]))]),
            archive_base: PathBuf::from(DEFAULT_ARCHIVE_BASE),
            cache_daemon: None,
            renderer_script: PathBuf::from(DEFAULT_RENDERER_SCRIPT),
        }
    }
}

impl Settings {
    /// Set the archive base directory.
    #[must_use]
    pub fn with_archive_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.archive_base = base.into();
        self
    }

    /// Set the cache daemon address.
    #[must_use]
    pub fn with_cache_daemon(mut self, addr: impl Into<String>) -> Self {
        self.cache_daemon = Some(addr.into());
        self
    }

    /// Set the render script path.
    #[must_use]
    pub fn with_renderer_script(mut self, path: impl Into<PathBuf>) -> Self {
        self.renderer_script = path.into();
        self
    }

    /// Set the access policy.
    #[must_use]
    pub fn with_access(mut self, access: AccessPolicy) -> Self {
        self.access = access;
        self
    }

    /// Set the listen port.
    #[must_use]
    pub const fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }
}
