//! Cache daemon backend.
//!
//! Speaks the rrdcached text protocol: one command per line, answered by a
//! status line `<n> <message>`. A negative `n` is an error; otherwise `n`
//! further lines follow.
//!
//! `FETCH file CF [start [end]]` takes no resolution; the daemon answers at
//! the resolution it picks and says so in its `Step:` header.

use std::path::{Path, PathBuf};

use svgd_metrics::{ArchiveInfo, TimeWindow};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::backend::{ArchiveBackend, BackendConnector, BackendFuture, FetchedRows};
use crate::error::{ArchiveError, Result};
use crate::parse::{parse_fetch, parse_info};

/// Default TCP port of the cache daemon.
pub const DEFAULT_DAEMON_PORT: u16 = 42217;

/// Where the cache daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonAddr {
    /// `host:port`.
    Tcp(String),
    /// Unix domain socket path.
    Unix(PathBuf),
}

impl DaemonAddr {
    /// Parses `unix:/path`, an absolute socket path, `host` or `host:port`.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::InvalidAddress` for an empty address or a bad port.
    pub fn parse(addr: &str) -> Result<Self> {
        let addr = addr.trim();
        let invalid = |reason: &str| ArchiveError::InvalidAddress {
            addr: addr.to_string(),
            reason: reason.to_string(),
        };

        if let Some(path) = addr.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(invalid("socket path is empty"));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        if addr.starts_with('/') {
            return Ok(Self::Unix(PathBuf::from(addr)));
        }
        if addr.is_empty() {
            return Err(invalid("address is empty"));
        }

        match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && !host.ends_with(':') => {
                port.parse::<u16>().map_err(|_| invalid("bad port"))?;
                Ok(Self::Tcp(addr.to_string()))
            }
            Some(_) => Err(invalid("bad host")),
            None => Ok(Self::Tcp(format!("{addr}:{DEFAULT_DAEMON_PORT}"))),
        }
    }
}

impl std::fmt::Display for DaemonAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp(addr) => f.write_str(addr),
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Connector for the cache daemon.
#[derive(Debug, Clone)]
pub struct CacheDaemon {
    addr: DaemonAddr,
}

impl CacheDaemon {
    /// Creates a connector for `addr`.
    #[must_use]
    pub const fn new(addr: DaemonAddr) -> Self {
        Self { addr }
    }

    /// Returns the daemon address.
    #[must_use]
    pub const fn addr(&self) -> &DaemonAddr {
        &self.addr
    }

    async fn connect(&self) -> Result<Box<dyn Session>> {
        let connect_error = |e: std::io::Error| ArchiveError::Connect {
            addr: self.addr.to_string(),
            reason: e.to_string(),
        };

        match &self.addr {
            DaemonAddr::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await.map_err(connect_error)?;
                Ok(Box::new(CachedSession::new(stream)))
            }
            #[cfg(unix)]
            DaemonAddr::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path)
                    .await
                    .map_err(connect_error)?;
                Ok(Box::new(CachedSession::new(stream)))
            }
            #[cfg(not(unix))]
            DaemonAddr::Unix(_) => Err(ArchiveError::InvalidAddress {
                addr: self.addr.to_string(),
                reason: "unix sockets are not supported on this platform".to_string(),
            }),
        }
    }
}

/// Object-safe view of a session over any stream type.
trait Session: ArchiveBackend {
    fn flush<'a>(&'a mut self, path: &'a Path) -> BackendFuture<'a, ()>;
    fn into_backend(self: Box<Self>) -> Box<dyn ArchiveBackend>;
}

impl BackendConnector for CacheDaemon {
    fn name(&self) -> &'static str {
        "cached"
    }

    fn open<'a>(&'a self, path: &'a Path) -> BackendFuture<'a, Box<dyn ArchiveBackend>> {
        Box::pin(async move {
            let mut session = self.connect().await?;
            if let Err(e) = session.flush(path).await {
                if let Err(close) = session.disconnect().await {
                    warn!(addr = %self.addr, error = %close, "disconnect after failed flush");
                }
                return Err(e);
            }
            debug!(addr = %self.addr, archive = %path.display(), "cache daemon flushed");
            Ok(session.into_backend())
        })
    }
}

/// A protocol session over one stream.
pub struct CachedSession<S> {
    stream: BufStream<S>,
    closed: bool,
}

impl<S> CachedSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps a connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufStream::new(stream),
            closed: false,
        }
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let read = self
            .stream
            .read_line(&mut line)
            .await
            .map_err(|e| ArchiveError::io("read response", &e))?;
        if read == 0 {
            return Err(ArchiveError::Protocol {
                reason: "connection closed by cache daemon".to_string(),
            });
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Sends one command and returns the lines following the status line.
    async fn command(&mut self, command: &str, path: Option<&Path>) -> Result<Vec<String>> {
        self.stream
            .write_all(format!("{command}\n").as_bytes())
            .await
            .and(self.stream.flush().await)
            .map_err(|e| ArchiveError::io("send command", &e))?;

        let status = self.read_line().await?;
        let (count, message) = status.split_once(' ').unwrap_or((status.as_str(), ""));
        let count: i64 = count.parse().map_err(|_| ArchiveError::Protocol {
            reason: format!("bad status line: {status}"),
        })?;

        if count < 0 {
            if let (Some(path), true) = (path, message.contains("No such file")) {
                return Err(ArchiveError::NotFound {
                    path: path.display().to_string(),
                });
            }
            return Err(ArchiveError::Daemon {
                code: count,
                message: message.to_string(),
            });
        }

        let mut lines = Vec::with_capacity(usize::try_from(count).unwrap_or_default());
        for _ in 0..count {
            lines.push(self.read_line().await?);
        }
        Ok(lines)
    }
}

impl<S> ArchiveBackend for CachedSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn name(&self) -> &'static str {
        "cached"
    }

    fn info<'a>(&'a mut self, path: &'a Path) -> BackendFuture<'a, ArchiveInfo> {
        Box::pin(async move {
            let lines = self
                .command(&format!("INFO {}", path.display()), Some(path))
                .await?;
            parse_info(&lines.join("\n"))
        })
    }

    fn fetch<'a>(
        &'a mut self,
        path: &'a Path,
        window: TimeWindow,
        _step: u64,
    ) -> BackendFuture<'a, FetchedRows> {
        Box::pin(async move {
            let command = format!(
                "FETCH {} AVERAGE {} {}",
                path.display(),
                window.start,
                window.end
            );
            let lines = self.command(&command, Some(path)).await?;
            parse_fetch(&lines.join("\n"))
        })
    }

    fn disconnect(&mut self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            if self.closed {
                return Ok(());
            }
            self.closed = true;
            // the daemon closes without answering QUIT
            self.stream
                .write_all(b"QUIT\n")
                .await
                .and(self.stream.flush().await)
                .map_err(|e| ArchiveError::io("send QUIT", &e))?;
            self.stream
                .shutdown()
                .await
                .map_err(|e| ArchiveError::io("shutdown", &e))
        })
    }
}

impl<S> Session for CachedSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn flush<'a>(&'a mut self, path: &'a Path) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.command(&format!("FLUSH {}", path.display()), Some(path))
                .await
                .map(|_| ())
        })
    }

    fn into_backend(self: Box<Self>) -> Box<dyn ArchiveBackend> {
        self
    }
}
