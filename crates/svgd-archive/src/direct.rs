//! Direct store access through the `rrdtool` command line.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Output;

use svgd_metrics::{ArchiveInfo, TimeWindow};
use tokio::process::Command;
use tracing::debug;

use crate::backend::{ArchiveBackend, BackendConnector, BackendFuture, FetchedRows};
use crate::error::{ArchiveError, Result};
use crate::parse::{parse_fetch, parse_info};

/// Default `rrdtool` program, looked up on `PATH`.
pub const DEFAULT_RRDTOOL: &str = "rrdtool";

/// Connector for the direct store.
#[derive(Debug, Clone)]
pub struct DirectStore {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl Default for DirectStore {
    fn default() -> Self {
        Self::new(DEFAULT_RRDTOOL)
    }
}

impl DirectStore {
    /// Creates a connector running `program`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Set arguments placed before every subcommand, for wrapper programs.
    #[must_use]
    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    /// Returns the program path.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl BackendConnector for DirectStore {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn open<'a>(&'a self, path: &'a Path) -> BackendFuture<'a, Box<dyn ArchiveBackend>> {
        Box::pin(async move {
            match tokio::fs::metadata(path).await {
                Ok(meta) if meta.is_file() => {}
                Ok(_) => {
                    return Err(ArchiveError::NotFound {
                        path: path.display().to_string(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(ArchiveError::NotFound {
                        path: path.display().to_string(),
                    });
                }
                Err(e) => return Err(ArchiveError::io("stat archive", &e)),
            }

            Ok(Box::new(DirectSession {
                program: self.program.clone(),
                leading_args: self.leading_args.clone(),
            }) as Box<dyn ArchiveBackend>)
        })
    }
}

/// A direct store session. Holds no connection; every call runs the tool.
#[derive(Debug)]
struct DirectSession {
    program: PathBuf,
    leading_args: Vec<String>,
}

impl DirectSession {
    async fn run(&self, path: &Path, args: &[String]) -> Result<String> {
        let program = self.program.display().to_string();
        debug!(program = %program, args = ?args, "running archive tool");

        let Output {
            status,
            stdout,
            stderr,
        } = Command::new(&self.program)
            .args(&self.leading_args)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ArchiveError::io(format!("spawn {program}"), &e))?;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
            if stderr.contains("No such file") {
                return Err(ArchiveError::NotFound {
                    path: path.display().to_string(),
                });
            }
            return Err(ArchiveError::Command {
                program,
                status: status.to_string(),
                stderr,
            });
        }

        String::from_utf8(stdout).map_err(|e| ArchiveError::Parse {
            reason: format!("{program} output is not UTF-8: {e}"),
        })
    }
}

impl ArchiveBackend for DirectSession {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn info<'a>(&'a mut self, path: &'a Path) -> BackendFuture<'a, ArchiveInfo> {
        Box::pin(async move {
            let args = vec!["info".to_string(), path.display().to_string()];
            let text = self.run(path, &args).await?;
            parse_info(&text)
        })
    }

    fn fetch<'a>(
        &'a mut self,
        path: &'a Path,
        window: TimeWindow,
        step: u64,
    ) -> BackendFuture<'a, FetchedRows> {
        Box::pin(async move {
            let args = vec![
                "fetch".to_string(),
                path.display().to_string(),
                "AVERAGE".to_string(),
                "-s".to_string(),
                window.start.to_string(),
                "-e".to_string(),
                window.end.to_string(),
                "-r".to_string(),
                step.to_string(),
            ];
            let text = self.run(path, &args).await?;
            parse_fetch(&text)
        })
    }

    fn disconnect(&mut self) -> BackendFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
