//! [`Host`] implementations

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use super::{CommandLine, Host};
use crate::error::{BenchError, Result};

/// Real filesystem, network and processes
#[derive(Debug)]
pub struct SystemHost {
    #[cfg(feature = "download")]
    client: reqwest::blocking::Client,
}

impl SystemHost {
    /// Create a host; downloads use a client with a generous timeout
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::DownloadFailed`] if the HTTP client cannot be
    /// built.
    pub fn new() -> Result<Self> {
        #[cfg(feature = "download")]
        {
            let client = reqwest::blocking::Client::builder()
                .timeout(std::time::Duration::from_secs(600))
                .build()
                .map_err(|e| BenchError::DownloadFailed {
                    url: String::new(),
                    reason: format!("cannot create HTTP client: {e}"),
                })?;
            Ok(Self { client })
        }
        #[cfg(not(feature = "download"))]
        {
            Ok(Self {})
        }
    }
}

/// `<dest>.part`, the in-progress download location
#[must_use]
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

impl Host for SystemHost {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&mut self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path)?;
        Ok(())
    }

    #[cfg(feature = "download")]
    fn download(&mut self, url: &str, dest: &Path) -> Result<()> {
        let failed = |reason: String| BenchError::DownloadFailed {
            url: url.to_string(),
            reason,
        };
        let mut response = self
            .client
            .get(url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|e| failed(e.to_string()))?;

        let part = partial_path(dest);
        let mut file = std::fs::File::create(&part)?;
        let bytes = match response.copy_to(&mut file) {
            Ok(bytes) => bytes,
            Err(e) => {
                drop(file);
                let _ = std::fs::remove_file(&part);
                return Err(failed(e.to_string()));
            },
        };
        file.sync_all()?;
        std::fs::rename(&part, dest)?;
        debug!(url, bytes, dest = %dest.display(), "download complete");
        Ok(())
    }

    #[cfg(not(feature = "download"))]
    fn download(&mut self, url: &str, _dest: &Path) -> Result<()> {
        Err(BenchError::DownloadFailed {
            url: url.to_string(),
            reason: "built without the `download` feature".to_string(),
        })
    }

    #[cfg(unix)]
    fn make_executable(&mut self, path: &Path) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let mut permissions = std::fs::metadata(path)?.permissions();
        permissions.set_mode(permissions.mode() | 0o755);
        std::fs::set_permissions(path, permissions)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn make_executable(&mut self, path: &Path) -> Result<()> {
        std::fs::metadata(path)?;
        Ok(())
    }

    fn run(&mut self, command: &CommandLine) -> Result<()> {
        let status = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.cwd)
            .status()
            .map_err(|e| BenchError::CommandFailed {
                command: command.to_string(),
                reason: e.to_string(),
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(BenchError::CommandFailed {
                command: command.to_string(),
                reason: status.to_string(),
            })
        }
    }
}

/// Reads the real filesystem but only logs the steps it would take
#[derive(Debug, Default)]
pub struct DryRunHost {
    steps: Vec<String>,
}

impl DryRunHost {
    /// Empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps in execution order
    #[must_use]
    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    fn record(&mut self, step: String) {
        info!(step = %step, "dry run");
        self.steps.push(step);
    }
}

impl Host for DryRunHost {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&mut self, path: &Path) -> Result<()> {
        self.record(format!("mkdir -p {}", path.display()));
        Ok(())
    }

    fn download(&mut self, url: &str, dest: &Path) -> Result<()> {
        self.record(format!("download {url} -> {}", dest.display()));
        Ok(())
    }

    fn make_executable(&mut self, path: &Path) -> Result<()> {
        self.record(format!("chmod +x {}", path.display()));
        Ok(())
    }

    fn run(&mut self, command: &CommandLine) -> Result<()> {
        self.record(command.to_string());
        Ok(())
    }
}
