//! Package-manager and environment provisioning
//!
//! Installs a conda distribution into a local directory and creates the
//! benchmark environments. Every step is guarded by an existence check, so a
//! second run against a complete tree does nothing. Steps are not
//! transactional: a failed run is resumed by running again.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{BenchError, Result};

mod host;

pub use host::{DryRunHost, SystemHost};

/// Default installer file name
pub const INSTALLER: &str = "Miniconda3-latest-Linux-x86_64.sh";

/// Default location the installer is fetched from
pub const INSTALLER_BASE_URL: &str = "https://repo.continuum.io/miniconda/";

/// One environment to create
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnvironmentSpec {
    /// Environment name (`conda create -n`)
    pub name: String,
    /// Channel (`conda create -c`)
    pub channel: String,
    /// Conda package specs
    pub packages: Vec<String>,
    /// `pip install` invocations run inside the new environment, in order
    #[serde(default)]
    pub pip: Vec<Vec<String>>,
}

impl EnvironmentSpec {
    fn new(name: &str, channel: &str, packages: &[&str], pip: &[&[&str]]) -> Self {
        Self {
            name: name.to_string(),
            channel: channel.to_string(),
            packages: strings(packages),
            pip: pip.iter().map(|batch| strings(batch)).collect(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

/// What to install and where
///
/// Relative paths are resolved against the provisioning base directory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProvisionPlan {
    /// Install root of the package manager
    pub root: PathBuf,
    /// Installer file name, also the download target
    pub installer: String,
    /// URL prefix the installer name is appended to
    pub installer_base_url: String,
    /// Environments to create
    pub environments: Vec<EnvironmentSpec>,
}

impl Default for ProvisionPlan {
    fn default() -> Self {
        Self {
            root: PathBuf::from("miniconda3"),
            installer: INSTALLER.to_string(),
            installer_base_url: INSTALLER_BASE_URL.to_string(),
            environments: vec![
                EnvironmentSpec::new(
                    "intel3",
                    "intel",
                    &["python=3", "numpy", "numexpr", "numba", "scikit-learn", "tbb", "cython"],
                    &[],
                ),
                EnvironmentSpec::new(
                    "pip3",
                    "intel",
                    &["python=3", "pip", "llvmlite", "cython"],
                    &[
                        &["numpy", "scikit-learn", "toolz", "numexpr", "rdtsc"],
                        &["dask", "numba"],
                    ],
                ),
            ],
        }
    }
}

impl ProvisionPlan {
    /// Parse a plan from TOML; missing keys take the default values
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::PlanParse`] for malformed TOML and
    /// [`BenchError::ConfigError`] for an empty or duplicated environment name.
    pub fn from_toml(text: &str) -> Result<Self> {
        let plan: Self = toml::from_str(text)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Read and parse a plan file
    ///
    /// # Errors
    ///
    /// See [`ProvisionPlan::from_toml`]; I/O errors propagate.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Check names and paths
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::ConfigError`] on the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.installer.is_empty() || self.installer.contains('/') {
            return Err(BenchError::config(format!(
                "installer must be a plain file name, got '{}'",
                self.installer
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for env in &self.environments {
            if env.name.is_empty() || env.name.contains('/') {
                return Err(BenchError::config(format!("invalid environment name '{}'", env.name)));
            }
            if !seen.insert(env.name.as_str()) {
                return Err(BenchError::config(format!("environment '{}' listed twice", env.name)));
            }
        }
        Ok(())
    }

    /// Full installer URL
    #[must_use]
    pub fn installer_url(&self) -> String {
        format!("{}{}", self.installer_base_url, self.installer)
    }
}

/// An external command with its working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Executable path
    pub program: PathBuf,
    /// Arguments
    pub args: Vec<String>,
    /// Working directory
    pub cwd: PathBuf,
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Side effects needed by the provisioner
pub trait Host {
    /// Whether `path` exists
    fn exists(&self, path: &Path) -> bool;

    /// Create `path` and its parents
    ///
    /// # Errors
    ///
    /// I/O failures.
    fn create_dir_all(&mut self, path: &Path) -> Result<()>;

    /// Fetch `url` into `dest`
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::DownloadFailed`] on transport or HTTP errors.
    fn download(&mut self, url: &str, dest: &Path) -> Result<()>;

    /// Mark `path` executable
    ///
    /// # Errors
    ///
    /// I/O failures.
    fn make_executable(&mut self, path: &Path) -> Result<()>;

    /// Run a command to completion
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::CommandFailed`] if it cannot start or exits
    /// unsuccessfully.
    fn run(&mut self, command: &CommandLine) -> Result<()>;
}

/// What a provisioning run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Installer was downloaded
    pub downloaded: bool,
    /// Package manager was installed
    pub installed: bool,
    /// Environments created
    pub created: Vec<String>,
    /// Environments that already existed
    pub skipped: Vec<String>,
}

impl ProvisionReport {
    /// True when nothing had to be done
    #[must_use]
    pub fn is_noop(&self) -> bool {
        !self.downloaded && !self.installed && self.created.is_empty()
    }
}

impl fmt::Display for ProvisionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_noop() {
            return write!(f, "nothing to do, {} environment(s) present", self.skipped.len());
        }
        write!(
            f,
            "downloaded: {}, installed: {}, created: [{}], already present: [{}]",
            self.downloaded,
            self.installed,
            self.created.join(", "),
            self.skipped.join(", ")
        )
    }
}

/// Paths derived from a plan and a base directory
#[derive(Debug, Clone)]
pub struct Layout {
    base: PathBuf,
    root: PathBuf,
}

impl Layout {
    /// Resolve `plan` against `base`
    #[must_use]
    pub fn new(plan: &ProvisionPlan, base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
            root: base.join(&plan.root),
        }
    }

    /// Install root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/bin/conda`
    #[must_use]
    pub fn conda(&self) -> PathBuf {
        self.root.join("bin").join("conda")
    }

    /// `<root>/envs/<name>`
    #[must_use]
    pub fn env_dir(&self, name: &str) -> PathBuf {
        self.root.join("envs").join(name)
    }

    /// Installer location inside the base directory
    #[must_use]
    pub fn installer(&self, plan: &ProvisionPlan) -> PathBuf {
        self.base.join(&plan.installer)
    }

    fn installer_command(&self, plan: &ProvisionPlan) -> CommandLine {
        CommandLine {
            program: self.installer(plan),
            args: vec![
                "-b".to_string(),
                "-p".to_string(),
                self.root.display().to_string(),
                "-f".to_string(),
            ],
            cwd: self.base.clone(),
        }
    }

    fn create_command(&self, env: &EnvironmentSpec) -> CommandLine {
        let (name, channel) = (env.name.as_str(), env.channel.as_str());
        let mut args = strings(&["create", "-q", "-y", "-n", name, "-c", channel]);
        args.extend(env.packages.iter().cloned());
        CommandLine {
            program: self.conda(),
            args,
            cwd: self.base.clone(),
        }
    }

    fn pip_command(&self, env: &EnvironmentSpec, packages: &[String]) -> CommandLine {
        let mut args = vec!["-q".to_string(), "install".to_string()];
        args.extend(packages.iter().cloned());
        CommandLine {
            program: self.env_dir(&env.name).join("bin").join("pip"),
            args,
            cwd: self.base.clone(),
        }
    }
}

/// `base` as an absolute path without `.` components
///
/// Commands run with `base` as their working directory, so every path handed
/// to them must not depend on the caller's directory.
///
/// # Errors
///
/// Fails when `base` is relative and the current directory is unreadable.
pub fn absolute_base(base: &Path) -> Result<PathBuf> {
    let joined = if base.is_absolute() {
        base.to_path_buf()
    } else {
        std::env::current_dir()?.join(base)
    };
    Ok(joined.components().collect())
}

/// Bring the tree under `base` up to `plan`
///
/// # Errors
///
/// The first failing step aborts the run; earlier steps are kept.
pub fn provision<H: Host + ?Sized>(
    plan: &ProvisionPlan,
    base: &Path,
    host: &mut H,
) -> Result<ProvisionReport> {
    plan.validate()?;
    let base = absolute_base(base)?;
    let layout = Layout::new(plan, &base);
    let mut report = ProvisionReport::default();

    let conda = layout.conda();
    if host.exists(&conda) {
        debug!(conda = %conda.display(), "package manager present");
    } else {
        if !host.exists(layout.root()) {
            host.create_dir_all(layout.root())?;
        }
        let installer = layout.installer(plan);
        if !host.exists(&installer) {
            let url = plan.installer_url();
            info!(%url, dest = %installer.display(), "downloading installer");
            host.download(&url, &installer)?;
            report.downloaded = true;
        }
        host.make_executable(&installer)?;
        let command = layout.installer_command(plan);
        info!(command = %command, "installing package manager");
        host.run(&command)?;
        report.installed = true;
    }

    for env in &plan.environments {
        let dir = layout.env_dir(&env.name);
        if host.exists(&dir) {
            debug!(env = %env.name, "environment present");
            report.skipped.push(env.name.clone());
            continue;
        }
        let create = layout.create_command(env);
        info!(env = %env.name, command = %create, "creating environment");
        host.run(&create)?;
        for batch in &env.pip {
            let pip = layout.pip_command(env, batch);
            info!(env = %env.name, command = %pip, "installing pip packages");
            host.run(&pip)?;
        }
        report.created.push(env.name.clone());
    }

    Ok(report)
}

#[cfg(test)]
#[path = "tests.rs"]
mod provision_tests;
