//! Tests for provisioning

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::host::partial_path;
use super::*;

/// In-memory host; commands create the paths a real run would leave behind
#[derive(Debug, Default)]
struct FakeHost {
    existing: HashSet<PathBuf>,
    actions: Vec<String>,
    fail_on: Option<String>,
}

impl FakeHost {
    fn with_existing(paths: &[PathBuf]) -> Self {
        Self {
            existing: paths.iter().cloned().collect(),
            ..Self::default()
        }
    }

    fn check_failure(&self, action: &str) -> Result<()> {
        match &self.fail_on {
            Some(needle) if action.contains(needle.as_str()) => Err(BenchError::CommandFailed {
                command: action.to_string(),
                reason: "exit status: 1".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

impl Host for FakeHost {
    fn exists(&self, path: &Path) -> bool {
        self.existing.contains(path)
    }

    fn create_dir_all(&mut self, path: &Path) -> Result<()> {
        self.actions.push(format!("mkdir {}", path.display()));
        self.existing.insert(path.to_path_buf());
        Ok(())
    }

    fn download(&mut self, url: &str, dest: &Path) -> Result<()> {
        let action = format!("download {url}");
        self.check_failure(&action)?;
        self.actions.push(action);
        self.existing.insert(dest.to_path_buf());
        Ok(())
    }

    fn make_executable(&mut self, path: &Path) -> Result<()> {
        self.actions.push(format!("chmod {}", path.display()));
        Ok(())
    }

    fn run(&mut self, command: &CommandLine) -> Result<()> {
        let line = command.to_string();
        self.check_failure(&line)?;
        self.actions.push(line);
        if command.args.first().map(String::as_str) == Some("-b") {
            let root = PathBuf::from(&command.args[2]);
            self.existing.insert(root.join("bin").join("conda"));
        } else if command.args.first().map(String::as_str) == Some("create") {
            let name = &command.args[4];
            let root = command.program.parent().and_then(Path::parent).unwrap();
            self.existing.insert(root.join("envs").join(name));
        }
        Ok(())
    }
}

fn base() -> PathBuf {
    PathBuf::from("/work")
}

#[test]
fn test_default_plan_matches_reference_setup() {
    let plan = ProvisionPlan::default();
    assert_eq!(plan.root, PathBuf::from("miniconda3"));
    assert_eq!(
        plan.installer_url(),
        "https://repo.continuum.io/miniconda/Miniconda3-latest-Linux-x86_64.sh"
    );
    let names: Vec<&str> = plan.environments.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["intel3", "pip3"]);
    assert!(plan.environments[0].pip.is_empty());
    assert_eq!(plan.environments[1].pip.len(), 2);
    assert!(plan.validate().is_ok());
}

#[test]
fn test_fresh_tree_runs_every_step_in_order() {
    let mut host = FakeHost::default();
    let report = provision(&ProvisionPlan::default(), &base(), &mut host).unwrap();

    assert!(report.downloaded);
    assert!(report.installed);
    assert_eq!(report.created, vec!["intel3", "pip3"]);
    assert!(report.skipped.is_empty());

    let expected = vec![
        "mkdir /work/miniconda3".to_string(),
        "download https://repo.continuum.io/miniconda/Miniconda3-latest-Linux-x86_64.sh".to_string(),
        "chmod /work/Miniconda3-latest-Linux-x86_64.sh".to_string(),
        "/work/Miniconda3-latest-Linux-x86_64.sh -b -p /work/miniconda3 -f".to_string(),
        "/work/miniconda3/bin/conda create -q -y -n intel3 -c intel python=3 numpy numexpr numba \
         scikit-learn tbb cython"
            .to_string(),
        "/work/miniconda3/bin/conda create -q -y -n pip3 -c intel python=3 pip llvmlite cython"
            .to_string(),
        "/work/miniconda3/envs/pip3/bin/pip -q install numpy scikit-learn toolz numexpr rdtsc"
            .to_string(),
        "/work/miniconda3/envs/pip3/bin/pip -q install dask numba".to_string(),
    ];
    assert_eq!(host.actions, expected);
}

#[test]
fn test_second_run_is_noop() {
    let plan = ProvisionPlan::default();
    let mut host = FakeHost::default();
    provision(&plan, &base(), &mut host).unwrap();
    let after_first = host.actions.len();

    let report = provision(&plan, &base(), &mut host).unwrap();
    assert!(report.is_noop());
    assert_eq!(report.skipped, vec!["intel3", "pip3"]);
    assert_eq!(host.actions.len(), after_first);
    assert_eq!(report.to_string(), "nothing to do, 2 environment(s) present");
}

#[test]
fn test_existing_installer_is_not_downloaded_again() {
    let installer = base().join(INSTALLER);
    let root = base().join("miniconda3");
    let mut host = FakeHost::with_existing(&[installer, root]);
    let report = provision(&ProvisionPlan::default(), &base(), &mut host).unwrap();

    assert!(!report.downloaded);
    assert!(report.installed);
    assert!(!host.actions.iter().any(|a| a.starts_with("download") || a.starts_with("mkdir")));
}

#[test]
fn test_only_missing_environment_is_created() {
    let conda = base().join("miniconda3/bin/conda");
    let intel3 = base().join("miniconda3/envs/intel3");
    let mut host = FakeHost::with_existing(&[conda, intel3]);
    let report = provision(&ProvisionPlan::default(), &base(), &mut host).unwrap();

    assert!(!report.installed);
    assert_eq!(report.created, vec!["pip3"]);
    assert_eq!(report.skipped, vec!["intel3"]);
    assert_eq!(host.actions.len(), 3);
}

#[test]
fn test_failed_command_stops_and_rerun_resumes() {
    let plan = ProvisionPlan::default();
    let mut host = FakeHost {
        fail_on: Some("-n pip3".to_string()),
        ..FakeHost::default()
    };
    let err = provision(&plan, &base(), &mut host).unwrap_err();
    assert!(matches!(err, BenchError::CommandFailed { .. }));
    assert!(err.to_string().contains("pip3"));
    assert!(!host.actions.iter().any(|a| a.contains("pip -q install")));

    host.fail_on = None;
    host.actions.clear();
    let report = provision(&plan, &base(), &mut host).unwrap();
    assert!(!report.installed);
    assert_eq!(report.created, vec!["pip3"]);
    assert_eq!(report.skipped, vec!["intel3"]);
}

#[test]
fn test_download_failure_propagates() {
    let mut host = FakeHost {
        fail_on: Some("download".to_string()),
        ..FakeHost::default()
    };
    assert!(provision(&ProvisionPlan::default(), &base(), &mut host).is_err());
    assert_eq!(host.actions, vec!["mkdir /work/miniconda3".to_string()]);
}

#[test]
fn test_plan_from_toml_file_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plan.toml");
    std::fs::write(
        &path,
        r#"
root = "conda"

[[environments]]
name = "bench"
channel = "conda-forge"
packages = ["python=3.11", "numpy"]
pip = [["rdtsc"]]
"#,
    )
    .unwrap();

    let plan = ProvisionPlan::from_toml_file(&path).unwrap();
    assert_eq!(plan.root, PathBuf::from("conda"));
    assert_eq!(plan.installer, INSTALLER);
    assert_eq!(plan.environments.len(), 1);
    assert_eq!(plan.environments[0].pip, vec![vec!["rdtsc".to_string()]]);
}

#[test]
fn test_plan_rejects_bad_input() {
    assert!(matches!(
        ProvisionPlan::from_toml("root = ["),
        Err(BenchError::PlanParse(_))
    ));
    let duplicated = r#"
[[environments]]
name = "a"
channel = "c"
packages = []

[[environments]]
name = "a"
channel = "c"
packages = []
"#;
    assert!(matches!(
        ProvisionPlan::from_toml(duplicated),
        Err(BenchError::ConfigError { .. })
    ));
    assert!(matches!(
        ProvisionPlan::from_toml("installer = \"../x.sh\""),
        Err(BenchError::ConfigError { .. })
    ));
}

#[test]
fn test_dry_run_performs_no_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = DryRunHost::new();
    let report = provision(&ProvisionPlan::default(), dir.path(), &mut host).unwrap();

    assert!(report.installed);
    assert_eq!(host.steps().len(), 8);
    assert!(host.steps()[1].starts_with("download https://"));
    assert!(!dir.path().join("miniconda3").exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_partial_path_appends_suffix() {
    assert_eq!(
        partial_path(Path::new("/tmp/Miniconda3.sh")),
        PathBuf::from("/tmp/Miniconda3.sh.part")
    );
}

#[test]
fn test_system_host_filesystem_steps() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = SystemHost::new().unwrap();
    let nested = dir.path().join("a/b/c");
    assert!(!host.exists(&nested));
    host.create_dir_all(&nested).unwrap();
    assert!(host.exists(&nested));

    let script = dir.path().join("install.sh");
    std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
    host.make_executable(&script).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
    assert!(host.make_executable(&dir.path().join("missing.sh")).is_err());
}

#[cfg(unix)]
#[test]
fn test_system_host_reports_exit_status() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = SystemHost::new().unwrap();
    let ok = CommandLine {
        program: PathBuf::from("sh"),
        args: vec!["-c".to_string(), "exit 0".to_string()],
        cwd: dir.path().to_path_buf(),
    };
    assert!(host.run(&ok).is_ok());

    let failing = CommandLine {
        args: vec!["-c".to_string(), "exit 3".to_string()],
        ..ok.clone()
    };
    let err = host.run(&failing).unwrap_err();
    assert!(matches!(err, BenchError::CommandFailed { .. }));
    assert!(err.to_string().contains("exit 3"));

    let missing = CommandLine {
        program: dir.path().join("no-such-program"),
        ..ok
    };
    assert!(matches!(host.run(&missing), Err(BenchError::CommandFailed { .. })));
}

#[test]
fn test_absolute_base_drops_current_dir_components() {
    let cwd = std::env::current_dir().unwrap();
    assert_eq!(absolute_base(Path::new(".")).unwrap(), cwd);
    assert_eq!(absolute_base(Path::new("bench")).unwrap(), cwd.join("bench"));
    assert_eq!(absolute_base(Path::new("/work/./x")).unwrap(), PathBuf::from("/work/x"));
}

#[test]
fn test_relative_base_resolves_against_working_directory() {
    let cwd = std::env::current_dir().unwrap();
    let mut host = DryRunHost::new();
    provision(&ProvisionPlan::default(), Path::new("bench"), &mut host).unwrap();

    let root = cwd.join("bench").join("miniconda3");
    assert_eq!(host.steps()[0], format!("mkdir -p {}", root.display()));
    let install = &host.steps()[3];
    assert!(install.starts_with(&cwd.join("bench").join(INSTALLER).display().to_string()));
    assert!(install.contains(&format!("-b -p {} -f", root.display())));
}

#[cfg(unix)]
#[test]
fn test_system_host_installs_under_relative_base() {
    // Relative to the test's working directory, as `--dir bench` would be
    let dir = tempfile::tempdir_in(".").unwrap();
    let base = dir.path();
    assert!(base.is_relative());
    std::fs::write(
        base.join(INSTALLER),
        "#!/bin/sh\nmkdir -p \"$3/bin\" && touch \"$3/bin/conda\"\n",
    )
    .unwrap();

    let plan = ProvisionPlan {
        environments: Vec::new(),
        ..ProvisionPlan::default()
    };
    let mut host = SystemHost::new().unwrap();
    let report = provision(&plan, base, &mut host).unwrap();
    assert!(!report.downloaded);
    assert!(report.installed);
    assert!(base.join("miniconda3/bin/conda").exists());

    let again = provision(&plan, base, &mut host).unwrap();
    assert!(again.is_noop());
}
