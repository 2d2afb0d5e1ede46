//! Command line interface
//!
//! Argument parsing and dispatch live here so `main.rs` stays a thin shell
//! and the parsing rules can be tested without spawning the binary.

// CLI glue code - relaxed lint requirements
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]

use std::io::{self, Write};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::{BenchError, Result};
use crate::linalg::LinalgConfig;
use crate::provision::{self, DryRunHost, ProvisionPlan, SystemHost};
use crate::rng::{self, RngBackend, RngConfig};
use crate::umath::{self, BackendOptions, UmathConfig};

/// Throughput benchmarks for numeric backends
#[derive(Debug, Parser)]
#[command(name = "numbench")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Informational logging; `umath` also prints every offset combination
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Tool to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available tools
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Cycles per element of elementwise functions across backends
    Umath(UmathArgs),
    /// Sampling throughput of random number generators
    Rng(RngArgs),
    /// Dense linear algebra timing
    Linalg(LinalgArgs),
    /// Install the package manager and benchmark environments
    Provision(ProvisionArgs),
}

/// `umath` flags
#[derive(Debug, Args)]
pub struct UmathArgs {
    /// Prefix string
    #[arg(short, long, default_value = "@")]
    pub prefix: String,

    /// Array sizes
    #[arg(short = 's', long = "size", num_args = 1.., default_values_t = umath::DEFAULT_SIZES)]
    pub sizes: Vec<usize>,

    /// Functions to test
    #[arg(short = 'f', long = "func", num_args = 1.., default_values = umath::DEFAULT_FUNCS)]
    pub funcs: Vec<String>,

    /// Implementations to test
    #[arg(
        short = 'm',
        long = "impl",
        num_args = 1..,
        default_values = umath::backend::DEFAULT_BACKENDS
    )]
    pub impls: Vec<String>,

    /// Goal for one measured interval, in milliseconds
    #[arg(short, long, default_value_t = 1.0)]
    pub goal_time: f64,

    /// Repeat experiments and keep the minimum time
    #[arg(short, long, default_value_t = 30)]
    pub repeats: usize,

    /// Offsets from aligned, in elements
    #[arg(short, long, num_args = 1.., default_values_t = umath::DEFAULT_OFFSETS)]
    pub offsets: Vec<usize>,

    /// Chunked loops without bounds checks in the `kernel` backend
    #[arg(long)]
    pub fast_math: bool,

    /// Worker threads for the `kernel` backend
    #[arg(short, long, env = "OMP_NUM_THREADS")]
    pub threads: Option<usize>,

    /// Use the wall clock scaled to cycles even if a cycle counter exists
    #[arg(long)]
    pub wall_clock: bool,

    /// Seed for operand data
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

impl UmathArgs {
    /// Benchmark configuration for these flags
    pub fn to_config(&self, verbose: bool) -> UmathConfig {
        UmathConfig {
            prefix: self.prefix.clone(),
            sizes: self.sizes.clone(),
            funcs: self.funcs.clone(),
            impls: self.impls.clone(),
            goal_time_ms: self.goal_time,
            repeats: self.repeats,
            offsets: self.offsets.clone(),
            verbose,
            backend: BackendOptions {
                threads: self.threads,
                fast_math: self.fast_math,
            },
            wall_clock: self.wall_clock,
            seed: self.seed,
        }
    }
}

/// `rng` flags
#[derive(Debug, Args)]
pub struct RngArgs {
    /// Printed with each result
    #[arg(long, default_value = "IntelPython")]
    pub text: String,

    /// Generator family
    #[arg(long = "rng", value_enum, default_value_t = RngBackend::Chacha)]
    pub backend: RngBackend,

    /// Trials per pair
    #[arg(long, default_value_t = rng::OUTER_REPS)]
    pub outer_reps: usize,

    /// Buffer fills per trial
    #[arg(long, default_value_t = rng::INNER_REPS)]
    pub inner_reps: usize,

    /// Generator seed
    #[arg(long, default_value_t = rng::SEED)]
    pub seed: u64,

    /// Elements per batch multiplier unit
    #[arg(long, default_value_t = rng::SAMPLE_SIZE)]
    pub sample_size: usize,
}

impl RngArgs {
    /// Benchmark configuration for these flags
    pub fn to_config(&self) -> RngConfig {
        RngConfig {
            text: self.text.clone(),
            backend: self.backend,
            outer_reps: self.outer_reps,
            inner_reps: self.inner_reps,
            seed: self.seed,
            sample_size: self.sample_size,
            ..RngConfig::default()
        }
    }
}

/// `linalg` flags
#[derive(Debug, Args)]
pub struct LinalgArgs {
    /// Matrix dimension
    #[arg(short = 'n', long, default_value_t = 1000)]
    pub size: usize,

    /// Timed repetitions per sample
    #[arg(short, long, default_value_t = 3)]
    pub reps: usize,

    /// Samples per bench
    #[arg(short, long, default_value_t = 1)]
    pub samples: usize,

    /// Prefix string
    #[arg(short, long, default_value = "Native")]
    pub prefix: String,

    /// Benches to run (default: all)
    #[arg(value_name = "BENCHMARKS")]
    pub benches: Vec<String>,
}

impl LinalgArgs {
    /// Benchmark configuration for these flags
    pub fn to_config(&self) -> LinalgConfig {
        LinalgConfig {
            size: self.size,
            reps: self.reps,
            samples: self.samples,
            prefix: self.prefix.clone(),
            benches: self.benches.clone(),
        }
    }
}

/// `provision` flags
#[derive(Debug, Args)]
pub struct ProvisionArgs {
    /// Base directory the install root and installer live in
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// TOML plan replacing the built-in one
    #[arg(long, value_name = "FILE")]
    pub plan: Option<PathBuf>,

    /// Log the steps without performing them
    #[arg(long)]
    pub dry_run: bool,
}

/// Install the `tracing` subscriber on stderr
///
/// `RUST_LOG` overrides the level chosen from `verbose`.
pub fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|e| BenchError::config(format!("cannot initialize logging: {e}")))
}

/// Run the selected tool, writing reports to `out`
pub fn run_command<W: Write>(cli: Cli, out: W) -> Result<()> {
    match cli.command {
        Commands::Umath(args) => {
            umath::run(args.to_config(cli.verbose), out)?;
        },
        Commands::Rng(args) => {
            rng::run(&args.to_config(), out)?;
        },
        Commands::Linalg(args) => {
            crate::linalg::run(&args.to_config(), out)?;
        },
        Commands::Provision(args) => handle_provision(&args, out)?,
    }
    Ok(())
}

fn handle_provision<W: Write>(args: &ProvisionArgs, mut out: W) -> Result<()> {
    let plan = match &args.plan {
        Some(path) => {
            info!(plan = %path.display(), "loading provisioning plan");
            ProvisionPlan::from_toml_file(path)?
        },
        None => ProvisionPlan::default(),
    };

    if args.dry_run {
        let mut host = DryRunHost::new();
        provision::provision(&plan, &args.dir, &mut host)?;
        for step in host.steps() {
            writeln!(out, "{step}")?;
        }
    } else {
        let mut host = SystemHost::new()?;
        let report = provision::provision(&plan, &args.dir, &mut host)?;
        writeln!(out, "{report}")?;
    }
    Ok(())
}

/// Main CLI entrypoint: logging, then dispatch with stdout as the report sink
pub fn entrypoint(cli: Cli) -> Result<()> {
    init_logging(cli.verbose)?;
    let stdout = io::stdout();
    run_command(cli, stdout.lock())
}

#[cfg(test)]
#[path = "tests.rs"]
mod cli_tests;
