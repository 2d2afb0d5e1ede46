//! Dense linear algebra timing
//!
//! Each bench owns its inputs. `make_args` allocates them once, `copy_args`
//! restores the working copy before every timed `compute`.
//!
//! | name       | operation                                   | library    |
//! |------------|---------------------------------------------|------------|
//! | `cholesky` | Cholesky factor of `X Xᵀ + n I`             | `nalgebra` |
//! | `det`      | determinant through pivoted LU              | `nalgebra` |
//! | `dot`      | square matrix product                       | `ndarray`  |
//! | `eig`      | eigenvalues of a general matrix (Schur)     | `nalgebra` |
//! | `inv`      | inverse                                     | `nalgebra` |
//! | `lu`       | pivoted LU, unpacked into `P`, `L`, `U`     | `nalgebra` |
//! | `qr`       | Householder QR and its `R` factor           | `nalgebra` |
//! | `svd`      | full singular value decomposition           | `nalgebra` |

use std::io::Write;
use std::time::Instant;

use ndarray::linalg::general_mat_mul;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use tracing::debug;

use crate::error::{BenchError, Result};

mod decomp;
pub use decomp::{Cholesky, Det, Eig, Inv, Lu, Qr, Svd};

/// Seed for the random input matrices
pub const MATRIX_SEED: u64 = 77777;

/// Report header
pub const HEADER: &str = "Prefix,Function,Size,Time";

/// Names of the available benches, in default run order
pub const BENCH_NAMES: [&str; 8] = ["cholesky", "det", "dot", "eig", "inv", "lu", "qr", "svd"];

/// A timed linear algebra operation
pub trait LinalgBench {
    /// Name on the command line and in the report
    fn name(&self) -> &'static str;

    /// Allocate inputs for problem size `size`
    fn make_args(&mut self, size: usize);

    /// Reset the working buffers
    fn copy_args(&mut self);

    /// The timed operation
    fn compute(&mut self);

    /// Check the last result against a reference computation
    fn test(&self) -> bool {
        false
    }
}

fn random_matrix(rows: usize, cols: usize, rng: &mut StdRng) -> Array2<f64> {
    Array2::from_shape_simple_fn((rows, cols), || StandardNormal.sample(rng))
}

/// Square matrix product `R = A B`
#[derive(Debug, Default)]
pub struct Dot {
    a: Array2<f64>,
    b: Array2<f64>,
    c: Array2<f64>,
    r: Array2<f64>,
}

impl Dot {
    /// Empty bench; call [`LinalgBench::make_args`] before computing
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LinalgBench for Dot {
    fn name(&self) -> &'static str {
        "dot"
    }

    fn make_args(&mut self, size: usize) {
        let mut rng = StdRng::seed_from_u64(MATRIX_SEED);
        self.a = random_matrix(size, size, &mut rng);
        self.b = random_matrix(size, size, &mut rng);
        self.c = random_matrix(size, size, &mut rng);
        self.r = Array2::zeros((size, size));
        self.copy_args();
    }

    fn copy_args(&mut self) {
        self.r.assign(&self.c);
    }

    fn compute(&mut self) {
        general_mat_mul(1.0, &self.a, &self.b, 0.0, &mut self.r);
    }

    fn test(&self) -> bool {
        let n = self.a.nrows();
        for i in 0..n {
            for j in 0..n {
                let expected: f64 = (0..n).map(|k| self.a[[i, k]] * self.b[[k, j]]).sum();
                if (self.r[[i, j]] - expected).abs() > 1e-9 * (n as f64).max(1.0) {
                    return false;
                }
            }
        }
        true
    }
}

/// Bench by name
#[must_use]
pub fn lookup(name: &str) -> Option<Box<dyn LinalgBench>> {
    let bench: Box<dyn LinalgBench> = match name {
        "cholesky" => Box::new(Cholesky::default()),
        "det" => Box::new(Det::default()),
        "dot" => Box::new(Dot::new()),
        "eig" => Box::new(Eig::default()),
        "inv" => Box::new(Inv::default()),
        "lu" => Box::new(Lu::default()),
        "qr" => Box::new(Qr::default()),
        "svd" => Box::new(Svd::default()),
        _ => return None,
    };
    Some(bench)
}

/// Configuration of one `linalg` run
#[derive(Debug, Clone)]
pub struct LinalgConfig {
    /// Matrix dimension
    pub size: usize,
    /// Timed computes per sample
    pub reps: usize,
    /// Report lines per bench
    pub samples: usize,
    /// First report column
    pub prefix: String,
    /// Benches to run; empty means all
    pub benches: Vec<String>,
}

impl Default for LinalgConfig {
    fn default() -> Self {
        Self {
            size: 1000,
            reps: 3,
            samples: 1,
            prefix: "Native".to_string(),
            benches: Vec::new(),
        }
    }
}

impl LinalgConfig {
    /// Check parameter ranges
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::ConfigError`] for a zero size, rep or sample count.
    pub fn validate(&self) -> Result<()> {
        for (flag, value) in [("size", self.size), ("reps", self.reps), ("samples", self.samples)] {
            if value < 1 {
                return Err(BenchError::config(format!(
                    "non-positive integer argument for --{flag}: {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Mean seconds per compute over `reps` timed runs after one warm-up
pub fn time_sample(bench: &mut dyn LinalgBench, reps: usize) -> f64 {
    bench.copy_args();
    bench.compute();

    let mut total = 0.0;
    for _ in 0..reps {
        bench.copy_args();
        let t0 = Instant::now();
        bench.compute();
        total += t0.elapsed().as_secs_f64();
    }
    total / reps as f64
}

/// Run the selected benches, writing the report to `out`
///
/// Unknown bench names are skipped with a notice on stderr.
///
/// # Errors
///
/// Returns [`BenchError::ConfigError`] for invalid parameters; output errors
/// propagate.
pub fn run<W: Write>(config: &LinalgConfig, mut out: W) -> Result<W> {
    config.validate()?;
    let names: Vec<String> = if config.benches.is_empty() {
        BENCH_NAMES.iter().map(ToString::to_string).collect()
    } else {
        config.benches.clone()
    };

    writeln!(out, "{HEADER}")?;
    for name in &names {
        let Some(mut bench) = lookup(name) else {
            eprintln!("# Ignoring invalid bench name: {name}");
            continue;
        };
        bench.make_args(config.size);
        for sample in 0..config.samples {
            let seconds = time_sample(bench.as_mut(), config.reps);
            debug!(bench = %name, sample, seconds, "sample timed");
            writeln!(out, "{},{},{},{}", config.prefix, name, config.size, seconds)?;
            out.flush()?;
        }
    }
    Ok(out)
}

#[cfg(test)]
#[path = "tests.rs"]
mod linalg_tests;
