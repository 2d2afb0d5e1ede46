//! Elementwise math throughput benchmark
//!
//! For every array size, backend and function the driver
//! 1. calibrates how many calls make one timed interval exceed the goal time,
//! 2. times that many calls at every combination of output/input offsets
//!    from a cache-line boundary,
//! 3. reports cycles per element for the aligned case and the worst case.
//!
//! A failure for one (function, backend) pair prints a diagnostic line and
//! the sweep moves on to the next pair.

use std::io::Write;

use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use crate::clock::{Clock, CycleClock, WallSeconds};
use crate::error::{BenchError, Result};

pub mod align;
pub mod anomaly;
pub mod backend;
pub mod calibrate;
pub mod expr;
pub mod func;

pub use align::{cache_line_offset, Operands, CACHE_LINE, SLACK};
pub use anomaly::{check_results, Anomaly};
pub use backend::{create as create_backend, BackendOptions, ElementwiseBackend};
pub use calibrate::{calibrate, cycles_per_element, loop_overhead, run_bench, Calibration};
pub use func::{BinaryOp, Function, Operand, OperandLayout, UnaryFunc};

/// Element type label in the report
pub const TYPE_NAME: &str = "float64";

/// Report header
pub const HEADER: &str = "Prefix,Implementation,Function,Type,Iterations,Size,CPE:aligned,CPE:max";

/// Default array sizes
pub const DEFAULT_SIZES: [usize; 6] = [1000, 8000, 32000, 100_000, 1_000_000, 2_500_000];

/// Default function list
pub const DEFAULT_FUNCS: [&str; 26] = [
    "+", "-", "*", "/", "sin", "cos", "tan", "sinh", "cosh", "tanh", "sqrt", "log10", "log", "exp",
    "expm1", "arcsin", "erf", "arccos", "arctan", "arcsinh", "arccosh", "arctanh", "log1p", "exp2",
    "log2", "copyto",
];

/// Default alignment offsets in elements
pub const DEFAULT_OFFSETS: [usize; 4] = [0, 1, 2, 4];

/// Configuration of one `umath` run
#[derive(Debug, Clone)]
pub struct UmathConfig {
    /// First column of every result line
    pub prefix: String,
    /// Array sizes
    pub sizes: Vec<usize>,
    /// Function names; resolved per configuration so bad names are isolated
    pub funcs: Vec<String>,
    /// Backend names; resolved per configuration
    pub impls: Vec<String>,
    /// Goal for one calibrated interval, in milliseconds
    pub goal_time_ms: f64,
    /// External repetitions reduced by minimum
    pub repeats: usize,
    /// Offsets from the aligned start, in elements
    pub offsets: Vec<usize>,
    /// Print one line per offset combination and skip the anomaly check
    pub verbose: bool,
    /// Options forwarded to backends
    pub backend: BackendOptions,
    /// Use the scaled wall clock even when a cycle counter exists
    pub wall_clock: bool,
    /// Seed for operand data
    pub seed: u64,
}

impl Default for UmathConfig {
    fn default() -> Self {
        Self {
            prefix: "@".to_string(),
            sizes: DEFAULT_SIZES.to_vec(),
            funcs: DEFAULT_FUNCS.iter().map(ToString::to_string).collect(),
            impls: backend::DEFAULT_BACKENDS.iter().map(ToString::to_string).collect(),
            goal_time_ms: 1.0,
            repeats: 30,
            offsets: DEFAULT_OFFSETS.to_vec(),
            verbose: false,
            backend: BackendOptions::default(),
            wall_clock: false,
            seed: 0,
        }
    }
}

impl UmathConfig {
    /// Configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set array sizes
    #[must_use]
    pub fn with_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.sizes = sizes;
        self
    }

    /// Set function names
    #[must_use]
    pub fn with_funcs<S: Into<String>>(mut self, funcs: impl IntoIterator<Item = S>) -> Self {
        self.funcs = funcs.into_iter().map(Into::into).collect();
        self
    }

    /// Set backend names
    #[must_use]
    pub fn with_impls<S: Into<String>>(mut self, impls: impl IntoIterator<Item = S>) -> Self {
        self.impls = impls.into_iter().map(Into::into).collect();
        self
    }

    /// Set the goal time in milliseconds
    #[must_use]
    pub fn with_goal_time_ms(mut self, ms: f64) -> Self {
        self.goal_time_ms = ms;
        self
    }

    /// Set the number of external repetitions
    #[must_use]
    pub fn with_repeats(mut self, repeats: usize) -> Self {
        self.repeats = repeats;
        self
    }

    /// Set alignment offsets
    #[must_use]
    pub fn with_offsets(mut self, offsets: Vec<usize>) -> Self {
        self.offsets = offsets;
        self
    }

    /// Enable per-offset output
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set backend options
    #[must_use]
    pub fn with_backend_options(mut self, options: BackendOptions) -> Self {
        self.backend = options;
        self
    }

    /// Force the scaled wall clock
    #[must_use]
    pub fn with_wall_clock(mut self, wall_clock: bool) -> Self {
        self.wall_clock = wall_clock;
        self
    }

    /// Check parameter ranges
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::ConfigError`] for empty lists, zero sizes or
    /// repeats, a non-positive goal, or offsets beyond [`SLACK`].
    pub fn validate(&self) -> Result<()> {
        if self.sizes.is_empty() || self.sizes.contains(&0) {
            return Err(BenchError::config("sizes must be a non-empty list of positive integers"));
        }
        if self.offsets.is_empty() {
            return Err(BenchError::config("at least one offset is required"));
        }
        if let Some(&bad) = self.offsets.iter().find(|&&o| o > SLACK) {
            return Err(BenchError::config(format!("offset {bad} exceeds the maximum of {SLACK} elements")));
        }
        if self.repeats == 0 {
            return Err(BenchError::config("repeats must be at least 1"));
        }
        if !(self.goal_time_ms > 0.0 && self.goal_time_ms.is_finite()) {
            return Err(BenchError::config("goal time must be a positive number of milliseconds"));
        }
        if self.backend.threads == Some(0) {
            return Err(BenchError::config("thread count must be at least 1"));
        }
        Ok(())
    }
}

/// One summary row of the report
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    /// Backend name
    pub implementation: String,
    /// Function label (unary name or layout label)
    pub label: String,
    /// Calibrated calls per interval
    pub iterations: u64,
    /// Array size
    pub size: usize,
    /// CPE with every operand aligned
    pub cpe_aligned: f64,
    /// Worst CPE over all offset combinations
    pub cpe_max: f64,
}

impl ResultRow {
    /// Render as a report line
    #[must_use]
    pub fn render(&self, prefix: &str) -> String {
        format!(
            "{prefix}, {:>7}, {:>12}, {TYPE_NAME}, {:>7}, {:>7}, {:>6.2}, {:>6.2}",
            self.implementation, self.label, self.iterations, self.size, self.cpe_aligned, self.cpe_max
        )
    }
}

/// Line printed when a (function, backend) pair cannot be benchmarked
#[must_use]
pub fn failure_line(func: &str, implementation: &str, err: &BenchError) -> String {
    format!("Failed while executing {func} for {implementation}: {err}")
}

/// Elementwise benchmark driver writing its report to `W`
pub struct UmathBench<W: Write> {
    config: UmathConfig,
    cycles: CycleClock,
    seconds: WallSeconds,
    overhead: f64,
    out: W,
}

impl<W: Write> UmathBench<W> {
    /// Validate `config`, pick the clock and measure the loop overhead
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::ConfigError`] for an invalid configuration.
    pub fn new(config: UmathConfig, out: W) -> Result<Self> {
        config.validate()?;
        let cycles = CycleClock::select(config.wall_clock);
        let overhead = loop_overhead(&cycles, config.repeats);
        info!(clock = cycles.name(), overhead, "timing loop overhead measured");
        Ok(Self {
            config,
            cycles,
            seconds: WallSeconds::new(),
            overhead,
            out,
        })
    }

    /// Per-call loop overhead subtracted from every measurement
    #[must_use]
    pub fn overhead(&self) -> f64 {
        self.overhead
    }

    /// Consume the driver and return the writer
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Run the full sweep
    ///
    /// # Errors
    ///
    /// Only output failures and alignment failures abort the sweep.
    pub fn run(&mut self) -> Result<()> {
        writeln!(
            self.out,
            "Overhead time per loop iteration =  {}  clock =  {}",
            self.overhead,
            self.cycles.name()
        )?;
        writeln!(self.out, "{HEADER}")?;

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let sizes = self.config.sizes.clone();
        let funcs = self.config.funcs.clone();
        // Created once for the whole sweep
        let backends: Vec<(String, Result<Box<dyn ElementwiseBackend>>)> = self
            .config
            .impls
            .iter()
            .map(|name| (name.clone(), create_backend(name, self.config.backend)))
            .collect();

        for n in sizes {
            let mut operands = Operands::new(n, &mut rng);
            if !operands.is_aligned() {
                let (z, x, y) = operands.align(n)?;
                writeln!(
                    self.out,
                    "Unaligned array data allocation detected, aligning with offsets: {z} {x} {y}"
                )?;
            }
            debug_assert!(operands.is_aligned());

            for (implementation, created) in &backends {
                for func in &funcs {
                    let backend = match created {
                        Ok(backend) => backend.as_ref(),
                        Err(err) => {
                            writeln!(self.out, "{}", failure_line(func, implementation, err))?;
                            continue;
                        },
                    };
                    match self.run_function(backend, func, &mut operands, n) {
                        Ok(()) => {},
                        Err(BenchError::Io(e)) => return Err(BenchError::Io(e)),
                        Err(err) => {
                            debug!(%func, %implementation, error = %err, "configuration skipped");
                            writeln!(self.out, "{}", failure_line(func, implementation, &err))?;
                        },
                    }
                }
            }
        }
        self.out.flush()?;
        Ok(())
    }

    /// Benchmark one function on one backend for arrays of `n` elements
    ///
    /// # Errors
    ///
    /// Fails when the function is unknown or the backend has no mapping.
    pub fn run_function(
        &mut self,
        backend: &dyn ElementwiseBackend,
        func: &str,
        operands: &mut Operands,
        n: usize,
    ) -> Result<()> {
        match func.parse::<Function>()? {
            Function::Binary(op) => {
                for layout in OperandLayout::ALL {
                    let row = self.run_binary(backend, op, layout, operands, n)?;
                    writeln!(self.out, "{}", row.render(&self.config.prefix))?;
                    self.out.flush()?;
                }
            },
            Function::Unary(f) => {
                let row = self.run_unary(backend, f, operands, n)?;
                writeln!(self.out, "{}", row.render(&self.config.prefix))?;
                self.out.flush()?;
            },
        }
        Ok(())
    }

    fn goal_seconds(&self) -> f64 {
        self.config.goal_time_ms / 1000.0
    }

    fn report_anomalies(&mut self, costs: &[f64]) -> Result<()> {
        if self.config.verbose {
            return Ok(());
        }
        for anomaly in check_results(costs) {
            writeln!(self.out, "{anomaly}")?;
        }
        Ok(())
    }

    fn verbose_line(&mut self, backend: &str, label: &str, count: u64, n: usize, cpe: f64) -> Result<()> {
        if self.config.verbose {
            writeln!(
                self.out,
                "{}, {backend:>7}, {label}, {TYPE_NAME}, {count:>6}, {n:>7}, {cpe:>4.2}",
                self.config.prefix
            )?;
            self.out.flush()?;
        }
        Ok(())
    }

    fn run_unary(
        &mut self,
        backend: &dyn ElementwiseBackend,
        func: UnaryFunc,
        operands: &mut Operands,
        n: usize,
    ) -> Result<ResultRow> {
        let mut kernel = backend.unary(func)?;
        let Operands { z, x, y } = operands;
        let source = if func.needs_input_above_one() { &*y } else { &*x };

        let calibration = {
            let input = source.window(0, n);
            let output = z.window_mut(0, n);
            let mut call = || kernel(input, &mut *output);
            calibrate(&self.seconds, &mut call, self.goal_seconds(), self.config.repeats)
        };
        debug!(func = func.name(), backend = backend.name(), ?calibration, "calibrated");

        let offsets = self.config.offsets.clone();
        let count = calibration.internal_count;
        let mut cpes = Array2::<f64>::zeros((offsets.len(), offsets.len()));
        for zi in (0..offsets.len()).rev() {
            for xi in (0..offsets.len()).rev() {
                let input = source.window(offsets[xi], n);
                let output = z.window_mut(offsets[zi], n);
                let label = format!(
                    "c[{}:]={:>7}(a[{}:])",
                    cache_line_offset(&*output) / std::mem::size_of::<f64>(),
                    func.name(),
                    cache_line_offset(input) / std::mem::size_of::<f64>()
                );
                let mut call = || kernel(input, &mut *output);
                let cpe =
                    cycles_per_element(&self.cycles, &mut call, count, self.config.repeats, self.overhead, n);
                cpes[[zi, xi]] = cpe;
                self.verbose_line(backend.name(), &label, count, n, cpe)?;
            }
        }

        let costs: Vec<f64> = cpes.iter().copied().collect();
        self.report_anomalies(&costs)?;
        Ok(ResultRow {
            implementation: backend.name().to_string(),
            label: func.name().to_string(),
            iterations: count,
            size: n,
            cpe_aligned: cpes[[0, 0]],
            cpe_max: costs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }

    fn run_binary(
        &mut self,
        backend: &dyn ElementwiseBackend,
        op: BinaryOp,
        layout: OperandLayout,
        operands: &mut Operands,
        n: usize,
    ) -> Result<ResultRow> {
        let mut kernel = backend.binary(op)?;
        let Operands { z, x, y } = operands;

        let calibration = {
            let (a, b) = Operand::pair(layout, x.window(0, n), y.window(0, n));
            let output = z.window_mut(0, n);
            let mut call = || kernel(a, b, &mut *output);
            calibrate(&self.seconds, &mut call, self.goal_seconds(), self.config.repeats)
        };
        debug!(op = op.symbol(), ?layout, backend = backend.name(), ?calibration, "calibrated");

        let offsets = self.config.offsets.clone();
        let count = calibration.internal_count;
        let k = offsets.len();
        let mut cpes = Array3::<f64>::zeros((k, k, k));
        for zi in (0..k).rev() {
            for xi in (0..k).rev() {
                for yi in (0..k).rev() {
                    let (zoff, xoff, yoff) = (offsets[zi], offsets[xi], offsets[yi]);
                    let (a, b) = Operand::pair(layout, x.window(xoff, n), y.window(yoff, n));
                    let output = z.window_mut(zoff, n);
                    let mut call = || kernel(a, b, &mut *output);
                    let cpe = cycles_per_element(
                        &self.cycles,
                        &mut call,
                        count,
                        self.config.repeats,
                        self.overhead,
                        n,
                    );
                    cpes[[zi, xi, yi]] = cpe;
                    let label = layout.offset_label(op, zoff, xoff, yoff);
                    self.verbose_line(backend.name(), &label, count, n, cpe)?;
                }
            }
        }

        let costs: Vec<f64> = cpes.iter().copied().collect();
        self.report_anomalies(&costs)?;
        Ok(ResultRow {
            implementation: backend.name().to_string(),
            label: layout.label(op),
            iterations: count,
            size: n,
            cpe_aligned: cpes[[0, 0, 0]],
            cpe_max: costs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

/// Run the elementwise benchmark with `config`, writing the report to `out`
///
/// # Errors
///
/// See [`UmathBench::new`] and [`UmathBench::run`].
pub fn run<W: Write>(config: UmathConfig, out: W) -> Result<W> {
    let mut bench = UmathBench::new(config, out)?;
    bench.run()?;
    Ok(bench.into_inner())
}

#[cfg(test)]
#[path = "tests.rs"]
mod umath_tests;
