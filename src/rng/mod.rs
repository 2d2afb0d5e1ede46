//! Random number generation throughput benchmark
//!
//! Every (bit generator, sampler) pair is timed over `outer_reps` trials. A
//! trial seeds a fresh generator and fills one pre-sized buffer `inner_reps`
//! times; the fastest trial is reported in seconds.

use std::fmt;
use std::io::Write;

use rand::distributions::{Distribution, Uniform};
use rand::rngs::{SmallRng, StdRng};
use rand::{Rng, SeedableRng};
use rand_distr::{Beta, Gamma, Hypergeometric, Poisson, StandardNormal};
use tracing::{debug, info};

use crate::clock::{Clock, WallSeconds};
use crate::error::{BenchError, Result};

/// Trials per pair, reduced by minimum
pub const OUTER_REPS: usize = 6;

/// Buffer fills per trial
pub const INNER_REPS: usize = 512;

/// Seed for every freshly created generator
pub const SEED: u64 = 123;

/// Elements per multiplier unit in one batch
pub const SAMPLE_SIZE: usize = 100_000;

/// Generator family selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RngBackend {
    /// ChaCha stream ciphers (`rand_chacha`)
    Chacha,
    /// Generators shipped with `rand`
    Rand,
}

impl RngBackend {
    /// Bit generators benchmarked for this backend
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::BackendUnavailable`] when the backend was not
    /// compiled into this binary.
    pub fn generators(self) -> Result<&'static [BitGenerator]> {
        match self {
            Self::Rand => Ok(&[BitGenerator::StdRng, BitGenerator::SmallRng]),
            #[cfg(feature = "chacha")]
            Self::Chacha => Ok(&[BitGenerator::ChaCha8, BitGenerator::ChaCha12, BitGenerator::ChaCha20]),
            #[cfg(not(feature = "chacha"))]
            Self::Chacha => Err(BenchError::BackendUnavailable {
                name: "chacha".to_string(),
                reason: "built without the `chacha` feature".to_string(),
            }),
        }
    }
}

impl fmt::Display for RngBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Chacha => "chacha",
            Self::Rand => "rand",
        })
    }
}

/// A concrete pseudo-random bit generator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitGenerator {
    /// `rand::rngs::StdRng`
    StdRng,
    /// `rand::rngs::SmallRng`
    SmallRng,
    /// `rand_chacha::ChaCha8Rng`
    ChaCha8,
    /// `rand_chacha::ChaCha12Rng`
    ChaCha12,
    /// `rand_chacha::ChaCha20Rng`
    ChaCha20,
}

impl BitGenerator {
    /// Type name printed in the report
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::StdRng => "StdRng",
            Self::SmallRng => "SmallRng",
            Self::ChaCha8 => "ChaCha8Rng",
            Self::ChaCha12 => "ChaCha12Rng",
            Self::ChaCha20 => "ChaCha20Rng",
        }
    }

    /// Fastest of `outer_reps` trials of `inner_reps` fills, in seconds
    ///
    /// # Errors
    ///
    /// Fails when the generator is not compiled in or the buffer does not
    /// match the sampler's element type.
    pub fn time_fills(
        self,
        sampler: &PreparedSampler,
        buffer: &mut SampleBuffer,
        config: &RngConfig,
    ) -> Result<f64> {
        match self {
            Self::StdRng => time_fills::<StdRng>(sampler, buffer, config),
            Self::SmallRng => time_fills::<SmallRng>(sampler, buffer, config),
            #[cfg(feature = "chacha")]
            Self::ChaCha8 => time_fills::<rand_chacha::ChaCha8Rng>(sampler, buffer, config),
            #[cfg(feature = "chacha")]
            Self::ChaCha12 => time_fills::<rand_chacha::ChaCha12Rng>(sampler, buffer, config),
            #[cfg(feature = "chacha")]
            Self::ChaCha20 => time_fills::<rand_chacha::ChaCha20Rng>(sampler, buffer, config),
            #[cfg(not(feature = "chacha"))]
            Self::ChaCha8 | Self::ChaCha12 | Self::ChaCha20 => Err(BenchError::BackendUnavailable {
                name: self.name().to_string(),
                reason: "built without the `chacha` feature".to_string(),
            }),
        }
    }
}

fn time_fills<R: Rng + SeedableRng>(
    sampler: &PreparedSampler,
    buffer: &mut SampleBuffer,
    config: &RngConfig,
) -> Result<f64> {
    fastest_trial(
        &WallSeconds::new(),
        config.outer_reps,
        || R::seed_from_u64(config.seed),
        |mut rng| {
            for _ in 0..config.inner_reps {
                sampler.fill(&mut rng, buffer)?;
            }
            Ok(())
        },
    )
}

/// Shortest of `trials` timed runs of `trial`, in `clock` units
///
/// `setup` runs before each trial, outside the timed interval, and hands its
/// result to the trial.
///
/// # Errors
///
/// The first failing trial aborts the measurement.
pub fn fastest_trial<C, T, S, F>(clock: &C, trials: usize, mut setup: S, mut trial: F) -> Result<f64>
where
    C: Clock + ?Sized,
    S: FnMut() -> T,
    F: FnMut(T) -> Result<()>,
{
    let mut best = f64::INFINITY;
    for _ in 0..trials {
        let state = setup();
        let t0 = clock.now();
        trial(state)?;
        best = best.min(clock.now() - t0);
    }
    Ok(best)
}

/// Element type produced by a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// 64-bit float
    F64,
    /// 32-bit integer
    I32,
    /// 64-bit integer
    I64,
}

/// Distribution sampler with the benchmark's fixed parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampler {
    /// Uniform on `[-1, 1)`
    Uniform,
    /// Standard normal
    Normal,
    /// Gamma, shape 5.2, scale 1
    Gamma,
    /// Beta(0.7, 2.5)
    Beta,
    /// Integers uniform on `[0, 100)`
    Randint,
    /// Poisson with mean 7.6
    Poisson,
    /// Hypergeometric, 214 good, 97 bad, 83 drawn
    Hypergeom,
}

impl Sampler {
    /// Samplers in report order
    pub const ALL: [Sampler; 7] = [
        Self::Uniform,
        Self::Normal,
        Self::Gamma,
        Self::Beta,
        Self::Randint,
        Self::Poisson,
        Self::Hypergeom,
    ];

    /// Name printed in the report
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::Normal => "normal",
            Self::Gamma => "gamma",
            Self::Beta => "beta",
            Self::Randint => "randint",
            Self::Poisson => "poisson",
            Self::Hypergeom => "hypergeom",
        }
    }

    /// Batch size multiplier; cheap samplers draw larger batches
    #[must_use]
    pub fn multiplier(self) -> usize {
        match self {
            Self::Uniform | Self::Randint => 10,
            Self::Normal => 2,
            Self::Poisson => 5,
            Self::Gamma | Self::Beta | Self::Hypergeom => 1,
        }
    }

    /// Elements produced by the sampler
    #[must_use]
    pub fn element_kind(self) -> ElementKind {
        match self {
            Self::Randint => ElementKind::I32,
            Self::Poisson | Self::Hypergeom => ElementKind::I64,
            _ => ElementKind::F64,
        }
    }

    /// Build the distribution object once, outside the timed loop
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::ConfigError`] if a parameter is rejected.
    pub fn prepare(self) -> Result<PreparedSampler> {
        let name = self.name();
        Ok(match self {
            Self::Uniform => PreparedSampler::Uniform(Uniform::new(-1.0, 1.0)),
            Self::Normal => PreparedSampler::Normal,
            Self::Gamma => PreparedSampler::Gamma(Gamma::new(5.2, 1.0).map_err(|e| invalid(name, e))?),
            Self::Beta => PreparedSampler::Beta(Beta::new(0.7, 2.5).map_err(|e| invalid(name, e))?),
            Self::Randint => PreparedSampler::Randint(Uniform::new(0, 100)),
            Self::Poisson => PreparedSampler::Poisson(Poisson::new(7.6).map_err(|e| invalid(name, e))?),
            Self::Hypergeom => PreparedSampler::Hypergeom(
                Hypergeometric::new(214 + 97, 214, 83).map_err(|e| invalid(name, e))?,
            ),
        })
    }
}

fn invalid(sampler: &str, e: impl fmt::Display) -> BenchError {
    BenchError::config(format!("{sampler} parameters: {e}"))
}

impl fmt::Display for Sampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Distribution ready for sampling
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub enum PreparedSampler {
    Uniform(Uniform<f64>),
    Normal,
    Gamma(Gamma<f64>),
    Beta(Beta<f64>),
    Randint(Uniform<i32>),
    Poisson(Poisson<f64>),
    Hypergeom(Hypergeometric),
}

impl PreparedSampler {
    fn name(&self) -> &'static str {
        match self {
            Self::Uniform(_) => "uniform",
            Self::Normal => "normal",
            Self::Gamma(_) => "gamma",
            Self::Beta(_) => "beta",
            Self::Randint(_) => "randint",
            Self::Poisson(_) => "poisson",
            Self::Hypergeom(_) => "hypergeom",
        }
    }

    /// Overwrite every element of `buffer` with fresh samples
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::UnsupportedOperation`] when the buffer holds a
    /// different element type than the sampler produces.
    pub fn fill<R: Rng + ?Sized>(&self, rng: &mut R, buffer: &mut SampleBuffer) -> Result<()> {
        match (self, buffer) {
            (Self::Uniform(d), SampleBuffer::F64(out)) => fill_with(out, || d.sample(rng)),
            (Self::Normal, SampleBuffer::F64(out)) => fill_with(out, || rng.sample(StandardNormal)),
            (Self::Gamma(d), SampleBuffer::F64(out)) => fill_with(out, || d.sample(rng)),
            (Self::Beta(d), SampleBuffer::F64(out)) => fill_with(out, || d.sample(rng)),
            (Self::Randint(d), SampleBuffer::I32(out)) => fill_with(out, || d.sample(rng)),
            (Self::Poisson(d), SampleBuffer::I64(out)) => {
                fill_with(out, || Distribution::<f64>::sample(d, rng) as i64);
            },
            (Self::Hypergeom(d), SampleBuffer::I64(out)) => {
                fill_with(out, || Distribution::<u64>::sample(d, rng) as i64);
            },
            (sampler, buffer) => {
                return Err(BenchError::unsupported(
                    sampler.name(),
                    format!("cannot fill a {:?} buffer", buffer.kind()),
                ))
            },
        }
        Ok(())
    }
}

#[inline]
fn fill_with<T, F: FnMut() -> T>(out: &mut [T], mut draw: F) {
    for slot in out.iter_mut() {
        *slot = draw();
    }
}

/// Pre-sized output buffer reused across fills
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum SampleBuffer {
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
}

impl SampleBuffer {
    /// Zeroed buffer of `len` elements of `kind`
    #[must_use]
    pub fn zeroed(kind: ElementKind, len: usize) -> Self {
        match kind {
            ElementKind::F64 => Self::F64(vec![0.0; len]),
            ElementKind::I32 => Self::I32(vec![0; len]),
            ElementKind::I64 => Self::I64(vec![0; len]),
        }
    }

    /// Element type held
    #[must_use]
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::F64(_) => ElementKind::F64,
            Self::I32(_) => ElementKind::I32,
            Self::I64(_) => ElementKind::I64,
        }
    }

    /// Number of elements
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::F64(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I64(v) => v.len(),
        }
    }

    /// True for a zero-length buffer
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Configuration of one `rng` run
#[derive(Debug, Clone)]
pub struct RngConfig {
    /// Label printed first on every line
    pub text: String,
    /// Generator family
    pub backend: RngBackend,
    /// Trials per pair
    pub outer_reps: usize,
    /// Fills per trial
    pub inner_reps: usize,
    /// Generator seed
    pub seed: u64,
    /// Elements per multiplier unit
    pub sample_size: usize,
    /// Samplers to run, in order
    pub samplers: Vec<Sampler>,
}

impl Default for RngConfig {
    fn default() -> Self {
        Self {
            text: "IntelPython".to_string(),
            backend: RngBackend::Chacha,
            outer_reps: OUTER_REPS,
            inner_reps: INNER_REPS,
            seed: SEED,
            sample_size: SAMPLE_SIZE,
            samplers: Sampler::ALL.to_vec(),
        }
    }
}

impl RngConfig {
    /// Set the report label
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Set the generator family
    #[must_use]
    pub fn with_backend(mut self, backend: RngBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Set trial and fill counts
    #[must_use]
    pub fn with_reps(mut self, outer_reps: usize, inner_reps: usize) -> Self {
        self.outer_reps = outer_reps;
        self.inner_reps = inner_reps;
        self
    }

    /// Set the per-unit sample size
    #[must_use]
    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// Restrict the samplers
    #[must_use]
    pub fn with_samplers(mut self, samplers: Vec<Sampler>) -> Self {
        self.samplers = samplers;
        self
    }

    /// Check parameter ranges
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::ConfigError`] for zero repetition counts or an
    /// empty sample size.
    pub fn validate(&self) -> Result<()> {
        if self.outer_reps == 0 || self.inner_reps == 0 {
            return Err(BenchError::config("repetition counts must be at least 1"));
        }
        if self.sample_size == 0 {
            return Err(BenchError::config("sample size must be at least 1"));
        }
        Ok(())
    }

    /// Elements drawn per fill for `sampler`
    #[must_use]
    pub fn batch_size(&self, sampler: Sampler) -> usize {
        sampler.multiplier() * self.sample_size
    }
}

/// One report line
#[derive(Debug, Clone, PartialEq)]
pub struct RngResult {
    /// Elements per fill
    pub batch: usize,
    /// Generator
    pub generator: BitGenerator,
    /// Sampler
    pub sampler: Sampler,
    /// Fastest trial in seconds
    pub seconds: f64,
}

impl RngResult {
    /// Render as `text,batch,generator,sampler,seconds`
    #[must_use]
    pub fn render(&self, text: &str) -> String {
        format!(
            "{text},{},{},{},{:.5}",
            self.batch,
            self.generator.name(),
            self.sampler,
            self.seconds
        )
    }
}

/// Run every (generator, sampler) pair and write one line per pair
///
/// # Errors
///
/// Returns [`BenchError::BackendUnavailable`] before any output when the
/// backend is not compiled in; output errors propagate.
pub fn run<W: Write>(config: &RngConfig, mut out: W) -> Result<W> {
    config.validate()?;
    let generators = config.backend.generators()?;
    info!(backend = %config.backend, generators = generators.len(), "rng benchmark starting");

    for &generator in generators {
        for &sampler in &config.samplers {
            let prepared = sampler.prepare()?;
            let batch = config.batch_size(sampler);
            let mut buffer = SampleBuffer::zeroed(sampler.element_kind(), batch);
            let seconds = generator.time_fills(&prepared, &mut buffer, config)?;
            debug!(generator = generator.name(), %sampler, seconds, "pair timed");
            let result = RngResult {
                batch,
                generator,
                sampler,
                seconds,
            };
            writeln!(out, "{}", result.render(&config.text))?;
            out.flush()?;
        }
    }
    Ok(out)
}

#[cfg(test)]
#[path = "tests.rs"]
mod rng_tests;
