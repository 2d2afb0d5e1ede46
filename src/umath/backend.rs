//! Elementwise backends
//!
//! Every backend turns a function into a boxed kernel once, outside the timed
//! loop. Kernels take the input window(s) and write the output window.
//!
//! | name      | strategy                                              |
//! |-----------|-------------------------------------------------------|
//! | `std`     | slice iterators over `f64` methods                    |
//! | `ndarray` | `ndarray::Zip` over array views                       |
//! | `expr`    | compiled expression, evaluated in cache-sized blocks  |
//! | `kernel`  | indexed loops, `rayon` pool when more than one thread |

use std::sync::Arc;

use ndarray::{ArrayView1, ArrayViewMut1, Zip};
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::debug;

use crate::error::{BenchError, Result};

use super::expr::Program;
use super::func::{BinaryOp, Operand, UnaryFunc};

/// Unary kernel: `out[i] = f(x[i])`
pub type UnaryKernel = Box<dyn FnMut(&[f64], &mut [f64])>;

/// Binary kernel: `out[i] = a[i] op b[i]` with scalar broadcasting
pub type BinaryKernel = Box<dyn FnMut(Operand<'_>, Operand<'_>, &mut [f64])>;

/// Default backend names in benchmark order
pub const DEFAULT_BACKENDS: [&str; 4] = ["std", "ndarray", "expr", "kernel"];

/// Lanes per chunk in the `kernel` backend's fast-math path
pub const FAST_MATH_LANES: usize = 8;

/// Options shared by backends that can use them
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendOptions {
    /// Worker threads for the `kernel` backend (`None`: rayon default)
    pub threads: Option<usize>,
    /// Chunked, bounds-check free loops in the `kernel` backend
    pub fast_math: bool,
}

/// Source of elementwise kernels
pub trait ElementwiseBackend {
    /// Backend name as given on the command line
    fn name(&self) -> &'static str;

    /// Kernel for a unary function
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::UnsupportedOperation`] when the backend has no
    /// mapping for `func`.
    fn unary(&self, func: UnaryFunc) -> Result<UnaryKernel>;

    /// Kernel for a binary operator
    ///
    /// The kernel accepts any operand layout; callers resolve a fresh kernel
    /// per layout.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::UnsupportedOperation`] when the backend has no
    /// mapping for `op`.
    fn binary(&self, op: BinaryOp) -> Result<BinaryKernel>;
}

/// Instantiate a backend by name
///
/// # Errors
///
/// Returns [`BenchError::BackendUnavailable`] for unknown names or when the
/// `kernel` thread pool cannot be built.
pub fn create(name: &str, options: BackendOptions) -> Result<Box<dyn ElementwiseBackend>> {
    match name {
        "std" => Ok(Box::new(StdBackend)),
        "ndarray" => Ok(Box::new(NdarrayBackend)),
        "expr" => Ok(Box::new(ExprBackend)),
        "kernel" => Ok(Box::new(KernelBackend::new(options)?)),
        other => Err(BenchError::BackendUnavailable {
            name: other.to_string(),
            reason: format!("known backends are {}", DEFAULT_BACKENDS.join(", ")),
        }),
    }
}

#[inline]
fn map_binary(op: BinaryOp, a: Operand<'_>, b: Operand<'_>, out: &mut [f64]) {
    match (a, b) {
        (Operand::Array(x), Operand::Array(y)) => {
            for ((o, &p), &q) in out.iter_mut().zip(x).zip(y) {
                *o = op.apply(p, q);
            }
        },
        (Operand::Array(x), Operand::Scalar(q)) => {
            for (o, &p) in out.iter_mut().zip(x) {
                *o = op.apply(p, q);
            }
        },
        (Operand::Scalar(p), Operand::Array(y)) => {
            for (o, &q) in out.iter_mut().zip(y) {
                *o = op.apply(p, q);
            }
        },
        (Operand::Scalar(p), Operand::Scalar(q)) => out.fill(op.apply(p, q)),
    }
}

// ============================================================================
// std
// ============================================================================

/// Iterator loops over the standard library's `f64` methods
#[derive(Debug, Clone, Copy, Default)]
pub struct StdBackend;

impl ElementwiseBackend for StdBackend {
    fn name(&self) -> &'static str {
        "std"
    }

    fn unary(&self, func: UnaryFunc) -> Result<UnaryKernel> {
        if func == UnaryFunc::Copyto {
            return Ok(Box::new(|x: &[f64], out: &mut [f64]| out.copy_from_slice(x)));
        }
        let f = func.scalar_fn();
        Ok(Box::new(move |x: &[f64], out: &mut [f64]| {
            for (o, &v) in out.iter_mut().zip(x) {
                *o = f(v);
            }
        }))
    }

    fn binary(&self, op: BinaryOp) -> Result<BinaryKernel> {
        Ok(Box::new(move |a: Operand<'_>, b: Operand<'_>, out: &mut [f64]| {
            map_binary(op, a, b, out);
        }))
    }
}

// ============================================================================
// ndarray
// ============================================================================

/// `ndarray` views driven by `Zip`
///
/// Only functions with a direct `f64` method counterpart are mapped; `erf`
/// and `invsqrt` have none.
#[derive(Debug, Clone, Copy, Default)]
pub struct NdarrayBackend;

impl ElementwiseBackend for NdarrayBackend {
    fn name(&self) -> &'static str {
        "ndarray"
    }

    fn unary(&self, func: UnaryFunc) -> Result<UnaryKernel> {
        match func {
            UnaryFunc::Erf | UnaryFunc::Invsqrt => Err(BenchError::unsupported(
                func.name(),
                "ndarray backend has no mapping for this function",
            )),
            UnaryFunc::Copyto => Ok(Box::new(|x: &[f64], out: &mut [f64]| {
                ArrayViewMut1::from(out).assign(&ArrayView1::from(x));
            })),
            _ => {
                let f = func.scalar_fn();
                Ok(Box::new(move |x: &[f64], out: &mut [f64]| {
                    Zip::from(ArrayViewMut1::from(out))
                        .and(ArrayView1::from(x))
                        .for_each(|o, &v| *o = f(v));
                }))
            },
        }
    }

    fn binary(&self, op: BinaryOp) -> Result<BinaryKernel> {
        Ok(Box::new(move |a: Operand<'_>, b: Operand<'_>, out: &mut [f64]| {
            let out = ArrayViewMut1::from(out);
            match (a, b) {
                (Operand::Array(x), Operand::Array(y)) => Zip::from(out)
                    .and(ArrayView1::from(x))
                    .and(ArrayView1::from(y))
                    .for_each(|o, &p, &q| *o = op.apply(p, q)),
                (Operand::Array(x), Operand::Scalar(q)) => Zip::from(out)
                    .and(ArrayView1::from(x))
                    .for_each(|o, &p| *o = op.apply(p, q)),
                (Operand::Scalar(p), Operand::Array(y)) => Zip::from(out)
                    .and(ArrayView1::from(y))
                    .for_each(|o, &q| *o = op.apply(p, q)),
                (Operand::Scalar(p), Operand::Scalar(q)) => {
                    let mut out = out;
                    out.fill(op.apply(p, q));
                },
            }
        }))
    }
}

// ============================================================================
// expr
// ============================================================================

/// Compiled expressions (`sin(x)`, `x + y`, `1/sqrt(x)`)
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprBackend;

impl ExprBackend {
    /// Expression text used for a unary function
    #[must_use]
    pub fn unary_source(func: UnaryFunc) -> String {
        match func {
            UnaryFunc::Invsqrt => "1/sqrt(x)".to_string(),
            other => format!("{}(x)", other.name()),
        }
    }
}

impl ElementwiseBackend for ExprBackend {
    fn name(&self) -> &'static str {
        "expr"
    }

    fn unary(&self, func: UnaryFunc) -> Result<UnaryKernel> {
        let mut program = Program::compile(&Self::unary_source(func), &["x"])?;
        debug!(expr = program.source(), "compiled unary expression");
        Ok(Box::new(move |x: &[f64], out: &mut [f64]| {
            program.eval(&[Operand::Array(x)], out);
        }))
    }

    fn binary(&self, op: BinaryOp) -> Result<BinaryKernel> {
        let mut program = Program::compile(&format!("x {} y", op.symbol()), &["x", "y"])?;
        debug!(expr = program.source(), "compiled binary expression");
        Ok(Box::new(move |a: Operand<'_>, b: Operand<'_>, out: &mut [f64]| {
            program.eval(&[a, b], out);
        }))
    }
}

// ============================================================================
// kernel
// ============================================================================

/// Specialized loops, parallel on a private `rayon` pool when threads > 1
pub struct KernelBackend {
    pool: Option<Arc<ThreadPool>>,
    fast_math: bool,
}

impl std::fmt::Debug for KernelBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelBackend")
            .field("threads", &self.threads())
            .field("fast_math", &self.fast_math)
            .finish()
    }
}

impl KernelBackend {
    /// Build the backend, creating a pool if more than one thread is requested
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::BackendUnavailable`] if the pool cannot start.
    pub fn new(options: BackendOptions) -> Result<Self> {
        let threads = options.threads.unwrap_or_else(rayon::current_num_threads);
        let pool = if threads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| BenchError::BackendUnavailable {
                    name: "kernel".to_string(),
                    reason: e.to_string(),
                })?;
            Some(Arc::new(pool))
        } else {
            None
        };
        debug!(threads, fast_math = options.fast_math, "kernel backend ready");
        Ok(Self {
            pool,
            fast_math: options.fast_math,
        })
    }

    /// Worker threads used by kernels
    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool.as_ref().map_or(1, |pool| pool.current_num_threads())
    }

    /// Whether the parallel path is active
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        self.pool.is_some()
    }
}

impl ElementwiseBackend for KernelBackend {
    fn name(&self) -> &'static str {
        "kernel"
    }

    fn unary(&self, func: UnaryFunc) -> Result<UnaryKernel> {
        let f = func.scalar_fn();
        let pool = self.pool.clone();
        let fast_math = self.fast_math;
        Ok(Box::new(move |x: &[f64], out: &mut [f64]| {
            let x = &x[..out.len()];
            match &pool {
                Some(pool) => pool.install(|| {
                    out.par_iter_mut()
                        .zip(x.par_iter())
                        .for_each(|(o, &v)| *o = f(v));
                }),
                None => map_unary(f, x, out, fast_math),
            }
        }))
    }

    fn binary(&self, op: BinaryOp) -> Result<BinaryKernel> {
        let pool = self.pool.clone();
        let fast_math = self.fast_math;
        Ok(Box::new(move |a: Operand<'_>, b: Operand<'_>, out: &mut [f64]| match &pool {
            Some(pool) => pool.install(|| par_binary(op, a, b, out)),
            None => seq_binary(op, a, b, out, fast_math),
        }))
    }
}

#[inline]
fn map_unary<F: Fn(f64) -> f64>(f: F, x: &[f64], out: &mut [f64], fast_math: bool) {
    if fast_math {
        let mut out_chunks = out.chunks_exact_mut(FAST_MATH_LANES);
        let mut x_chunks = x.chunks_exact(FAST_MATH_LANES);
        for (o, v) in (&mut out_chunks).zip(&mut x_chunks) {
            for lane in 0..FAST_MATH_LANES {
                o[lane] = f(v[lane]);
            }
        }
        for (o, &v) in out_chunks.into_remainder().iter_mut().zip(x_chunks.remainder()) {
            *o = f(v);
        }
    } else {
        #[allow(clippy::needless_range_loop)]
        for i in 0..out.len() {
            out[i] = f(x[i]);
        }
    }
}

fn seq_binary(op: BinaryOp, a: Operand<'_>, b: Operand<'_>, out: &mut [f64], fast_math: bool) {
    let n = out.len();
    match (a, b) {
        (Operand::Array(x), Operand::Array(y)) => {
            let (x, y) = (&x[..n], &y[..n]);
            if fast_math {
                let mut out_chunks = out.chunks_exact_mut(FAST_MATH_LANES);
                let mut x_chunks = x.chunks_exact(FAST_MATH_LANES);
                let mut y_chunks = y.chunks_exact(FAST_MATH_LANES);
                for ((o, p), q) in (&mut out_chunks).zip(&mut x_chunks).zip(&mut y_chunks) {
                    for lane in 0..FAST_MATH_LANES {
                        o[lane] = op.apply(p[lane], q[lane]);
                    }
                }
                let tail = out_chunks.into_remainder();
                for ((o, &p), &q) in tail.iter_mut().zip(x_chunks.remainder()).zip(y_chunks.remainder()) {
                    *o = op.apply(p, q);
                }
            } else {
                #[allow(clippy::needless_range_loop)]
                for i in 0..n {
                    out[i] = op.apply(x[i], y[i]);
                }
            }
        },
        (Operand::Array(x), Operand::Scalar(q)) => {
            map_unary(|p| op.apply(p, q), &x[..n], out, fast_math);
        },
        (Operand::Scalar(p), Operand::Array(y)) => {
            map_unary(|q| op.apply(p, q), &y[..n], out, fast_math);
        },
        (Operand::Scalar(p), Operand::Scalar(q)) => out.fill(op.apply(p, q)),
    }
}

fn par_binary(op: BinaryOp, a: Operand<'_>, b: Operand<'_>, out: &mut [f64]) {
    let n = out.len();
    match (a, b) {
        (Operand::Array(x), Operand::Array(y)) => out
            .par_iter_mut()
            .zip(x[..n].par_iter())
            .zip(y[..n].par_iter())
            .for_each(|((o, &p), &q)| *o = op.apply(p, q)),
        (Operand::Array(x), Operand::Scalar(q)) => out
            .par_iter_mut()
            .zip(x[..n].par_iter())
            .for_each(|(o, &p)| *o = op.apply(p, q)),
        (Operand::Scalar(p), Operand::Array(y)) => out
            .par_iter_mut()
            .zip(y[..n].par_iter())
            .for_each(|(o, &q)| *o = op.apply(p, q)),
        (Operand::Scalar(p), Operand::Scalar(q)) => {
            let v = op.apply(p, q);
            out.par_iter_mut().for_each(|o| *o = v);
        },
    }
}
