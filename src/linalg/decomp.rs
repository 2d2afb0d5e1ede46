//! Matrix decompositions on `nalgebra`
//!
//! Every bench seeds its input from [`MATRIX_SEED`]. Benches that consume
//! their working matrix get a fresh copy from `copy_args`, outside the timed
//! section; `eig` and `svd` work out of place.

use std::mem;

use nalgebra::{self as na, Complex, DMatrix, DVector, Dyn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

use super::{LinalgBench, MATRIX_SEED};

fn empty() -> DMatrix<f64> {
    DMatrix::zeros(0, 0)
}

fn random_dmatrix(size: usize) -> DMatrix<f64> {
    let mut rng = StdRng::seed_from_u64(MATRIX_SEED);
    DMatrix::from_fn(size, size, |_, _| {
        Distribution::<f64>::sample(&StandardNormal, &mut rng)
    })
}

/// `true` when every entry of `a` is within `tol` (scaled by the magnitude
/// of `b`) of the matching entry of `b`
fn close(a: &DMatrix<f64>, b: &DMatrix<f64>, tol: f64) -> bool {
    if a.shape() != b.shape() {
        return false;
    }
    let scale = b.amax().max(1.0);
    (a - b).amax() <= tol * scale
}

const TOLERANCE: f64 = 1e-9;

/// Input matrix plus the working copy a decomposition consumes
#[derive(Debug, Clone)]
struct Inputs {
    x: DMatrix<f64>,
    work: DMatrix<f64>,
}

impl Default for Inputs {
    fn default() -> Self {
        Self {
            x: empty(),
            work: empty(),
        }
    }
}

impl Inputs {
    fn new(x: DMatrix<f64>) -> Self {
        Self {
            work: x.clone(),
            x,
        }
    }

    fn restore(&mut self) {
        self.work.clone_from(&self.x);
    }

    fn take(&mut self) -> DMatrix<f64> {
        mem::replace(&mut self.work, empty())
    }

    fn size(&self) -> usize {
        self.x.nrows()
    }
}

// ============================================================================
// cholesky
// ============================================================================

/// Cholesky factor of the symmetric positive definite `X Xᵀ + n I`
#[derive(Debug, Default)]
pub struct Cholesky {
    args: Inputs,
    factor: Option<na::Cholesky<f64, Dyn>>,
}

impl LinalgBench for Cholesky {
    fn name(&self) -> &'static str {
        "cholesky"
    }

    fn make_args(&mut self, size: usize) {
        let x = random_dmatrix(size);
        let mut spd = &x * x.transpose();
        for i in 0..size {
            spd[(i, i)] += size as f64;
        }
        self.args = Inputs::new(spd);
        self.factor = None;
    }

    fn copy_args(&mut self) {
        self.args.restore();
    }

    fn compute(&mut self) {
        self.factor = self.args.take().cholesky();
    }

    fn test(&self) -> bool {
        let Some(factor) = &self.factor else {
            return false;
        };
        let l = factor.l();
        close(&(&l * l.transpose()), &self.args.x, TOLERANCE)
    }
}

// ============================================================================
// det
// ============================================================================

/// Determinant through a pivoted LU factorization
#[derive(Debug, Default)]
pub struct Det {
    args: Inputs,
    result: Option<f64>,
}

impl Det {
    /// Determinant from the last `compute`
    #[must_use]
    pub fn result(&self) -> Option<f64> {
        self.result
    }
}

impl LinalgBench for Det {
    fn name(&self) -> &'static str {
        "det"
    }

    fn make_args(&mut self, size: usize) {
        self.args = Inputs::new(random_dmatrix(size));
        self.result = None;
    }

    fn copy_args(&mut self) {
        self.args.restore();
    }

    fn compute(&mut self) {
        self.result = Some(self.args.take().lu().determinant());
    }

    /// `|det A|` equals the product of `|R_ii|` from a QR factorization
    fn test(&self) -> bool {
        let Some(det) = self.result else {
            return false;
        };
        let r = self.args.x.clone().qr().r();
        let expected: f64 = r.diagonal().iter().map(|v| v.abs()).product();
        (det.abs() - expected).abs() <= TOLERANCE * expected.max(1.0)
    }
}

// ============================================================================
// eig
// ============================================================================

/// Eigenvalues of a general real matrix through its real Schur form
#[derive(Debug, Default)]
pub struct Eig {
    args: Inputs,
    values: Option<DVector<Complex<f64>>>,
}

impl LinalgBench for Eig {
    fn name(&self) -> &'static str {
        "eig"
    }

    fn make_args(&mut self, size: usize) {
        self.args = Inputs::new(random_dmatrix(size));
        self.values = None;
    }

    fn copy_args(&mut self) {
        self.args.restore();
    }

    fn compute(&mut self) {
        self.values = Some(self.args.work.complex_eigenvalues());
    }

    /// Eigenvalues sum to the trace and come in conjugate pairs
    fn test(&self) -> bool {
        let Some(values) = &self.values else {
            return false;
        };
        if values.len() != self.args.size() {
            return false;
        }
        let re: f64 = values.iter().map(|v| v.re).sum();
        let im: f64 = values.iter().map(|v| v.im).sum();
        let scale = values.iter().map(|v| v.norm()).sum::<f64>().max(1.0);
        (re - self.args.x.trace()).abs() <= 1e-8 * scale && im.abs() <= 1e-8 * scale
    }
}

// ============================================================================
// inv
// ============================================================================

/// Matrix inverse
#[derive(Debug, Default)]
pub struct Inv {
    args: Inputs,
    inverse: Option<DMatrix<f64>>,
}

impl LinalgBench for Inv {
    fn name(&self) -> &'static str {
        "inv"
    }

    fn make_args(&mut self, size: usize) {
        self.args = Inputs::new(random_dmatrix(size));
        self.inverse = None;
    }

    fn copy_args(&mut self) {
        self.args.restore();
    }

    fn compute(&mut self) {
        self.inverse = self.args.take().try_inverse();
    }

    /// `A⁻¹ A = I`
    fn test(&self) -> bool {
        let Some(inverse) = &self.inverse else {
            return false;
        };
        let n = self.args.size();
        close(&(inverse * &self.args.x), &DMatrix::identity(n, n), 1e-8)
    }
}

// ============================================================================
// lu
// ============================================================================

/// Pivoted LU factorization, unpacked into the permutation and both factors
#[derive(Debug, Default)]
pub struct Lu {
    args: Inputs,
    parts: Option<(na::PermutationSequence<Dyn>, DMatrix<f64>, DMatrix<f64>)>,
}

impl LinalgBench for Lu {
    fn name(&self) -> &'static str {
        "lu"
    }

    fn make_args(&mut self, size: usize) {
        self.args = Inputs::new(random_dmatrix(size));
        self.parts = None;
    }

    fn copy_args(&mut self) {
        self.args.restore();
    }

    fn compute(&mut self) {
        self.parts = Some(self.args.take().lu().unpack());
    }

    /// `P⁻¹ L U = A`
    fn test(&self) -> bool {
        let Some((p, l, u)) = &self.parts else {
            return false;
        };
        let mut product = l * u;
        p.inv_permute_rows(&mut product);
        close(&product, &self.args.x, TOLERANCE)
    }
}

// ============================================================================
// qr
// ============================================================================

/// Householder QR factorization and its upper triangular factor
#[derive(Debug, Default)]
pub struct Qr {
    args: Inputs,
    factor: Option<na::QR<f64, Dyn, Dyn>>,
    r: Option<DMatrix<f64>>,
}

impl LinalgBench for Qr {
    fn name(&self) -> &'static str {
        "qr"
    }

    fn make_args(&mut self, size: usize) {
        self.args = Inputs::new(random_dmatrix(size));
        self.factor = None;
        self.r = None;
    }

    fn copy_args(&mut self) {
        self.args.restore();
    }

    fn compute(&mut self) {
        let factor = self.args.take().qr();
        self.r = Some(factor.r());
        self.factor = Some(factor);
    }

    /// `Q R = A`
    fn test(&self) -> bool {
        let (Some(factor), Some(r)) = (&self.factor, &self.r) else {
            return false;
        };
        close(&(factor.q() * r), &self.args.x, TOLERANCE)
    }
}

// ============================================================================
// svd
// ============================================================================

/// Full singular value decomposition
#[derive(Debug, Default)]
pub struct Svd {
    args: Inputs,
    factor: Option<na::SVD<f64, Dyn, Dyn>>,
}

impl Svd {
    /// Replace the input matrix, keeping its size
    ///
    /// Returns `false` when `x` is not square.
    pub fn set_input(&mut self, x: DMatrix<f64>) -> bool {
        if !x.is_square() {
            return false;
        }
        self.args = Inputs::new(x);
        self.factor = None;
        true
    }

    /// Singular values from the last `compute`, largest first
    #[must_use]
    pub fn singular_values(&self) -> Option<Vec<f64>> {
        let factor = self.factor.as_ref()?;
        let mut values: Vec<f64> = factor.singular_values.iter().copied().collect();
        values.sort_by(|a, b| b.total_cmp(a));
        Some(values)
    }
}

impl LinalgBench for Svd {
    fn name(&self) -> &'static str {
        "svd"
    }

    fn make_args(&mut self, size: usize) {
        self.args = Inputs::new(random_dmatrix(size));
        self.factor = None;
    }

    // Out of place: compute copies the input itself.
    fn copy_args(&mut self) {}

    fn compute(&mut self) {
        self.factor = Some(self.args.x.clone().svd(true, true));
    }

    /// `U Σ Vᵀ = A`
    fn test(&self) -> bool {
        let Some(factor) = &self.factor else {
            return false;
        };
        let (Some(u), Some(v_t)) = (&factor.u, &factor.v_t) else {
            return false;
        };
        let sigma = DMatrix::from_diagonal(&factor.singular_values);
        close(&(u * sigma * v_t), &self.args.x, TOLERANCE)
    }
}
