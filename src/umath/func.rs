//! Elementwise functions understood by the `umath` benchmark

use std::fmt;
use std::str::FromStr;

use crate::error::{BenchError, Result};

/// Binary arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

impl BinaryOp {
    /// Operator symbol
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }

    /// Apply to two scalars
    #[inline]
    #[must_use]
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Add => a + b,
            Self::Sub => a - b,
            Self::Mul => a * b,
            Self::Div => a / b,
        }
    }
}

/// Unary function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum UnaryFunc {
    Sin,
    Cos,
    Tan,
    Sinh,
    Cosh,
    Tanh,
    Sqrt,
    Log10,
    Log,
    Exp,
    Expm1,
    Arcsin,
    Erf,
    Arccos,
    Arctan,
    Arcsinh,
    Arccosh,
    Arctanh,
    Log1p,
    Exp2,
    Log2,
    Copyto,
    Invsqrt,
    Fabs,
    Floor,
    Ceil,
    Rint,
    Trunc,
}

impl UnaryFunc {
    /// Every supported unary function
    pub const ALL: [UnaryFunc; 28] = [
        Self::Sin,
        Self::Cos,
        Self::Tan,
        Self::Sinh,
        Self::Cosh,
        Self::Tanh,
        Self::Sqrt,
        Self::Log10,
        Self::Log,
        Self::Exp,
        Self::Expm1,
        Self::Arcsin,
        Self::Erf,
        Self::Arccos,
        Self::Arctan,
        Self::Arcsinh,
        Self::Arccosh,
        Self::Arctanh,
        Self::Log1p,
        Self::Exp2,
        Self::Log2,
        Self::Copyto,
        Self::Invsqrt,
        Self::Fabs,
        Self::Floor,
        Self::Ceil,
        Self::Rint,
        Self::Trunc,
    ];

    /// Benchmark name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Sinh => "sinh",
            Self::Cosh => "cosh",
            Self::Tanh => "tanh",
            Self::Sqrt => "sqrt",
            Self::Log10 => "log10",
            Self::Log => "log",
            Self::Exp => "exp",
            Self::Expm1 => "expm1",
            Self::Arcsin => "arcsin",
            Self::Erf => "erf",
            Self::Arccos => "arccos",
            Self::Arctan => "arctan",
            Self::Arcsinh => "arcsinh",
            Self::Arccosh => "arccosh",
            Self::Arctanh => "arctanh",
            Self::Log1p => "log1p",
            Self::Exp2 => "exp2",
            Self::Log2 => "log2",
            Self::Copyto => "copyto",
            Self::Invsqrt => "invsqrt",
            Self::Fabs => "fabs",
            Self::Floor => "floor",
            Self::Ceil => "ceil",
            Self::Rint => "rint",
            Self::Trunc => "trunc",
        }
    }

    /// Scalar implementation
    #[must_use]
    pub fn scalar_fn(self) -> fn(f64) -> f64 {
        match self {
            Self::Sin => f64::sin,
            Self::Cos => f64::cos,
            Self::Tan => f64::tan,
            Self::Sinh => f64::sinh,
            Self::Cosh => f64::cosh,
            Self::Tanh => f64::tanh,
            Self::Sqrt => f64::sqrt,
            Self::Log10 => f64::log10,
            Self::Log => f64::ln,
            Self::Exp => f64::exp,
            Self::Expm1 => f64::exp_m1,
            Self::Arcsin => f64::asin,
            Self::Erf => libm::erf,
            Self::Arccos => f64::acos,
            Self::Arctan => f64::atan,
            Self::Arcsinh => f64::asinh,
            Self::Arccosh => f64::acosh,
            Self::Arctanh => f64::atanh,
            Self::Log1p => f64::ln_1p,
            Self::Exp2 => f64::exp2,
            Self::Log2 => f64::log2,
            Self::Copyto => identity,
            Self::Invsqrt => invsqrt,
            Self::Fabs => f64::abs,
            Self::Floor => f64::floor,
            Self::Ceil => f64::ceil,
            Self::Rint => libm::rint,
            Self::Trunc => f64::trunc,
        }
    }

    /// Whether the input must come from the buffer with values above one
    #[must_use]
    pub fn needs_input_above_one(self) -> bool {
        matches!(self, Self::Arccosh)
    }
}

#[inline]
fn identity(x: f64) -> f64 {
    x
}

#[inline]
fn invsqrt(x: f64) -> f64 {
    1.0 / x.sqrt()
}

impl FromStr for UnaryFunc {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name() == s)
            .ok_or_else(|| BenchError::unsupported(s, "unknown unary function"))
    }
}

/// A benchmarked function: operator names of at most two characters are
/// binary, everything else is unary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Function {
    /// Binary operator
    Binary(BinaryOp),
    /// Unary function
    Unary(UnaryFunc),
}

impl FromStr for Function {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() <= 2 {
            let op = match s {
                "+" => BinaryOp::Add,
                "-" => BinaryOp::Sub,
                "*" => BinaryOp::Mul,
                "/" => BinaryOp::Div,
                _ => return Err(BenchError::unsupported(s, "unknown binary operator")),
            };
            Ok(Self::Binary(op))
        } else {
            s.parse().map(Self::Unary)
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary(op) => f.write_str(op.symbol()),
            Self::Unary(func) => f.write_str(func.name()),
        }
    }
}

/// Placement of array and scalar operands in a binary operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandLayout {
    /// `C = A op B`
    ArrayArray,
    /// `C = A op s`
    ArrayScalar,
    /// `C = s op B`
    ScalarArray,
}

impl OperandLayout {
    /// Layouts in benchmark order
    pub const ALL: [OperandLayout; 3] = [Self::ArrayArray, Self::ArrayScalar, Self::ScalarArray];

    /// Summary label, e.g. ` array+array`
    #[must_use]
    pub fn label(self, op: BinaryOp) -> String {
        let sym = op.symbol();
        match self {
            Self::ArrayArray => format!(" array{sym}array"),
            Self::ArrayScalar => format!("array{sym}scalar"),
            Self::ScalarArray => format!("scalar{sym}array"),
        }
    }

    /// Per-offset label for verbose output
    #[must_use]
    pub fn offset_label(self, op: BinaryOp, zoff: usize, xoff: usize, yoff: usize) -> String {
        let sym = op.symbol();
        match self {
            Self::ArrayArray => format!("C[{zoff}:]=A[{xoff}:]{sym}B[{yoff}:]"),
            Self::ArrayScalar => format!("C[{zoff}:]=A[{xoff}:]{sym}scalar"),
            Self::ScalarArray => format!("C[{zoff}:]=scalar{sym}A[{yoff}:]"),
        }
    }
}

/// A binary-operation operand
#[derive(Debug, Clone, Copy)]
pub enum Operand<'a> {
    /// Array window
    Array(&'a [f64]),
    /// Broadcast scalar
    Scalar(f64),
}

impl<'a> Operand<'a> {
    /// Bind the left/right operands for `layout` from the x and y windows
    ///
    /// The scalar is the first element of the window it replaces.
    #[must_use]
    pub fn pair(layout: OperandLayout, x: &'a [f64], y: &'a [f64]) -> (Self, Self) {
        match layout {
            OperandLayout::ArrayArray => (Self::Array(x), Self::Array(y)),
            OperandLayout::ArrayScalar => (Self::Array(x), Self::Scalar(y[0])),
            OperandLayout::ScalarArray => (Self::Scalar(x[0]), Self::Array(y)),
        }
    }
}
