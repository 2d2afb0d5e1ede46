//! # numbench
//!
//! Throughput benchmarks for elementary numeric operations across
//! interchangeable Rust backends, plus a provisioner for the reference
//! Python environments the same measurements are compared against.
//!
//! ## Tools
//!
//! - **umath**: cycles per element of arithmetic and transcendental
//!   functions, swept over array sizes and cache-line offsets
//! - **rng**: sampling throughput of seven distributions over several bit
//!   generators
//! - **linalg**: dense matrix product and decomposition timing
//! - **provision**: idempotent install of a conda distribution and named
//!   environments
//!
//! ## Example
//!
//! ```rust,no_run
//! use numbench::umath::{self, UmathConfig};
//!
//! let config = UmathConfig::new()
//!     .with_sizes(vec![1000])
//!     .with_funcs(["sin", "+"])
//!     .with_impls(["std", "kernel"]);
//! let report = umath::run(config, Vec::new()).unwrap();
//! print!("{}", String::from_utf8_lossy(&report));
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (MUST come after deny/warn to override them)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_wrap)] // u64 -> i64 sample conversions stay in range
#![allow(clippy::cast_precision_loss)] // counts -> f64 for per-element costs
#![allow(clippy::cast_possible_truncation)] // Poisson draws -> i64
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)] // Not all methods need #[must_use]
#![allow(clippy::doc_markdown)] // Allow technical terms without backticks
#![allow(clippy::missing_panics_doc)] // Allow missing Panics doc sections
#![allow(clippy::float_cmp)] // Allow float comparisons in tests
#![allow(clippy::manual_range_contains)] // Allow manual range checks

/// Cycle and wall clocks used by the timing loops
pub mod clock;
/// Command line parsing and dispatch
pub mod cli;
pub mod error;
/// Dense linear algebra timing
pub mod linalg;
/// Conda distribution and environment provisioning
pub mod provision;
/// Random number generation throughput
pub mod rng;
/// Elementwise math throughput across backends
///
/// - Doubling search for the repetition count against a goal time
/// - Cache-line alignment control of operand buffers
/// - Four backends: iterator loops, `ndarray`, compiled expressions, rayon kernels
pub mod umath;

// Re-exports for convenience
pub use error::{BenchError, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with("0."));
        assert!(VERSION.contains('.'));
    }
}
