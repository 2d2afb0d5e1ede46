//! Repetition-count calibration and timed runs
//!
//! A kernel is anything callable as `FnMut()`; operand binding happens in the
//! closure so the timed loop carries no branches or argument plumbing.

use std::hint::black_box;

use crate::clock::Clock;

/// Upper bound on doubling steps during calibration
pub const MAX_DOUBLINGS: usize = 1000;

/// Internal count used to measure the bare loop overhead
pub const OVERHEAD_INTERNAL_COUNT: u64 = 100_000;

/// Outcome of the doubling search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Calls per timed interval
    pub internal_count: u64,
    /// Verified duration of one interval, in calibration clock units
    pub elapsed: f64,
}

/// Time `external_count` intervals of `internal_count` calls
///
/// Returns the minimum interval divided by `internal_count`, minus the
/// per-call `overhead`.
pub fn run_bench<C, F>(
    clock: &C,
    kernel: &mut F,
    internal_count: u64,
    external_count: usize,
    overhead: f64,
) -> f64
where
    C: Clock + ?Sized,
    F: FnMut(),
{
    let mut best = f64::INFINITY;
    for _ in 0..external_count.max(1) {
        let t0 = clock.now();
        for _ in 0..internal_count {
            kernel();
        }
        let t1 = clock.now();
        best = best.min(t1 - t0);
    }
    best / internal_count.max(1) as f64 - overhead
}

/// [`run_bench`] spread over the `n` elements each call processes
pub fn cycles_per_element<C, F>(
    clock: &C,
    kernel: &mut F,
    internal_count: u64,
    external_count: usize,
    overhead: f64,
    n: usize,
) -> f64
where
    C: Clock + ?Sized,
    F: FnMut(),
{
    run_bench(clock, kernel, internal_count, external_count, overhead) / n.max(1) as f64
}

/// Per-call cost of the timing loop itself with an empty kernel
pub fn loop_overhead<C: Clock + ?Sized>(clock: &C, external_count: usize) -> f64 {
    let mut empty = || {
        black_box(());
    };
    run_bench(clock, &mut empty, OVERHEAD_INTERNAL_COUNT, external_count, 0.0)
}

/// Doubling search for the count whose interval reaches `goal`
///
/// `goal` is in `clock` units. A candidate count is accepted only when a
/// second measurement over `repeats` intervals also reaches the goal.
pub fn calibrate<C, F>(clock: &C, kernel: &mut F, goal: f64, repeats: usize) -> Calibration
where
    C: Clock + ?Sized,
    F: FnMut(),
{
    // warm-up
    kernel();

    let mut internal_count: u64 = 1;
    let mut elapsed = 0.0;
    for step in 1..MAX_DOUBLINGS {
        if step > 1 {
            internal_count = internal_count.saturating_mul(2);
        }
        let timing = run_bench(clock, kernel, internal_count, 1, 0.0) * internal_count as f64;
        if timing >= goal {
            elapsed = run_bench(clock, kernel, internal_count, repeats, 0.0) * internal_count as f64;
            if elapsed >= goal {
                break;
            }
        }
    }

    Calibration {
        internal_count,
        elapsed,
    }
}
