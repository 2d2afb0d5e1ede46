//! Timers used by the benchmark loops
//!
//! Two scales are needed:
//! - cycle-like units for the reported CPE (time stamp counter when the
//!   target has one, otherwise wall-clock seconds scaled by 2e9)
//! - plain seconds for calibrating the repetition count against a goal time

use std::time::Instant;

/// Scale applied to wall-clock seconds to approximate CPU cycles (2 GHz)
pub const WALL_CLOCK_CYCLES_PER_SECOND: f64 = 2.0e9;

/// A monotonic reading source
///
/// Readings are only meaningful as differences.
pub trait Clock {
    /// Current reading in clock units
    fn now(&self) -> f64;

    /// Human readable clock name for the report header
    fn name(&self) -> &'static str;
}

/// Time stamp counter (`rdtsc`)
#[derive(Debug, Clone, Copy)]
pub struct CycleCounter {
    _private: (),
}

impl CycleCounter {
    /// Returns a counter when the target exposes one
    #[must_use]
    pub fn detect() -> Option<Self> {
        if cfg!(target_arch = "x86_64") {
            Some(Self { _private: () })
        } else {
            None
        }
    }
}

impl Clock for CycleCounter {
    #[cfg(target_arch = "x86_64")]
    #[allow(unused_unsafe)]
    fn now(&self) -> f64 {
        // SAFETY: rdtsc has no preconditions on x86_64
        unsafe { core::arch::x86_64::_rdtsc() as f64 }
    }

    #[cfg(not(target_arch = "x86_64"))]
    fn now(&self) -> f64 {
        unreachable!("CycleCounter::detect returns None on this target")
    }

    fn name(&self) -> &'static str {
        "rdtsc"
    }
}

/// Wall clock in seconds since construction
#[derive(Debug, Clone, Copy)]
pub struct WallSeconds {
    origin: Instant,
}

impl WallSeconds {
    /// Start a new wall clock
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for WallSeconds {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WallSeconds {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn name(&self) -> &'static str {
        "wall clock seconds"
    }
}

/// Wall clock scaled to approximate cycles
#[derive(Debug, Clone, Copy, Default)]
pub struct ScaledWallClock {
    inner: WallSeconds,
}

impl Clock for ScaledWallClock {
    fn now(&self) -> f64 {
        self.inner.now() * WALL_CLOCK_CYCLES_PER_SECOND
    }

    fn name(&self) -> &'static str {
        "wall clock x 2e9, note: no cycle counter on this target"
    }
}

/// Clock used for the reported cycles-per-element numbers
#[derive(Debug, Clone, Copy)]
pub enum CycleClock {
    /// Hardware time stamp counter
    Tsc(CycleCounter),
    /// Scaled wall clock fallback
    Scaled(ScaledWallClock),
}

impl CycleClock {
    /// Pick the best available cycle source
    ///
    /// `force_wall` selects the scaled wall clock even when a counter exists.
    #[must_use]
    pub fn select(force_wall: bool) -> Self {
        match CycleCounter::detect() {
            Some(tsc) if !force_wall => Self::Tsc(tsc),
            _ => Self::Scaled(ScaledWallClock::default()),
        }
    }
}

impl Clock for CycleClock {
    #[inline]
    fn now(&self) -> f64 {
        match self {
            Self::Tsc(c) => c.now(),
            Self::Scaled(c) => c.now(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Tsc(c) => c.name(),
            Self::Scaled(c) => c.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wall_seconds_monotonic() {
        let clock = WallSeconds::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(a >= 0.0);
    }

    #[test]
    fn test_forced_wall_clock_is_scaled() {
        let clock = CycleClock::select(true);
        assert!(matches!(clock, CycleClock::Scaled(_)));
        assert!(clock.name().starts_with("wall clock x 2e9"));
    }

    #[test]
    fn test_scaled_clock_advances_faster_than_seconds() {
        let scaled = ScaledWallClock::default();
        let t0 = scaled.now();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let dt = scaled.now() - t0;
        // 2ms at 2e9 units per second
        assert!(dt >= 3.0e6);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn test_tsc_selected_on_x86_64() {
        let clock = CycleClock::select(false);
        assert!(matches!(clock, CycleClock::Tsc(_)));
        assert_eq!(clock.name(), "rdtsc");
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
