// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One-shot TSC frequency calibration, cached on the [`crate::Nexus`] at
//! construction time and never re-measured.
//!
//! The production target reads `rdtsc` directly and calibrates against a
//! known-good clock; this core measures the monotonic clock's own rate
//! instead of reaching for raw TSC intrinsics, which would tie the crate to
//! x86 and to `unsafe` asm blocks the rest of the core has no other reason
//! to carry. The numeric result plays the same role: a cached cycles-per-
//! second figure callers can use to convert duration measurements without
//! re-touching the clock.

use std::time::{Duration, Instant};

/// Calibration window. Long enough that OS scheduling jitter on a loaded
/// CI box doesn't meaningfully skew the measured rate, short enough that
/// Nexus construction doesn't stall for a noticeable amount of wall time.
const CALIBRATION_WINDOW: Duration = Duration::from_millis(10);

/// A cached, one-shot clock-rate measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TscInfo {
    ticks_per_sec: f64,
}

impl TscInfo {
    /// Measure the clock rate once. Busy-waits for roughly
    /// [`CALIBRATION_WINDOW`].
    #[must_use]
    pub fn calibrate() -> Self {
        let start = Instant::now();
        let mut ticks: u64 = 0;
        while start.elapsed() < CALIBRATION_WINDOW {
            ticks += 1;
        }
        let elapsed = start.elapsed().as_secs_f64();
        let ticks_per_sec = if elapsed > 0.0 {
            ticks as f64 / elapsed
        } else {
            1.0
        };
        Self { ticks_per_sec }
    }

    /// The measured rate, in ticks (loop iterations) per second.
    #[must_use]
    pub fn ticks_per_sec(&self) -> f64 {
        self.ticks_per_sec
    }

    /// Convert a tick count to a [`Duration`] using the cached rate.
    #[must_use]
    pub fn ticks_to_duration(&self, ticks: u64) -> Duration {
        Duration::from_secs_f64(ticks as f64 / self.ticks_per_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_yields_positive_rate() {
        let info = TscInfo::calibrate();
        assert!(info.ticks_per_sec() > 0.0);
    }

    #[test]
    fn ticks_to_duration_round_trips_roughly() {
        let info = TscInfo::calibrate();
        let one_second_ticks = info.ticks_per_sec() as u64;
        let d = info.ticks_to_duration(one_second_ticks);
        assert!((d.as_secs_f64() - 1.0).abs() < 0.25);
    }
}
