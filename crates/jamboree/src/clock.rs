//! Shared audio clock abstraction
//!
//! All scheduling decisions (pre-roll, buffer chaining, underrun detection,
//! phrase progress) are made against a single monotonic clock measured in
//! seconds. Production playback runs on `WallClock`; tests drive the
//! scheduler deterministically with `ManualClock`.

use std::time::Instant;

use portable_atomic::AtomicF64;
use std::sync::atomic::Ordering;

/// Monotonic time source for the playback pipeline
///
/// `now()` returns seconds since the clock's origin. Implementations must be
/// monotonic: a later call never returns a smaller value.
pub trait AudioClock: Send + Sync {
    /// Current clock reading in seconds
    fn now(&self) -> f64;
}

/// Wall-time clock anchored at construction
///
/// Uses `std::time::Instant` for monotonic guarantees, same as the rest of
/// the timing path. The origin is the moment the player was created, so
/// readings are small positive numbers rather than epoch offsets.
#[derive(Debug)]
pub struct WallClock {
    origin: Instant,
}

impl WallClock {
    /// Create a clock anchored at the current instant
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for WallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioClock for WallClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock for testing
///
/// Holds the current reading in an atomic so shared references can advance
/// it from test code while the scheduler reads it. Never moves on its own.
#[derive(Debug)]
pub struct ManualClock {
    seconds: AtomicF64,
}

impl ManualClock {
    /// Create a manual clock at the given reading
    pub fn new(seconds: f64) -> Self {
        Self {
            seconds: AtomicF64::new(seconds),
        }
    }

    /// Jump to an absolute reading
    pub fn set(&self, seconds: f64) {
        self.seconds.store(seconds, Ordering::Relaxed);
    }

    /// Advance the reading by a delta in seconds
    pub fn advance(&self, delta: f64) {
        self.seconds.fetch_add(delta, Ordering::Relaxed);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl AudioClock for ManualClock {
    fn now(&self) -> f64 {
        self.seconds.load(Ordering::Relaxed)
    }
}
