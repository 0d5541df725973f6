//! Monotonic clock port (§6 "Clock contract").
//!
//! - **`target_os = "espidf"`** — wraps `esp_timer_get_time()`, the ESP-IDF
//!   high-resolution monotonic timer.
//! - **`not(target_os = "espidf"))`** — uses `std::time::Instant` for
//!   host-side testing and simulation.
//!
//! Wall-clock (unix-ms) is optional and populated only once a time
//! synchroniser runs; this core never assumes it is present.

/// Monotonic millisecond clock, with an optional synchronised wall clock.
pub trait Clock {
    /// Milliseconds since boot. Never decreases.
    fn monotonic_ms(&self) -> u64;

    /// Unix-ms if a synchroniser has populated it, else `None`.
    fn wall_clock_ms(&self) -> Option<u64> {
        None
    }
}

/// Real clock backed by the platform monotonic timer.
pub struct SystemClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    #[cfg(target_os = "espidf")]
    fn monotonic_ms(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000
    }

    #[cfg(not(target_os = "espidf"))]
    fn monotonic_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    #[cfg(target_os = "espidf")]
    fn wall_clock_ms(&self) -> Option<u64> {
        use core::ptr;
        let mut tv = esp_idf_svc::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, ptr::null_mut()) } != 0 {
            return None;
        }
        const EPOCH_2020: i64 = 1_577_836_800;
        if tv.tv_sec < EPOCH_2020 {
            return None;
        }
        Some(tv.tv_sec as u64 * 1_000 + (tv.tv_usec as u64) / 1_000)
    }
}

/// Deterministic clock for host-side tests: advanced explicitly by the test.
#[cfg(test)]
pub struct FakeClock {
    now_ms: core::cell::Cell<u64>,
    wall_ms: core::cell::Cell<Option<u64>>,
}

#[cfg(test)]
impl FakeClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: core::cell::Cell::new(start_ms),
            wall_ms: core::cell::Cell::new(None),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.set(now_ms);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.set(self.now_ms.get() + delta_ms);
    }

    pub fn set_wall(&self, wall_ms: Option<u64>) {
        self.wall_ms.set(wall_ms);
    }
}

#[cfg(test)]
impl Clock for FakeClock {
    fn monotonic_ms(&self) -> u64 {
        self.now_ms.get()
    }

    fn wall_clock_ms(&self) -> Option<u64> {
        self.wall_ms.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_monotonically() {
        let clock = FakeClock::new(100);
        assert_eq!(clock.monotonic_ms(), 100);
        clock.advance(50);
        assert_eq!(clock.monotonic_ms(), 150);
    }

    #[test]
    fn wall_clock_absent_until_set() {
        let clock = FakeClock::new(0);
        assert_eq!(clock.wall_clock_ms(), None);
        clock.set_wall(Some(1_700_000_000_000));
        assert_eq!(clock.wall_clock_ms(), Some(1_700_000_000_000));
    }
}
