//! Port traits — the hexagonal boundary between the coordination core and
//! the platform (§6 "External Interfaces").
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ component (domain)
//! ```
//!
//! Driven adapters (NVS, the sleep/wake platform calls, GPIO) implement
//! these traits; components consume them via generics so the core never
//! touches hardware registers directly.
//!
//! # Security notes
//!
//! - **StoragePort** implementations SHOULD encrypt sensitive keys (broker
//!   credentials, WiFi password) and MUST make writes atomic — a crash
//!   mid-write must leave the prior value or nothing, never a torn blob.

// ───────────────────────────────────────────────────────────────
// Storage port (consumed by ConfigStore)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for a single configuration blob.
///
/// No transactions are required (§6): a crash during write invalidates the
/// blob and `ConfigStore` falls back to defaults on the next load.
pub trait StoragePort {
    /// Read a value. Returns the number of bytes written into `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. `Ok(())` even if the key did not exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    NotFound,
    Full,
    IoError,
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Platform sleep port (consumed by PowerManager)
// ───────────────────────────────────────────────────────────────

/// Reason the platform reports for the most recent wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeupReason {
    PowerOn,
    Timer,
    /// External GPIO wake (the NFC reader's IRQ line held low).
    External,
    WatchdogReset,
    Unknown,
}

/// Sleep entry points and wake-cause query consumed by `PowerManager`.
///
/// `enter_deep_sleep` does not return on real hardware: the call resets the
/// device and execution resumes at boot with a new `wakeup_cause()`. The
/// trait still declares a normal return so a host-side fake can observe the
/// call was made in tests; a real implementation simply never gives control
/// back to the caller.
pub trait PlatformSleepPort {
    fn enter_light_sleep(&mut self, duration_ms: u32);

    fn enter_deep_sleep(&mut self, duration_ms: u32);

    fn wakeup_cause(&self) -> WakeupReason;

    /// Arm a GPIO as a deep-sleep wakeup source, active-low.
    fn configure_wake_gpio(&mut self, pin: i32);

    /// Arm a timer-based deep-sleep wakeup source.
    fn configure_wake_timer(&mut self, duration_ms: u32);
}

// ───────────────────────────────────────────────────────────────
// GPIO port (consumed by NfcReader)
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Digital I/O consumed by the NFC reader driver for its IRQ and reset
/// lines.
pub trait GpioPort {
    fn configure_input(&mut self, pin: i32, pull_up: bool);

    fn read(&self, pin: i32) -> Level;

    fn configure_reset_line(&mut self, pin: i32);

    /// Pulse the reset line low then high, per the given hold times.
    fn pulse_reset(&mut self, pin: i32, low_ms: u32, high_ms: u32);
}

// ───────────────────────────────────────────────────────────────
// RTC memory port (consumed by PowerManager)
// ───────────────────────────────────────────────────────────────

/// The small memory region that survives deep sleep (§4.6 "Deep-sleep
/// persistence", §6 "Persisted RTC layout"). Written only by `PowerManager`
/// just before sleep entry, read only at boot (§5 "Shared-resource
/// policy").
pub trait RtcMemoryPort {
    fn read_rtc(&self) -> [u8; 24];
    fn write_rtc(&mut self, data: &[u8; 24]);
}
