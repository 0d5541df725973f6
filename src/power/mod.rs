//! PowerManager — sleep policy, wake locks, wakeup-source selection, and
//! deep-sleep RTC persistence (§4.6).
//!
//! Grounded on `original_source/include/services/PowerService.hpp` and
//! `.cpp` for the RTC memory layout, the wake-lock table, the activity
//! mask, and wakeup-reason detection, reimplemented as a single
//! `tick()`-driven state machine rather than the original's dedicated
//! FreeRTOS task — this core has no task of its own per component (§4.2,
//! §5 "single-threaded cooperative"). Wake locks use the same
//! shared-interior-mutability idiom as `bus::Subscription` because a
//! scoped guard must be releasable by a caller that does not hold `&mut
//! PowerManager` for its whole lifetime.

use core::cell::RefCell;
use std::rc::Rc;

use heapless::{String, Vec};

use crate::bus::EventBus;
use crate::config::{PowerConfig, SleepType};
use crate::event::{Event, EventKind, EventPayload, PowerState};
use crate::ports::{PlatformSleepPort, RtcMemoryPort, WakeupReason};

const MAX_WAKE_LOCKS: usize = 8;

/// Bits of `PowerConfig::activity_mask` that reset the idle timer (§4.6
/// "Idle detection").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ActivityType {
    CardScanned = 1 << 0,
    MqttMessage = 1 << 1,
    WifiConnected = 1 << 2,
    MqttConnected = 1 << 3,
    NfcReady = 1 << 4,
}

struct WakeLockEntry {
    id: u32,
    name: String<16>,
    acquired_at_ms: u64,
}

struct WakeLockTable {
    locks: Vec<WakeLockEntry, MAX_WAKE_LOCKS>,
    next_id: u32,
}

/// Shared handle onto the wake-lock table. Cloning is cheap (an `Rc`
/// bump) — components other than `PowerManager` itself are handed a
/// clone so they can acquire/release locks without needing mutable
/// access to the manager (§4.6 "Wake locks").
#[derive(Clone)]
pub struct WakeLockRegistry(Rc<RefCell<WakeLockTable>>);

impl WakeLockRegistry {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(WakeLockTable {
            locks: Vec::new(),
            next_id: 1,
        })))
    }

    /// Acquire a named wake lock. While the returned guard is alive, sleep
    /// is forbidden (§3 "WakeLock").
    pub fn acquire(&self, name: &str, now_ms: u64) -> WakeLockGuard {
        let mut table = self.0.borrow_mut();
        let id = table.next_id;
        table.next_id += 1;
        let _ = table.locks.push(WakeLockEntry {
            id,
            name: String::try_from(name).unwrap_or_default(),
            acquired_at_ms: now_ms,
        });
        WakeLockGuard {
            registry: self.clone(),
            id,
        }
    }

    fn release(&self, id: u32) {
        self.0.borrow_mut().locks.retain(|l| l.id != id);
    }

    pub fn has_active(&self) -> bool {
        !self.0.borrow().locks.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.0.borrow().locks.len()
    }
}

impl Default for WakeLockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped wake-lock handle (§3 "guaranteed release on all exit paths").
/// Dropping it — end of scope, early return, or unwind — releases the
/// lock; there is no other way to release one.
pub struct WakeLockGuard {
    registry: WakeLockRegistry,
    id: u32,
}

impl Drop for WakeLockGuard {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

// ───────────────────────────────────────────────────────────────
// RTC-retained region (§4.6 "Deep-sleep persistence", §6 "Persisted RTC
// layout")
// ───────────────────────────────────────────────────────────────

pub const RTC_MAGIC: u32 = 0x504F_5752;
pub const RTC_REGION_LEN: usize = 24;

fn power_state_code(state: PowerState) -> u8 {
    match state {
        PowerState::Active => 0,
        PowerState::Idle => 1,
        PowerState::LightSleep => 2,
        PowerState::ModemSleep => 3,
        PowerState::DeepSleep => 4,
        PowerState::Hibernating => 5,
        PowerState::WakingUp => 6,
    }
}

fn power_state_from_code(code: u8) -> PowerState {
    match code {
        1 => PowerState::Idle,
        2 => PowerState::LightSleep,
        3 => PowerState::ModemSleep,
        4 => PowerState::DeepSleep,
        5 => PowerState::Hibernating,
        6 => PowerState::WakingUp,
        _ => PowerState::Active,
    }
}

fn crc32(data: &[u8]) -> u32 {
    const CRC: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);
    CRC.checksum(data)
}

/// In-memory view of the persisted RTC region (§6 layout, offsets 0..24).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcRegion {
    pub wakeup_count: u32,
    pub total_sleep_ms: u32,
    pub last_requested_state: PowerState,
    pub pending_nfc_wakeup: bool,
    pub remaining_sleep_ms: u32,
}

impl RtcRegion {
    pub fn encode(&self) -> [u8; RTC_REGION_LEN] {
        let mut buf = [0u8; RTC_REGION_LEN];
        buf[0..4].copy_from_slice(&RTC_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.wakeup_count.to_le_bytes());
        buf[8..12].copy_from_slice(&self.total_sleep_ms.to_le_bytes());
        buf[12] = power_state_code(self.last_requested_state);
        buf[13] = u8::from(self.pending_nfc_wakeup);
        // 14..16 reserved, left zero.
        buf[16..20].copy_from_slice(&self.remaining_sleep_ms.to_le_bytes());
        let crc = crc32(&buf[0..20]);
        buf[20..24].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Validate magic + CRC32 (IEEE 802.3, over bytes 0..20). `None` means
    /// "treat as first boot" (§4.6, §7 `Corruption`).
    pub fn decode(buf: &[u8; RTC_REGION_LEN]) -> Option<Self> {
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != RTC_MAGIC {
            return None;
        }
        let crc_stored = u32::from_le_bytes(buf[20..24].try_into().unwrap());
        if crc32(&buf[0..20]) != crc_stored {
            return None;
        }
        Some(Self {
            wakeup_count: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            total_sleep_ms: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            last_requested_state: power_state_from_code(buf[12]),
            pending_nfc_wakeup: buf[13] != 0,
            remaining_sleep_ms: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
        })
    }
}

/// A single deep-sleep call is chunked to this many milliseconds; chains
/// that need to sleep longer stash the remainder in `remaining_sleep_ms`
/// and resume it across the intervening reboot (§4.6, matching the ESP32
/// deep-sleep timer's practical register limit).
const MAX_DEEP_SLEEP_CHUNK_MS: u32 = 3_600_000;

// ───────────────────────────────────────────────────────────────
// PowerManager
// ───────────────────────────────────────────────────────────────

/// Sleep policy, wake locks, and wakeup-source state machine (§4.6). Only
/// `Active` and `Idle` are ever observed between ticks — the sleep states
/// are entered and (for light/modem) exited within a single call to
/// [`PowerManager::tick`].
pub struct PowerManager {
    cfg: PowerConfig,
    wake_locks: WakeLockRegistry,
    state: PowerState,
    last_activity_ms: u64,
    wakeup_reason: WakeupReason,
    wakeup_count: u32,
    total_sleep_ms: u32,
    pending_chained_sleep_ms: u32,
    sleep_cancelled_count: u32,
}

impl PowerManager {
    pub fn new(cfg: PowerConfig) -> Self {
        Self {
            cfg,
            wake_locks: WakeLockRegistry::new(),
            state: PowerState::Active,
            last_activity_ms: 0,
            wakeup_reason: WakeupReason::Unknown,
            wakeup_count: 0,
            total_sleep_ms: 0,
            pending_chained_sleep_ms: 0,
            sleep_cancelled_count: 0,
        }
    }

    pub fn apply_config(&mut self, cfg: PowerConfig) {
        self.cfg = cfg;
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn wakeup_reason(&self) -> WakeupReason {
        self.wakeup_reason
    }

    pub fn wakeup_count(&self) -> u32 {
        self.wakeup_count
    }

    pub fn sleep_cancelled_count(&self) -> u32 {
        self.sleep_cancelled_count
    }

    /// Clone of the wake-lock registry, handed to other components so
    /// they can hold sleep-forbidding locks without touching
    /// `PowerManager` directly (§9 "no global mutable state" — every
    /// cross-component dependency is an explicit shared handle or a
    /// published event, never a raw pointer back to this service).
    pub fn wake_locks(&self) -> WakeLockRegistry {
        self.wake_locks.clone()
    }

    pub fn acquire_wake_lock(&self, name: &str, now_ms: u64) -> WakeLockGuard {
        self.wake_locks.acquire(name, now_ms)
    }

    pub fn has_active_wake_locks(&self) -> bool {
        self.wake_locks.has_active()
    }

    /// Reset the idle timer if `kind` is enabled in `activity_mask`
    /// (§4.6). Releasing a wake lock does **not** go through this path —
    /// only real activity events do (see Scenario E).
    pub fn record_activity(&mut self, kind: ActivityType, now_ms: u64) {
        if self.cfg.activity_mask & (kind as u8) != 0 {
            self.last_activity_ms = now_ms;
            self.state = PowerState::Active;
        }
    }

    /// Read wake cause and the RTC region at boot, publish `WakeupOccurred`,
    /// and — if waking on the NFC IRQ with a pending flag set — return a
    /// wake lock the caller should hold for a short "stay awake to read
    /// the card" window (§4.6 "Wakeup reason detection").
    pub fn on_boot(
        &mut self,
        platform: &dyn PlatformSleepPort,
        rtc: &dyn RtcMemoryPort,
        bus: &EventBus,
        now_ms: u64,
    ) -> Option<WakeLockGuard> {
        self.wakeup_reason = platform.wakeup_cause();

        let region = RtcRegion::decode(&rtc.read_rtc());
        let mut nfc_guard = None;
        match region {
            Some(r) => {
                self.wakeup_count = r.wakeup_count;
                self.total_sleep_ms = r.total_sleep_ms;
                self.pending_chained_sleep_ms =
                    if self.wakeup_reason == WakeupReason::Timer && r.remaining_sleep_ms > 0 {
                        r.remaining_sleep_ms
                    } else {
                        0
                    };
                if self.wakeup_reason == WakeupReason::External && r.pending_nfc_wakeup {
                    nfc_guard = Some(self.wake_locks.acquire("nfc-wake", now_ms));
                }
            }
            None => {
                // Absent or corrupted (§7 `Corruption`): treat as first
                // boot. `pending_chained_sleep_ms` already defaults to 0.
            }
        }

        self.wakeup_count += 1;
        self.state = PowerState::Active;
        self.last_activity_ms = now_ms;
        bus.publish(Event::new(
            EventKind::WakeupOccurred,
            now_ms,
            EventPayload::Wakeup(self.wakeup_reason),
        ));
        nfc_guard
    }

    fn transition(&mut self, bus: &EventBus, now_ms: u64, next: PowerState) {
        if self.state == next {
            return;
        }
        let previous = self.state;
        self.state = next;
        bus.publish(Event::new(
            EventKind::PowerStateChange,
            now_ms,
            EventPayload::Power {
                target: next,
                previous,
            },
        ));
    }

    /// Select sleep depth from the estimated idle duration when smart
    /// sleep is enabled, else the statically configured type (§4.6 "Smart
    /// sleep depth selection").
    fn select_sleep_depth(&self) -> PowerState {
        if !self.cfg.smart_sleep_enabled {
            return match self.cfg.sleep_type {
                SleepType::LightSleep => PowerState::LightSleep,
                SleepType::ModemSleep => PowerState::ModemSleep,
                SleepType::DeepSleep => PowerState::DeepSleep,
            };
        }
        let idle_estimate = self.cfg.wake_timer_interval_ms;
        if idle_estimate < self.cfg.short_threshold_ms {
            PowerState::LightSleep
        } else if idle_estimate < self.cfg.medium_threshold_ms {
            PowerState::ModemSleep
        } else {
            PowerState::DeepSleep
        }
    }

    fn duration_for(&self, depth: PowerState) -> u32 {
        if depth == PowerState::DeepSleep && self.pending_chained_sleep_ms > 0 {
            return self.pending_chained_sleep_ms;
        }
        self.cfg.wake_timer_interval_ms
    }

    /// `canSleep()`: no wake locks, sleep enabled (§4.6 "Sleep sequence"
    /// step 1 — the idle-timeout portion of the check is already implied
    /// by being in `Idle`).
    fn can_sleep(&self) -> bool {
        self.cfg.sleep_enabled && !self.wake_locks.has_active()
    }

    /// One scheduler tick: advances `Active -> Idle` on timeout, then
    /// attempts the sleep sequence from `Idle` (§4.6).
    pub fn tick(
        &mut self,
        bus: &EventBus,
        platform: &mut dyn PlatformSleepPort,
        rtc: &mut dyn RtcMemoryPort,
        now_ms: u64,
    ) {
        if !self.cfg.sleep_enabled {
            return;
        }
        match self.state {
            PowerState::Active => {
                if now_ms.saturating_sub(self.last_activity_ms) >= u64::from(self.cfg.idle_timeout_ms) {
                    self.transition(bus, now_ms, PowerState::Idle);
                }
            }
            PowerState::Idle => {
                if !self.can_sleep() {
                    // Wake lock held at the decision point: cancelled and
                    // counted, no SleepRequested published (§4.6 failure
                    // semantics, Scenario E).
                    self.sleep_cancelled_count += 1;
                    return;
                }
                self.enter_sleep(bus, platform, rtc, now_ms);
            }
            _ => {}
        }
    }

    fn enter_sleep(
        &mut self,
        bus: &EventBus,
        platform: &mut dyn PlatformSleepPort,
        rtc: &mut dyn RtcMemoryPort,
        now_ms: u64,
    ) {
        let depth = self.select_sleep_depth();
        bus.publish(Event::simple(EventKind::SleepRequested, now_ms));
        self.transition(bus, now_ms, depth);

        let requested = self.duration_for(depth);
        let (this_chunk, remaining) = if depth == PowerState::DeepSleep && requested > MAX_DEEP_SLEEP_CHUNK_MS {
            (MAX_DEEP_SLEEP_CHUNK_MS, requested - MAX_DEEP_SLEEP_CHUNK_MS)
        } else {
            (requested, 0)
        };

        let region = RtcRegion {
            wakeup_count: self.wakeup_count,
            total_sleep_ms: self.total_sleep_ms.saturating_add(this_chunk),
            last_requested_state: depth,
            pending_nfc_wakeup: self.cfg.nfc_wake_pin >= 0,
            remaining_sleep_ms: remaining,
        };
        rtc.write_rtc(&region.encode());
        self.total_sleep_ms = region.total_sleep_ms;
        self.pending_chained_sleep_ms = 0;

        match depth {
            PowerState::DeepSleep => {
                // Real hardware never returns from this call — execution
                // resumes at `on_boot` after the device resets. The host
                // fake returns normally so the call itself is observable.
                platform.enter_deep_sleep(this_chunk);
            }
            _ => platform.enter_light_sleep(this_chunk),
        }

        let reason = platform.wakeup_cause();
        self.wakeup_reason = reason;
        bus.publish(Event::new(
            EventKind::WakeupOccurred,
            now_ms,
            EventPayload::Wakeup(reason),
        ));
        self.last_activity_ms = now_ms;
        self.transition(bus, now_ms, PowerState::Active);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    fn cfg() -> PowerConfig {
        PowerConfig {
            sleep_enabled: true,
            sleep_type: SleepType::ModemSleep,
            idle_timeout_ms: 1_000,
            activity_mask: 0b1_1111,
            smart_sleep_enabled: false,
            short_threshold_ms: 2_000,
            medium_threshold_ms: 30_000,
            wake_timer_interval_ms: 5_000,
            nfc_wake_pin: -1,
            cpu_freq_mhz: 80,
        }
    }

    struct FakeSleep {
        cause: WakeupReason,
        light_calls: u32,
        deep_calls: u32,
    }
    impl PlatformSleepPort for FakeSleep {
        fn enter_light_sleep(&mut self, _duration_ms: u32) {
            self.light_calls += 1;
        }
        fn enter_deep_sleep(&mut self, _duration_ms: u32) {
            self.deep_calls += 1;
        }
        fn wakeup_cause(&self) -> WakeupReason {
            self.cause
        }
        fn configure_wake_gpio(&mut self, _pin: i32) {}
        fn configure_wake_timer(&mut self, _duration_ms: u32) {}
    }

    #[derive(Default)]
    struct FakeRtc {
        data: StdRefCell<[u8; RTC_REGION_LEN]>,
    }
    impl RtcMemoryPort for FakeRtc {
        fn read_rtc(&self) -> [u8; RTC_REGION_LEN] {
            *self.data.borrow()
        }
        fn write_rtc(&mut self, data: &[u8; RTC_REGION_LEN]) {
            *self.data.borrow_mut() = *data;
        }
    }

    #[test]
    fn rtc_region_round_trips_through_encode_decode() {
        let region = RtcRegion {
            wakeup_count: 7,
            total_sleep_ms: 12_345,
            last_requested_state: PowerState::DeepSleep,
            pending_nfc_wakeup: true,
            remaining_sleep_ms: 500,
        };
        let buf = region.encode();
        assert_eq!(RtcRegion::decode(&buf), Some(region));
    }

    #[test]
    fn corrupted_rtc_region_fails_validation() {
        let mut buf = RtcRegion {
            wakeup_count: 1,
            total_sleep_ms: 0,
            last_requested_state: PowerState::Active,
            pending_nfc_wakeup: false,
            remaining_sleep_ms: 0,
        }
        .encode();
        buf[5] ^= 0xFF; // corrupt a byte inside the CRC-covered range
        assert_eq!(RtcRegion::decode(&buf), None);
    }

    #[test]
    fn absent_rtc_region_decodes_to_none() {
        let buf = [0u8; RTC_REGION_LEN];
        assert_eq!(RtcRegion::decode(&buf), None);
    }

    #[test]
    fn idle_timeout_then_next_tick_enters_and_exits_sleep() {
        let bus = EventBus::new();
        let mut pm = PowerManager::new(cfg());
        let mut sleep = FakeSleep {
            cause: WakeupReason::Unknown,
            light_calls: 0,
            deep_calls: 0,
        };
        let mut rtc = FakeRtc::default();
        pm.tick(&bus, &mut sleep, &mut rtc, 500);
        assert_eq!(pm.state(), PowerState::Active);

        pm.tick(&bus, &mut sleep, &mut rtc, 1_000); // Active -> Idle
        assert_eq!(pm.state(), PowerState::Idle);
        assert_eq!(sleep.light_calls, 0);

        pm.tick(&bus, &mut sleep, &mut rtc, 1_001); // Idle -> sleep -> Active
        assert_eq!(pm.state(), PowerState::Active);
        assert_eq!(sleep.light_calls, 1);
    }

    #[test]
    fn wake_lock_blocks_sleep_and_is_counted() {
        let bus = EventBus::new();
        let mut pm = PowerManager::new(cfg());
        let mut sleep = FakeSleep {
            cause: WakeupReason::Unknown,
            light_calls: 0,
            deep_calls: 0,
        };
        let mut rtc = FakeRtc::default();

        let guard = pm.acquire_wake_lock("ota", 500);
        pm.tick(&bus, &mut sleep, &mut rtc, 1_000); // Active -> Idle
        pm.tick(&bus, &mut sleep, &mut rtc, 1_001); // Idle, but locked
        assert_eq!(pm.sleep_cancelled_count(), 1);
        assert_eq!(bus.pending(EventKind::SleepRequested), 0);
        assert_eq!(sleep.light_calls, 0);

        drop(guard);
        // Releasing the lock does not reset idle (§9 Open Question
        // decision) — the manager is already idle, so the very next tick
        // proceeds to sleep.
        pm.tick(&bus, &mut sleep, &mut rtc, 1_002);
        assert_eq!(sleep.light_calls, 1);
    }

    #[test]
    fn deep_sleep_persists_rtc_region_before_sleeping() {
        let bus = EventBus::new();
        let mut config = cfg();
        config.sleep_type = SleepType::DeepSleep;
        config.idle_timeout_ms = 100;
        let mut pm = PowerManager::new(config);
        let mut sleep = FakeSleep {
            cause: WakeupReason::Timer,
            light_calls: 0,
            deep_calls: 0,
        };
        let mut rtc = FakeRtc::default();

        pm.tick(&bus, &mut sleep, &mut rtc, 200); // Active -> Idle -> DeepSleep -> Active
        assert_eq!(sleep.deep_calls, 1);
        let region = RtcRegion::decode(&rtc.read_rtc()).expect("valid region");
        assert_eq!(region.last_requested_state, PowerState::DeepSleep);
        assert_eq!(pm.wakeup_reason(), WakeupReason::Timer);
    }

    #[test]
    fn on_boot_with_pending_nfc_wakeup_acquires_a_stay_awake_lock() {
        let bus = EventBus::new();
        let mut pm = PowerManager::new(cfg());
        let sleep = FakeSleep {
            cause: WakeupReason::External,
            light_calls: 0,
            deep_calls: 0,
        };
        let region = RtcRegion {
            wakeup_count: 3,
            total_sleep_ms: 1_000,
            last_requested_state: PowerState::DeepSleep,
            pending_nfc_wakeup: true,
            remaining_sleep_ms: 0,
        };
        let rtc = FakeRtc {
            data: StdRefCell::new(region.encode()),
        };

        let guard = pm.on_boot(&sleep, &rtc, &bus, 0);
        assert!(guard.is_some());
        assert!(pm.has_active_wake_locks());
        assert_eq!(bus.pending(EventKind::WakeupOccurred), 1);
        assert_eq!(pm.wakeup_count(), 4);

        drop(guard);
        assert!(!pm.has_active_wake_locks());
    }

    #[test]
    fn corrupted_rtc_region_at_boot_is_treated_as_first_boot() {
        let bus = EventBus::new();
        let mut pm = PowerManager::new(cfg());
        let sleep = FakeSleep {
            cause: WakeupReason::PowerOn,
            light_calls: 0,
            deep_calls: 0,
        };
        let rtc = FakeRtc::default(); // all zero: magic mismatch

        let guard = pm.on_boot(&sleep, &rtc, &bus, 0);
        assert!(guard.is_none());
        assert_eq!(pm.wakeup_count(), 1);
    }

    #[test]
    fn record_activity_ignored_when_mask_bit_is_unset() {
        let mut config = cfg();
        config.activity_mask = 0; // nothing resets idle
        let mut pm = PowerManager::new(config);
        pm.record_activity(ActivityType::CardScanned, 999);
        assert_eq!(pm.last_activity_ms, 0);
    }
}
