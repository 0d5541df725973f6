//! System configuration (§6 "Configuration surface").
//!
//! A single nested document covering every tunable the core's components
//! read. Expanded from the teacher's flat `SystemConfig`+`Default` into the
//! nested sections the spec names, validated the way the teacher's
//! `adapters/nvs.rs::validate_config` does: reject out-of-range fields with
//! a typed, named error rather than silently clamping them.

use heapless::String as HString;
use serde::{Deserialize, Serialize};

use crate::bus::EventBus;
use crate::event::{Event, EventKind, EventPayload};
use crate::ports::{StorageError, StoragePort};

pub const CONFIG_NAMESPACE: &str = "attn";
pub const CONFIG_KEY: &str = "config";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WifiConfig {
    pub ssid: HString<32>,
    pub password: HString<64>,
    pub connect_timeout_ms: u32,
    pub max_retries: u8,
}

impl Default for WifiConfig {
    fn default() -> Self {
        Self {
            ssid: HString::new(),
            password: HString::new(),
            connect_timeout_ms: 15_000,
            max_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfflineOverflowPolicy {
    DropOldest,
    DropNewest,
    DropAll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub host: HString<64>,
    pub port: u16,
    pub username: HString<32>,
    pub password: HString<64>,
    pub base_topic: HString<32>,
    pub backoff_min_ms: u32,
    pub backoff_max_ms: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: HString::new(),
            port: 1883,
            username: HString::new(),
            password: HString::new(),
            base_topic: HString::try_from("attendance").unwrap_or_default(),
            backoff_min_ms: 1_000,
            backoff_max_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: HString<32>,
    pub location_id: HString<32>,
    pub firmware_version: HString<16>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: HString::try_from("unknown-device").unwrap_or_default(),
            location_id: HString::new(),
            firmware_version: HString::try_from("0.0.0").unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NfcConfig {
    pub irq_pin: i32,
    pub reset_pin: i32,
    /// 0 selects interrupt mode (an IRQ line is wired); non-zero selects
    /// polling mode at this interval (§4.3 "Detection modes").
    pub poll_interval_ms: u32,
    pub read_timeout_ms: u32,
    pub max_consecutive_errors: u8,
    pub recovery_delay_ms: u32,
    pub max_recovery_attempts: u8,
}

impl Default for NfcConfig {
    fn default() -> Self {
        Self {
            irq_pin: -1,
            reset_pin: -1,
            poll_interval_ms: 0,
            read_timeout_ms: 200,
            max_consecutive_errors: 3,
            recovery_delay_ms: 100,
            max_recovery_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceConfig {
    pub debounce_ms: u32,
    pub batch_max_size: u16,
    pub batch_flush_interval_ms: u32,
    pub batch_flush_on_idle_ms: u32,
    pub offline_capacity_batches: u16,
    pub overflow_policy: OfflineOverflowPolicy,
    pub batching_enabled: bool,
    pub max_send_attempts: u8,
    pub drain_batches_per_tick: u8,
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1_000,
            batch_max_size: 20,
            batch_flush_interval_ms: 5_000,
            batch_flush_on_idle_ms: 2_000,
            offline_capacity_batches: 10,
            overflow_policy: OfflineOverflowPolicy::DropOldest,
            batching_enabled: true,
            max_send_attempts: 5,
            drain_batches_per_tick: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SleepType {
    LightSleep,
    ModemSleep,
    DeepSleep,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerConfig {
    pub sleep_enabled: bool,
    pub sleep_type: SleepType,
    pub idle_timeout_ms: u32,
    /// Bitmask of `ActivityTypeMask` bits that reset the idle timer.
    pub activity_mask: u8,
    pub smart_sleep_enabled: bool,
    pub short_threshold_ms: u32,
    pub medium_threshold_ms: u32,
    pub wake_timer_interval_ms: u32,
    pub nfc_wake_pin: i32,
    pub cpu_freq_mhz: u16,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            sleep_enabled: true,
            sleep_type: SleepType::ModemSleep,
            idle_timeout_ms: 30_000,
            activity_mask: 0b1_1111,
            smart_sleep_enabled: true,
            short_threshold_ms: 2_000,
            medium_threshold_ms: 30_000,
            wake_timer_interval_ms: 60_000,
            nfc_wake_pin: -1,
            cpu_freq_mhz: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    pub enabled: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub check_interval_ms: u32,
    pub report_interval_ms: u32,
    pub mem_warn_threshold_percent: u8,
    pub fragmentation_warn_threshold_percent: u8,
    pub rssi_warn_threshold_dbm: i8,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 5_000,
            report_interval_ms: 60_000,
            mem_warn_threshold_percent: 20,
            fragmentation_warn_threshold_percent: 50,
            rssi_warn_threshold_dbm: -80,
        }
    }
}

/// Root configuration document (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    pub wifi: WifiConfig,
    pub broker: BrokerConfig,
    pub device: DeviceConfig,
    pub nfc: NfcConfig,
    pub attendance: AttendanceConfig,
    pub power: PowerConfig,
    pub feedback: FeedbackConfig,
    pub health: HealthConfig,
}

/// Validate every numeric field against its documented minimum (§6: "Every
/// numeric field has a documented default and a minimum"). Returns the name
/// of the first field that failed, if any.
pub fn validate(cfg: &SystemConfig) -> Result<(), &'static str> {
    if cfg.broker.port == 0 {
        return Err("broker.port must be nonzero");
    }
    if cfg.broker.backoff_min_ms == 0 {
        return Err("broker.backoff_min_ms must be nonzero");
    }
    if cfg.broker.backoff_max_ms < cfg.broker.backoff_min_ms {
        return Err("broker.backoff_max_ms must be >= backoff_min_ms");
    }
    if cfg.attendance.batch_max_size == 0 {
        return Err("attendance.batch_max_size must be nonzero");
    }
    if cfg.attendance.offline_capacity_batches == 0 {
        return Err("attendance.offline_capacity_batches must be nonzero");
    }
    if cfg.attendance.max_send_attempts == 0 {
        return Err("attendance.max_send_attempts must be nonzero");
    }
    if cfg.nfc.max_consecutive_errors == 0 {
        return Err("nfc.max_consecutive_errors must be nonzero");
    }
    if cfg.power.idle_timeout_ms == 0 {
        return Err("power.idle_timeout_ms must be nonzero");
    }
    if cfg.power.medium_threshold_ms < cfg.power.short_threshold_ms {
        return Err("power.medium_threshold_ms must be >= short_threshold_ms");
    }
    if cfg.health.check_interval_ms == 0 {
        return Err("health.check_interval_ms must be nonzero");
    }
    Ok(())
}

/// Owns the current configuration snapshot and brokers updates.
///
/// Readers call [`ConfigStore::current`] and get a reference to an
/// immutable snapshot — mutation only ever happens through
/// [`ConfigStore::update`], which applies a callback, validates the
/// result, persists it (falling back silently on storage failure per §7),
/// and publishes `ConfigChanged`.
pub struct ConfigStore {
    current: SystemConfig,
}

impl ConfigStore {
    /// Load from storage, falling back to defaults on any failure or
    /// validation error (§7: "Config invalid -> load defaults, publish
    /// ConfigError, continue").
    pub fn load(storage: &dyn StoragePort, bus: &EventBus, now_ms: u64) -> Self {
        let mut buf = [0u8; 1024];
        let loaded = storage
            .read(CONFIG_NAMESPACE, CONFIG_KEY, &mut buf)
            .ok()
            .and_then(|n| postcard::from_bytes::<SystemConfig>(&buf[..n]).ok())
            .filter(|cfg| validate(cfg).is_ok());

        match loaded {
            Some(cfg) => Self { current: cfg },
            None => {
                bus.publish(Event::new(
                    EventKind::ConfigError,
                    now_ms,
                    EventPayload::None,
                ));
                Self {
                    current: SystemConfig::default(),
                }
            }
        }
    }

    pub fn current(&self) -> &SystemConfig {
        &self.current
    }

    /// Apply `f` to a clone of the current snapshot; if the result
    /// validates, persist it, publish `ConfigChanged`, and adopt it.
    /// Invalid results are rejected and the store keeps its current value.
    pub fn update<F>(
        &mut self,
        storage: &mut dyn StoragePort,
        bus: &EventBus,
        now_ms: u64,
        f: F,
    ) -> Result<(), &'static str>
    where
        F: FnOnce(&mut SystemConfig),
    {
        let mut candidate = self.current.clone();
        f(&mut candidate);
        validate(&candidate)?;

        let mut buf = [0u8; 1024];
        if let Ok(used) = postcard::to_slice(&candidate, &mut buf) {
            // Storage write failure is non-fatal (§7): the in-memory
            // update still takes effect, it just does not survive reboot.
            let _: Result<(), StorageError> = storage.write(CONFIG_NAMESPACE, CONFIG_KEY, used);
        }

        self.current = candidate;
        bus.publish(Event::new(
            EventKind::ConfigChanged,
            now_ms,
            EventPayload::None,
        ));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::StorageError;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemStorage(HashMap<(String, String), Vec<u8>>);

    impl StoragePort for MemStorage {
        fn read(&self, ns: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
            match self.0.get(&(ns.to_string(), key.to_string())) {
                Some(v) => {
                    buf[..v.len()].copy_from_slice(v);
                    Ok(v.len())
                }
                None => Err(StorageError::NotFound),
            }
        }
        fn write(&mut self, ns: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
            self.0
                .insert((ns.to_string(), key.to_string()), data.to_vec());
            Ok(())
        }
        fn delete(&mut self, ns: &str, key: &str) -> Result<(), StorageError> {
            self.0.remove(&(ns.to_string(), key.to_string()));
            Ok(())
        }
        fn exists(&self, ns: &str, key: &str) -> bool {
            self.0.contains_key(&(ns.to_string(), key.to_string()))
        }
    }

    #[test]
    fn missing_config_falls_back_to_defaults_and_emits_config_error() {
        let storage = MemStorage::default();
        let bus = EventBus::new();
        let store = ConfigStore::load(&storage, &bus, 0);
        assert_eq!(store.current().broker.port, 1883);
        assert_eq!(bus.pending(EventKind::ConfigError), 1);
    }

    #[test]
    fn update_then_read_yields_f_applied_to_pre_update_snapshot() {
        let mut storage = MemStorage::default();
        let bus = EventBus::new();
        let mut store = ConfigStore::load(&storage, &bus, 0);
        store
            .update(&mut storage, &bus, 1, |cfg| cfg.broker.port = 8883)
            .unwrap();
        assert_eq!(store.current().broker.port, 8883);
        assert_eq!(bus.pending(EventKind::ConfigChanged), 1);
    }

    #[test]
    fn invalid_update_is_rejected_and_store_unchanged() {
        let mut storage = MemStorage::default();
        let bus = EventBus::new();
        let mut store = ConfigStore::load(&storage, &bus, 0);
        let result = store.update(&mut storage, &bus, 1, |cfg| cfg.broker.port = 0);
        assert!(result.is_err());
        assert_eq!(store.current().broker.port, 1883);
    }

    #[test]
    fn persisted_config_round_trips_through_storage() {
        let mut storage = MemStorage::default();
        let bus = EventBus::new();
        let mut store = ConfigStore::load(&storage, &bus, 0);
        store
            .update(&mut storage, &bus, 1, |cfg| {
                cfg.device.id = HString::try_from("reader-07").unwrap()
            })
            .unwrap();
        let reloaded = ConfigStore::load(&storage, &bus, 2);
        assert_eq!(reloaded.current().device.id.as_str(), "reader-07");
    }
}
