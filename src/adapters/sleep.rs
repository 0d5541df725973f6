//! Sleep/wake and RTC-retained memory adapter for [`PowerManager`] (§4.6).
//!
//! Grounded on `original_source/src/services/PowerService.cpp`'s
//! `enterIdleSleep`/`enterDeepSleep`/`determineWakeupReason` sequence,
//! translated to the ESP-IDF sleep API the teacher's other adapters (wifi,
//! nvs) call directly via `esp_idf_svc::sys`.
//!
//! [`PowerManager`]: crate::power::PowerManager

use crate::ports::{PlatformSleepPort, RtcMemoryPort, WakeupReason};

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

/// The RTC-retained region survives deep sleep because it lives in a
/// `.rtc.data` linker section, which the ESP32 RTC domain keeps powered
/// across both light and deep sleep. Only `PowerManager` touches it, and
/// only immediately before sleep entry / immediately after boot (§5
/// "Shared-resource policy"), so a plain byte array is enough — no lock.
#[cfg(target_os = "espidf")]
#[unsafe(link_section = ".rtc.data")]
static mut RTC_REGION: [u8; 24] = [0u8; 24];

pub struct Esp32SleepAdapter {
    #[cfg(not(target_os = "espidf"))]
    rtc_region: std::cell::RefCell<[u8; 24]>,
}

impl Default for Esp32SleepAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Esp32SleepAdapter {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            rtc_region: std::cell::RefCell::new([0u8; 24]),
        }
    }
}

impl PlatformSleepPort for Esp32SleepAdapter {
    #[cfg(target_os = "espidf")]
    fn enter_light_sleep(&mut self, duration_ms: u32) {
        // SAFETY: single-threaded main-task call, no concurrent sleep entry.
        unsafe {
            esp_sleep_enable_timer_wakeup(u64::from(duration_ms) * 1_000);
            esp_light_sleep_start();
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn enter_light_sleep(&mut self, _duration_ms: u32) {}

    #[cfg(target_os = "espidf")]
    fn enter_deep_sleep(&mut self, duration_ms: u32) {
        // SAFETY: resets the device; no code after this call executes.
        unsafe {
            esp_sleep_enable_timer_wakeup(u64::from(duration_ms) * 1_000);
            esp_deep_sleep_start();
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn enter_deep_sleep(&mut self, _duration_ms: u32) {}

    #[cfg(target_os = "espidf")]
    fn wakeup_cause(&self) -> WakeupReason {
        // SAFETY: read-only query of the sleep-wake cause register.
        match unsafe { esp_sleep_get_wakeup_cause() } {
            esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER => WakeupReason::Timer,
            esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT0 | esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT1 => {
                WakeupReason::External
            }
            esp_sleep_source_t_ESP_SLEEP_WAKEUP_UNDEFINED => WakeupReason::PowerOn,
            _ => WakeupReason::Unknown,
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn wakeup_cause(&self) -> WakeupReason {
        WakeupReason::PowerOn
    }

    #[cfg(target_os = "espidf")]
    fn configure_wake_gpio(&mut self, pin: i32) {
        // SAFETY: configuration call made from the single main task before
        // sleep entry.
        unsafe {
            esp_sleep_enable_ext0_wakeup(pin, 0);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn configure_wake_gpio(&mut self, _pin: i32) {}

    #[cfg(target_os = "espidf")]
    fn configure_wake_timer(&mut self, duration_ms: u32) {
        // SAFETY: see enter_light_sleep / enter_deep_sleep.
        unsafe {
            esp_sleep_enable_timer_wakeup(u64::from(duration_ms) * 1_000);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn configure_wake_timer(&mut self, _duration_ms: u32) {}
}

impl RtcMemoryPort for Esp32SleepAdapter {
    #[cfg(target_os = "espidf")]
    fn read_rtc(&self) -> [u8; 24] {
        // SAFETY: RTC_REGION is only read/written from the single main
        // task, and only around sleep/boot as documented on the static.
        unsafe { RTC_REGION }
    }

    #[cfg(not(target_os = "espidf"))]
    fn read_rtc(&self) -> [u8; 24] {
        *self.rtc_region.borrow()
    }

    #[cfg(target_os = "espidf")]
    fn write_rtc(&mut self, data: &[u8; 24]) {
        // SAFETY: see read_rtc.
        unsafe {
            RTC_REGION = *data;
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn write_rtc(&mut self, data: &[u8; 24]) {
        *self.rtc_region.borrow_mut() = *data;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtc_region_persists_across_reads() {
        let mut adapter = Esp32SleepAdapter::new();
        let data = [7u8; 24];
        adapter.write_rtc(&data);
        assert_eq!(adapter.read_rtc(), data);
    }
}
