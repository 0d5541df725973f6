//! Digital I/O adapter — implements [`GpioPort`] for the NFC reader's IRQ
//! and reset lines (§6 "External Interfaces").
//!
//! Grounded on `drivers/hw_init.rs`'s raw `gpio_config`/`gpio_get_level`
//! calls for the ESP-IDF backend, generalised from that module's hardcoded
//! pin table to the port trait's per-call pin argument. Keeps up to 4 pins
//! configured at a time — an NFC reader only ever needs an IRQ line and a
//! reset line.

use crate::ports::{GpioPort, Level};

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

/// ESP32 GPIO adapter. On the host target it tracks pin levels in a map so
/// tests that wire real adapters together still observe consistent state —
/// components under test use the dedicated fakes in their own test modules
/// instead of this adapter.
pub struct Esp32Gpio {
    #[cfg(not(target_os = "espidf"))]
    levels: HashMap<i32, Level>,
}

impl Default for Esp32Gpio {
    fn default() -> Self {
        Self::new()
    }
}

impl Esp32Gpio {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            levels: HashMap::new(),
        }
    }
}

impl GpioPort for Esp32Gpio {
    #[cfg(target_os = "espidf")]
    fn configure_input(&mut self, pin: i32, pull_up: bool) {
        let cfg = gpio_config_t {
            pin_bit_mask: 1u64 << pin,
            mode: gpio_mode_t_GPIO_MODE_INPUT,
            pull_up_en: if pull_up {
                gpio_pullup_t_GPIO_PULLUP_ENABLE
            } else {
                gpio_pullup_t_GPIO_PULLUP_DISABLE
            },
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
        };
        // SAFETY: single-threaded main-task configuration call.
        unsafe {
            gpio_config(&cfg);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn configure_input(&mut self, pin: i32, _pull_up: bool) {
        self.levels.entry(pin).or_insert(Level::High);
    }

    #[cfg(target_os = "espidf")]
    fn read(&self, pin: i32) -> Level {
        // SAFETY: read-only register access on an already-configured pin.
        if (unsafe { gpio_get_level(pin) }) != 0 {
            Level::High
        } else {
            Level::Low
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn read(&self, pin: i32) -> Level {
        self.levels.get(&pin).copied().unwrap_or(Level::High)
    }

    #[cfg(target_os = "espidf")]
    fn configure_reset_line(&mut self, pin: i32) {
        let cfg = gpio_config_t {
            pin_bit_mask: 1u64 << pin,
            mode: gpio_mode_t_GPIO_MODE_OUTPUT,
            pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
        };
        // SAFETY: single-threaded main-task configuration call.
        unsafe {
            gpio_config(&cfg);
            gpio_set_level(pin, 1);
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn configure_reset_line(&mut self, pin: i32) {
        self.levels.insert(pin, Level::High);
    }

    #[cfg(target_os = "espidf")]
    fn pulse_reset(&mut self, pin: i32, low_ms: u32, high_ms: u32) {
        // SAFETY: pin was configured as output by configure_reset_line.
        unsafe {
            gpio_set_level(pin, 0);
        }
        std::thread::sleep(std::time::Duration::from_millis(u64::from(low_ms)));
        unsafe {
            gpio_set_level(pin, 1);
        }
        std::thread::sleep(std::time::Duration::from_millis(u64::from(high_ms)));
    }

    #[cfg(not(target_os = "espidf"))]
    fn pulse_reset(&mut self, pin: i32, _low_ms: u32, _high_ms: u32) {
        self.levels.insert(pin, Level::High);
    }
}
