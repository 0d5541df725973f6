//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements                          | Connects to                  |
//! |-------------|--------------------------------------|-------------------------------|
//! | `wifi`      | `ConnectivityPort`                    | ESP-IDF WiFi STA             |
//! | `mqtt`      | `BrokerTransport`, `BatchPublisher`    | ESP-IDF MQTT client / WiFi    |
//! | `gpio`      | `GpioPort`                             | ESP32 GPIO (NFC IRQ + reset)  |
//! | `pn532`     | `NfcTransport`                         | PN532 over I2C                |
//! | `sleep`     | `PlatformSleepPort`, `RtcMemoryPort`   | ESP32 sleep/wake + RTC region |
//! | `nvs`       | `StoragePort`                          | NVS / in-memory store         |
//! | `device_id` | —                                      | eFuse factory MAC             |

pub mod device_id;
pub mod gpio;
pub mod mqtt;
pub mod nvs;
pub mod pn532;
pub mod sleep;
pub(super) mod utils;
pub mod wifi;
