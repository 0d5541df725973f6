//! Entry point for the attendance-reader coordination core.
//!
//! Boots the device, constructs every adapter and pure-logic component, and
//! drives them from one cooperative loop (§5 "single-threaded cooperative
//! scheduling", §8 end-to-end scenarios). Wiring mirrors the teacher's own
//! flat-loop `main`: every component is a plain owned local and the loop
//! body calls each one's `tick()` directly in sequence. No
//! `Scheduler::register`/`EventBus::subscribe` closure is ever handed a
//! borrow of another component — where the bus genuinely needs to hand data
//! back to the loop (a scanned card, an outgoing publish request) a
//! subscriber only writes into a small `Rc<RefCell<_>>` mailbox it owns a
//! clone of, and the loop drains that mailbox itself.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use anyhow::Result;
use heapless::Vec as HVec;

use attendance_core::adapters::device_id;
use attendance_core::adapters::gpio::Esp32Gpio;
use attendance_core::adapters::mqtt::MqttAdapter;
use attendance_core::adapters::nvs::NvsAdapter;
use attendance_core::adapters::sleep::Esp32SleepAdapter;
use attendance_core::adapters::wifi::{ConnectivityPort, WifiAdapter};
use attendance_core::attendance::{AttendancePipeline, BatchPublisher};
use attendance_core::broker::{BrokerClient, BrokerConnectionConfig, BrokerState};
use attendance_core::bus::EventBus;
use attendance_core::clock::{Clock, SystemClock};
use attendance_core::config::ConfigStore;
use attendance_core::drivers::watchdog::Watchdog;
use attendance_core::event::{EventKind, EventPayload, HealthState, MAX_INLINE_PAYLOAD, MAX_TOPIC_LEN};
use attendance_core::health::{ComponentSample, HealthMonitor, HealthThresholds, SystemMetrics};
use attendance_core::nfc::{NfcReader, NfcReaderConfig, NfcState, NfcTransport};
use attendance_core::power::{ActivityType, PowerManager, WakeLockGuard};
use attendance_core::ports::GpioPort;
use attendance_core::service::Service;
use attendance_core::uid::CardUid;

#[cfg(target_os = "espidf")]
use attendance_core::adapters::pn532::Pn532Adapter;
#[cfg(target_os = "espidf")]
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
#[cfg(target_os = "espidf")]
use esp_idf_hal::peripherals::Peripherals;
#[cfg(target_os = "espidf")]
use esp_idf_hal::units::FromValueType;

/// Host stand-in for the PN532 transport. `adapters::pn532::Pn532Adapter`
/// only makes sense wired to a real I2C bus, so the host build exercises
/// `NfcReader`'s own state machine against a transport that never sees a
/// card rather than trying to fake I2C framing here.
#[cfg(not(target_os = "espidf"))]
struct NullNfcTransport;

#[cfg(not(target_os = "espidf"))]
impl NfcTransport for NullNfcTransport {
    fn probe(&mut self) -> Result<(), attendance_core::error::NfcFault> {
        Ok(())
    }

    fn read_uid(&mut self, _timeout_ms: u32) -> Result<Option<CardUid>, attendance_core::error::NfcFault> {
        Ok(None)
    }

    fn enter_low_power(&mut self) {}

    fn wake(&mut self) {}
}

/// Map each component's own state enum onto the coarse [`HealthState`]
/// ladder Health aggregates over (§4.7).
fn nfc_health(state: NfcState) -> HealthState {
    match state {
        NfcState::Ready | NfcState::Reading => HealthState::Healthy,
        NfcState::Recovering => HealthState::Degraded,
        NfcState::Error | NfcState::Offline => HealthState::Unhealthy,
        NfcState::Uninitialized | NfcState::Initializing | NfcState::Disabled => HealthState::Unknown,
    }
}

fn broker_health(state: BrokerState) -> HealthState {
    match state {
        BrokerState::Connected => HealthState::Healthy,
        BrokerState::Connecting => HealthState::Degraded,
        BrokerState::Error => HealthState::Unhealthy,
        BrokerState::Disconnected => HealthState::Unknown,
    }
}

fn wifi_health(connected: bool) -> HealthState {
    if connected {
        HealthState::Healthy
    } else {
        HealthState::Degraded
    }
}

/// How long the wake lock taken on an NFC-IRQ wakeup is held before it is
/// released, giving the reader a short guaranteed-awake window to complete
/// a read before the idle timer can put the device back to sleep (§4.6).
const NFC_WAKE_GRACE_MS: u64 = 2_000;

fn main() -> Result<()> {
    #[cfg(target_os = "espidf")]
    {
        esp_idf_svc::sys::link_patches();
        esp_idf_logger::init()?;
    }
    #[cfg(not(target_os = "espidf"))]
    {
        env_logger::init();
    }

    log::info!(
        "attendance-core starting (build {})",
        option_env!("BUILD_TIMESTAMP").unwrap_or("unknown")
    );

    let clock = SystemClock::new();
    let bus = EventBus::new();

    let mut nvs = NvsAdapter::new().unwrap_or_default();
    let mut config_store = ConfigStore::load(&nvs, &bus, clock.monotonic_ms());

    let mac = device_id::read_mac();
    let derived_id = device_id::device_id(&mac);
    let hostname = device_id::hostname(&mac);
    if config_store.current().device.id.is_empty() || config_store.current().device.id.as_str() == "unknown-device" {
        let _ = config_store.update(&mut nvs, &bus, clock.monotonic_ms(), |c| {
            c.device.id = heapless::String::try_from(derived_id.as_str()).unwrap_or_default();
        });
    }
    log::info!("device id {} ({})", config_store.current().device.id, hostname);

    let mut cfg = config_store.current().clone();

    // ── Platform adapters ──────────────────────────────────────────────
    // Two handles onto the same underlying RTC-retained region: on ESP-IDF
    // both read/write the one `.rtc.data` static, so `PowerManager::tick`
    // can take a `&mut dyn PlatformSleepPort` and a `&mut dyn
    // RtcMemoryPort` in the same call without aliasing one local twice.
    let mut sleep_adapter = Esp32SleepAdapter::new();
    let mut rtc_adapter = Esp32SleepAdapter::new();

    #[cfg(target_os = "espidf")]
    attendance_core::adapters::wifi::wifi_stack_init().map_err(|e| anyhow::anyhow!("{e}"))?;

    let wifi = Rc::new(RefCell::new(WifiAdapter::new()));
    if !cfg.wifi.ssid.is_empty() {
        if let Err(e) = wifi.borrow_mut().set_credentials(&cfg.wifi.ssid, &cfg.wifi.password) {
            log::warn!("wifi credentials rejected: {e}");
        }
    }
    if let Err(e) = wifi.borrow_mut().connect() {
        log::warn!("wifi connect failed: {e}");
    }

    let mqtt = MqttAdapter::new(wifi.clone());
    let broker_cfg = BrokerConnectionConfig {
        host: cfg.broker.host.clone(),
        port: cfg.broker.port,
        username: cfg.broker.username.clone(),
        password: cfg.broker.password.clone(),
        base_topic: cfg.broker.base_topic.clone(),
        device_id: cfg.device.id.clone(),
        backoff_min_ms: cfg.broker.backoff_min_ms,
        backoff_max_ms: cfg.broker.backoff_max_ms,
    };
    let mut broker = BrokerClient::new(mqtt, broker_cfg);

    let mut gpio = Esp32Gpio::new();
    if cfg.nfc.reset_pin >= 0 {
        gpio.configure_reset_line(cfg.nfc.reset_pin);
    }
    let nfc_cfg = NfcReaderConfig {
        irq_pin: cfg.nfc.irq_pin,
        read_timeout_ms: cfg.nfc.read_timeout_ms,
        max_consecutive_errors: cfg.nfc.max_consecutive_errors,
        recovery_delay_ms: cfg.nfc.recovery_delay_ms,
        max_recovery_attempts: cfg.nfc.max_recovery_attempts,
        poll_interval_ms: cfg.nfc.poll_interval_ms,
    };

    #[cfg(target_os = "espidf")]
    let mut nfc_reader = {
        let peripherals = Peripherals::take()?;
        let i2c_cfg = I2cConfig::new().baudrate(400.kHz().into());
        let i2c = I2cDriver::new(
            peripherals.i2c0,
            peripherals.pins.gpio21,
            peripherals.pins.gpio22,
            &i2c_cfg,
        )?;
        let pn532 = Pn532Adapter::new(i2c);
        NfcReader::new(pn532, gpio, nfc_cfg)
    };
    #[cfg(not(target_os = "espidf"))]
    let mut nfc_reader = NfcReader::new(NullNfcTransport, gpio, nfc_cfg);

    nfc_reader.begin(clock.monotonic_ms());

    let mut attendance = AttendancePipeline::new(
        cfg.attendance.clone(),
        &cfg.device.id,
        &cfg.device.location_id,
    );

    let mut power_mgr = PowerManager::new(cfg.power.clone());
    let watchdog = Watchdog::new();

    let mut health = HealthMonitor::new();
    let health_thresholds = HealthThresholds {
        mem_warn_threshold_percent: cfg.health.mem_warn_threshold_percent,
        fragmentation_warn_threshold_percent: cfg.health.fragmentation_warn_threshold_percent,
        rssi_warn_threshold_dbm: cfg.health.rssi_warn_threshold_dbm,
    };

    // ── Bus mailboxes ───────────────────────────────────────────────────
    // Subscriptions are kept alive for the whole run; each closure only
    // captures a clone of a small shared cell, never a borrow of the
    // components the main loop drives directly.
    let card_mailbox: Rc<RefCell<Option<CardUid>>> = Rc::new(RefCell::new(None));
    let card_mailbox_tx = card_mailbox.clone();
    let _card_sub = bus.subscribe(EventKind::CardScanned, move |event| {
        if let EventPayload::Card { uid } = event.payload {
            *card_mailbox_tx.borrow_mut() = Some(uid);
        }
    });

    let activity_log: Rc<RefCell<Vec<ActivityType>>> = Rc::new(RefCell::new(Vec::new()));
    let activity_card = activity_log.clone();
    let _sub_activity_card = bus.subscribe(EventKind::CardScanned, move |_event| {
        activity_card.borrow_mut().push(ActivityType::CardScanned);
    });
    let activity_mqtt_msg = activity_log.clone();
    let _sub_activity_mqtt_msg = bus.subscribe(EventKind::MqttMessage, move |_event| {
        activity_mqtt_msg.borrow_mut().push(ActivityType::MqttMessage);
    });
    let activity_wifi = activity_log.clone();
    let _sub_activity_wifi = bus.subscribe(EventKind::WifiConnected, move |_event| {
        activity_wifi.borrow_mut().push(ActivityType::WifiConnected);
    });
    let activity_mqtt_conn = activity_log.clone();
    let _sub_activity_mqtt_conn = bus.subscribe(EventKind::MqttConnected, move |_event| {
        activity_mqtt_conn.borrow_mut().push(ActivityType::MqttConnected);
    });
    let activity_nfc_ready = activity_log.clone();
    let _sub_activity_nfc_ready = bus.subscribe(EventKind::NfcReady, move |_event| {
        activity_nfc_ready.borrow_mut().push(ActivityType::NfcReady);
    });

    type Outbox = VecDeque<(heapless::String<MAX_TOPIC_LEN>, HVec<u8, MAX_INLINE_PAYLOAD>)>;
    let outbox: Rc<RefCell<Outbox>> = Rc::new(RefCell::new(VecDeque::new()));
    let outbox_tx = outbox.clone();
    let _publish_sub = bus.subscribe(EventKind::MqttPublishRequest, move |event| {
        if let EventPayload::TopicPayload(tp) = &event.payload {
            outbox_tx.borrow_mut().push_back((tp.topic.clone(), tp.payload.clone()));
        }
    });

    let boot_ms = clock.monotonic_ms();
    let mut boot_wake_lock: Option<WakeLockGuard> =
        power_mgr.on_boot(&sleep_adapter, &rtc_adapter, &bus, boot_ms);

    let mut last_health_sample_ms = 0u64;

    log::info!("attendance-core ready, entering main loop");

    loop {
        let now_ms = clock.monotonic_ms();

        if boot_wake_lock.is_some() && now_ms.saturating_sub(boot_ms) >= NFC_WAKE_GRACE_MS {
            boot_wake_lock = None;
        }

        nfc_reader.tick(&bus, now_ms);
        wifi.borrow_mut().poll();
        broker.tick(&bus, now_ms);

        bus.dispatch();

        if let Some(uid) = card_mailbox.borrow_mut().take() {
            attendance.on_card_scanned(&bus, &mut broker, uid, now_ms);
        }
        attendance.tick(&bus, &mut broker, now_ms);

        for activity in activity_log.borrow_mut().drain(..) {
            power_mgr.record_activity(activity, now_ms);
        }

        if now_ms.saturating_sub(last_health_sample_ms) >= u64::from(cfg.health.check_interval_ms) {
            last_health_sample_ms = now_ms;
            let samples = [
                ComponentSample {
                    name: "nfc",
                    state: nfc_health(nfc_reader.state()),
                    error_count: 0,
                },
                ComponentSample {
                    name: "broker",
                    state: broker_health(broker.state()),
                    error_count: broker.messages_failed,
                },
                ComponentSample {
                    name: "wifi",
                    state: wifi_health(wifi.borrow().is_connected()),
                    error_count: 0,
                },
                ComponentSample {
                    name: "attendance",
                    state: HealthState::Healthy,
                    error_count: attendance.records_dropped(),
                },
            ];
            health.sample(&bus, now_ms, &samples);
        }
        health.maybe_report(
            &bus,
            now_ms,
            cfg.health.report_interval_ms,
            SystemMetrics::collect(now_ms),
            &health_thresholds,
        );

        loop {
            let item = outbox.borrow_mut().pop_front();
            let Some((topic, payload)) = item else { break };
            if let Err(e) = broker.publish(&topic, &payload) {
                log::warn!("deferred publish to {topic} failed: {e}");
                break;
            }
        }

        // `ConfigStore::update` publishes `ConfigChanged` but this core has
        // no remote-config source yet (§6 Open Questions) — re-read the
        // snapshot each tick anyway so a future config-update path only
        // needs to call `config_store.update`, not touch this loop.
        cfg = config_store.current().clone();

        watchdog.feed();

        power_mgr.tick(&bus, &mut sleep_adapter, &mut rtc_adapter, now_ms);

        #[cfg(not(target_os = "espidf"))]
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
}
