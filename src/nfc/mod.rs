//! NfcReader — driver state machine for the card-reader chip (§4.3).
//!
//! Grounded on `original_source/include/drivers/Pn532Driver.hpp` for the
//! status model, error taxonomy, and self-recovery sequence, and on the
//! teacher's `drivers/button.rs` for the edge-detection + tick-driven
//! gesture-style state machine shape (a GPIO is sampled every tick rather
//! than blocking on an interrupt).

use crate::bus::EventBus;
use crate::event::{Event, EventKind, EventPayload, Fault};
use crate::error::{Error, NfcFault};
use crate::ports::{GpioPort, Level};
use crate::service::{Service, ServiceState};
use crate::uid::CardUid;

/// Chip-level transport: probe, UID read, and low-power control. Distinct
/// from [`GpioPort`], which only drives the IRQ/reset lines — this is the
/// command channel to the reader chip itself (SPI/I2C in practice).
pub trait NfcTransport {
    /// Probe the chip (e.g. read its firmware version register).
    fn probe(&mut self) -> Result<(), NfcFault>;

    /// Attempt one read with the given timeout. `Ok(None)` means no card in
    /// the field — not an error.
    fn read_uid(&mut self, timeout_ms: u32) -> Result<Option<CardUid>, NfcFault>;

    fn enter_low_power(&mut self);

    fn wake(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NfcState {
    Uninitialized,
    Initializing,
    Ready,
    Reading,
    Error,
    Offline,
    Disabled,
    Recovering,
}

/// Detection mode selected once at construction from configuration
/// (§4.3 "Detection modes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetectionMode {
    Interrupt,
    Polling { interval_ms: u32 },
}

pub struct NfcReaderConfig {
    pub irq_pin: i32,
    pub read_timeout_ms: u32,
    pub max_consecutive_errors: u8,
    pub recovery_delay_ms: u32,
    pub max_recovery_attempts: u8,
    pub poll_interval_ms: u32,
}

/// Driver state machine for the card-reader chip (§4.3).
pub struct NfcReader<T, G> {
    transport: T,
    gpio: G,
    cfg: NfcReaderConfig,
    mode: DetectionMode,
    state: NfcState,
    consecutive_errors: u8,
    recovery_attempts: u8,
    recovery_deadline_ms: u64,
    last_poll_ms: u64,
    last_irq_level: Level,
    card_present: bool,
    last_uid: Option<CardUid>,
    error_reported: bool,
}

impl<T, G> NfcReader<T, G>
where
    T: NfcTransport,
    G: GpioPort,
{
    pub fn new(transport: T, mut gpio: G, cfg: NfcReaderConfig) -> Self {
        let mode = if cfg.irq_pin >= 0 && cfg.poll_interval_ms == 0 {
            gpio.configure_input(cfg.irq_pin, true);
            DetectionMode::Interrupt
        } else {
            DetectionMode::Polling {
                interval_ms: cfg.poll_interval_ms.max(50),
            }
        };
        Self {
            transport,
            gpio,
            cfg,
            mode,
            state: NfcState::Uninitialized,
            consecutive_errors: 0,
            recovery_attempts: 0,
            recovery_deadline_ms: 0,
            last_poll_ms: 0,
            last_irq_level: Level::High,
            card_present: false,
            last_uid: None,
            error_reported: false,
        }
    }

    pub fn state(&self) -> NfcState {
        self.state
    }

    /// `Disabled --wake()--> Ready`.
    pub fn wake(&mut self, bus: &EventBus, now_ms: u64) {
        if self.state == NfcState::Disabled {
            self.transport.wake();
            self.transition(bus, now_ms, NfcState::Ready);
        }
    }

    /// `Ready --enter_low_power()--> Disabled`.
    pub fn enter_low_power(&mut self, bus: &EventBus, now_ms: u64) {
        self.transport.enter_low_power();
        self.transition(bus, now_ms, NfcState::Disabled);
    }

    fn transition(&mut self, bus: &EventBus, now_ms: u64, next: NfcState) {
        if self.state == next {
            return;
        }
        self.state = next;
        match next {
            NfcState::Ready => bus.publish(Event::simple(EventKind::NfcReady, now_ms)),
            NfcState::Offline => {
                bus.publish(Event::new(
                    EventKind::HealthChanged,
                    now_ms,
                    EventPayload::Health {
                        component: heapless::String::try_from("nfc").unwrap_or_default(),
                        state: crate::event::HealthState::Unhealthy,
                    },
                ));
            }
            _ => {}
        }
    }

    fn report_fault(&mut self, bus: &EventBus, now_ms: u64, fault: NfcFault) {
        // "Repeated failure publishes a single NfcError event, not one per
        // failure" (§4.3) — only report on the edge into failure.
        if self.error_reported {
            return;
        }
        self.error_reported = true;
        let message = match fault {
            NfcFault::InitFailed => "init failed",
            NfcFault::CommunicationTimeout => "comm timeout",
            NfcFault::CommunicationError => "comm error",
            NfcFault::InvalidResponse => "invalid response",
            NfcFault::CardReadFailed => "card read failed",
            NfcFault::RecoveryFailed => "recovery failed",
            NfcFault::HardwareNotFound => "hardware not found",
        };
        bus.publish(Event::new(
            EventKind::NfcError,
            now_ms,
            EventPayload::Fault(Fault {
                error: Error::TransportError,
                message,
            }),
        ));
    }

    fn begin_recovery(&mut self, bus: &EventBus, now_ms: u64) {
        self.transition(bus, now_ms, NfcState::Recovering);
        self.gpio.pulse_reset(self.cfg.irq_pin, 10, 50);
        self.recovery_deadline_ms = now_ms + u64::from(self.cfg.recovery_delay_ms);
    }

    fn attempt_recovery(&mut self, bus: &EventBus, now_ms: u64) {
        match self.transport.probe() {
            Ok(()) => {
                self.consecutive_errors = 0;
                self.recovery_attempts = 0;
                self.error_reported = false;
                self.transition(bus, now_ms, NfcState::Ready);
            }
            Err(fault) => {
                self.recovery_attempts += 1;
                if self.recovery_attempts >= self.cfg.max_recovery_attempts {
                    self.report_fault(bus, now_ms, NfcFault::RecoveryFailed);
                    self.transition(bus, now_ms, NfcState::Offline);
                } else {
                    self.report_fault(bus, now_ms, fault);
                    self.recovery_deadline_ms = now_ms + u64::from(self.cfg.recovery_delay_ms);
                }
            }
        }
    }

    fn poll_card(&mut self, bus: &EventBus, now_ms: u64) {
        self.state = NfcState::Reading;
        match self.transport.read_uid(self.cfg.read_timeout_ms) {
            Ok(Some(uid)) => {
                self.consecutive_errors = 0;
                self.error_reported = false;
                self.card_present = true;
                self.last_uid = Some(uid);
                bus.publish(Event::new(
                    EventKind::CardScanned,
                    now_ms,
                    EventPayload::Card { uid },
                ));
                self.state = NfcState::Ready;
            }
            Ok(None) => {
                if self.card_present {
                    self.card_present = false;
                    self.last_uid = None;
                    bus.publish(Event::simple(EventKind::CardRemoved, now_ms));
                }
                self.consecutive_errors = 0;
                self.state = NfcState::Ready;
            }
            Err(fault) => {
                self.consecutive_errors = self.consecutive_errors.saturating_add(1);
                self.state = NfcState::Ready;
                if self.consecutive_errors >= self.cfg.max_consecutive_errors {
                    self.report_fault(bus, now_ms, fault);
                    self.begin_recovery(bus, now_ms);
                }
                // below threshold: expected and silent (§4.3).
            }
        }
    }

    /// Call every scheduler tick.
    pub fn tick(&mut self, bus: &EventBus, now_ms: u64) {
        match self.state {
            NfcState::Uninitialized | NfcState::Disabled => {}
            NfcState::Recovering => {
                if now_ms >= self.recovery_deadline_ms {
                    self.attempt_recovery(bus, now_ms);
                }
            }
            NfcState::Offline => {
                // Still tick: periodically retry full recovery (§4.3).
                if now_ms >= self.recovery_deadline_ms {
                    self.begin_recovery(bus, now_ms);
                }
            }
            NfcState::Ready | NfcState::Reading | NfcState::Error => match self.mode {
                DetectionMode::Interrupt => {
                    let level = self.gpio.read(self.cfg.irq_pin);
                    let falling_edge = self.last_irq_level == Level::High && level == Level::Low;
                    self.last_irq_level = level;
                    if falling_edge {
                        self.poll_card(bus, now_ms);
                    }
                }
                DetectionMode::Polling { interval_ms } => {
                    if now_ms.saturating_sub(self.last_poll_ms) >= u64::from(interval_ms) {
                        self.last_poll_ms = now_ms;
                        self.poll_card(bus, now_ms);
                    }
                }
            },
        }
    }
}

impl<T, G> Service for NfcReader<T, G>
where
    T: NfcTransport,
    G: GpioPort,
{
    fn state(&self) -> ServiceState {
        match self.state {
            NfcState::Uninitialized => ServiceState::Uninitialized,
            NfcState::Initializing | NfcState::Recovering => ServiceState::Initializing,
            NfcState::Ready | NfcState::Disabled => ServiceState::Ready,
            NfcState::Reading => ServiceState::Running,
            NfcState::Error | NfcState::Offline => ServiceState::Error,
        }
    }

    fn begin(&mut self, now_ms: u64) {
        self.state = NfcState::Initializing;
        match self.transport.probe() {
            Ok(()) => self.state = NfcState::Ready,
            Err(_) => self.state = NfcState::Error,
        }
        let _ = now_ms;
    }

    fn tick(&mut self, _now_ms: u64) {
        // Real ticking needs the bus; callers use `NfcReader::tick` directly.
    }

    fn end(&mut self, now_ms: u64) {
        self.transport.enter_low_power();
        self.state = NfcState::Disabled;
        let _ = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct FakeTransport {
        probe_ok: bool,
        next_uid: Option<CardUid>,
        next_err: Option<NfcFault>,
    }

    impl NfcTransport for FakeTransport {
        fn probe(&mut self) -> Result<(), NfcFault> {
            if self.probe_ok {
                Ok(())
            } else {
                Err(NfcFault::InitFailed)
            }
        }
        fn read_uid(&mut self, _timeout_ms: u32) -> Result<Option<CardUid>, NfcFault> {
            if let Some(err) = self.next_err {
                return Err(err);
            }
            Ok(self.next_uid.take())
        }
        fn enter_low_power(&mut self) {}
        fn wake(&mut self) {}
    }

    #[derive(Default)]
    struct FakeGpio {
        level: Level,
    }
    impl Default for Level {
        fn default() -> Self {
            Level::High
        }
    }
    impl GpioPort for FakeGpio {
        fn configure_input(&mut self, _pin: i32, _pull_up: bool) {}
        fn read(&self, _pin: i32) -> Level {
            self.level
        }
        fn configure_reset_line(&mut self, _pin: i32) {}
        fn pulse_reset(&mut self, _pin: i32, _low_ms: u32, _high_ms: u32) {}
    }

    fn cfg() -> NfcReaderConfig {
        NfcReaderConfig {
            irq_pin: 4,
            read_timeout_ms: 100,
            max_consecutive_errors: 3,
            recovery_delay_ms: 10,
            max_recovery_attempts: 2,
            poll_interval_ms: 0,
        }
    }

    #[test]
    fn falling_edge_triggers_a_read_and_publishes_card_scanned() {
        let bus = EventBus::new();
        let seen = Rc::new(RefCell::new(0u32));
        let seen2 = seen.clone();
        let _sub = bus
            .subscribe(EventKind::CardScanned, move |_e: &Event| {
                *seen2.borrow_mut() += 1;
            })
            .unwrap();

        let transport = FakeTransport {
            probe_ok: true,
            next_uid: Some(CardUid::new(&[1, 2, 3, 4])),
            next_err: None,
        };
        let gpio = FakeGpio { level: Level::High };
        let mut reader = NfcReader::new(transport, gpio, cfg());
        reader.begin(0);
        assert_eq!(reader.state(), NfcState::Ready);

        reader.gpio.level = Level::Low;
        reader.tick(&bus, 1);
        bus.dispatch();
        assert_eq!(*seen.borrow(), 1);
    }

    #[test]
    fn repeated_failures_below_threshold_are_silent() {
        let bus = EventBus::new();
        let transport = FakeTransport {
            probe_ok: true,
            next_uid: None,
            next_err: Some(NfcFault::CommunicationTimeout),
        };
        let gpio = FakeGpio { level: Level::High };
        let mut reader = NfcReader::new(transport, gpio, cfg());
        reader.begin(0);

        reader.gpio.level = Level::Low;
        reader.tick(&bus, 1);
        assert_eq!(bus.pending(EventKind::NfcError), 0);
        assert_eq!(reader.state(), NfcState::Ready);
    }

    #[test]
    fn threshold_failures_trigger_single_error_and_recovery() {
        let bus = EventBus::new();
        let transport = FakeTransport {
            probe_ok: true,
            next_uid: None,
            next_err: Some(NfcFault::CommunicationError),
        };
        let gpio = FakeGpio { level: Level::High };
        let mut c = cfg();
        c.max_consecutive_errors = 2;
        let mut reader = NfcReader::new(transport, gpio, c);
        reader.begin(0);

        for i in 0..2u64 {
            reader.gpio.level = Level::Low;
            reader.tick(&bus, i * 10 + 1);
            reader.gpio.level = Level::High;
            reader.tick(&bus, i * 10 + 5);
        }
        assert_eq!(reader.state(), NfcState::Recovering);
        assert_eq!(bus.pending(EventKind::NfcError), 1);
    }

    #[test]
    fn recovery_success_resets_counters_and_returns_to_ready() {
        let bus = EventBus::new();
        let transport = FakeTransport {
            probe_ok: true,
            next_uid: None,
            next_err: None,
        };
        let gpio = FakeGpio { level: Level::High };
        let mut reader = NfcReader::new(transport, gpio, cfg());
        reader.begin(0);
        reader.state = NfcState::Recovering;
        reader.recovery_deadline_ms = 5;
        reader.consecutive_errors = 3;

        reader.tick(&bus, 10);
        assert_eq!(reader.state(), NfcState::Ready);
        assert_eq!(reader.consecutive_errors, 0);
    }

    #[test]
    fn exhausted_recovery_attempts_goes_offline() {
        let bus = EventBus::new();
        let transport = FakeTransport {
            probe_ok: false,
            next_uid: None,
            next_err: None,
        };
        let gpio = FakeGpio { level: Level::High };
        let mut c = cfg();
        c.max_recovery_attempts = 1;
        let mut reader = NfcReader::new(transport, gpio, c);
        reader.begin(0);
        reader.state = NfcState::Recovering;
        reader.recovery_deadline_ms = 5;

        reader.tick(&bus, 10);
        assert_eq!(reader.state(), NfcState::Offline);
    }
}
