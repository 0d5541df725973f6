//! BrokerClient — transport to the remote broker with exponential-backoff
//! reconnect (§4.4).
//!
//! Grounded on the teacher's `adapters/wifi.rs` reconnect-backoff idiom
//! (`Reconnecting { attempt }` + doubling backoff capped at a maximum) and
//! on `original_source/include/services/MqttService.hpp` for the
//! connect/publish/subscribe shape and topic composition.

use heapless::String;

use crate::attendance::BatchPublisher;
use crate::bus::EventBus;
use crate::error::{BrokerFault, Error};
use crate::event::{Event, EventKind, EventPayload, Fault, TopicPayload};
use crate::event::MAX_TOPIC_LEN;
use crate::service::{Service, ServiceState};

/// Transport the link underneath actually speaks. A thin seam so
/// `BrokerClient` never touches sockets directly (§5 "Hardware peripherals
/// ... owned exclusively by their service").
pub trait BrokerTransport {
    fn connect(&mut self, host: &str, port: u16, username: &str, password: &str) -> Result<(), BrokerFault>;
    fn disconnect(&mut self);
    /// `true` once the underlying network link (WiFi) itself is up —
    /// §4.4: "only transitions to Connecting when the underlying network
    /// link reports up".
    fn link_up(&self) -> bool;
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerFault>;
    fn subscribe(&mut self, topic: &str) -> Result<(), BrokerFault>;
    /// Drain one inbound message, if any, since the last poll.
    fn poll_message(&mut self) -> Option<(String<MAX_TOPIC_LEN>, heapless::Vec<u8, { crate::event::MAX_INLINE_PAYLOAD }>)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

pub struct BrokerConnectionConfig {
    pub host: String<64>,
    pub port: u16,
    pub username: String<32>,
    pub password: String<64>,
    pub base_topic: String<32>,
    pub device_id: String<32>,
    pub backoff_min_ms: u32,
    pub backoff_max_ms: u32,
}

pub struct BrokerClient<T> {
    transport: T,
    cfg: BrokerConnectionConfig,
    state: BrokerState,
    consecutive_failures: u8,
    last_attempt_ms: u64,
    backoff_ms: u32,
    topic_prefix: heapless::String<{ MAX_TOPIC_LEN }>,
    pub messages_published: u32,
    pub messages_failed: u32,
}

/// Deterministic placeholder for `uniform(0, n)` jitter — a simple
/// xorshift keyed by `now_ms` rather than pulling in a host RNG crate the
/// teacher's stack does not otherwise use.
fn jitter(now_ms: u64, bound: u32) -> u32 {
    if bound == 0 {
        return 0;
    }
    let mut x = now_ms ^ 0x9E37_79B9_7F4A_7C15;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    (x as u32) % bound
}

impl<T: BrokerTransport> BrokerClient<T> {
    pub fn new(transport: T, cfg: BrokerConnectionConfig) -> Self {
        let topic_prefix = Self::build_prefix(&cfg.base_topic, &cfg.device_id);
        Self {
            transport,
            cfg,
            state: BrokerState::Disconnected,
            consecutive_failures: 0,
            last_attempt_ms: 0,
            // Zero so the very first connection attempt is not held back by
            // a backoff that has not been earned yet; real values apply
            // from the first failure onward.
            backoff_ms: 0,
            topic_prefix,
            messages_published: 0,
            messages_failed: 0,
        }
    }

    fn build_prefix(base_topic: &str, device_id: &str) -> heapless::String<{ MAX_TOPIC_LEN }> {
        let mut s = heapless::String::new();
        let _ = s.push_str(base_topic);
        let _ = s.push('/');
        let _ = s.push_str(device_id);
        s
    }

    /// Rebuild the cached topic prefix when `ConfigChanged` alters
    /// `base_topic` or `device_id` (§4.4 "Topic composition").
    pub fn apply_config(&mut self, cfg: BrokerConnectionConfig) {
        self.topic_prefix = Self::build_prefix(&cfg.base_topic, &cfg.device_id);
        self.cfg = cfg;
    }

    pub fn state(&self) -> BrokerState {
        self.state
    }

    fn next_backoff(&mut self, now_ms: u64) -> u32 {
        let exp = self.consecutive_failures.min(5);
        let base = self
            .cfg
            .backoff_min_ms
            .saturating_mul(1u32 << exp)
            .clamp(self.cfg.backoff_min_ms, self.cfg.backoff_max_ms);
        base + jitter(now_ms, base / 10)
    }

    fn transition(&mut self, bus: &EventBus, now_ms: u64, next: BrokerState) {
        if self.state == next {
            return;
        }
        let previous = self.state;
        self.state = next;
        match next {
            BrokerState::Connected => bus.publish(Event::simple(EventKind::MqttConnected, now_ms)),
            BrokerState::Disconnected if previous == BrokerState::Connected => {
                bus.publish(Event::simple(EventKind::MqttDisconnected, now_ms));
            }
            _ => {}
        }
    }

    /// Call every scheduler tick.
    pub fn tick(&mut self, bus: &EventBus, now_ms: u64) {
        match self.state {
            BrokerState::Disconnected => {
                if !self.transport.link_up() {
                    return;
                }
                if now_ms.saturating_sub(self.last_attempt_ms) < u64::from(self.backoff_ms) {
                    return;
                }
                self.transition(bus, now_ms, BrokerState::Connecting);
            }
            BrokerState::Connecting => {
                self.last_attempt_ms = now_ms;
                match self.transport.connect(
                    &self.cfg.host,
                    self.cfg.port,
                    &self.cfg.username,
                    &self.cfg.password,
                ) {
                    Ok(()) => {
                        self.consecutive_failures = 0;
                        self.backoff_ms = self.cfg.backoff_min_ms;
                        self.transition(bus, now_ms, BrokerState::Connected);
                    }
                    Err(fault) => {
                        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                        self.backoff_ms = self.next_backoff(now_ms);
                        bus.publish(Event::new(
                            EventKind::MqttError,
                            now_ms,
                            EventPayload::Fault(Fault {
                                error: Error::TransportError,
                                message: broker_fault_message(fault),
                            }),
                        ));
                        self.transition(bus, now_ms, BrokerState::Error);
                    }
                }
            }
            BrokerState::Error => {
                // "Connection failure -> Error -> Disconnected on next tick
                // -> retry per backoff" (§4.4).
                self.transition(bus, now_ms, BrokerState::Disconnected);
            }
            BrokerState::Connected => {
                if !self.transport.link_up() {
                    self.transport.disconnect();
                    self.transition(bus, now_ms, BrokerState::Disconnected);
                    return;
                }
                while let Some((topic, payload)) = self.transport.poll_message() {
                    bus.publish(Event::new(
                        EventKind::MqttMessage,
                        now_ms,
                        EventPayload::TopicPayload(TopicPayload { topic, payload }),
                    ));
                }
            }
        }
    }

    /// Build a topic under the cached prefix: `base_topic/device_id/suffix`.
    pub fn topic(&self, suffix: &str) -> heapless::String<{ MAX_TOPIC_LEN }> {
        let mut s = self.topic_prefix.clone();
        let _ = s.push('/');
        let _ = s.push_str(suffix);
        s
    }

    pub fn subscribe(&mut self, suffix: &str) -> Result<(), BrokerFault> {
        let topic = self.topic(suffix);
        self.transport.subscribe(&topic)
    }
}

impl<T: BrokerTransport> BatchPublisher for BrokerClient<T> {
    fn is_connected(&self) -> bool {
        self.state == BrokerState::Connected
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Error> {
        match self.transport.publish(topic, payload) {
            Ok(()) => {
                self.messages_published += 1;
                Ok(())
            }
            Err(_) => {
                self.messages_failed += 1;
                Err(Error::TransportError)
            }
        }
    }
}

impl<T: BrokerTransport> Service for BrokerClient<T> {
    fn state(&self) -> ServiceState {
        match self.state {
            BrokerState::Disconnected => ServiceState::Ready,
            BrokerState::Connecting => ServiceState::Initializing,
            BrokerState::Connected => ServiceState::Running,
            BrokerState::Error => ServiceState::Error,
        }
    }

    fn begin(&mut self, _now_ms: u64) {}

    fn tick(&mut self, _now_ms: u64) {
        // Real ticking needs the bus; callers use `BrokerClient::tick` directly.
    }

    fn end(&mut self, _now_ms: u64) {
        self.transport.disconnect();
        self.state = BrokerState::Disconnected;
    }
}

fn broker_fault_message(fault: BrokerFault) -> &'static str {
    match fault {
        BrokerFault::LinkDown => "network link down",
        BrokerFault::ConnectFailed => "broker connect failed",
        BrokerFault::PublishFailed => "broker publish failed",
        BrokerFault::SubscribeFailed => "broker subscribe failed",
        BrokerFault::NotConnected => "broker not connected",
        BrokerFault::Disconnected => "broker disconnected",
    }
}
