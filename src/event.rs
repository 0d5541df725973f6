//! The closed event taxonomy (§6 "Event kinds") and its tagged payload.
//!
//! Mirrors the teacher's `events.rs` choice of a sum type with one variant
//! per kind over type-erased boxes (§9 "Dynamic dispatch via tagged
//! payloads") — the set is small and stable, so handlers match
//! exhaustively instead of downcasting.

use crate::error::Error;
use crate::ports::WakeupReason;
use crate::uid::CardUid;
use heapless::{String, Vec};

/// Maximum broker payload carried inline in an event (attendance batches and
/// health reports are serialised into this before publish).
pub const MAX_INLINE_PAYLOAD: usize = 512;
/// Maximum topic length carried inline in an event.
pub const MAX_TOPIC_LEN: usize = 64;
/// Maximum length of a short diagnostic message attached to a fault event.
pub const MAX_FAULT_MSG_LEN: usize = 48;

/// Closed set of event kinds. Every implementation must support all of
/// them (§6); `_Count` is not itself a kind, only a bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventKind {
    SystemReady = 0,
    SystemError,
    ConfigChanged,
    ConfigError,
    WifiConnected,
    WifiDisconnected,
    WifiError,
    MqttConnected,
    MqttDisconnected,
    MqttError,
    MqttMessage,
    MqttPublishRequest,
    MqttSubscribeRequest,
    NfcReady,
    CardScanned,
    CardRemoved,
    NfcError,
    AttendanceRecorded,
    AttendanceError,
    OtaStarted,
    OtaProgress,
    OtaCompleted,
    OtaError,
    FeedbackRequest,
    HealthChanged,
    PowerStateChange,
    SleepRequested,
    WakeupOccurred,
}

impl EventKind {
    /// Total number of kinds — the EventBus allocates one ring + subscriber
    /// list per kind, indexed `0..COUNT`.
    pub const COUNT: usize = 28;

    pub const fn index(self) -> usize {
        self as u8 as usize
    }

    /// Inverse of [`Self::index`]. Panics on an out-of-range index, which
    /// would indicate a bug in the bus's own fixed-size arrays, not bad
    /// external input.
    pub const fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::SystemReady,
            1 => Self::SystemError,
            2 => Self::ConfigChanged,
            3 => Self::ConfigError,
            4 => Self::WifiConnected,
            5 => Self::WifiDisconnected,
            6 => Self::WifiError,
            7 => Self::MqttConnected,
            8 => Self::MqttDisconnected,
            9 => Self::MqttError,
            10 => Self::MqttMessage,
            11 => Self::MqttPublishRequest,
            12 => Self::MqttSubscribeRequest,
            13 => Self::NfcReady,
            14 => Self::CardScanned,
            15 => Self::CardRemoved,
            16 => Self::NfcError,
            17 => Self::AttendanceRecorded,
            18 => Self::AttendanceError,
            19 => Self::OtaStarted,
            20 => Self::OtaProgress,
            21 => Self::OtaCompleted,
            22 => Self::OtaError,
            23 => Self::FeedbackRequest,
            24 => Self::HealthChanged,
            25 => Self::PowerStateChange,
            26 => Self::SleepRequested,
            27.. => Self::WakeupOccurred,
        }
    }

    /// Lower value = more urgent. Errors and card events are time-sensitive;
    /// periodic reports are not. Informational only — the bus itself makes
    /// no ordering promise across kinds (§4.1 "Ordering").
    pub const fn default_priority(self) -> u8 {
        match self {
            Self::SystemError | Self::NfcError | Self::AttendanceError | Self::OtaError => 0,
            Self::CardScanned | Self::CardRemoved | Self::AttendanceRecorded => 10,
            Self::WifiError
            | Self::MqttError
            | Self::ConfigError
            | Self::WifiDisconnected
            | Self::MqttDisconnected => 15,
            Self::MqttMessage | Self::MqttPublishRequest | Self::MqttSubscribeRequest => 20,
            Self::PowerStateChange | Self::SleepRequested | Self::WakeupOccurred => 25,
            Self::FeedbackRequest => 30,
            Self::HealthChanged => 40,
            Self::SystemReady
            | Self::ConfigChanged
            | Self::WifiConnected
            | Self::MqttConnected
            | Self::NfcReady
            | Self::OtaStarted
            | Self::OtaProgress
            | Self::OtaCompleted => 50,
        }
    }
}

/// Health state of one component, or the system aggregate (§3, §4.7).
/// `severity()` gives `Healthy < Degraded = Unknown < Unhealthy`, fixed per
/// §9 "Unresolved: health-state ordering" — finer states, if ever added,
/// go at the worst end rather than between existing ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unknown,
    Unhealthy,
}

impl HealthState {
    pub const fn severity(self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Degraded | Self::Unknown => 1,
            Self::Unhealthy => 2,
        }
    }

    /// Worst of two states by severity; ties prefer `self`.
    pub fn worse(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

/// Sleep/active power state (§4.6). `PowerStateChange` carries a `target`
/// and `previous` of this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Active,
    Idle,
    LightSleep,
    ModemSleep,
    DeepSleep,
    Hibernating,
    WakingUp,
}

/// Feedback request kind, consumed by a user-feedback collaborator this
/// core does not implement (§1 "Out of scope").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    CardAccepted,
    CardRejected,
    Startup,
    Error,
}

/// A topic/payload pair, used for both inbound `MqttMessage` and outbound
/// `MqttPublishRequest`/`MqttSubscribeRequest`.
#[derive(Debug, Clone)]
pub struct TopicPayload {
    pub topic: String<MAX_TOPIC_LEN>,
    pub payload: Vec<u8, MAX_INLINE_PAYLOAD>,
}

/// Short diagnostic detail attached to an `XxxError` event.
#[derive(Debug, Clone, Copy)]
pub struct Fault {
    pub error: Error,
    pub message: &'static str,
}

/// Per-kind payload. `None` for kinds that carry no data.
#[derive(Debug, Clone)]
pub enum EventPayload {
    None,
    Fault(Fault),
    Card {
        uid: CardUid,
    },
    TopicPayload(TopicPayload),
    /// `MqttSubscribeRequest` carries only a topic, no body.
    Topic(String<MAX_TOPIC_LEN>),
    AttendanceRecorded {
        sequence: u32,
        uid: CardUid,
        monotonic_ms: u64,
    },
    Health {
        component: String<16>,
        state: HealthState,
    },
    Power {
        target: PowerState,
        previous: PowerState,
    },
    Wakeup(WakeupReason),
    Feedback(FeedbackKind),
    OtaProgress(u8),
}

/// A tagged, queued event (§3 Data Model). Events are moved, never shared
/// mutably — a shared subscriber sees `&Event`, an exclusive subscriber
/// takes ownership.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp_ms: u64,
    pub priority: u8,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(kind: EventKind, timestamp_ms: u64, payload: EventPayload) -> Self {
        Self {
            kind,
            timestamp_ms,
            priority: kind.default_priority(),
            payload,
        }
    }

    /// Convenience constructor for kinds with no payload.
    pub fn simple(kind: EventKind, timestamp_ms: u64) -> Self {
        Self::new(kind, timestamp_ms, EventPayload::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_matches_variant_list() {
        // Highest discriminant used above + 1 must equal COUNT.
        assert_eq!(EventKind::WakeupOccurred.index() + 1, EventKind::COUNT);
    }

    #[test]
    fn health_state_ordering_is_monotonic() {
        assert!(HealthState::Healthy.severity() < HealthState::Degraded.severity());
        assert_eq!(HealthState::Degraded.severity(), HealthState::Unknown.severity());
        assert!(HealthState::Unknown.severity() < HealthState::Unhealthy.severity());
        assert_eq!(HealthState::Healthy.worse(HealthState::Unhealthy), HealthState::Unhealthy);
    }
}
