//! Unified error taxonomy for the attendance reader core.
//!
//! A single `Error` enum that every component funnels into, keeping the
//! scheduler's error handling uniform. All variants are `Copy` so they can
//! be cheaply attached to events and health counters without allocation.
//! Per §7, errors are kinds, not open-ended types — deliberately coarse so
//! handlers can match exhaustively.

use core::fmt;

/// Every fallible operation in the core funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An awaited external condition did not occur within the deadline.
    Timeout,
    /// An operation was requested on a component not in `Ready`/`Running`.
    NotReady,
    /// A parameter violated documented constraints.
    InvalidArg(&'static str),
    /// An allocation (event, batch, buffer slot) was refused.
    NoMemory,
    /// A mutually exclusive resource was already claimed.
    Busy,
    /// A lookup returned nothing.
    NotFound,
    /// Network/broker/hardware I/O failed.
    TransportError,
    /// A persisted structure failed its integrity check.
    Corruption,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::NotReady => write!(f, "component not ready"),
            Self::InvalidArg(msg) => write!(f, "invalid argument: {msg}"),
            Self::NoMemory => write!(f, "allocation refused"),
            Self::Busy => write!(f, "resource busy"),
            Self::NotFound => write!(f, "not found"),
            Self::TransportError => write!(f, "transport error"),
            Self::Corruption => write!(f, "integrity check failed"),
        }
    }
}

impl core::error::Error for Error {}

/// Core-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Per-component error detail
// ---------------------------------------------------------------------------
//
// The top-level `Error` kind is what crosses component boundaries (it is
// what gets attached to XxxError events, per §7's propagation policy). Each
// component additionally tracks a richer, component-local detail enum for
// its own health/diagnostics use, mirroring the teacher's split between the
// top-level `Error` and nested `SensorError`/`ActuatorError`/`CommsError`.

/// NFC reader failure detail, kept alongside the coarse `Error::TransportError`
/// on the published `NfcError` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NfcFault {
    InitFailed,
    CommunicationTimeout,
    CommunicationError,
    InvalidResponse,
    CardReadFailed,
    RecoveryFailed,
    HardwareNotFound,
}

impl fmt::Display for NfcFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitFailed => write!(f, "reader init failed"),
            Self::CommunicationTimeout => write!(f, "reader communication timeout"),
            Self::CommunicationError => write!(f, "reader communication error"),
            Self::InvalidResponse => write!(f, "reader returned invalid response"),
            Self::CardReadFailed => write!(f, "card read failed"),
            Self::RecoveryFailed => write!(f, "reader recovery failed"),
            Self::HardwareNotFound => write!(f, "reader hardware not found"),
        }
    }
}

/// Broker connection failure detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerFault {
    LinkDown,
    ConnectFailed,
    PublishFailed,
    SubscribeFailed,
    NotConnected,
    Disconnected,
}

impl fmt::Display for BrokerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LinkDown => write!(f, "network link down"),
            Self::ConnectFailed => write!(f, "broker connect failed"),
            Self::PublishFailed => write!(f, "broker publish failed"),
            Self::SubscribeFailed => write!(f, "broker subscribe failed"),
            Self::NotConnected => write!(f, "broker not connected"),
            Self::Disconnected => write!(f, "broker disconnected"),
        }
    }
}
