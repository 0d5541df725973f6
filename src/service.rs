//! Shared service lifecycle.
//!
//! Every long-lived component (`EventBus`'s dispatch loop aside, which has
//! no lifecycle of its own) moves through the same state machine: created →
//! `begin()` → ticked every scheduler pass → `end()`. This mirrors the
//! `IService` base the original firmware gave every service, expressed here
//! as a trait instead of a virtual base class.

use core::fmt;

/// Lifecycle state of a component. A component may only publish domain
/// events while `Ready` or `Running` (§3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl ServiceState {
    /// Whether public operations are permitted in this state.
    pub const fn is_operational(self) -> bool {
        matches!(self, Self::Ready | Self::Running)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Common lifecycle surface implemented by every scheduled component.
///
/// `begin()` moves `Uninitialized -> Initializing -> Ready` (or `Running`
/// for components with no connecting phase). `tick()` is invoked by the
/// scheduler at the component's declared cadence and may itself promote
/// `Ready -> Running` on first successful connection. `end()` moves any
/// state to `Stopping -> Stopped`.
pub trait Service {
    /// Current lifecycle state.
    fn state(&self) -> ServiceState;

    /// Transition out of `Uninitialized`.
    fn begin(&mut self, now_ms: u64);

    /// One scheduler-driven step. Must return promptly (§5 target ≤ 10ms).
    fn tick(&mut self, now_ms: u64);

    /// Transition to `Stopped`, releasing any held resources.
    fn end(&mut self, now_ms: u64);
}
