//! Ambient hardware helpers that sit outside the port-trait boundary.

pub mod watchdog;
