//! Attendance pipeline: debounce → batch → offline buffer → publish (§4.5).
//!
//! Grounded on `original_source/include/services/AttendanceBatcher.hpp`'s
//! batch/offline-buffer split and on the teacher's `diagnostics.rs` style of
//! a plain struct with counters sampled by Health, rather than its own
//! service lifecycle — the pipeline has no states of its own in the spec,
//! only a batch-in-progress and a buffer.

pub mod batch;
pub mod debounce;
pub mod offline;

use heapless::String;

use crate::bus::EventBus;
use crate::config::{AttendanceConfig, OfflineOverflowPolicy};
use crate::error::Error;
use crate::event::{Event, EventKind, EventPayload, Fault};
use crate::uid::CardUid;

pub use batch::{AttendanceBatch, AttendanceRecord, MAX_BATCH_RECORDS};
pub use debounce::DebounceRing;
pub use offline::OfflineBuffer;

/// Narrow port Attendance uses to hand a serialised batch to the broker
/// layer without depending on `BrokerClient` directly (§5 "Hardware
/// peripherals ... owned exclusively by their service").
pub trait BatchPublisher {
    fn is_connected(&self) -> bool;
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Error>;
}

const ATTENDANCE_TOPIC: &str = "attendance/batch";

pub struct AttendancePipeline {
    cfg: AttendanceConfig,
    device_id: String<32>,
    location_id: String<32>,
    debounce: DebounceRing,
    current: AttendanceBatch,
    offline: OfflineBuffer,
    sequence: u32,
    pub records_recorded: u32,
}

impl AttendancePipeline {
    pub fn new(cfg: AttendanceConfig, device_id: &str, location_id: &str) -> Self {
        let debounce = DebounceRing::new(cfg.debounce_ms);
        Self {
            debounce,
            current: AttendanceBatch::default(),
            offline: OfflineBuffer::new(),
            sequence: 0,
            device_id: String::try_from(device_id).unwrap_or_default(),
            location_id: String::try_from(location_id).unwrap_or_default(),
            cfg,
            records_recorded: 0,
        }
    }

    pub fn apply_config(&mut self, cfg: AttendanceConfig, device_id: &str, location_id: &str) {
        self.debounce.set_debounce_ms(cfg.debounce_ms);
        self.device_id = String::try_from(device_id).unwrap_or_default();
        self.location_id = String::try_from(location_id).unwrap_or_default();
        self.cfg = cfg;
    }

    pub fn cards_debounced(&self) -> u32 {
        self.debounce.cards_debounced
    }

    pub fn records_dropped(&self) -> u32 {
        self.offline.records_dropped
    }

    pub fn offline_batches_pending(&self) -> usize {
        self.offline.len()
    }

    /// §4.5 "Debounce" + "Record creation" + immediate flush triggers.
    pub fn on_card_scanned<P: BatchPublisher>(
        &mut self,
        bus: &EventBus,
        publisher: &mut P,
        uid: CardUid,
        now_ms: u64,
    ) {
        if !self.debounce.accept(uid, now_ms) {
            return;
        }
        self.sequence += 1;
        let record = AttendanceRecord {
            uid,
            timestamp_ms: now_ms,
            sequence: self.sequence,
        };
        self.current.push(record, now_ms);
        self.records_recorded += 1;
        bus.publish(Event::new(
            EventKind::AttendanceRecorded,
            now_ms,
            EventPayload::AttendanceRecorded {
                sequence: self.sequence,
                uid,
                monotonic_ms: now_ms,
            },
        ));

        let should_flush = !self.cfg.batching_enabled
            || self.current.len() >= usize::from(self.cfg.batch_max_size);
        if should_flush {
            self.flush(bus, publisher, now_ms);
        }
    }

    /// Call every scheduler tick: checks age/idle flush triggers and drains
    /// the offline buffer when connected.
    pub fn tick<P: BatchPublisher>(&mut self, bus: &EventBus, publisher: &mut P, now_ms: u64) {
        if !self.current.is_empty() {
            let age_due =
                now_ms.saturating_sub(self.current.batch_start_ms) >= u64::from(self.cfg.batch_flush_interval_ms);
            let idle_due =
                now_ms.saturating_sub(self.current.last_record_ms) >= u64::from(self.cfg.batch_flush_on_idle_ms);
            if age_due || idle_due {
                self.flush(bus, publisher, now_ms);
            }
        }
        self.drain_offline(bus, publisher, now_ms);
    }

    /// External trigger from PowerManager before sleep (§4.6 sleep
    /// sequence references "FlushForSleep").
    pub fn flush_for_sleep<P: BatchPublisher>(&mut self, bus: &EventBus, publisher: &mut P, now_ms: u64) {
        if !self.current.is_empty() {
            self.flush(bus, publisher, now_ms);
        }
    }

    fn flush<P: BatchPublisher>(&mut self, bus: &EventBus, publisher: &mut P, now_ms: u64) {
        let Some(json) = self.current.to_json(&self.device_id, &self.location_id) else {
            // Serialisation failure: leave the batch in place (§4.5).
            bus.publish(Event::new(
                EventKind::AttendanceError,
                now_ms,
                EventPayload::Fault(Fault {
                    error: Error::InvalidArg("batch"),
                    message: "batch serialisation failed",
                }),
            ));
            return;
        };

        let batch = core::mem::take(&mut self.current);
        if publisher.is_connected() {
            match publisher.publish(ATTENDANCE_TOPIC, &json) {
                Ok(()) => {}
                Err(_) => self.offline.push(batch, self.cfg.overflow_policy),
            }
        } else {
            self.offline.push(batch, self.cfg.overflow_policy);
        }
    }

    fn drain_offline<P: BatchPublisher>(&mut self, bus: &EventBus, publisher: &mut P, now_ms: u64) {
        if !publisher.is_connected() {
            return;
        }
        let mut drained = 0u8;
        while drained < self.cfg.drain_batches_per_tick && !self.offline.is_empty() {
            let Some(batch) = self.offline.front() else { break };
            let Some(json) = batch.to_json(&self.device_id, &self.location_id) else {
                break;
            };
            match publisher.publish(ATTENDANCE_TOPIC, &json) {
                Ok(()) => {
                    self.offline.pop_front();
                }
                Err(_) => {
                    let exhausted = {
                        let front = self.offline.front_mut().expect("checked non-empty above");
                        front.send_attempts = front.send_attempts.saturating_add(1);
                        front.send_attempts >= self.cfg.max_send_attempts
                    };
                    if exhausted {
                        if let Some(lost) = self.offline.pop_front() {
                            self.offline.records_dropped += lost.len() as u32;
                            bus.publish(Event::new(
                                EventKind::AttendanceError,
                                now_ms,
                                EventPayload::Fault(Fault {
                                    error: Error::TransportError,
                                    message: "batch dropped after max send attempts",
                                }),
                            ));
                        }
                    }
                    break;
                }
            }
            drained += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakePublisher {
        connected: bool,
        should_fail: bool,
        published: std::vec::Vec<std::vec::Vec<u8>>,
    }

    impl BatchPublisher for FakePublisher {
        fn is_connected(&self) -> bool {
            self.connected
        }
        fn publish(&mut self, _topic: &str, payload: &[u8]) -> Result<(), Error> {
            if self.should_fail {
                return Err(Error::TransportError);
            }
            self.published.push(payload.to_vec());
            Ok(())
        }
    }

    fn cfg() -> AttendanceConfig {
        AttendanceConfig {
            debounce_ms: 100,
            batch_max_size: 3,
            batch_flush_interval_ms: 10_000,
            batch_flush_on_idle_ms: 5_000,
            offline_capacity_batches: 10,
            overflow_policy: OfflineOverflowPolicy::DropOldest,
            batching_enabled: true,
            max_send_attempts: 2,
            drain_batches_per_tick: 3,
        }
    }

    #[test]
    fn connected_flush_publishes_and_clears_batch() {
        let bus = EventBus::new();
        let mut pipeline = AttendancePipeline::new(cfg(), "reader-1", "lobby");
        let mut publisher = FakePublisher {
            connected: true,
            should_fail: false,
            published: vec![],
        };
        pipeline.on_card_scanned(&bus, &mut publisher, CardUid::new(&[1]), 0);
        pipeline.on_card_scanned(&bus, &mut publisher, CardUid::new(&[2]), 10);
        pipeline.on_card_scanned(&bus, &mut publisher, CardUid::new(&[3]), 20);
        assert_eq!(publisher.published.len(), 1);
        assert!(pipeline.current.is_empty());
    }

    #[test]
    fn disconnected_flush_goes_to_offline_buffer() {
        let bus = EventBus::new();
        let mut pipeline = AttendancePipeline::new(cfg(), "reader-1", "lobby");
        let mut publisher = FakePublisher {
            connected: false,
            should_fail: false,
            published: vec![],
        };
        for i in 0..3u8 {
            pipeline.on_card_scanned(&bus, &mut publisher, CardUid::new(&[i]), u64::from(i));
        }
        assert_eq!(pipeline.offline_batches_pending(), 1);
        assert!(publisher.published.is_empty());
    }

    #[test]
    fn reconnect_drains_offline_buffer() {
        let bus = EventBus::new();
        let mut pipeline = AttendancePipeline::new(cfg(), "reader-1", "lobby");
        let mut publisher = FakePublisher {
            connected: false,
            should_fail: false,
            published: vec![],
        };
        for i in 0..3u8 {
            pipeline.on_card_scanned(&bus, &mut publisher, CardUid::new(&[i]), u64::from(i));
        }
        assert_eq!(pipeline.offline_batches_pending(), 1);

        publisher.connected = true;
        pipeline.tick(&bus, &mut publisher, 100);
        assert_eq!(pipeline.offline_batches_pending(), 0);
        assert_eq!(publisher.published.len(), 1);
    }

    #[test]
    fn debounced_cards_do_not_create_records() {
        let bus = EventBus::new();
        let mut pipeline = AttendancePipeline::new(cfg(), "reader-1", "lobby");
        let mut publisher = FakePublisher {
            connected: true,
            should_fail: false,
            published: vec![],
        };
        pipeline.on_card_scanned(&bus, &mut publisher, CardUid::new(&[9]), 0);
        pipeline.on_card_scanned(&bus, &mut publisher, CardUid::new(&[9]), 10);
        assert_eq!(pipeline.cards_debounced(), 1);
        assert_eq!(pipeline.records_recorded, 1);
    }

    #[test]
    fn idle_trigger_flushes_partial_batch() {
        let bus = EventBus::new();
        let mut pipeline = AttendancePipeline::new(cfg(), "reader-1", "lobby");
        let mut publisher = FakePublisher {
            connected: true,
            should_fail: false,
            published: vec![],
        };
        pipeline.on_card_scanned(&bus, &mut publisher, CardUid::new(&[1]), 0);
        pipeline.tick(&bus, &mut publisher, 6_000); // idle threshold is 5000ms
        assert_eq!(publisher.published.len(), 1);
        assert!(pipeline.current.is_empty());
    }

    #[test]
    fn exhausted_send_attempts_are_counted_as_loss() {
        let bus = EventBus::new();
        let mut pipeline = AttendancePipeline::new(cfg(), "reader-1", "lobby");
        let mut publisher = FakePublisher {
            connected: false,
            should_fail: false,
            published: vec![],
        };
        pipeline.on_card_scanned(&bus, &mut publisher, CardUid::new(&[1]), 0);
        pipeline.on_card_scanned(&bus, &mut publisher, CardUid::new(&[2]), 1);
        pipeline.on_card_scanned(&bus, &mut publisher, CardUid::new(&[3]), 2);
        assert_eq!(pipeline.offline_batches_pending(), 1);

        publisher.connected = true;
        publisher.should_fail = true;
        pipeline.tick(&bus, &mut publisher, 100); // attempt 1, fails
        assert_eq!(pipeline.offline_batches_pending(), 1);
        pipeline.tick(&bus, &mut publisher, 200); // attempt 2, fails, exhausted
        assert_eq!(pipeline.offline_batches_pending(), 0);
        assert_eq!(pipeline.records_dropped(), 3);
    }
}
