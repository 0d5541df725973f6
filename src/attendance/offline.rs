//! Offline buffer — a bounded FIFO of batches awaiting transmission
//! (§4.5 "Offline buffer").

use heapless::Deque;

use super::batch::AttendanceBatch;
use crate::config::OfflineOverflowPolicy;

/// Typical capacity named in §4.5.
pub const OFFLINE_CAPACITY: usize = 10;

#[derive(Default)]
pub struct OfflineBuffer {
    batches: Deque<AttendanceBatch, OFFLINE_CAPACITY>,
    pub records_dropped: u32,
}

impl OfflineBuffer {
    pub fn new() -> Self {
        Self {
            batches: Deque::new(),
            records_dropped: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Insert a batch, applying the configured overflow policy when full.
    pub fn push(&mut self, batch: AttendanceBatch, policy: OfflineOverflowPolicy) {
        if self.batches.is_full() {
            match policy {
                OfflineOverflowPolicy::DropOldest => {
                    if let Some(evicted) = self.batches.pop_front() {
                        self.records_dropped += evicted.len() as u32;
                    }
                    let _ = self.batches.push_back(batch);
                }
                OfflineOverflowPolicy::DropNewest => {
                    self.records_dropped += batch.len() as u32;
                }
                OfflineOverflowPolicy::DropAll => {
                    while let Some(evicted) = self.batches.pop_front() {
                        self.records_dropped += evicted.len() as u32;
                    }
                    let _ = self.batches.push_back(batch);
                }
            }
            return;
        }
        let _ = self.batches.push_back(batch);
    }

    /// Peek the oldest pending batch without removing it.
    pub fn front(&self) -> Option<&AttendanceBatch> {
        self.batches.front()
    }

    pub fn front_mut(&mut self) -> Option<&mut AttendanceBatch> {
        self.batches.front_mut()
    }

    /// Remove the oldest batch — called on successful send, or when a
    /// batch exhausts `max_send_attempts` and is dropped as a loss.
    pub fn pop_front(&mut self) -> Option<AttendanceBatch> {
        self.batches.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uid::CardUid;

    fn one_record_batch(tag: u8) -> AttendanceBatch {
        let mut batch = AttendanceBatch::default();
        batch.push(
            super::super::batch::AttendanceRecord {
                uid: CardUid::new(&[tag]),
                timestamp_ms: 0,
                sequence: u32::from(tag),
            },
            0,
        );
        batch
    }

    #[test]
    fn drop_oldest_evicts_head_and_accepts_new() {
        let mut buf = OfflineBuffer::new();
        for i in 0..(OFFLINE_CAPACITY as u8) {
            buf.push(one_record_batch(i), OfflineOverflowPolicy::DropOldest);
        }
        buf.push(one_record_batch(200), OfflineOverflowPolicy::DropOldest);
        assert_eq!(buf.len(), OFFLINE_CAPACITY);
        assert_eq!(buf.records_dropped, 1);
        assert_eq!(buf.front().unwrap().records[0].sequence, 1);
    }

    #[test]
    fn drop_newest_refuses_insertion_when_full() {
        let mut buf = OfflineBuffer::new();
        for i in 0..(OFFLINE_CAPACITY as u8) {
            buf.push(one_record_batch(i), OfflineOverflowPolicy::DropNewest);
        }
        buf.push(one_record_batch(200), OfflineOverflowPolicy::DropNewest);
        assert_eq!(buf.len(), OFFLINE_CAPACITY);
        assert_eq!(buf.records_dropped, 1);
        assert_eq!(buf.front().unwrap().records[0].sequence, 0);
    }

    #[test]
    fn drop_all_clears_buffer_and_keeps_only_new_batch() {
        let mut buf = OfflineBuffer::new();
        for i in 0..(OFFLINE_CAPACITY as u8) {
            buf.push(one_record_batch(i), OfflineOverflowPolicy::DropAll);
        }
        buf.push(one_record_batch(200), OfflineOverflowPolicy::DropAll);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.records_dropped, OFFLINE_CAPACITY as u32);
    }

    #[test]
    fn drain_order_is_oldest_first() {
        let mut buf = OfflineBuffer::new();
        buf.push(one_record_batch(1), OfflineOverflowPolicy::DropOldest);
        buf.push(one_record_batch(2), OfflineOverflowPolicy::DropOldest);
        let first = buf.pop_front().unwrap();
        assert_eq!(first.records[0].sequence, 1);
        let second = buf.pop_front().unwrap();
        assert_eq!(second.records[0].sequence, 2);
    }
}
