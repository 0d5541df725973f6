//! Property tests for robustness of core data structures.
//!
//! Runs on host (x86_64) only — proptest is not available for ESP32 targets.
//! On ESP32, these tests are compiled out. Grounded on `src/bus.rs`,
//! `src/attendance/debounce.rs`, `src/attendance/offline.rs`, and
//! `src/uid.rs`'s own `#[cfg(test)]` modules, exercised here with
//! arbitrary input sequences instead of literal ones.

#![cfg(not(target_os = "espidf"))]

use attendance_core::attendance::{AttendanceBatch, AttendanceRecord, DebounceRing, OfflineBuffer};
use attendance_core::attendance::debounce::DEBOUNCE_CAPACITY;
use attendance_core::attendance::offline::OFFLINE_CAPACITY;
use attendance_core::bus::{EventBus, RING_CAPACITY};
use attendance_core::config::OfflineOverflowPolicy;
use attendance_core::event::{Event, EventKind, EventPayload};
use attendance_core::uid::CardUid;
use proptest::prelude::*;

fn uid(tag: u8) -> CardUid {
    CardUid::new(&[tag, tag, tag, tag])
}

fn one_record_batch(seq: u32) -> AttendanceBatch {
    let mut batch = AttendanceBatch::default();
    batch.push(
        AttendanceRecord {
            uid: uid((seq % 250) as u8),
            timestamp_ms: 0,
            sequence: seq,
        },
        0,
    );
    batch
}

proptest! {
    // ── EventBus: per-kind ring never exceeds capacity, drop count is exact ──

    /// §3 invariant: "a kind's queue never holds more than its configured
    /// capacity (overflow drops oldest)". For any number of publishes to a
    /// single kind, pending() is capped at RING_CAPACITY and dropped()
    /// accounts for exactly the overflow.
    #[test]
    fn bus_ring_never_exceeds_capacity(n_publishes in 0usize..200) {
        let bus = EventBus::new();
        for i in 0..n_publishes {
            bus.publish(Event::new(EventKind::NfcError, i as u64, EventPayload::None));
        }
        prop_assert!(bus.pending(EventKind::NfcError) <= RING_CAPACITY);
        let expected_dropped = n_publishes.saturating_sub(RING_CAPACITY);
        prop_assert_eq!(bus.dropped(EventKind::NfcError) as usize, expected_dropped);
    }

    /// §8 "publish(N events on kind K) followed by dispatch yields N handler
    /// invocations for each subscriber of K, then pending(K) == 0" — for any
    /// N within ring capacity (no drops), every published event is delivered
    /// exactly once and the queue drains completely.
    #[test]
    fn bus_dispatch_delivers_all_when_within_capacity(n_publishes in 0usize..=RING_CAPACITY) {
        let bus = EventBus::new();
        let delivered = std::cell::RefCell::new(0u32);
        let _sub = bus.subscribe(EventKind::HealthChanged, |_e| {
            *delivered.borrow_mut() += 1;
        });
        for i in 0..n_publishes {
            bus.publish(Event::new(EventKind::HealthChanged, i as u64, EventPayload::None));
        }
        bus.dispatch();
        prop_assert_eq!(*delivered.borrow(), n_publishes as u32);
        prop_assert_eq!(bus.pending(EventKind::HealthChanged), 0);
    }

    // ── Debounce ring: cards_debounced counts exactly the suppressed hits ──

    /// §8 "∀ cards C scanned with UID equal to a UID last seen < debounce_ms
    /// ago, C is dropped; cards_debounced increases by exactly 1" — holds
    /// for an arbitrary sequence of delta-ms presentations of a single
    /// repeating UID, tracked against a reference model.
    #[test]
    fn debounce_suppresses_exactly_within_window(
        deltas in proptest::collection::vec(0u32..2000, 1..50),
    ) {
        let debounce_ms = 500u32;
        let mut ring = DebounceRing::new(debounce_ms);
        let mut now = 0u64;
        let mut last_seen: Option<u64> = None;
        let mut expected_debounced = 0u32;

        for delta in deltas {
            now += u64::from(delta);
            let should_debounce = last_seen
                .map(|prev| now.saturating_sub(prev) < u64::from(debounce_ms))
                .unwrap_or(false);
            let accepted = ring.accept(uid(1), now);
            if should_debounce {
                prop_assert!(!accepted);
                expected_debounced += 1;
            } else {
                prop_assert!(accepted);
                last_seen = Some(now);
            }
        }
        prop_assert_eq!(ring.cards_debounced, expected_debounced);
    }

    /// Distinct UIDs presented once each are never debounced against each
    /// other, regardless of how many fit before the ring wraps.
    #[test]
    fn debounce_distinct_uids_up_to_capacity_never_suppressed(
        count in 1usize..=DEBOUNCE_CAPACITY,
    ) {
        let mut ring = DebounceRing::new(1000);
        for i in 0..count {
            prop_assert!(ring.accept(uid(i as u8), i as u64));
        }
        prop_assert_eq!(ring.cards_debounced, 0);
    }

    // ── Offline buffer: capacity and drop accounting under arbitrary pushes ──

    /// §3 invariant: "The offline buffer's total record count never exceeds
    /// its configured capacity" — for any number of pushes under any
    /// overflow policy, len() never exceeds OFFLINE_CAPACITY.
    #[test]
    fn offline_buffer_never_exceeds_capacity(
        n_pushes in 0usize..100,
        policy_tag in 0u8..3,
    ) {
        let policy = match policy_tag {
            0 => OfflineOverflowPolicy::DropOldest,
            1 => OfflineOverflowPolicy::DropNewest,
            _ => OfflineOverflowPolicy::DropAll,
        };
        let mut buf = OfflineBuffer::new();
        for i in 0..n_pushes {
            buf.push(one_record_batch(i as u32), policy);
        }
        prop_assert!(buf.len() <= OFFLINE_CAPACITY);
    }

    /// §8 "Offline buffer reaches capacity with DropOldest: head batch
    /// discarded, new one tail-inserted" — generalised: after filling to
    /// capacity and pushing `extra` more under DropOldest, the buffer holds
    /// exactly the most recent OFFLINE_CAPACITY batches, oldest-first.
    #[test]
    fn drop_oldest_keeps_most_recent_window(extra in 0u32..20) {
        let mut buf = OfflineBuffer::new();
        let total = OFFLINE_CAPACITY as u32 + extra;
        for seq in 0..total {
            buf.push(one_record_batch(seq), OfflineOverflowPolicy::DropOldest);
        }
        prop_assert_eq!(buf.len(), OFFLINE_CAPACITY.min(total as usize));
        let expected_first_seq = total.saturating_sub(OFFLINE_CAPACITY as u32);
        prop_assert_eq!(buf.front().unwrap().records[0].sequence, expected_first_seq);
    }

    // ── CardUid: equality is over the valid prefix only ──

    /// §3 "Equality is over the valid prefix" — a UID built from a buffer
    /// padded with arbitrary trailing noise beyond its own length compares
    /// equal to the unpadded UID once both are truncated to the same
    /// length, since only the valid prefix participates in equality.
    #[test]
    fn uid_equality_ignores_trailing_noise(
        bytes in proptest::collection::vec(0u8..=255u8, 1..=10),
        noise in proptest::collection::vec(0u8..=255u8, 0..=10),
    ) {
        let a = CardUid::new(&bytes);
        let mut padded = bytes.clone();
        padded.extend(noise);
        let b = CardUid::new(&padded[..bytes.len().min(10)]);
        prop_assert_eq!(a, b);
    }

    /// `to_hex` always yields exactly `2 * len()` uppercase hex characters
    /// (§6 wire format: "uid is uppercase hex, no separators, length =
    /// 2 x valid UID byte count").
    #[test]
    fn uid_hex_length_matches_byte_count(bytes in proptest::collection::vec(0u8..=255u8, 0..=10)) {
        let id = CardUid::new(&bytes);
        let hex = id.to_hex();
        prop_assert_eq!(hex.len(), 2 * id.len());
        prop_assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }
}
