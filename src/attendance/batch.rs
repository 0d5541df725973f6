//! `AttendanceRecord`/`AttendanceBatch` and their JSON wire encoding (§3, §6).

use heapless::{String, Vec};
use serde::Serialize;

use crate::uid::CardUid;

/// Typical capacity named in §4.5 ("up to N records each").
pub const MAX_BATCH_RECORDS: usize = 64;

#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub uid: CardUid,
    pub timestamp_ms: u64,
    pub sequence: u32,
}

#[derive(Serialize)]
struct WireRecord {
    uid: String<20>,
    ts: u64,
    seq: u32,
}

#[derive(Serialize)]
struct WireBatch {
    count: u32,
    first_ts: u64,
    last_ts: u64,
    device_id: String<32>,
    location_id: String<32>,
    records: Vec<WireRecord, MAX_BATCH_RECORDS>,
}

/// A batch under construction or awaiting transmission.
#[derive(Debug, Clone, Default)]
pub struct AttendanceBatch {
    pub records: Vec<AttendanceRecord, MAX_BATCH_RECORDS>,
    pub batch_start_ms: u64,
    pub last_record_ms: u64,
    /// Number of times transmission of this exact batch has been attempted.
    pub send_attempts: u8,
}

impl AttendanceBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Append a record, tracking the batch's start time and last-activity
    /// time. Returns `false` if the batch is at capacity (caller should
    /// flush and retry).
    pub fn push(&mut self, record: AttendanceRecord, now_ms: u64) -> bool {
        if self.is_empty() {
            self.batch_start_ms = now_ms;
        }
        if self.records.push(record).is_err() {
            return false;
        }
        self.last_record_ms = now_ms;
        true
    }

    /// Serialise as the JSON document §6 "Broker wire format" describes.
    /// `None` on a serialisation failure, in which case the batch is left
    /// intact for the next attempt (§4.5 "Failure semantics").
    pub fn to_json(
        &self,
        device_id: &str,
        location_id: &str,
    ) -> Option<heapless::Vec<u8, { crate::event::MAX_INLINE_PAYLOAD }>> {
        if self.is_empty() {
            return None;
        }
        let mut records = Vec::new();
        for record in &self.records {
            let uid_hex = record.uid.to_hex();
            let uid = String::try_from(uid_hex.as_str()).ok()?;
            records
                .push(WireRecord {
                    uid,
                    ts: record.timestamp_ms,
                    seq: record.sequence,
                })
                .ok()?;
        }
        let wire = WireBatch {
            count: self.records.len() as u32,
            first_ts: self.batch_start_ms,
            last_ts: self.last_record_ms,
            device_id: String::try_from(device_id).ok()?,
            location_id: String::try_from(location_id).ok()?,
            records,
        };
        let bytes = serde_json::to_vec(&wire).ok()?;
        heapless::Vec::from_slice(&bytes).ok()
    }
}
