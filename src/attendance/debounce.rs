//! Debounce ring — the entire debounce state is one fixed-capacity ring of
//! recent sightings, searched linearly on every card event (§4.5).

use crate::uid::CardUid;

/// Typical capacity named in §4.5.
pub const DEBOUNCE_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    uid: CardUid,
    last_seen_ms: u64,
    valid: bool,
}

/// Ring of recent `{uid, last_seen_ms, valid}` entries. Debounce applies
/// across all cards, not per-card — this ring *is* the debounce state.
pub struct DebounceRing {
    slots: [Slot; DEBOUNCE_CAPACITY],
    write_idx: usize,
    debounce_ms: u32,
    pub cards_debounced: u32,
}

impl DebounceRing {
    pub fn new(debounce_ms: u32) -> Self {
        Self {
            slots: [Slot::default(); DEBOUNCE_CAPACITY],
            write_idx: 0,
            debounce_ms,
            cards_debounced: 0,
        }
    }

    pub fn set_debounce_ms(&mut self, debounce_ms: u32) {
        self.debounce_ms = debounce_ms;
    }

    /// Returns `true` if the card should be accepted (not a duplicate
    /// within the debounce window).
    pub fn accept(&mut self, uid: CardUid, now_ms: u64) -> bool {
        if let Some(slot) = self
            .slots
            .iter_mut()
            .find(|s| s.valid && s.uid == uid)
        {
            if now_ms.saturating_sub(slot.last_seen_ms) < u64::from(self.debounce_ms) {
                self.cards_debounced += 1;
                return false;
            }
            slot.last_seen_ms = now_ms;
            return true;
        }

        // Not present: overwrite the next ring slot, advancing the write
        // index on any miss (accepted card or not — §9 Open Question: the
        // write index always advances so a burst of distinct cards cannot
        // wedge the ring on one stale entry).
        let idx = self.write_idx;
        self.slots[idx] = Slot {
            uid,
            last_seen_ms: now_ms,
            valid: true,
        };
        self.write_idx = (self.write_idx + 1) % DEBOUNCE_CAPACITY;
        true
    }
}
