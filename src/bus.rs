//! EventBus — typed, per-kind queued pub/sub with single-threaded dispatch
//! (§4.1).
//!
//! Grounded on the teacher's `src/events.rs` lock-free SPSC ring (atomic
//! head/tail, ISR-safe push) generalised from one flat ring of `u8` tags to
//! one bounded ring *per event kind* carrying a typed payload, and on
//! `original_source/include/core/EventBus.hpp` for the shared-vs-exclusive
//! subscriber model and scoped-connection lifetime.
//!
//! Each kind's ring is protected by a brief `critical_section` rather than
//! raw atomics, because `Event` owns heapless collections and is not
//! `Copy` — this matches §5's interrupt contract verbatim ("the reference
//! achieves this by disabling interrupts briefly around the ring-buffer
//! write") without requiring unsafe in-place swaps.

use core::cell::{Cell, RefCell};
use critical_section::Mutex;
use heapless::Deque;
use std::panic::{self, AssertUnwindSafe};

use crate::event::{Event, EventKind};

/// Ring capacity per event kind (§4.1 "the reference implementation uses 4").
pub const RING_CAPACITY: usize = 4;

struct Ring {
    queue: Deque<Event, RING_CAPACITY>,
    dropped: u32,
    peak_depth: u32,
}

impl Ring {
    const fn new() -> Self {
        Self {
            queue: Deque::new(),
            dropped: 0,
            peak_depth: 0,
        }
    }

    /// Push, evicting the oldest entry on overflow. Always "succeeds" from
    /// the caller's point of view (§4.1: "Returns `Ok` even after a drop").
    fn push(&mut self, event: Event) {
        if self.queue.is_full() {
            let _ = self.queue.pop_front();
            self.dropped += 1;
        }
        let _ = self.queue.push_back(event);
        self.peak_depth = self.peak_depth.max(self.queue.len() as u32);
    }

    fn pop(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

type SharedHandler = Box<dyn FnMut(&Event)>;
type ExclusiveHandler = Box<dyn FnMut(Event)>;

enum Subscribers {
    Empty,
    Shared(Vec<(u32, SharedHandler)>),
    Exclusive(u32, ExclusiveHandler),
}

impl Subscribers {
    const fn new() -> Self {
        Self::Empty
    }
}

/// A scoped subscription: registers on construction, unsubscribes on drop
/// (§9 "Scoped subscriptions" — never expose a bare id the caller must
/// remember to free).
pub struct Subscription<'bus> {
    bus: &'bus EventBus,
    kind: EventKind,
    id: u32,
    exclusive: bool,
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.kind, self.id, self.exclusive);
    }
}

/// Typed, per-kind queued pub/sub bus. See module docs and §4.1.
pub struct EventBus {
    rings: [Mutex<RefCell<Ring>>; EventKind::COUNT],
    subscribers: [RefCell<Subscribers>; EventKind::COUNT],
    next_id: Cell<u32>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            rings: core::array::from_fn(|_| Mutex::new(RefCell::new(Ring::new()))),
            subscribers: core::array::from_fn(|_| RefCell::new(Subscribers::new())),
            next_id: Cell::new(1),
        }
    }

    fn alloc_id(&self) -> u32 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    /// Queue an event for dispatch. ISR-safe: no allocation, a brief
    /// critical section around the ring write (§4.1, §5).
    pub fn publish(&self, event: Event) {
        let idx = event.kind.index();
        critical_section::with(|cs| {
            self.rings[idx].borrow(cs).borrow_mut().push(event);
        });
    }

    /// Register a shared (multi-subscriber, borrowed-delivery) handler.
    /// Fails if an exclusive subscriber already holds this kind (§4.1).
    /// Must be called from main context only.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Option<Subscription<'_>>
    where
        F: FnMut(&Event) + 'static,
    {
        let mut slot = self.subscribers[kind.index()].borrow_mut();
        match &mut *slot {
            Subscribers::Exclusive(..) => None,
            Subscribers::Empty => {
                let id = self.alloc_id();
                let mut v = Vec::new();
                v.push((id, Box::new(handler) as SharedHandler));
                *slot = Subscribers::Shared(v);
                drop(slot);
                Some(Subscription {
                    bus: self,
                    kind,
                    id,
                    exclusive: false,
                })
            }
            Subscribers::Shared(v) => {
                let id = self.alloc_id();
                v.push((id, Box::new(handler)));
                drop(slot);
                Some(Subscription {
                    bus: self,
                    kind,
                    id,
                    exclusive: false,
                })
            }
        }
    }

    /// Register the single exclusive (move-delivery) handler for a kind.
    /// Fails if a shared or another exclusive subscriber already exists.
    pub fn subscribe_exclusive<F>(&self, kind: EventKind, handler: F) -> Option<Subscription<'_>>
    where
        F: FnMut(Event) + 'static,
    {
        let mut slot = self.subscribers[kind.index()].borrow_mut();
        if !matches!(&*slot, Subscribers::Empty) {
            return None;
        }
        let id = self.alloc_id();
        *slot = Subscribers::Exclusive(id, Box::new(handler));
        drop(slot);
        Some(Subscription {
            bus: self,
            kind,
            id,
            exclusive: true,
        })
    }

    fn unsubscribe(&self, kind: EventKind, id: u32, exclusive: bool) {
        let mut slot = self.subscribers[kind.index()].borrow_mut();
        match &mut *slot {
            Subscribers::Shared(v) if !exclusive => {
                v.retain(|(hid, _)| *hid != id);
                if v.is_empty() {
                    *slot = Subscribers::Empty;
                }
            }
            Subscribers::Exclusive(hid, _) if exclusive && *hid == id => {
                *slot = Subscribers::Empty;
            }
            _ => {}
        }
    }

    /// Drain every kind's ring, delivering to subscribers in FIFO order per
    /// kind. Events published by a handler during this call are queued for
    /// the *next* `dispatch()` (no re-entrant delivery, §4.1, §5).
    pub fn dispatch(&self) -> usize {
        // Snapshot every kind's depth before draining any of them. A
        // handler for kind `i` may publish to kind `j` (including `j < i`,
        // since cross-kind order within a pass is unspecified); reading
        // `due` for kind `j` only once, up front, ensures that publish
        // waits for the next `dispatch()` instead of being drained later in
        // this same pass.
        let due: [usize; EventKind::COUNT] =
            core::array::from_fn(|idx| critical_section::with(|cs| self.rings[idx].borrow(cs).borrow().len()));

        let mut total = 0usize;
        for idx in 0..EventKind::COUNT {
            for _ in 0..due[idx] {
                let event = critical_section::with(|cs| self.rings[idx].borrow(cs).borrow_mut().pop());
                let Some(event) = event else { break };
                self.deliver(idx, event);
                total += 1;
            }
        }
        total
    }

    fn deliver(&self, idx: usize, event: Event) {
        let mut slot = self.subscribers[idx].borrow_mut();
        match &mut *slot {
            Subscribers::Exclusive(_, handler) => {
                let handler = AssertUnwindSafe(handler);
                let _ = panic::catch_unwind(move || (handler.0)(event));
            }
            Subscribers::Shared(v) => {
                for (_, handler) in v.iter_mut() {
                    let handler = AssertUnwindSafe(handler);
                    let event_ref = &event;
                    let _ = panic::catch_unwind(move || (handler.0)(event_ref));
                }
            }
            Subscribers::Empty => {}
        }
    }

    /// Total events awaiting dispatch across all kinds.
    pub fn pending_total(&self) -> usize {
        (0..EventKind::COUNT)
            .map(|idx| critical_section::with(|cs| self.rings[idx].borrow(cs).borrow().len()))
            .sum()
    }

    pub fn pending(&self, kind: EventKind) -> usize {
        critical_section::with(|cs| self.rings[kind.index()].borrow(cs).borrow().len())
    }

    pub fn dropped_total(&self) -> u32 {
        (0..EventKind::COUNT)
            .map(|idx| critical_section::with(|cs| self.rings[idx].borrow(cs).borrow().dropped))
            .sum()
    }

    pub fn dropped(&self, kind: EventKind) -> u32 {
        critical_section::with(|cs| self.rings[kind.index()].borrow(cs).borrow().dropped)
    }

    pub fn peak_depth(&self, kind: EventKind) -> u32 {
        critical_section::with(|cs| self.rings[kind.index()].borrow(cs).borrow().peak_depth)
    }

    pub fn reset_stats(&self) {
        for idx in 0..EventKind::COUNT {
            critical_section::with(|cs| {
                let mut ring = self.rings[idx].borrow(cs).borrow_mut();
                ring.dropped = 0;
                ring.peak_depth = 0;
            });
        }
    }
}
