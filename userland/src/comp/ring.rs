//! Shared-memory input ring: producer (compositor) and consumer
//! (client) halves.
//!
//! The ring is strictly single-producer single-consumer. Ordering: the
//! producer writes the slot, issues a full fence, then advances `w`;
//! the consumer reads `w` with acquire semantics, copies the slot,
//! fences, then advances `r`. Sleeps go through futexes on the opposite
//! cursor; each side clears the peer's WAIT flag before waking it, so a
//! wake always happens-after the flag clear it pairs with.
//!
//! When the ring is full the producer never blocks for pointer motion:
//! the newest mouse event lands in a one-slot coalesce buffer (owned by
//! the single producer, so a plain field is sound) and `dropped` is
//! bumped. Essential events (keys, resize, close) instead set `WAIT_W`,
//! re-check the ring to close the lost-wakeup window, and futex-wait on
//! `r`.

use core::sync::atomic::{AtomicU32, Ordering, fence};

use yula_abi::comp::{INPUT_MOUSE, InputEvent};
use yula_abi::ring::{
    INPUT_RING_MAGIC, INPUT_RING_VERSION, RING_FLAG_READY, RING_FLAG_WAIT_R, RING_FLAG_WAIT_W,
    RING_HEADER_SIZE, RING_OFF_CAP, RING_OFF_DROPPED, RING_OFF_FLAGS, RING_OFF_MAGIC,
    RING_OFF_MASK, RING_OFF_R, RING_OFF_VERSION, RING_OFF_W, ring_cap_valid, ring_size_bytes,
    ring_slot_offset,
};

use crate::syscall::ipc::{futex_wait_raw, futex_wake_raw};

/// A mapped view of an input ring. Both halves wrap one of these.
#[derive(Clone, Copy)]
pub struct RingView {
    base: u64,
    cap: u32,
    mask: u32,
}

impl RingView {
    /// Validate a freshly mapped ring (server side).
    pub fn open(base: u64, size_bytes: u32) -> Option<Self> {
        if base == 0 || (size_bytes as usize) < RING_HEADER_SIZE {
            return None;
        }
        let view = Self { base, cap: 0, mask: 0 };
        if view.load(RING_OFF_MAGIC) != INPUT_RING_MAGIC
            || view.load(RING_OFF_VERSION) != INPUT_RING_VERSION
        {
            return None;
        }
        let cap = view.load(RING_OFF_CAP);
        if !ring_cap_valid(cap) || ring_size_bytes(cap) > size_bytes as usize {
            return None;
        }
        Some(Self { base, cap, mask: cap - 1 })
    }

    /// Initialize a blank mapping as a ring (client side) and mark it
    /// READY.
    pub fn init(base: u64, cap: u32) -> Option<Self> {
        if base == 0 || !ring_cap_valid(cap) {
            return None;
        }
        let view = Self { base, cap, mask: cap - 1 };
        view.store(RING_OFF_MAGIC, INPUT_RING_MAGIC);
        view.store(RING_OFF_VERSION, INPUT_RING_VERSION);
        view.store(RING_OFF_CAP, cap);
        view.store(RING_OFF_MASK, cap - 1);
        view.store(RING_OFF_R, 0);
        view.store(RING_OFF_W, 0);
        view.store(RING_OFF_DROPPED, 0);
        view.store(RING_OFF_FLAGS, RING_FLAG_READY);
        Some(view)
    }

    #[inline]
    fn word(&self, offset: usize) -> &AtomicU32 {
        // SAFETY: offset is one of the header word offsets inside the
        // mapped ring; AtomicU32 on shared memory is the access protocol.
        unsafe { &*((self.base as usize + offset) as *const AtomicU32) }
    }

    #[inline]
    fn load(&self, offset: usize) -> u32 {
        self.word(offset).load(Ordering::Acquire)
    }

    #[inline]
    fn store(&self, offset: usize, value: u32) {
        self.word(offset).store(value, Ordering::Release)
    }

    #[inline]
    pub fn cap(&self) -> u32 {
        self.cap
    }

    pub fn is_ready(&self) -> bool {
        self.load(RING_OFF_FLAGS) & RING_FLAG_READY != 0
    }

    pub fn dropped(&self) -> u32 {
        self.load(RING_OFF_DROPPED)
    }

    fn slot_write(&self, index: u32, ev: &InputEvent) {
        let offset = ring_slot_offset(index & self.mask);
        // SAFETY: index masked into the slot array of the mapped ring.
        let slot = unsafe {
            core::slice::from_raw_parts_mut(
                (self.base as usize + offset) as *mut u8,
                InputEvent::WIRE_SIZE,
            )
        };
        let _ = ev.encode(slot);
    }

    fn slot_read(&self, index: u32) -> Option<InputEvent> {
        let offset = ring_slot_offset(index & self.mask);
        // SAFETY: as above, read side.
        let slot = unsafe {
            core::slice::from_raw_parts(
                (self.base as usize + offset) as *const u8,
                InputEvent::WIRE_SIZE,
            )
        };
        InputEvent::decode(slot)
    }

    fn clear_flag(&self, flag: u32) {
        self.word(RING_OFF_FLAGS).fetch_and(!flag, Ordering::AcqRel);
    }

    fn set_flag(&self, flag: u32) {
        self.word(RING_OFF_FLAGS).fetch_or(flag, Ordering::AcqRel);
    }

    fn wake_consumer(&self) {
        if self.load(RING_OFF_FLAGS) & RING_FLAG_WAIT_R != 0 {
            self.clear_flag(RING_FLAG_WAIT_R);
            let _ = futex_wake_raw(self.base + RING_OFF_W as u64, 1);
        }
    }

    fn wake_producer(&self) {
        if self.load(RING_OFF_FLAGS) & RING_FLAG_WAIT_W != 0 {
            self.clear_flag(RING_FLAG_WAIT_W);
            let _ = futex_wake_raw(self.base + RING_OFF_R as u64, 1);
        }
    }
}

/// Producer half, owned by the compositor. Exactly one exists per ring.
pub struct RingProducer {
    view: RingView,
    /// One-slot coalesce buffer for the newest dropped mouse event.
    /// Plain fields: only the single producer thread touches them.
    pending_mouse: Option<InputEvent>,
}

impl RingProducer {
    pub fn new(view: RingView) -> Self {
        Self { view, pending_mouse: None }
    }

    pub fn view(&self) -> &RingView {
        &self.view
    }

    fn publish(&self, w: u32, ev: &InputEvent) {
        self.view.slot_write(w, ev);
        fence(Ordering::SeqCst);
        self.view.store(RING_OFF_W, w.wrapping_add(1));
        fence(Ordering::SeqCst);
        self.view.wake_consumer();
    }

    /// Try to flush the coalesce slot into the ring.
    fn flush_pending(&mut self) {
        let Some(ev) = self.pending_mouse else {
            return;
        };
        let r = self.view.load(RING_OFF_R);
        let w = self.view.load(RING_OFF_W);
        if w.wrapping_sub(r) >= self.view.cap {
            return;
        }
        self.publish(w, &ev);
        self.pending_mouse = None;
    }

    /// Deliver one event. Mouse events are coalesced under pressure;
    /// essential events block (futex on `r`) until a slot opens.
    /// Returns false only if the ring left READY state.
    pub fn send(&mut self, ev: &InputEvent, essential: bool) -> bool {
        if !self.view.is_ready() {
            return false;
        }

        self.flush_pending();

        loop {
            let r = self.view.load(RING_OFF_R);
            let w = self.view.load(RING_OFF_W);
            if w.wrapping_sub(r) >= self.view.cap {
                if ev.kind == INPUT_MOUSE {
                    // Newest position wins; the consumer still gets
                    // woken so it can drain and pick the backlog up.
                    self.view.word(RING_OFF_DROPPED).fetch_add(1, Ordering::AcqRel);
                    self.pending_mouse = Some(*ev);
                    self.view.wake_consumer();
                    return true;
                }
                if essential {
                    self.view.set_flag(RING_FLAG_WAIT_W);
                    fence(Ordering::SeqCst);
                    // Re-check: the consumer may have drained between
                    // our test and the flag set.
                    let r2 = self.view.load(RING_OFF_R);
                    let w2 = self.view.load(RING_OFF_W);
                    if w2.wrapping_sub(r2) < self.view.cap {
                        self.view.clear_flag(RING_FLAG_WAIT_W);
                        continue;
                    }
                    let _ = futex_wait_raw(self.view.base + RING_OFF_R as u64, r);
                    self.view.clear_flag(RING_FLAG_WAIT_W);
                    continue;
                }
                self.view.word(RING_OFF_DROPPED).fetch_add(1, Ordering::AcqRel);
                return true;
            }

            self.publish(w, ev);
            return true;
        }
    }
}

/// Consumer half, owned by the client.
pub struct RingConsumer {
    view: RingView,
}

impl RingConsumer {
    pub fn new(view: RingView) -> Self {
        Self { view }
    }

    /// Pop one event if available.
    pub fn try_pop(&self) -> Option<InputEvent> {
        let r = self.view.load(RING_OFF_R);
        let w = self.view.load(RING_OFF_W);
        if r == w {
            return None;
        }
        let ev = self.view.slot_read(r);
        fence(Ordering::SeqCst);
        self.view.store(RING_OFF_R, r.wrapping_add(1));
        fence(Ordering::SeqCst);
        self.view.wake_producer();
        ev
    }

    /// Pop, futex-sleeping on `w` while the ring is empty.
    pub fn pop_blocking(&self) -> Option<InputEvent> {
        loop {
            if let Some(ev) = self.try_pop() {
                return Some(ev);
            }
            if !self.view.is_ready() {
                return None;
            }
            let w = self.view.load(RING_OFF_W);
            self.view.set_flag(RING_FLAG_WAIT_R);
            fence(Ordering::SeqCst);
            // Lost-wakeup close: re-check before sleeping.
            if self.view.load(RING_OFF_W) != w {
                self.view.clear_flag(RING_FLAG_WAIT_R);
                continue;
            }
            let _ = futex_wait_raw(self.view.base + RING_OFF_W as u64, w);
            self.view.clear_flag(RING_FLAG_WAIT_R);
        }
    }
}
