//! Happens-before edges between the copy and compute engines of one core,
//! and the all-core barrier used by reductions.

use std::sync::{Barrier, Condvar, Mutex, PoisonError};

use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    CopyIn,
    Compute,
    CopyOut,
}

/// A directed dependency between two engines, instantiated once per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardEvent {
    /// Slot filled; compute may read it.
    CopyInToCompute,
    /// Slot computed; copy-out may drain it.
    ComputeToCopyOut,
    /// Slot drained; copy-in may refill it.
    CopyOutToCopyIn,
}

impl HardEvent {
    pub const ALL: [HardEvent; 3] = [
        HardEvent::CopyInToCompute,
        HardEvent::ComputeToCopyOut,
        HardEvent::CopyOutToCopyIn,
    ];

    /// `(signaller, waiter)`.
    pub fn engines(self) -> (Engine, Engine) {
        match self {
            HardEvent::CopyInToCompute => (Engine::CopyIn, Engine::Compute),
            HardEvent::ComputeToCopyOut => (Engine::Compute, Engine::CopyOut),
            HardEvent::CopyOutToCopyIn => (Engine::CopyOut, Engine::CopyIn),
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/* ============================================================
   Event flag
   ============================================================ */

/// Counting flag: every `set` releases exactly one `wait`.
#[derive(Debug, Default)]
pub struct EventFlag {
    pending: Mutex<usize>,
    cv: Condvar,
}

impl EventFlag {
    pub fn new(initial: usize) -> Self {
        Self {
            pending: Mutex::new(initial),
            cv: Condvar::new(),
        }
    }

    pub fn set(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending += 1;
        self.cv.notify_all();
    }

    /// Blocks until a matching `set`. No timeout.
    pub fn wait(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        while *pending == 0 {
            pending = self.cv.wait(pending).unwrap_or_else(PoisonError::into_inner);
        }
        *pending -= 1;
    }
}

/* ============================================================
   Per-core pipe synchronisation
   ============================================================ */

/// One flag per (event, slot). Two tiles in different slots never wait
/// on each other.
#[derive(Debug)]
pub struct PipeSync {
    slots: usize,
    flags: Vec<EventFlag>,
}

impl PipeSync {
    /// Every slot starts empty, so the refill edge is pre-signalled.
    pub fn new(slots: usize) -> Self {
        let flags = HardEvent::ALL
            .iter()
            .flat_map(|&event| {
                let initial = usize::from(event == HardEvent::CopyOutToCopyIn);
                (0..slots).map(move |_| EventFlag::new(initial))
            })
            .collect();
        Self { slots, flags }
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    fn flag(&self, event: HardEvent, slot: usize) -> &EventFlag {
        &self.flags[event.index() * self.slots + slot]
    }

    pub fn set_flag(&self, event: HardEvent, slot: usize) {
        trace!(?event, slot, "set_flag");
        self.flag(event, slot).set();
    }

    pub fn wait_flag(&self, event: HardEvent, slot: usize) {
        self.flag(event, slot).wait();
        trace!(?event, slot, "wait_flag released");
    }
}

/* ============================================================
   Core barrier
   ============================================================ */

/// Barrier across every launched core. No timeout: a core that never
/// arrives hangs the dispatch.
#[derive(Debug)]
pub struct CoreBarrier {
    inner: Barrier,
    parties: usize,
}

impl CoreBarrier {
    pub fn new(parties: usize) -> Self {
        Self {
            inner: Barrier::new(parties),
            parties,
        }
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    pub fn sync_all(&self, core: usize) {
        trace!(core, parties = self.parties, "sync_all arrive");
        self.inner.wait();
        trace!(core, "sync_all release");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn flag_counts_signals() {
        let flag = EventFlag::new(0);
        flag.set();
        flag.set();
        flag.wait();
        flag.wait();
        assert_eq!(*flag.pending.lock().unwrap(), 0);
    }

    #[test]
    fn refill_edge_starts_signalled() {
        let sync = PipeSync::new(2);
        // would block forever if the slot did not start free
        sync.wait_flag(HardEvent::CopyOutToCopyIn, 0);
        sync.wait_flag(HardEvent::CopyOutToCopyIn, 1);
        assert_eq!(*sync.flag(HardEvent::CopyInToCompute, 1).pending.lock().unwrap(), 0);
    }

    #[test]
    fn wait_orders_after_set() {
        let sync = PipeSync::new(2);
        let value = AtomicUsize::new(0);

        thread::scope(|s| {
            s.spawn(|| {
                sync.wait_flag(HardEvent::CopyInToCompute, 1);
                assert_eq!(value.load(Ordering::Relaxed), 42);
            });
            value.store(42, Ordering::Relaxed);
            sync.set_flag(HardEvent::CopyInToCompute, 1);
        });
    }

    #[test]
    fn barrier_holds_every_core() {
        let barrier = CoreBarrier::new(4);
        let arrived = AtomicUsize::new(0);

        thread::scope(|s| {
            for core in 0..4 {
                let barrier = &barrier;
                let arrived = &arrived;
                s.spawn(move || {
                    arrived.fetch_add(1, Ordering::SeqCst);
                    barrier.sync_all(core);
                    assert_eq!(arrived.load(Ordering::SeqCst), 4);
                });
            }
        });
    }

    #[test]
    fn events_pair_engines() {
        assert_eq!(HardEvent::CopyInToCompute.engines(), (Engine::CopyIn, Engine::Compute));
        assert_eq!(HardEvent::CopyOutToCopyIn.engines().1, Engine::CopyIn);
    }
}
