//! The single generation slot and the cooperative stop flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Instant;

use textgen_common::Result;

use crate::seed::SeedState;

/// Owns the process-wide generation state: one in-flight generation at a
/// time, the stop flag, and the seed.
#[derive(Debug, Default)]
pub struct SessionManager {
    busy: Mutex<bool>,
    released: Condvar,
    stop_everything: AtomicBool,
    seed: SeedState,
}

impl SessionManager {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    /// Blocks until the slot is free and takes it.
    pub fn acquire(self: &Arc<Self>) -> SlotPermit {
        let started = Instant::now();
        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        while *busy {
            busy = self.released.wait(busy).unwrap_or_else(PoisonError::into_inner);
        }
        *busy = true;
        drop(busy);
        let waited = started.elapsed();
        textgen_obs::observe_slot_wait(waited.as_secs_f64());
        tracing::trace!(target: "session", "generation slot acquired after {:?}", waited);
        SlotPermit { manager: self.clone() }
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<SlotPermit> {
        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        if *busy {
            return None;
        }
        *busy = true;
        Some(SlotPermit { manager: self.clone() })
    }

    pub fn is_busy(&self) -> bool { *self.busy.lock().unwrap_or_else(PoisonError::into_inner) }

    fn release(&self) {
        *self.busy.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.released.notify_one();
        tracing::trace!(target: "session", "generation slot released");
    }

    /// Runs `start` while holding the slot and ties the slot to the returned
    /// sequence: it is given back once the sequence is exhausted or dropped,
    /// or right away when `start` fails.
    pub fn with_generation_slot<I, F>(self: &Arc<Self>, start: F) -> Result<Guarded<I>>
    where
        I: Iterator,
        F: FnOnce() -> Result<I>,
    {
        let permit = self.acquire();
        let inner = start()?;
        Ok(Guarded { inner, permit: Some(permit) })
    }

    /// Asks the running generation to stop at its next step.
    pub fn stop_everything(&self) {
        tracing::info!(target: "session", "stop requested");
        self.stop_everything.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool { self.stop_everything.load(Ordering::SeqCst) }

    pub(crate) fn clear_stop(&self) { self.stop_everything.store(false, Ordering::SeqCst); }

    pub fn set_manual_seed(&self, seed: i64) -> Result<u64> { self.seed.set_manual_seed(seed) }

    pub fn current_seed(&self) -> u64 { self.seed.current() }
}

/// Ownership of the generation slot; dropping it frees the slot.
#[derive(Debug)]
pub struct SlotPermit {
    manager: Arc<SessionManager>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) { self.manager.release() }
}

/// A sequence that holds the generation slot until it ends.
#[derive(Debug)]
pub struct Guarded<I> {
    inner: I,
    permit: Option<SlotPermit>,
}

impl<I> Guarded<I> {
    pub fn holds_slot(&self) -> bool { self.permit.is_some() }
}

impl<I: Iterator> Iterator for Guarded<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        self.permit.as_ref()?;
        match self.inner.next() {
            Some(item) => Some(item),
            None => {
                self.permit = None;
                None
            }
        }
    }
}
