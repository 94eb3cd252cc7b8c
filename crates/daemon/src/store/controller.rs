// Operation slots over the working copy.
//
// Mutations share a read permit and serialize on the commit mutex, so each
// stage+commit pair completes before the next starts. A synchronize cycle
// takes the write permit: it waits for in-flight mutations and blocks new
// ones until it is done. Slots are tied to the acquiring thread; taking a
// second slot on the same controller from that thread is a programming
// error and fails instead of deadlocking.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{trace, warn};

static NEXT_CONTROLLER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static HELD_SLOTS: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotError {
    #[error("operation slot already held by this thread; nested acquisition would deadlock")]
    Reentrant,
}

#[derive(Debug)]
pub struct ConcurrencyController {
    id: u64,
    permits: RwLock<()>,
    commit: Mutex<()>,
}

impl Default for ConcurrencyController {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcurrencyController {
    pub fn new() -> Self {
        Self {
            id: NEXT_CONTROLLER_ID.fetch_add(1, Ordering::Relaxed),
            permits: RwLock::new(()),
            commit: Mutex::new(()),
        }
    }

    /// Slot for one domain mutation. Blocks while a synchronize cycle or
    /// another mutation holds the working copy.
    pub fn acquire_context(&self) -> Result<MutateSlot<'_>, SlotError> {
        let held = HeldMarker::claim(self.id)?;
        let read = self.permits.read().unwrap_or_else(|poisoned| {
            warn!("operation permits poisoned by a panicked holder, recovering");
            PoisonError::into_inner(poisoned)
        });
        let commit = self.commit.lock().unwrap_or_else(|poisoned| {
            warn!("commit mutex poisoned by a panicked holder, recovering");
            PoisonError::into_inner(poisoned)
        });
        trace!(controller = self.id, "mutate slot acquired");
        Ok(MutateSlot { _commit: commit, _read: read, _held: held })
    }

    /// Exclusive slot for a synchronize cycle.
    pub fn acquire_exclusive(&self) -> Result<SyncSlot<'_>, SlotError> {
        let held = HeldMarker::claim(self.id)?;
        let write = self.permits.write().unwrap_or_else(|poisoned| {
            warn!("operation permits poisoned by a panicked holder, recovering");
            PoisonError::into_inner(poisoned)
        });
        trace!(controller = self.id, "exclusive slot acquired");
        Ok(SyncSlot { _write: write, _held: held })
    }
}

/// Held for the duration of one mutation. Released on drop.
#[must_use = "the slot is released as soon as it is dropped"]
pub struct MutateSlot<'a> {
    _commit: MutexGuard<'a, ()>,
    _read: RwLockReadGuard<'a, ()>,
    _held: HeldMarker,
}

/// Held for the duration of one synchronize cycle. Released on drop.
#[must_use = "the slot is released as soon as it is dropped"]
pub struct SyncSlot<'a> {
    _write: RwLockWriteGuard<'a, ()>,
    _held: HeldMarker,
}

/// Thread-local record that the current thread holds a slot on one
/// controller. `!Send` so a slot cannot migrate away from its marker.
struct HeldMarker {
    controller: u64,
    _not_send: PhantomData<*const ()>,
}

impl HeldMarker {
    fn claim(controller: u64) -> Result<Self, SlotError> {
        HELD_SLOTS.with(|held| {
            let mut held = held.borrow_mut();
            if held.contains(&controller) {
                return Err(SlotError::Reentrant);
            }
            held.push(controller);
            Ok(Self { controller, _not_send: PhantomData })
        })
    }
}

impl Drop for HeldMarker {
    fn drop(&mut self) {
        HELD_SLOTS.with(|held| held.borrow_mut().retain(|id| *id != self.controller));
    }
}
