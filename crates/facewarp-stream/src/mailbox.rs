//! Single-slot, latest-wins value cell.

use std::sync::{Mutex, MutexGuard, PoisonError};

struct Slot<T> {
    value: Option<T>,
    generation: u64,
}

/// A guarded cell holding only the most recently written value.
///
/// Every write replaces the previous value and bumps a generation counter;
/// readers that fall behind simply never observe the intermediate values.
/// The lock is held only long enough to swap or clone the value.
pub struct Mailbox<T> {
    slot: Mutex<Slot<T>>,
}

impl<T: Clone> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                value: None,
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        // Writers never leave the slot half-updated, so a poisoned lock is still consistent.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the held value. Returns the new generation.
    pub fn write(&self, value: T) -> u64 {
        let mut slot = self.lock();
        slot.value = Some(value);
        slot.generation += 1;
        slot.generation
    }

    /// Clone out the held value and its generation; `None` if never written.
    pub fn latest(&self) -> Option<(u64, T)> {
        let slot = self.lock();
        slot.value.clone().map(|v| (slot.generation, v))
    }

    /// Clone out the held value only if it is newer than generation `seen`.
    pub fn take_newer(&self, seen: u64) -> Option<(u64, T)> {
        let slot = self.lock();
        if slot.generation <= seen {
            return None;
        }
        slot.value.clone().map(|v| (slot.generation, v))
    }

    /// Number of writes so far.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }
}

impl<T: Clone> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
