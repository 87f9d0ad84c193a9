//! Session generation counter.
//!
//! Incremented once per successful stop. Frames are stamped with the value current at their
//! creation; a frame whose stamp no longer matches belongs to a stopped session and must not be
//! handed back to the driver.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Clone, Default)]
pub struct GenerationCounter {
    value: Arc<RwLock<u64>>,
}

impl GenerationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        *self.value.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Hold the current value. A stop cannot complete while any pin is alive.
    pub fn pin(&self) -> GenerationPin<'_> {
        GenerationPin {
            guard: self.value.read().unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Exclude pins for the duration of a stop. The counter moves only on
    /// [`GenerationAdvance::commit`]; dropping the guard leaves it unchanged.
    pub fn begin_advance(&self) -> GenerationAdvance<'_> {
        GenerationAdvance {
            guard: self.value.write().unwrap_or_else(|e| e.into_inner()),
        }
    }
}

impl std::fmt::Debug for GenerationCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("GenerationCounter").field(&self.current()).finish()
    }
}

pub struct GenerationPin<'a> {
    guard: RwLockReadGuard<'a, u64>,
}

impl GenerationPin<'_> {
    pub fn value(&self) -> u64 {
        *self.guard
    }
}

pub struct GenerationAdvance<'a> {
    guard: RwLockWriteGuard<'a, u64>,
}

impl GenerationAdvance<'_> {
    /// Value before the advance.
    pub fn value(&self) -> u64 {
        *self.guard
    }

    /// Increment and release, returning the new generation.
    pub fn commit(mut self) -> u64 {
        *self.guard += 1;
        *self.guard
    }
}
