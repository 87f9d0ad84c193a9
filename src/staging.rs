//! Controls waiting to be applied to the next recycled request.

use std::sync::{Arc, Mutex, MutexGuard};

use camreq_driver::{ControlList, ControlValue};

/// Shared map of pending control values.
///
/// Written by the application through [`set_controls`](ControlStaging::set_controls), drained by
/// whichever thread recycles a frame. [`take`](ControlStaging::take) empties the map under the
/// same lock it reads it with, so each staged value reaches exactly one request.
#[derive(Clone, Default)]
pub struct ControlStaging {
    pending: Arc<Mutex<ControlList>>,
}

impl ControlStaging {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ControlList> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Merge `controls` into the pending set; later values win.
    pub fn set_controls(&self, controls: &ControlList) {
        self.lock().merge(controls);
    }

    pub fn set(&self, id: impl Into<String>, value: impl Into<ControlValue>) {
        self.lock().set(id, value);
    }

    /// Remove and return everything pending.
    pub fn take(&self) -> ControlList {
        std::mem::take(&mut *self.lock())
    }

    /// Put back controls that could not be applied, without overwriting anything staged since.
    pub fn restore(&self, controls: ControlList) {
        self.lock().merge_missing(&controls);
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn snapshot(&self) -> ControlList {
        self.lock().clone()
    }
}
