//! Reference-counted completed frames and their recycling.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use camreq_driver::{CameraConfiguration, CameraDriver, Metadata, Request, RequestId};
use tracing::{debug, trace, warn};

use crate::error::{CameraError, Result};
use crate::generation::GenerationCounter;
use crate::staging::ControlStaging;

/// What a call to [`FrameHandle::release`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other references remain; carries the new count.
    Retained(usize),
    /// Last reference dropped; the request went back to the driver.
    Recycled,
    /// Last reference dropped; the request was stale or the driver refused it, so it was dropped.
    Discarded,
}

/// Hands requests back to the driver, applying staged controls on the way.
pub(crate) struct Recycler {
    driver: Arc<dyn CameraDriver>,
    generation: GenerationCounter,
    staging: ControlStaging,
}

impl Recycler {
    pub(crate) fn new(driver: Arc<dyn CameraDriver>, generation: GenerationCounter, staging: ControlStaging) -> Self {
        Self {
            driver,
            generation,
            staging,
        }
    }

    pub(crate) fn dispose(&self, stamp: u64, mut request: Request) -> Release {
        let pin = self.generation.pin();
        if pin.value() != stamp {
            debug!(request = %request.id(), stamp, current = pin.value(), "discarding stale request");
            return Release::Discarded;
        }

        request.reuse();
        let staged = self.staging.take();
        for (id, value) in staged.iter() {
            self.driver.apply_control(&mut request, id, value);
        }
        let id = request.id();
        match self.driver.resubmit(request) {
            Ok(()) => {
                trace!(request = %id, controls = staged.len(), "request recycled");
                Release::Recycled
            }
            Err(e) => {
                warn!(request = %id, error = %e, "driver rejected recycled request");
                self.staging.restore(staged);
                Release::Discarded
            }
        }
    }
}

enum FrameState {
    Live { refs: usize, request: Request },
    Destroyed,
}

struct FrameInner {
    id: RequestId,
    sequence: u64,
    generation: u64,
    configuration: Arc<CameraConfiguration>,
    recycler: Arc<Recycler>,
    state: Mutex<FrameState>,
}

impl FrameInner {
    fn lock(&self) -> MutexGuard<'_, FrameState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for FrameInner {
    fn drop(&mut self) {
        let state = std::mem::replace(
            self.state.get_mut().unwrap_or_else(|e| e.into_inner()),
            FrameState::Destroyed,
        );
        if let FrameState::Live { refs, request } = state {
            debug!(request = %self.id, refs, "frame dropped without being released");
            self.recycler.dispose(self.generation, request);
        }
    }
}

/// A completed request shared between the event loop and the application.
///
/// The handle is created holding one reference. [`acquire`](FrameHandle::acquire) and
/// [`release`](FrameHandle::release) move the count explicitly; cloning the handle only copies the
/// pointer. When the count falls from one to zero the request is recycled into the driver if its
/// generation is still current, or discarded otherwise. The handle is then destroyed and every
/// further access fails with [`CameraError::Lifecycle`].
///
/// If every clone is dropped while references are still outstanding, the request is disposed of
/// the same way.
#[derive(Clone)]
pub struct FrameHandle {
    inner: Arc<FrameInner>,
}

impl FrameHandle {
    pub(crate) fn new(
        request: Request,
        generation: u64,
        configuration: Arc<CameraConfiguration>,
        recycler: Arc<Recycler>,
    ) -> Self {
        Self {
            inner: Arc::new(FrameInner {
                id: request.id(),
                sequence: request.sequence(),
                generation,
                configuration,
                recycler,
                state: Mutex::new(FrameState::Live { refs: 1, request }),
            }),
        }
    }

    pub fn acquire(&self) -> Result<()> {
        match &mut *self.inner.lock() {
            FrameState::Live { refs, .. } => {
                *refs += 1;
                Ok(())
            }
            FrameState::Destroyed => Err(CameraError::Lifecycle(format!(
                "acquire of destroyed frame {}",
                self.inner.id
            ))),
        }
    }

    pub fn release(&self) -> Result<Release> {
        let mut state = self.inner.lock();
        let request = match std::mem::replace(&mut *state, FrameState::Destroyed) {
            FrameState::Live { refs, request } if refs > 1 => {
                *state = FrameState::Live { refs: refs - 1, request };
                return Ok(Release::Retained(refs - 1));
            }
            FrameState::Live { request, .. } => request,
            FrameState::Destroyed => {
                return Err(CameraError::Lifecycle(format!(
                    "release of destroyed frame {}",
                    self.inner.id
                )));
            }
        };
        drop(state);
        Ok(self.inner.recycler.dispose(self.inner.generation, request))
    }

    /// Current reference count; zero once destroyed.
    pub fn ref_count(&self) -> usize {
        match &*self.inner.lock() {
            FrameState::Live { refs, .. } => *refs,
            FrameState::Destroyed => 0,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(&*self.inner.lock(), FrameState::Destroyed)
    }

    /// Generation of the session that produced this frame.
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn id(&self) -> RequestId {
        self.inner.id
    }

    pub fn sequence(&self) -> u64 {
        self.inner.sequence
    }

    /// Stream layout the frame was captured with.
    pub fn configuration(&self) -> &CameraConfiguration {
        &self.inner.configuration
    }

    pub fn metadata(&self) -> Result<Metadata> {
        self.with_request(|request| request.metadata().clone())
    }

    /// Run `f` against the underlying request while the frame is live.
    pub fn with_request<R>(&self, f: impl FnOnce(&Request) -> R) -> Result<R> {
        match &*self.inner.lock() {
            FrameState::Live { request, .. } => Ok(f(request)),
            FrameState::Destroyed => Err(CameraError::Lifecycle(format!(
                "access to destroyed frame {}",
                self.inner.id
            ))),
        }
    }

    /// Whether two handles refer to the same frame.
    pub fn same_frame(&self, other: &FrameHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameHandle")
            .field("id", &self.inner.id)
            .field("sequence", &self.inner.sequence)
            .field("generation", &self.inner.generation)
            .field("refs", &self.ref_count())
            .finish()
    }
}
