//! The thread that drains completed requests and advances dispatched operations.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use camreq_driver::{Notifier, WaitOutcome};
use tracing::{debug, info, warn};

use crate::camera::Camera;
use crate::error::{CameraError, Result};
use crate::frame::FrameHandle;

/// Receives the newest frame of each drain. Takes over the loop's reference and must release it.
pub trait FrameConsumer: Send + 'static {
    fn consume(&mut self, camera: &Camera, frame: FrameHandle);
}

impl<F> FrameConsumer for F
where
    F: FnMut(&Camera, FrameHandle) + Send + 'static,
{
    fn consume(&mut self, camera: &Camera, frame: FrameHandle) {
        self(camera, frame)
    }
}

/// Releases every frame straight away.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullConsumer;

impl FrameConsumer for NullConsumer {
    fn consume(&mut self, _camera: &Camera, frame: FrameHandle) {
        if let Err(e) = frame.release() {
            warn!(error = %e, "releasing frame failed");
        }
    }
}

/// Background thread serving one camera.
///
/// While it runs the camera is asynchronous: blocking dispatches are served by this thread and
/// [`Camera::stop`] is routed through it. Dropping the loop stops it.
pub struct EventLoop {
    camera: Camera,
    notifier: Notifier,
    token: u64,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EventLoop {
    pub fn start(camera: &Camera) -> Result<Self> {
        Self::start_with(camera, NullConsumer)
    }

    pub fn start_with<C: FrameConsumer>(camera: &Camera, consumer: C) -> Result<Self> {
        if !camera.claim_asynchronous() {
            return Err(CameraError::EventLoopAlreadyRunning);
        }
        let notifier = camera.notifier();
        let subscription = notifier.subscribe();
        let token = subscription.token();
        let running = Arc::new(AtomicBool::new(true));
        let timeout = camera.options().event_loop.wait_timeout();

        let thread_camera = camera.clone();
        let flag = Arc::clone(&running);
        let mut consumer = consumer;
        let spawned = thread::Builder::new()
            .name("camreq-event-loop".into())
            .spawn(move || {
                let camera = thread_camera;
                camera.set_loop_thread(Some(thread::current().id()));
                while flag.load(Ordering::Acquire) {
                    match subscription.wait(timeout) {
                        WaitOutcome::Ready(_) => {}
                        WaitOutcome::TimedOut => continue,
                        WaitOutcome::Closed => break,
                    }
                    match camera.process_requests() {
                        Ok(Some(frame)) => {
                            let delivered = catch_unwind(AssertUnwindSafe(|| consumer.consume(&camera, frame)));
                            if delivered.is_err() {
                                warn!(camera = camera.id(), "frame consumer panicked");
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!(camera = camera.id(), error = %e, "draining requests failed"),
                    }
                }
                camera.detach_event_loop();
                debug!(camera = camera.id(), "event loop exited");
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                camera.detach_event_loop();
                return Err(CameraError::EventLoop(e.to_string()));
            }
        };
        info!(camera = camera.id(), "event loop started");
        Ok(Self {
            camera: camera.clone(),
            notifier,
            token,
            running,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Unregister from the notifier, clear the run flag and join. Calling it again does nothing.
    ///
    /// From the loop thread itself (a consumer or completion callback that owns the loop) the
    /// thread is not joined; it exits once the current drain returns.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.notifier.unsubscribe(self.token);
        self.running.store(false, Ordering::Release);
        if handle.thread().id() == thread::current().id() {
            debug!(camera = self.camera.id(), "event loop stopping from its own thread");
            return;
        }
        if handle.join().is_err() {
            warn!(camera = self.camera.id(), "event loop thread panicked");
            self.camera.detach_event_loop();
        }
        info!(camera = self.camera.id(), "event loop stopped");
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}
