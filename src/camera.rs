//! The application-facing camera.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use camreq_driver::{
    CameraConfiguration, CameraDriver, ControlList, ControlValue, Metadata, Notifier, PixelFormat, RequestStatus,
};
use image::RgbImage;
use ndarray::Array3;
use tracing::{debug, warn};

use crate::capture;
use crate::error::{CameraError, Result};
use crate::frame::{FrameHandle, Recycler};
use crate::generation::GenerationCounter;
use crate::operation::{CompletionMode, Dispatcher, Operation, OperationStatus, Outcome};
use crate::options::CameraOptions;
use crate::session::SessionController;
use crate::staging::ControlStaging;

pub(crate) struct CameraInner {
    driver: Arc<dyn CameraDriver>,
    session: Mutex<SessionController>,
    dispatcher: Dispatcher,
    recycler: Arc<Recycler>,
    staging: ControlStaging,
    generation: GenerationCounter,
    asynchronous: AtomicBool,
    loop_thread: Mutex<Option<ThreadId>>,
    frames: AtomicU64,
    options: CameraOptions,
}

impl CameraInner {
    fn lock_session(&self) -> MutexGuard<'_, SessionController> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for CameraInner {
    fn drop(&mut self) {
        let session = self.session.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = session.close() {
            warn!(camera = self.driver.id(), error = %e, "closing camera on drop failed");
        }
    }
}

/// A camera session driven through the request-lifecycle engine.
///
/// Cheap to clone; clones share the session. Without a running
/// [`EventLoop`](crate::event_loop::EventLoop) frames are only drained when
/// [`process_requests`](Camera::process_requests) is called.
#[derive(Clone)]
pub struct Camera {
    inner: Arc<CameraInner>,
}

impl Camera {
    pub fn open<D: CameraDriver + 'static>(driver: Arc<D>) -> Result<Self> {
        Self::open_with(driver, CameraOptions::default())
    }

    pub fn open_with<D: CameraDriver + 'static>(driver: Arc<D>, options: CameraOptions) -> Result<Self> {
        options.validate()?;
        let driver: Arc<dyn CameraDriver> = driver;
        let generation = GenerationCounter::new();
        let staging = ControlStaging::new();
        let mut session = SessionController::new(Arc::clone(&driver), generation.clone());
        session.open()?;
        let recycler = Arc::new(Recycler::new(Arc::clone(&driver), generation.clone(), staging.clone()));
        Ok(Self {
            inner: Arc::new(CameraInner {
                driver,
                session: Mutex::new(session),
                dispatcher: Dispatcher::new(),
                recycler,
                staging,
                generation,
                asynchronous: AtomicBool::new(false),
                loop_thread: Mutex::new(None),
                frames: AtomicU64::new(0),
                options,
            }),
        })
    }

    pub fn id(&self) -> &str {
        self.inner.driver.id()
    }

    pub fn options(&self) -> &CameraOptions {
        &self.inner.options
    }

    /// Apply a stream layout. The camera must be stopped.
    pub fn configure(&self, layout: &CameraConfiguration) -> Result<Arc<CameraConfiguration>> {
        self.inner.lock_session().configure(layout)
    }

    pub fn configuration(&self) -> Option<Arc<CameraConfiguration>> {
        self.inner.lock_session().configuration()
    }

    pub fn stream_format(&self, stream: usize) -> Result<PixelFormat> {
        let configuration = self.configuration().ok_or(CameraError::CameraNotConfigured)?;
        configuration
            .stream(stream)
            .map(|s| s.format)
            .ok_or_else(|| CameraError::InvalidConfiguration(format!("no stream {stream}")))
    }

    pub fn list_controls(&self) -> ControlList {
        self.inner.driver.available_controls()
    }

    /// Start the session. Staged controls become its initial controls.
    pub fn start(&self) -> Result<()> {
        let mut session = self.inner.lock_session();
        let controls = self.inner.staging.take();
        if let Err(e) = session.start(&controls) {
            self.inner.staging.restore(controls);
            return Err(e);
        }
        Ok(())
    }

    /// Stop the session. With an event loop running this is dispatched as a one-step operation so
    /// it runs between drains; otherwise it runs inline.
    pub fn stop(&self) -> Result<()> {
        if !self.is_started() {
            return Err(CameraError::NotStarted);
        }
        if self.is_asynchronous() && !self.on_loop_thread() {
            let stop = Operation::new("stop").step("stop", |ctx, _| {
                ctx.session().stop()?;
                Ok(true)
            });
            self.dispatch(stop, true, CompletionMode::BlockOnPrimitive)?;
            Ok(())
        } else {
            self.inner.lock_session().stop()?;
            self.inner.dispatcher.abort(CameraError::NotStarted);
            Ok(())
        }
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock_session().is_started()
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.current()
    }

    /// Stage controls for the next recycled request. Never blocks on the event loop.
    pub fn set_controls(&self, controls: &ControlList) {
        self.inner.staging.set_controls(controls);
    }

    pub fn set_control(&self, id: impl Into<String>, value: impl Into<ControlValue>) {
        self.inner.staging.set(id, value);
    }

    pub fn staged_controls(&self) -> ControlList {
        self.inner.staging.snapshot()
    }

    /// Schedule `operation`. With `wait`, block until it finishes and return its outcome, or its
    /// error. Without, return `Ok(None)` at once; the result arrives through
    /// [`poll_or_wait`](Camera::poll_or_wait) or the completion callback.
    ///
    /// Steps only run against drained frames, so an operation with steps fails with
    /// [`CameraError::NotStarted`] while the session is stopped.
    pub fn dispatch(&self, operation: Operation, wait: bool, completion: CompletionMode) -> Result<Option<Outcome>> {
        if wait {
            if !self.is_asynchronous() {
                return Err(CameraError::EventLoopNotRunning);
            }
            if self.on_loop_thread() {
                return Err(CameraError::EventLoop(
                    "blocking dispatch from the event loop thread".into(),
                ));
            }
        }
        if operation.is_empty() {
            self.inner.dispatcher.dispatch(operation, completion)?;
        } else {
            // Held across the enqueue so a stop cannot slip in between.
            let session = self.inner.lock_session();
            if !session.is_started() {
                return Err(CameraError::NotStarted);
            }
            self.inner.dispatcher.dispatch(operation, completion)?;
        }
        if !wait {
            return Ok(None);
        }
        if !self.is_asynchronous() {
            self.inner.dispatcher.abort(CameraError::EventLoopNotRunning);
        }
        self.inner.dispatcher.wait()
    }

    /// Status of the dispatched operation; see [`Dispatcher::poll_or_wait`].
    pub fn poll_or_wait(&self, blocking: bool) -> Result<OperationStatus> {
        if blocking && !self.is_asynchronous() && self.inner.dispatcher.in_progress() {
            return Err(CameraError::EventLoopNotRunning);
        }
        self.inner.dispatcher.poll_or_wait(blocking)
    }

    /// Drain the driver once.
    ///
    /// Every completed request becomes a [`FrameHandle`] stamped with the current generation.
    /// All but the newest are released at once. If an operation is active its front step runs
    /// against the newest frame. The newest frame is returned with one reference the caller must
    /// release, or `None` if nothing completed or a step restarted the session.
    pub fn process_requests(&self) -> Result<Option<FrameHandle>> {
        let inner = &self.inner;
        inner.driver.notifier().acknowledge();

        let mut session = inner.lock_session();
        let requests = inner.driver.fetch_completed_requests();
        if requests.is_empty() {
            return Ok(None);
        }
        let Some(layout) = session.configuration() else {
            return Ok(None);
        };
        let generation = inner.generation.current();

        let mut frames = Vec::with_capacity(requests.len());
        for request in requests {
            if request.status() == RequestStatus::Complete {
                frames.push(FrameHandle::new(request, generation, Arc::clone(&layout), Arc::clone(&inner.recycler)));
            } else {
                debug!(request = %request.id(), status = ?request.status(), "requeueing incomplete request");
                inner.recycler.dispose(generation, request);
            }
        }
        inner.frames.fetch_add(frames.len() as u64, Ordering::Relaxed);

        let Some(newest) = frames.pop() else {
            return Ok(None);
        };
        for older in frames {
            older.release()?;
        }

        if let Some(mut pending) = inner.dispatcher.take_step() {
            let result = catch_unwind(AssertUnwindSafe(|| pending.run(&mut session, &inner.options, &newest)))
                .unwrap_or_else(|panic| Err(CameraError::StepPanicked(panic_message(panic.as_ref()))));
            debug!(step = pending.name(), frame = newest.sequence(), done = ?result.as_ref().ok(), "step ran");
            let stopped = !session.is_started();
            drop(session);
            inner.dispatcher.complete_step(pending, result);
            if stopped {
                inner.dispatcher.abort(CameraError::NotStarted);
            }
        } else {
            drop(session);
        }

        if newest.generation() != inner.generation.current() {
            newest.release()?;
            return Ok(None);
        }
        Ok(Some(newest))
    }

    /// Completed requests drained since the camera was opened.
    pub fn frames_delivered(&self) -> u64 {
        self.inner.frames.load(Ordering::Relaxed)
    }

    pub fn is_asynchronous(&self) -> bool {
        self.inner.asynchronous.load(Ordering::Acquire)
    }

    pub(crate) fn claim_asynchronous(&self) -> bool {
        self.inner
            .asynchronous
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn set_loop_thread(&self, thread: Option<ThreadId>) {
        *self.inner.loop_thread.lock().unwrap_or_else(|e| e.into_inner()) = thread;
    }

    /// Called by the event loop on exit: operations still in flight can no longer complete.
    pub(crate) fn detach_event_loop(&self) {
        self.set_loop_thread(None);
        self.inner.asynchronous.store(false, Ordering::Release);
        self.inner.dispatcher.abort(CameraError::EventLoopNotRunning);
    }

    fn on_loop_thread(&self) -> bool {
        *self.inner.loop_thread.lock().unwrap_or_else(|e| e.into_inner()) == Some(thread::current().id())
    }

    pub fn notifier(&self) -> Notifier {
        self.inner.driver.notifier().clone()
    }

    /// Stop if running and release the device.
    pub fn close(&self) -> Result<()> {
        if self.is_started() {
            self.stop()?;
        }
        self.inner.lock_session().close()
    }

    /// Dispatch a capture. With `wait` the outcome is returned; without, `Ok(None)` comes back at
    /// once and the outcome is delivered through `completion` or
    /// [`poll_or_wait`](Camera::poll_or_wait).
    fn run<T>(
        &self,
        operation: Operation,
        wait: bool,
        completion: CompletionMode,
        kind: &'static str,
        extract: impl FnOnce(Outcome) -> Option<T>,
    ) -> Result<Option<T>> {
        match self.dispatch(operation, wait, completion)? {
            Some(outcome) => extract(outcome).map(Some).ok_or(CameraError::UnexpectedOutcome(kind)),
            None if wait => Err(CameraError::UnexpectedOutcome(kind)),
            None => Ok(None),
        }
    }

    /// Acquire the newest frame of the running session. `None` if the session is stopped, or when
    /// not waiting. Release the frame when done.
    pub fn capture_request(&self, wait: bool, completion: CompletionMode) -> Result<Option<FrameHandle>> {
        match self.dispatch(capture::request(), wait, completion) {
            Ok(outcome) => Ok(outcome.and_then(Outcome::into_frame)),
            Err(CameraError::NotStarted) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Same as [`capture_request`](Camera::capture_request).
    pub fn acquire_latest_frame(&self, wait: bool, completion: CompletionMode) -> Result<Option<FrameHandle>> {
        self.capture_request(wait, completion)
    }

    pub fn capture_metadata(&self, wait: bool, completion: CompletionMode) -> Result<Option<Metadata>> {
        self.run(capture::metadata(), wait, completion, "metadata", Outcome::into_metadata)
    }

    pub fn capture_buffer(&self, stream: usize, wait: bool, completion: CompletionMode) -> Result<Option<Vec<u8>>> {
        self.run(capture::buffer(stream), wait, completion, "buffer", Outcome::into_buffer)
    }

    pub fn capture_array(&self, stream: usize, wait: bool, completion: CompletionMode) -> Result<Option<Array3<u8>>> {
        self.run(capture::array(stream), wait, completion, "array", Outcome::into_array)
    }

    pub fn capture_image(&self, stream: usize, wait: bool, completion: CompletionMode) -> Result<Option<RgbImage>> {
        self.run(capture::image(stream), wait, completion, "image", Outcome::into_image)
    }

    /// Encode `stream` to `path`; `None` picks the still stream, or the first stream if there is
    /// none. The format follows the extension.
    pub fn capture_file(
        &self,
        path: impl AsRef<Path>,
        stream: Option<usize>,
        wait: bool,
        completion: CompletionMode,
    ) -> Result<Option<Metadata>> {
        self.run(capture::file(path.as_ref(), stream), wait, completion, "metadata", Outcome::into_metadata)
    }

    pub fn switch_mode(
        &self,
        layout: &CameraConfiguration,
        wait: bool,
        completion: CompletionMode,
    ) -> Result<Option<Arc<CameraConfiguration>>> {
        self.run(
            capture::switch_mode(layout.clone()),
            wait,
            completion,
            "configuration",
            Outcome::into_configuration,
        )
    }

    fn previous_configuration(&self) -> Result<CameraConfiguration> {
        self.configuration()
            .map(|c| (*c).clone())
            .ok_or(CameraError::CameraNotConfigured)
    }

    /// Switch to `layout`, save one frame from its still stream, switch back.
    pub fn switch_mode_and_capture_file(
        &self,
        layout: &CameraConfiguration,
        path: impl AsRef<Path>,
        wait: bool,
        completion: CompletionMode,
    ) -> Result<Option<Metadata>> {
        let path = path.as_ref().to_path_buf();
        let op = capture::switch_mode_and(
            "switch_mode_and_capture_file",
            layout.clone(),
            self.previous_configuration()?,
            move |ctx, frame| frame.save(&path, None, ctx.options()).map(Outcome::Metadata),
        );
        self.run(op, wait, completion, "metadata", Outcome::into_metadata)
    }

    pub fn switch_mode_and_capture_array(
        &self,
        layout: &CameraConfiguration,
        stream: usize,
        wait: bool,
        completion: CompletionMode,
    ) -> Result<Option<Array3<u8>>> {
        let op = capture::switch_mode_and(
            "switch_mode_and_capture_array",
            layout.clone(),
            self.previous_configuration()?,
            move |_, frame| frame.make_array(stream).map(Outcome::Array),
        );
        self.run(op, wait, completion, "array", Outcome::into_array)
    }

    pub fn switch_mode_and_capture_buffer(
        &self,
        layout: &CameraConfiguration,
        stream: usize,
        wait: bool,
        completion: CompletionMode,
    ) -> Result<Option<Vec<u8>>> {
        let op = capture::switch_mode_and(
            "switch_mode_and_capture_buffer",
            layout.clone(),
            self.previous_configuration()?,
            move |_, frame| frame.make_buffer(stream).map(Outcome::Buffer),
        );
        self.run(op, wait, completion, "buffer", Outcome::into_buffer)
    }

    pub fn switch_mode_and_capture_image(
        &self,
        layout: &CameraConfiguration,
        stream: usize,
        wait: bool,
        completion: CompletionMode,
    ) -> Result<Option<RgbImage>> {
        let op = capture::switch_mode_and(
            "switch_mode_and_capture_image",
            layout.clone(),
            self.previous_configuration()?,
            move |_, frame| frame.make_image(stream).map(Outcome::Image),
        );
        self.run(op, wait, completion, "image", Outcome::into_image)
    }

    /// Switch to `layout`, acquire one frame, switch back. The frame stays readable after the
    /// switch back; releasing it discards the request instead of recycling it.
    pub fn switch_mode_and_capture_request(
        &self,
        layout: &CameraConfiguration,
        wait: bool,
        completion: CompletionMode,
    ) -> Result<Option<FrameHandle>> {
        let op = capture::switch_mode_and(
            "switch_mode_and_capture_request",
            layout.clone(),
            self.previous_configuration()?,
            |_, frame| {
                frame.acquire()?;
                Ok(Outcome::Frame(frame.clone()))
            },
        );
        self.run(op, wait, completion, "frame", Outcome::into_frame)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
