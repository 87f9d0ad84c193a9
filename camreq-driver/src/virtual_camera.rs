//! A software camera implementing [`CameraDriver`].
//!
//! Frames are produced on demand with [`VirtualCamera::complete_next`], or periodically by a
//! [`FrameClock`] thread. Buffers are anonymous memory maps filled with a moving gradient.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::config::{CameraConfiguration, StreamConfig};
use crate::controls::{ids, ControlList, ControlValue};
use crate::error::{DriverError, Result};
use crate::notify::Notifier;
use crate::request::{FrameBuffer, Request, RequestId, RequestStatus};
use crate::CameraDriver;

const MAX_STREAMS: usize = 3;

#[derive(Default)]
struct VirtualState {
    acquired: bool,
    running: bool,
    configuration: Option<CameraConfiguration>,
    queued: VecDeque<Request>,
    completed: Vec<Request>,
    next_request_id: u64,
    sequence: u64,
    sensor_controls: ControlList,
    applied: Vec<(RequestId, ControlList)>,
    resubmissions: u64,
    fail_next: bool,
}

pub struct VirtualCamera {
    id: String,
    notifier: Notifier,
    epoch: Instant,
    state: Mutex<VirtualState>,
}

impl VirtualCamera {
    pub fn new(id: impl Into<String>) -> Self {
        let sensor_controls = ControlList::new()
            .with(ids::EXPOSURE_TIME, 10_000)
            .with(ids::ANALOGUE_GAIN, 1.0)
            .with(ids::AE_ENABLE, true)
            .with(ids::AWB_ENABLE, true)
            .with(ids::BRIGHTNESS, 0.0)
            .with(ids::CONTRAST, 1.0);
        Self {
            id: id.into(),
            notifier: Notifier::new(),
            epoch: Instant::now(),
            state: Mutex::new(VirtualState {
                sensor_controls,
                ..VirtualState::default()
            }),
        }
    }

    /// Convenience for the common `Arc<VirtualCamera>` handle shared with a frame clock.
    pub fn shared(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(id))
    }

    fn lock(&self) -> MutexGuard<'_, VirtualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Complete the oldest queued request. Returns `false` if the session is stopped or nothing
    /// is queued.
    pub fn complete_next(&self) -> bool {
        {
            let mut state = self.lock();
            if !state.running {
                return false;
            }
            let Some(mut request) = state.queued.pop_front() else {
                return false;
            };

            if std::mem::take(&mut state.fail_next) {
                request.cancel();
            } else {
                state.sequence += 1;
                let sequence = state.sequence;
                let requested = request.controls().clone();
                state.sensor_controls.merge(&requested);

                if let Some(configuration) = &state.configuration {
                    for (index, stream) in configuration.streams.iter().enumerate() {
                        if let Some(buffer) = request.buffer_mut(index) {
                            fill_gradient(buffer, stream, sequence);
                        }
                    }
                }

                let mut metadata = state.sensor_controls.clone();
                metadata.set(ids::FRAME_SEQUENCE, sequence);
                metadata.set(ids::SENSOR_TIMESTAMP, self.epoch.elapsed().as_nanos() as u64);
                request.complete(sequence, metadata);
            }
            trace!(camera = %self.id, request = %request.id(), status = ?request.status(), "request completed");
            state.completed.push(request);
        }
        self.notifier.signal();
        true
    }

    /// Complete up to `count` requests, returning how many were completed.
    pub fn complete_frames(&self, count: usize) -> usize {
        (0..count).take_while(|_| self.complete_next()).count()
    }

    /// Make the next completion come back cancelled.
    pub fn fail_next(&self) {
        self.lock().fail_next = true;
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn queued_len(&self) -> usize {
        self.lock().queued.len()
    }

    /// Number of requests accepted by [`CameraDriver::resubmit`] since creation.
    pub fn resubmit_count(&self) -> u64 {
        self.lock().resubmissions
    }

    /// Controls found on requests at resubmission, in order.
    pub fn applied_controls(&self) -> Vec<(RequestId, ControlList)> {
        self.lock().applied.clone()
    }

    pub fn configuration(&self) -> Option<CameraConfiguration> {
        self.lock().configuration.clone()
    }
}

fn fill_gradient(buffer: &mut FrameBuffer, stream: &StreamConfig, sequence: u64) {
    let stride = (stream.stride as usize).max(1);
    let len = stream.frame_size.min(buffer.capacity());
    let shift = sequence as usize;
    for (i, byte) in buffer.data_mut()[..len].iter_mut().enumerate() {
        let x = i % stride;
        let y = i / stride;
        *byte = ((x + y + shift) % 256) as u8;
    }
    buffer.set_bytes_used(len);
}

fn apply_layout(layout: &CameraConfiguration) -> Result<CameraConfiguration> {
    if layout.streams.is_empty() {
        return Err(DriverError::InvalidConfiguration("no streams requested".into()));
    }
    if layout.streams.len() > MAX_STREAMS {
        return Err(DriverError::InvalidConfiguration(format!(
            "too many streams ({}, maximum is {MAX_STREAMS})",
            layout.streams.len()
        )));
    }
    let mut applied = layout.clone();
    for stream in &mut applied.streams {
        let (width, height) = stream.size;
        let align = stream.format.width_alignment();
        let width = width - width % align;
        let height = height - height % 2;
        if width == 0 || height == 0 {
            return Err(DriverError::InvalidConfiguration(format!(
                "stream size {}x{} too small for {}",
                stream.size.0, stream.size.1, stream.format
            )));
        }
        if stream.buffer_count == 0 {
            return Err(DriverError::InvalidConfiguration("buffer_count must be at least 1".into()));
        }
        stream.size = (width, height);
        let stride = width as usize * stream.format.bytes_per_pixel();
        stream.stride = stride as u32;
        stream.frame_size = stream.format.frame_size(stride, height as usize);
    }
    Ok(applied)
}

impl CameraDriver for VirtualCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn acquire(&self) -> Result<()> {
        let mut state = self.lock();
        if state.acquired {
            return Err(DriverError::AlreadyAcquired(self.id.clone()));
        }
        state.acquired = true;
        Ok(())
    }

    fn release(&self) -> Result<()> {
        let mut state = self.lock();
        if !state.acquired {
            return Err(DriverError::NotAcquired);
        }
        state.running = false;
        state.queued.clear();
        state.completed.clear();
        state.configuration = None;
        state.acquired = false;
        Ok(())
    }

    fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    fn available_controls(&self) -> ControlList {
        self.lock().sensor_controls.clone()
    }

    fn reconfigure_session(&self, layout: &CameraConfiguration) -> Result<CameraConfiguration> {
        let mut state = self.lock();
        if !state.acquired {
            return Err(DriverError::NotAcquired);
        }
        if state.running {
            return Err(DriverError::AlreadyRunning);
        }
        let applied = apply_layout(layout)?;
        debug!(camera = %self.id, streams = applied.streams.len(), "layout applied");
        state.configuration = Some(applied.clone());
        Ok(applied)
    }

    fn prepare_requests(&self) -> Result<Vec<Request>> {
        let mut state = self.lock();
        let configuration = state.configuration.clone().ok_or(DriverError::NotConfigured)?;
        let mut requests = Vec::with_capacity(configuration.request_count());
        for _ in 0..configuration.request_count() {
            let buffers = configuration
                .streams
                .iter()
                .map(|s| FrameBuffer::allocate(s.frame_size))
                .collect::<Result<Vec<_>>>()?;
            let id = RequestId(state.next_request_id);
            state.next_request_id += 1;
            requests.push(Request::new(id, buffers));
        }
        Ok(requests)
    }

    fn start_session(&self, initial_controls: &ControlList) -> Result<()> {
        let mut state = self.lock();
        if !state.acquired {
            return Err(DriverError::NotAcquired);
        }
        if state.configuration.is_none() {
            return Err(DriverError::NotConfigured);
        }
        if state.running {
            return Err(DriverError::AlreadyRunning);
        }
        state.sensor_controls.merge(initial_controls);
        state.running = true;
        debug!(camera = %self.id, "session started");
        Ok(())
    }

    fn stop_session(&self) -> Result<()> {
        let cancelled = {
            let mut state = self.lock();
            if !state.running {
                return Err(DriverError::NotRunning);
            }
            state.running = false;
            let mut cancelled = 0;
            while let Some(mut request) = state.queued.pop_front() {
                request.cancel();
                state.completed.push(request);
                cancelled += 1;
            }
            cancelled
        };
        debug!(camera = %self.id, cancelled, "session stopped");
        if cancelled > 0 {
            self.notifier.signal();
        }
        Ok(())
    }

    fn fetch_completed_requests(&self) -> Vec<Request> {
        std::mem::take(&mut self.lock().completed)
    }

    fn resubmit(&self, request: Request) -> Result<()> {
        let mut state = self.lock();
        if !state.running {
            return Err(DriverError::NotRunning);
        }
        if request.status() != RequestStatus::Pending {
            return Err(DriverError::RequestNotReusable(request.id()));
        }
        if !request.controls().is_empty() {
            state.applied.push((request.id(), request.controls().clone()));
        }
        state.resubmissions += 1;
        state.queued.push_back(request);
        Ok(())
    }

    fn apply_control(&self, request: &mut Request, id: &str, value: &ControlValue) {
        trace!(camera = %self.id, request = %request.id(), control = id, %value, "control staged");
        request.set_control(id, value.clone());
    }
}

/// Background thread completing one request of a [`VirtualCamera`] per interval.
pub struct FrameClock {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FrameClock {
    pub fn start(camera: Arc<VirtualCamera>, interval: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::spawn(move || {
            while flag.load(Ordering::Acquire) {
                camera.complete_next();
                thread::sleep(interval);
            }
        });
        Self {
            running,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FrameClock {
    fn drop(&mut self) {
        self.stop();
    }
}
