//! Serialized multi-step operations and completion signalling.
//!
//! An [`Operation`] is an ordered list of steps. [`Dispatcher`] holds at most one operation in
//! flight; the event loop runs its front step once per drain against the newest frame and
//! signals the caller when the last step reports done.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use camreq_driver::{CameraConfiguration, Metadata};
use image::RgbImage;
use ndarray::Array3;
use tracing::{debug, warn};

use crate::error::{CameraError, Result};
use crate::frame::FrameHandle;
use crate::options::CameraOptions;
use crate::session::SessionController;

/// Value an operation finishes with.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A frame acquired for the caller, who owns one reference and must release it.
    Frame(FrameHandle),
    Metadata(Metadata),
    Configuration(Arc<CameraConfiguration>),
    Buffer(Vec<u8>),
    Array(Array3<u8>),
    Image(RgbImage),
}

impl Outcome {
    pub fn into_frame(self) -> Option<FrameHandle> {
        match self {
            Outcome::Frame(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn into_metadata(self) -> Option<Metadata> {
        match self {
            Outcome::Metadata(metadata) => Some(metadata),
            _ => None,
        }
    }

    pub fn into_configuration(self) -> Option<Arc<CameraConfiguration>> {
        match self {
            Outcome::Configuration(configuration) => Some(configuration),
            _ => None,
        }
    }

    pub fn into_buffer(self) -> Option<Vec<u8>> {
        match self {
            Outcome::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Array3<u8>> {
        match self {
            Outcome::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn into_image(self) -> Option<RgbImage> {
        match self {
            Outcome::Image(image) => Some(image),
            _ => None,
        }
    }
}

/// Stored result of a finished operation. `Ok(None)` when no step produced an outcome.
pub type OperationResult = Result<Option<Outcome>>;

/// What a step sees while it runs: the session, the operation's outcome slot and the options.
pub struct StepContext<'a> {
    session: &'a mut SessionController,
    outcome: &'a mut Option<Outcome>,
    options: &'a CameraOptions,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        session: &'a mut SessionController,
        outcome: &'a mut Option<Outcome>,
        options: &'a CameraOptions,
    ) -> Self {
        Self {
            session,
            outcome,
            options,
        }
    }

    pub fn session(&mut self) -> &mut SessionController {
        &mut *self.session
    }

    pub fn session_ref(&self) -> &SessionController {
        &*self.session
    }

    pub fn options(&self) -> &CameraOptions {
        self.options
    }

    /// Replace the operation's outcome.
    pub fn set_outcome(&mut self, outcome: Outcome) {
        *self.outcome = Some(outcome);
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }
}

type StepFn = dyn FnMut(&mut StepContext<'_>, &FrameHandle) -> Result<bool> + Send;

/// One unit of an operation. Returns `Ok(true)` when done, `Ok(false)` to run again on the next
/// drain.
pub struct Step {
    name: String,
    run: Box<StepFn>,
}

impl Step {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: FnMut(&mut StepContext<'_>, &FrameHandle) -> Result<bool> + Send + 'static,
    {
        Self {
            name: name.into(),
            run: Box::new(run),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn run(&mut self, ctx: &mut StepContext<'_>, frame: &FrameHandle) -> Result<bool> {
        (self.run)(ctx, frame)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Step").field(&self.name).finish()
    }
}

/// An ordered sequence of steps dispatched as one logical operation.
#[derive(Debug)]
pub struct Operation {
    label: String,
    steps: VecDeque<Step>,
}

impl Operation {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: VecDeque::new(),
        }
    }

    pub fn step<F>(mut self, name: impl Into<String>, run: F) -> Self
    where
        F: FnMut(&mut StepContext<'_>, &FrameHandle) -> Result<bool> + Send + 'static,
    {
        self.steps.push_back(Step::new(name, run));
        self
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push_back(step);
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// How a finished operation is reported.
#[derive(Default)]
pub enum CompletionMode {
    /// Wake the thread blocked in dispatch or [`poll_or_wait`](Dispatcher::poll_or_wait).
    #[default]
    BlockOnPrimitive,
    /// Call the handler on the event loop thread. The in-progress flag is cleared and waiters are
    /// woken before the handler runs, so it may dispatch the next operation.
    InvokeCallback(Box<dyn FnOnce(OperationResult) + Send>),
}

impl CompletionMode {
    pub fn callback<F>(f: F) -> Self
    where
        F: FnOnce(OperationResult) + Send + 'static,
    {
        CompletionMode::InvokeCallback(Box::new(f))
    }
}

impl fmt::Debug for CompletionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionMode::BlockOnPrimitive => f.write_str("BlockOnPrimitive"),
            CompletionMode::InvokeCallback(_) => f.write_str("InvokeCallback"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum OperationStatus {
    Pending,
    Complete(OperationResult),
}

impl OperationStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, OperationStatus::Complete(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Nothing dispatched yet.
    Idle,
    InProgress,
    /// Finished, waiting for the caller to consume the result.
    Signalled,
    /// Finished and consumed; a new dispatch is allowed.
    Consumed,
}

struct DispatchState {
    phase: Phase,
    label: String,
    queue: VecDeque<Step>,
    completion: CompletionMode,
    outcome: Option<Outcome>,
    result: Option<OperationResult>,
}

/// The front step of the active operation, checked out for execution.
pub(crate) struct PendingStep {
    step: Step,
    outcome: Option<Outcome>,
}

impl PendingStep {
    pub(crate) fn name(&self) -> &str {
        self.step.name()
    }

    /// Run against `frame`, writing into this operation's outcome slot.
    pub(crate) fn run(
        &mut self,
        session: &mut SessionController,
        options: &CameraOptions,
        frame: &FrameHandle,
    ) -> Result<bool> {
        let mut ctx = StepContext::new(session, &mut self.outcome, options);
        self.step.run(&mut ctx, frame)
    }
}

/// Holds the single in-flight operation and its completion state.
pub struct Dispatcher {
    state: Mutex<DispatchState>,
    cond: Condvar,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DispatchState {
                phase: Phase::Idle,
                label: String::new(),
                queue: VecDeque::new(),
                completion: CompletionMode::BlockOnPrimitive,
                outcome: None,
                result: None,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn in_progress(&self) -> bool {
        self.lock().phase == Phase::InProgress
    }

    /// Make `operation` the active one. Fails with [`CameraError::ConcurrentOperation`] while
    /// another is running or its result has not been collected, leaving that one untouched.
    pub fn dispatch(&self, operation: Operation, completion: CompletionMode) -> Result<()> {
        let mut state = self.lock();
        if matches!(state.phase, Phase::InProgress | Phase::Signalled) {
            return Err(CameraError::ConcurrentOperation);
        }
        debug!(operation = %operation.label, steps = operation.steps.len(), "operation dispatched");
        state.label = operation.label;
        state.queue = operation.steps;
        state.completion = completion;
        state.outcome = None;
        state.result = None;
        state.phase = Phase::InProgress;
        if state.queue.is_empty() {
            self.finish(state, Ok(None));
        }
        Ok(())
    }

    /// Status of the active operation, blocking until it finishes if `blocking`.
    ///
    /// Collecting a result clears the in-progress flag; polling again returns the same stored
    /// result.
    pub fn poll_or_wait(&self, blocking: bool) -> Result<OperationStatus> {
        let mut state = self.lock();
        loop {
            match state.phase {
                Phase::Idle => return Err(CameraError::NoOperation),
                Phase::InProgress if !blocking => return Ok(OperationStatus::Pending),
                Phase::InProgress => {
                    state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
                }
                Phase::Signalled | Phase::Consumed => {
                    state.phase = Phase::Consumed;
                    let result = state.result.clone().unwrap_or(Ok(None));
                    return Ok(OperationStatus::Complete(result));
                }
            }
        }
    }

    /// Block until the active operation finishes and return its result.
    pub fn wait(&self) -> OperationResult {
        match self.poll_or_wait(true)? {
            OperationStatus::Complete(result) => result,
            OperationStatus::Pending => Ok(None),
        }
    }

    pub(crate) fn take_step(&self) -> Option<PendingStep> {
        let mut state = self.lock();
        if state.phase != Phase::InProgress {
            return None;
        }
        let step = state.queue.pop_front()?;
        let outcome = state.outcome.take();
        Some(PendingStep { step, outcome })
    }

    /// Record what a checked-out step returned and move the operation on.
    pub(crate) fn complete_step(&self, pending: PendingStep, result: Result<bool>) {
        let PendingStep { step, outcome } = pending;
        let mut state = self.lock();
        if state.phase != Phase::InProgress {
            debug!(operation = %state.label, step = step.name(), "operation already finished, dropping step result");
            return;
        }
        match result {
            Ok(true) => {
                debug!(operation = %state.label, step = step.name(), "step done");
                state.outcome = outcome;
                if state.queue.is_empty() {
                    let outcome = state.outcome.take();
                    self.finish(state, Ok(outcome));
                }
            }
            Ok(false) => {
                state.outcome = outcome;
                state.queue.push_front(step);
            }
            Err(e) => {
                warn!(operation = %state.label, step = step.name(), error = %e, "step failed, abandoning operation");
                state.queue.clear();
                state.outcome = None;
                let error = CameraError::step(step.name(), e);
                self.finish(state, Err(error));
            }
        }
    }

    /// Finish the active operation with `error` if one is still running.
    pub(crate) fn abort(&self, error: CameraError) {
        let mut state = self.lock();
        if state.phase != Phase::InProgress {
            return;
        }
        warn!(operation = %state.label, error = %error, "operation aborted");
        state.queue.clear();
        state.outcome = None;
        self.finish(state, Err(error));
    }

    fn finish(&self, mut state: MutexGuard<'_, DispatchState>, result: OperationResult) {
        debug!(operation = %state.label, ok = result.is_ok(), "operation complete");
        match std::mem::take(&mut state.completion) {
            CompletionMode::BlockOnPrimitive => {
                state.result = Some(result);
                state.phase = Phase::Signalled;
                drop(state);
                self.cond.notify_all();
            }
            CompletionMode::InvokeCallback(callback) => {
                state.result = Some(result.clone());
                state.phase = Phase::Consumed;
                drop(state);
                self.cond.notify_all();
                callback(result);
            }
        }
    }
}
