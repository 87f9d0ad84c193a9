//! Error handling for the request-lifecycle engine

use camreq_driver::DriverError;
use thiserror::Error;

/// Result type for camera operations
pub type Result<T> = std::result::Result<T, CameraError>;

/// Errors that can occur while driving a camera.
///
/// Cloneable so an operation's outcome can be stored once and handed to every poller.
#[derive(Debug, Clone, Error)]
pub enum CameraError {
    /// Double release, or acquire after the frame was destroyed
    #[error("frame lifecycle violation: {0}")]
    Lifecycle(String),
    #[error("an operation is already in progress")]
    ConcurrentOperation,
    #[error("no operation in progress")]
    NoOperation,
    #[error("camera already started")]
    AlreadyStarted,
    #[error("camera not started")]
    NotStarted,
    /// A queued step failed; the rest of its operation was abandoned
    #[error("step `{step}` failed: {source}")]
    StepExecution {
        step: String,
        #[source]
        source: Box<CameraError>,
    },
    #[error("step panicked: {0}")]
    StepPanicked(String),
    #[error("event loop not running")]
    EventLoopNotRunning,
    #[error("event loop already running")]
    EventLoopAlreadyRunning,
    #[error("event loop error: {0}")]
    EventLoop(String),
    #[error("camera not configured")]
    CameraNotConfigured,
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("encoding failed: {0}")]
    Encode(String),
    #[error("invalid options: {0}")]
    Options(String),
    /// The operation finished with a different kind of result than the caller asked for
    #[error("operation produced no {0}")]
    UnexpectedOutcome(&'static str),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl CameraError {
    /// Wrap a failure raised by the step named `step`.
    pub fn step(step: impl Into<String>, source: CameraError) -> Self {
        CameraError::StepExecution {
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, looking through [`CameraError::StepExecution`].
    pub fn root_cause(&self) -> &CameraError {
        match self {
            CameraError::StepExecution { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<image::ImageError> for CameraError {
    fn from(e: image::ImageError) -> Self {
        CameraError::Encode(e.to_string())
    }
}

impl From<std::io::Error> for CameraError {
    fn from(e: std::io::Error) -> Self {
        CameraError::Encode(e.to_string())
    }
}

impl From<ndarray::ShapeError> for CameraError {
    fn from(e: ndarray::ShapeError) -> Self {
        CameraError::InvalidConfiguration(e.to_string())
    }
}
