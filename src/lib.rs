//! Asynchronous request-lifecycle engine for camera capture.
//!
//! A [`Camera`] wraps a [`CameraDriver`](driver::CameraDriver). An [`EventLoop`] thread waits on
//! the driver's notifier, drains completed requests into [`FrameHandle`]s and runs one step of the
//! dispatched [`Operation`] per drain. Frames are recycled into the driver when their last
//! reference is released, unless the session was stopped since they were captured.

pub mod camera;
pub mod capture;
pub mod error;
pub mod event_loop;
pub mod frame;
pub mod generation;
pub mod operation;
pub mod options;
pub mod session;
pub mod staging;

pub use camreq_driver as driver;

// Re-export main types for convenience
pub use crate::camera::Camera;
pub use crate::error::{CameraError, Result};
pub use crate::event_loop::{EventLoop, FrameConsumer, NullConsumer};
pub use crate::frame::{FrameHandle, Release};
pub use crate::generation::GenerationCounter;
pub use crate::operation::{
    CompletionMode, Dispatcher, Operation, OperationResult, OperationStatus, Outcome, Step, StepContext,
};
pub use crate::options::{CameraOptions, EventLoopConfig};
pub use crate::session::SessionController;
pub use crate::staging::ControlStaging;
pub use camreq_driver::{
    CameraConfiguration, ControlList, ControlValue, Metadata, PixelFormat, StreamConfig, StreamRole, VirtualCamera,
};
