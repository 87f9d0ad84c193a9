//! Driver-collaborator layer for `camreq`.
//!
//! Everything the request-lifecycle engine needs from the native camera stack is expressed by the
//! [`CameraDriver`] trait: a waitable completion [`Notifier`], bulk retrieval of completed
//! [`Request`]s, resubmission, and session start/stop/reconfigure. [`VirtualCamera`] is a software
//! implementation used by tests and demos.

pub mod config;
pub mod controls;
pub mod error;
pub mod notify;
pub mod request;
pub mod virtual_camera;

pub use crate::config::{CameraConfiguration, PixelFormat, StreamConfig, StreamRole, Transform};
pub use crate::controls::{ids, ControlList, ControlValue, Metadata};
pub use crate::error::{DriverError, Result};
pub use crate::notify::{Notifier, Subscription, WaitOutcome};
pub use crate::request::{FrameBuffer, Request, RequestId, RequestStatus};
pub use crate::virtual_camera::{FrameClock, VirtualCamera};

/// The native camera subsystem as seen by the request-lifecycle engine.
///
/// All methods take `&self`: frames are recycled from whichever thread drops the last reference,
/// so implementations synchronize internally.
pub trait CameraDriver: Send + Sync {
    /// Stable identifier of the device.
    fn id(&self) -> &str;

    /// Take exclusive ownership of the device.
    fn acquire(&self) -> Result<()>;

    /// Give the device back. A running session is stopped first.
    fn release(&self) -> Result<()>;

    /// Handle signalled once per completed request.
    fn notifier(&self) -> &Notifier;

    /// Controls the device accepts, with their current values.
    fn available_controls(&self) -> ControlList;

    /// Validate, adjust and apply a stream layout. Returns the layout actually applied, with
    /// `stride` and `frame_size` filled in. The session must be stopped.
    fn reconfigure_session(&self, layout: &CameraConfiguration) -> Result<CameraConfiguration>;

    /// Allocate a fresh set of requests for the applied layout, one per buffer slot.
    fn prepare_requests(&self) -> Result<Vec<Request>>;

    fn start_session(&self, initial_controls: &ControlList) -> Result<()>;

    /// Halt delivery. Requests still queued come back through
    /// [`CameraDriver::fetch_completed_requests`] as [`RequestStatus::Cancelled`].
    fn stop_session(&self) -> Result<()>;

    /// Take every request the driver has finished with since the last call.
    fn fetch_completed_requests(&self) -> Vec<Request>;

    /// Queue a request for capture. Fails with [`DriverError::NotRunning`] once the session has
    /// stopped, in which case the request is dropped.
    fn resubmit(&self, request: Request) -> Result<()>;

    /// Stage a control write on a request prior to resubmission.
    fn apply_control(&self, request: &mut Request, id: &str, value: &ControlValue) {
        request.set_control(id, value.clone());
    }
}
