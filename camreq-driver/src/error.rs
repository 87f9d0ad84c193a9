//! Error handling for the driver layer

use thiserror::Error;

use crate::request::RequestId;

/// Result type for driver operations
pub type Result<T> = std::result::Result<T, DriverError>;

/// Errors reported by a [`CameraDriver`](crate::CameraDriver) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// Another user already holds the device
    #[error("camera {0} is already acquired")]
    AlreadyAcquired(String),
    /// The device was used without being acquired first
    #[error("camera has not been acquired")]
    NotAcquired,
    /// Requests or a session were asked for before any stream layout was applied
    #[error("camera has not been configured")]
    NotConfigured,
    /// The session is stopped
    #[error("session is not running")]
    NotRunning,
    /// The session is already delivering frames
    #[error("session is already running")]
    AlreadyRunning,
    /// A request was queued without being reset first
    #[error("request {0} has not been reset for reuse")]
    RequestNotReusable(RequestId),
    /// The stream layout was rejected
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// Frame buffer allocation failed
    #[error("buffer allocation failed: {0}")]
    Allocation(String),
    /// A JSON document could not be parsed
    #[error("invalid json: {0}")]
    Json(String),
}

impl From<serde_json::Error> for DriverError {
    fn from(err: serde_json::Error) -> Self {
        DriverError::Json(err.to_string())
    }
}
