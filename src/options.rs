//! Camera-wide options, loadable from JSON.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CameraError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLoopConfig {
    /// Upper bound on each wait for the driver's notifier, in milliseconds. `None` waits until a
    /// completion arrives or the loop is stopped.
    pub wait_timeout_ms: Option<u64>,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: Some(200),
        }
    }
}

impl EventLoopConfig {
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraOptions {
    /// JPEG quality, 1 to 100.
    pub quality: u8,
    /// PNG compression level, 0 to 9.
    pub compress_level: u8,
    pub event_loop: EventLoopConfig,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            quality: 90,
            compress_level: 1,
            event_loop: EventLoopConfig::default(),
        }
    }
}

impl CameraOptions {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json).map_err(|e| CameraError::Options(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| CameraError::Options(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.quality) {
            return Err(CameraError::Options(format!("quality {} out of range 1..=100", self.quality)));
        }
        if self.compress_level > 9 {
            return Err(CameraError::Options(format!(
                "compress_level {} out of range 0..=9",
                self.compress_level
            )));
        }
        Ok(())
    }
}
