//! Camera and stream configuration types.
//!
//! Format negotiation itself belongs to the driver: a [`CameraConfiguration`] is a request that the
//! driver adjusts and returns from
//! [`CameraDriver::reconfigure_session`](crate::CameraDriver::reconfigure_session) with strides and
//! frame sizes filled in.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum PixelFormat {
    XRGB8888,
    XBGR8888,
    RGB888,
    BGR888,
    YUV420,
    YVU420,
    NV12,
    NV21,
    YUYV,
    UYVY,
    SBGGR8,
    SRGGB8,
    SBGGR10,
    SRGGB10,
    SBGGR12,
    SRGGB12,
}

impl PixelFormat {
    pub fn is_yuv(self) -> bool {
        use PixelFormat::*;
        matches!(self, YUV420 | YVU420 | NV12 | NV21 | YUYV | UYVY)
    }

    pub fn is_rgb(self) -> bool {
        use PixelFormat::*;
        matches!(self, XRGB8888 | XBGR8888 | RGB888 | BGR888)
    }

    pub fn is_raw(self) -> bool {
        use PixelFormat::*;
        matches!(self, SBGGR8 | SRGGB8 | SBGGR10 | SRGGB10 | SBGGR12 | SRGGB12)
    }

    /// Bytes per pixel in the first plane.
    pub fn bytes_per_pixel(self) -> usize {
        use PixelFormat::*;
        match self {
            XRGB8888 | XBGR8888 => 4,
            RGB888 | BGR888 => 3,
            YUYV | UYVY => 2,
            YUV420 | YVU420 | NV12 | NV21 => 1,
            SBGGR8 | SRGGB8 => 1,
            // Unpacked 16-bit containers.
            SBGGR10 | SRGGB10 | SBGGR12 | SRGGB12 => 2,
        }
    }

    /// Width alignment (in pixels) the hardware prefers for this format.
    pub fn width_alignment(self) -> u32 {
        use PixelFormat::*;
        match self {
            YUV420 | YVU420 => 64,
            _ if self.is_raw() => 2,
            _ => 32,
        }
    }

    /// Total buffer size for a frame with the given stride and height.
    pub fn frame_size(self, stride: usize, height: usize) -> usize {
        use PixelFormat::*;
        match self {
            YUV420 | YVU420 | NV12 | NV21 => stride * height * 3 / 2,
            _ => stride * height,
        }
    }

    pub fn as_str(self) -> &'static str {
        use PixelFormat::*;
        match self {
            XRGB8888 => "XRGB8888",
            XBGR8888 => "XBGR8888",
            RGB888 => "RGB888",
            BGR888 => "BGR888",
            YUV420 => "YUV420",
            YVU420 => "YVU420",
            NV12 => "NV12",
            NV21 => "NV21",
            YUYV => "YUYV",
            UYVY => "UYVY",
            SBGGR8 => "SBGGR8",
            SRGGB8 => "SRGGB8",
            SBGGR10 => "SBGGR10",
            SRGGB10 => "SRGGB10",
            SBGGR12 => "SBGGR12",
            SRGGB12 => "SRGGB12",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelFormat {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        use PixelFormat::*;
        let format = match s {
            "XRGB8888" => XRGB8888,
            "XBGR8888" => XBGR8888,
            "RGB888" => RGB888,
            "BGR888" => BGR888,
            "YUV420" => YUV420,
            "YVU420" => YVU420,
            "NV12" => NV12,
            "NV21" => NV21,
            "YUYV" => YUYV,
            "UYVY" => UYVY,
            "SBGGR8" => SBGGR8,
            "SRGGB8" => SRGGB8,
            "SBGGR10" => SBGGR10,
            "SRGGB10" => SRGGB10,
            "SBGGR12" => SBGGR12,
            "SRGGB12" => SRGGB12,
            other => {
                return Err(DriverError::InvalidConfiguration(format!("unknown pixel format {other}")));
            }
        };
        Ok(format)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamRole {
    Preview,
    Still,
    Video,
    Raw,
}

impl StreamRole {
    fn defaults(self) -> ((u32, u32), PixelFormat, u32) {
        match self {
            StreamRole::Preview => ((640, 480), PixelFormat::XRGB8888, 4),
            StreamRole::Still => ((2028, 1520), PixelFormat::BGR888, 1),
            StreamRole::Video => ((1280, 720), PixelFormat::YUV420, 6),
            StreamRole::Raw => ((2028, 1520), PixelFormat::SBGGR12, 2),
        }
    }
}

/// Horizontal/vertical flip applied by the sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transform {
    #[serde(default)]
    pub hflip: bool,
    #[serde(default)]
    pub vflip: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub role: StreamRole,
    pub format: PixelFormat,
    pub size: (u32, u32),
    pub buffer_count: u32,
    /// Bytes per row of the first plane. Zero until the driver has applied the layout.
    #[serde(default)]
    pub stride: u32,
    /// Bytes per frame buffer. Zero until the driver has applied the layout.
    #[serde(default)]
    pub frame_size: usize,
}

impl StreamConfig {
    /// Stream with the driver's defaults for `role`.
    pub fn new(role: StreamRole) -> Self {
        let (size, format, buffer_count) = role.defaults();
        Self {
            role,
            format,
            size,
            buffer_count,
            stride: 0,
            frame_size: 0,
        }
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = (width, height);
        self
    }

    pub fn with_buffer_count(mut self, buffer_count: u32) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    pub fn width(&self) -> u32 {
        self.size.0
    }

    pub fn height(&self) -> u32 {
        self.size.1
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraConfiguration {
    #[serde(default)]
    pub transform: Transform,
    pub streams: Vec<StreamConfig>,
}

impl CameraConfiguration {
    pub fn new(streams: Vec<StreamConfig>) -> Self {
        Self {
            transform: Transform::default(),
            streams,
        }
    }

    /// Single preview stream.
    pub fn preview() -> Self {
        Self::new(vec![StreamConfig::new(StreamRole::Preview)])
    }

    /// Full-resolution still stream plus a small preview.
    pub fn still() -> Self {
        Self::new(vec![
            StreamConfig::new(StreamRole::Still),
            StreamConfig::new(StreamRole::Preview).with_format(PixelFormat::YUV420),
        ])
    }

    pub fn video() -> Self {
        Self::new(vec![StreamConfig::new(StreamRole::Video)])
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn stream(&self, index: usize) -> Option<&StreamConfig> {
        self.streams.get(index)
    }

    /// Index of the first stream with `role`.
    pub fn find_stream(&self, role: StreamRole) -> Option<usize> {
        self.streams.iter().position(|s| s.role == role)
    }

    /// Like [`CameraConfiguration::find_stream`], falling back to the first stream for every role
    /// except [`StreamRole::Raw`].
    pub fn stream_index(&self, role: StreamRole) -> Option<usize> {
        match self.find_stream(role) {
            Some(index) => Some(index),
            None if role == StreamRole::Raw || self.streams.is_empty() => None,
            None => Some(0),
        }
    }

    /// Number of requests a session can keep in flight: the smallest buffer count of any stream.
    pub fn request_count(&self) -> usize {
        self.streams
            .iter()
            .map(|s| s.buffer_count as usize)
            .min()
            .unwrap_or(0)
    }
}
