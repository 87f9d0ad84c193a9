//! Capture operations and the conversions they perform on a frame.
//!
//! Each constructor returns an [`Operation`] that waits for a frame of the current generation,
//! so a capture dispatched right after a restart never sees a frame from the old session.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use camreq_driver::{CameraConfiguration, ControlList, Metadata, PixelFormat, StreamConfig, StreamRole};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, ImageFormat, Rgb, RgbImage};
use ndarray::{s, Array3};
use tracing::debug;

use crate::error::{CameraError, Result};
use crate::frame::FrameHandle;
use crate::operation::{Operation, Outcome, StepContext};
use crate::options::CameraOptions;

fn is_current(ctx: &StepContext<'_>, frame: &FrameHandle) -> bool {
    frame.generation() == ctx.session_ref().generation()
}

fn single<F>(label: &'static str, mut capture: F) -> Operation
where
    F: FnMut(&StepContext<'_>, &FrameHandle) -> Result<Outcome> + Send + 'static,
{
    Operation::new(label).step(label, move |ctx: &mut StepContext<'_>, frame: &FrameHandle| {
        if !is_current(ctx, frame) {
            return Ok(false);
        }
        let outcome = capture(&*ctx, frame)?;
        ctx.set_outcome(outcome);
        Ok(true)
    })
}

/// Acquire the newest frame of the current generation for the caller, who owns one reference.
pub fn request() -> Operation {
    Operation::new("capture_request").step("capture_request", |ctx, frame| {
        if !is_current(ctx, frame) {
            return Ok(false);
        }
        frame.acquire()?;
        ctx.set_outcome(Outcome::Frame(frame.clone()));
        Ok(true)
    })
}

pub fn metadata() -> Operation {
    single("capture_metadata", |_, frame| frame.metadata().map(Outcome::Metadata))
}

pub fn buffer(stream: usize) -> Operation {
    single("capture_buffer", move |_, frame| frame.make_buffer(stream).map(Outcome::Buffer))
}

pub fn array(stream: usize) -> Operation {
    single("capture_array", move |_, frame| frame.make_array(stream).map(Outcome::Array))
}

pub fn image(stream: usize) -> Operation {
    single("capture_image", move |_, frame| frame.make_image(stream).map(Outcome::Image))
}

/// Save one frame to `path`. `None` picks the still stream, or the first stream if there is none.
/// The outcome is the frame's metadata.
pub fn file(path: impl AsRef<Path>, stream: Option<usize>) -> Operation {
    let path: PathBuf = path.as_ref().to_path_buf();
    single("capture_file", move |ctx, frame| {
        frame.save(&path, stream, ctx.options()).map(Outcome::Metadata)
    })
}

/// Stop, apply `layout`, start. The outcome is the applied configuration.
pub fn switch_mode(layout: CameraConfiguration) -> Operation {
    Operation::new("switch_mode").step("switch_mode", move |ctx, _| {
        let applied = ctx.session().reconfigure(&layout, &ControlList::new())?;
        ctx.set_outcome(Outcome::Configuration(applied));
        Ok(true)
    })
}

/// Switch to `layout`, run `capture` on the first frame the new mode delivers, then switch to
/// `restore`. The switch back happens even if `capture` fails.
pub fn switch_mode_and<F>(
    label: &str,
    layout: CameraConfiguration,
    restore: CameraConfiguration,
    mut capture: F,
) -> Operation
where
    F: FnMut(&StepContext<'_>, &FrameHandle) -> Result<Outcome> + Send + 'static,
{
    Operation::new(label)
        .step("switch_mode", move |ctx, _| {
            ctx.session().reconfigure(&layout, &ControlList::new())?;
            Ok(true)
        })
        .step("capture_and_restore", move |ctx, frame| {
            if !is_current(ctx, frame) {
                return Ok(false);
            }
            let captured = capture(&*ctx, frame);
            ctx.session().reconfigure(&restore, &ControlList::new())?;
            ctx.set_outcome(captured?);
            Ok(true)
        })
}

impl FrameHandle {
    fn stream_config(&self, stream: usize) -> Result<&StreamConfig> {
        self.configuration()
            .stream(stream)
            .ok_or_else(|| CameraError::InvalidConfiguration(format!("no stream {stream}")))
    }

    /// Copy of the bytes the driver wrote for `stream`.
    pub fn make_buffer(&self, stream: usize) -> Result<Vec<u8>> {
        self.with_request(|request| request.buffer(stream).map(|b| b.data().to_vec()))?
            .ok_or_else(|| CameraError::InvalidConfiguration(format!("no stream {stream}")))
    }

    /// Pixel array of `stream`: (height, width, channels) for packed RGB formats, (height,
    /// stride, 1) for raw Bayer formats. Row padding is cut off for RGB formats.
    pub fn make_array(&self, stream: usize) -> Result<Array3<u8>> {
        let config = self.stream_config(stream)?;
        let (width, height) = (config.width() as usize, config.height() as usize);
        let stride = config.stride as usize;
        let mut data = self.make_buffer(stream)?;
        if data.len() < stride * height {
            return Err(CameraError::InvalidConfiguration(format!(
                "buffer holds {} bytes, expected {}",
                data.len(),
                stride * height
            )));
        }
        data.truncate(stride * height);

        let channels = match config.format {
            PixelFormat::RGB888 | PixelFormat::BGR888 => 3,
            PixelFormat::XRGB8888 | PixelFormat::XBGR8888 => 4,
            format if format.is_raw() => {
                return Ok(Array3::from_shape_vec((height, stride, 1), data)?);
            }
            format => return Err(CameraError::UnsupportedFormat(format!("{format} as an array"))),
        };
        if stride % channels != 0 {
            return Err(CameraError::UnsupportedFormat(format!(
                "stride {stride} is not a whole number of {channels}-byte pixels"
            )));
        }
        let padded = Array3::from_shape_vec((height, stride / channels, channels), data)?;
        Ok(padded.slice(s![.., ..width, ..]).to_owned())
    }

    /// `stream` as an RGB image, whatever the byte order of its format.
    pub fn make_image(&self, stream: usize) -> Result<RgbImage> {
        let (r, g, b) = match self.stream_config(stream)?.format {
            PixelFormat::RGB888 | PixelFormat::XRGB8888 => (2, 1, 0),
            PixelFormat::BGR888 | PixelFormat::XBGR8888 => (0, 1, 2),
            format => return Err(CameraError::UnsupportedFormat(format!("{format} as an image"))),
        };
        let array = self.make_array(stream)?;
        let (height, width, _) = array.dim();
        Ok(RgbImage::from_fn(width as u32, height as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            Rgb([array[[y, x, r]], array[[y, x, g]], array[[y, x, b]]])
        }))
    }

    /// Encode `stream` to `path` as JPEG or PNG, chosen by extension, and return the frame's
    /// metadata.
    pub fn save(&self, path: &Path, stream: Option<usize>, options: &CameraOptions) -> Result<Metadata> {
        let stream = match stream {
            Some(stream) => stream,
            None => self
                .configuration()
                .stream_index(StreamRole::Still)
                .ok_or(CameraError::CameraNotConfigured)?,
        };
        let format = ImageFormat::from_path(path)?;
        if !matches!(format, ImageFormat::Jpeg | ImageFormat::Png) {
            return Err(CameraError::UnsupportedFormat(format!("{format:?} output")));
        }
        let image = self.make_image(stream)?;
        let (width, height) = image.dimensions();

        let mut writer = BufWriter::new(File::create(path)?);
        if format == ImageFormat::Jpeg {
            JpegEncoder::new_with_quality(&mut writer, options.quality).write_image(
                image.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        } else {
            let compression = match options.compress_level {
                0 => CompressionType::Uncompressed,
                level => CompressionType::Level(level),
            };
            PngEncoder::new_with_quality(&mut writer, compression, FilterType::Adaptive).write_image(
                image.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
        writer.flush()?;
        debug!(path = %path.display(), frame = self.sequence(), "frame saved");
        self.metadata()
    }
}
