//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame, FrameError};
use serde::Serialize;
use std::io;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Fraction of dark pixels above which a frame is flagged dark.
const DARK_FRAME_THRESHOLD: f32 = 0.95;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("camera not started")]
    NotStarted,
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Anything that produces RGBA frames on demand.
///
/// `start` acquires the underlying device, `stop` releases it. Calling
/// `next_frame` outside a start/stop pair returns [`CameraError::NotStarted`].
pub trait FrameSource: Send {
    fn start(&mut self) -> Result<(), CameraError>;
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
    fn stop(&mut self);
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, shared chroma).
    Yuyv,
    /// Motion-JPEG, one JPEG image per buffer.
    Mjpeg,
    /// 8-bit grayscale (1 byte/pixel, native IR camera output).
    Grey,
    /// 16-bit little-endian grayscale (2 bytes/pixel, common IR camera format).
    Y16,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            b"GREY" => Some(Self::Grey),
            b"Y16 " | b"Y16\0" => Some(Self::Y16),
            _ => None,
        }
    }
}

/// An open device with its negotiated format.
struct OpenDevice {
    device: Device,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

/// V4L2 camera. The device is opened on [`FrameSource::start`] and closed on
/// [`FrameSource::stop`].
pub struct Camera {
    pub device_path: String,
    requested_width: u32,
    requested_height: u32,
    open: Option<OpenDevice>,
}

impl Camera {
    /// Describe a camera (e.g. "/dev/video0") without opening it.
    pub fn new(device_path: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            device_path: device_path.into(),
            requested_width: width,
            requested_height: height,
            open: None,
        }
    }

    pub fn is_started(&self) -> bool {
        self.open.is_some()
    }

    /// Negotiated (width, height), once started.
    pub fn resolution(&self) -> Option<(u32, u32)> {
        self.open.as_ref().map(|o| (o.width, o.height))
    }

    fn open_device(&self) -> Result<OpenDevice, CameraError> {
        let path = self.device_path.as_str();
        if !Path::new(path).exists() {
            return Err(CameraError::DeviceNotFound(path.to_string()));
        }

        let device = Device::with_path(path).map_err(|e| map_open_error(path, e))?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;

        tracing::info!(
            device = path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for YUYV first, then MJPG. Drivers may answer with GREY or Y16
        // instead (common for IR cameras); those are accepted as-is.
        let mut last = None;
        for wanted in [b"YUYV", b"MJPG"] {
            let mut fmt = device
                .format()
                .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to get format: {e}")))?;
            fmt.fourcc = FourCC::new(wanted);
            fmt.width = self.requested_width;
            fmt.height = self.requested_height;

            let negotiated = device
                .set_format(&fmt)
                .map_err(|e| CameraError::FormatNegotiationFailed(format!("failed to set format: {e}")))?;

            if let Some(pixel_format) = PixelFormat::from_fourcc(negotiated.fourcc) {
                tracing::info!(
                    width = negotiated.width,
                    height = negotiated.height,
                    fourcc = ?negotiated.fourcc,
                    "negotiated format"
                );
                return Ok(OpenDevice {
                    device,
                    width: negotiated.width,
                    height: negotiated.height,
                    pixel_format,
                });
            }
            last = Some(negotiated.fourcc);
        }

        Err(CameraError::FormatNegotiationFailed(format!(
            "unsupported pixel format: {last:?} (need YUYV, MJPG, GREY, or Y16)"
        )))
    }
}

impl FrameSource for Camera {
    fn start(&mut self) -> Result<(), CameraError> {
        if self.open.is_none() {
            self.open = Some(self.open_device()?);
        }
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        let open = self.open.as_ref().ok_or(CameraError::NotStarted)?;

        let mut stream = MmapStream::with_buffers(&open.device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let rgba = convert(open.pixel_format, buf, open.width, open.height)?;
        let is_dark = frame::is_dark_frame(&rgba, DARK_FRAME_THRESHOLD);
        if is_dark {
            tracing::debug!(seq = meta.sequence, "dark frame");
        }

        Ok(Frame {
            data: rgba,
            width: open.width,
            height: open.height,
            timestamp: std::time::Instant::now(),
            sequence: meta.sequence,
            is_dark,
        })
    }

    fn stop(&mut self) {
        if self.open.take().is_some() {
            tracing::info!(device = %self.device_path, "camera released");
        }
    }
}

fn convert(format: PixelFormat, buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    match format {
        PixelFormat::Yuyv => frame::yuyv_to_rgba(buf, width, height),
        PixelFormat::Mjpeg => frame::mjpeg_to_rgba(buf, width, height),
        PixelFormat::Grey => frame::grey_to_rgba(buf, width, height),
        PixelFormat::Y16 => frame::y16_to_rgba(buf, width, height),
    }
}

fn map_open_error(path: &str, e: io::Error) -> CameraError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => CameraError::PermissionDenied(path.to_string()),
        _ if e.raw_os_error() == Some(16) => CameraError::DeviceBusy,
        _ => CameraError::DeviceNotFound(format!("{path}: {e}")),
    }
}

/// List available V4L2 video capture devices.
pub fn list_devices() -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    for i in 0..16 {
        let path = format!("/dev/video{i}");
        if !Path::new(&path).exists() {
            continue;
        }
        let Ok(dev) = Device::with_path(&path) else {
            continue;
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            continue;
        }
        devices.push(DeviceInfo {
            path,
            name: caps.card.clone(),
            driver: caps.driver.clone(),
            bus: caps.bus.clone(),
        });
    }

    devices
}
