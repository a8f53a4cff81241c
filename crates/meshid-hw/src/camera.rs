//! V4L2 camera capture via the `v4l` crate.
//!
//! [`V4l2Camera`] is the live [`CameraProvider`] used by the capture state
//! machine: `acquire` opens the device and negotiates a format, each
//! `snapshot` grabs one frame and encodes it as JPEG, `stop` closes the
//! device.

use crate::frame::{self, Frame, FrameLayout};
use meshid_core::{CameraProvider, CameraStream, CaptureError, ImageBlob};
use std::io;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
/// Raw captures tried per snapshot before giving up on dark frames.
const MAX_SNAPSHOT_ATTEMPTS: usize = 5;

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
}

impl From<CameraError> for CaptureError {
    fn from(e: CameraError) -> Self {
        match e {
            CameraError::PermissionDenied(msg) => CaptureError::PermissionDenied(msg),
            CameraError::CaptureFailed(msg) => CaptureError::SnapshotFailed(msg),
            other => CaptureError::DeviceUnavailable(other.to_string()),
        }
    }
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel), converted to RGB.
    Yuyv,
    /// Motion-JPEG; frames are already JPEG.
    Mjpg,
    /// 8-bit grayscale.
    Grey,
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| match e.kind() {
            io::ErrorKind::PermissionDenied => {
                CameraError::PermissionDenied(format!("{device_path}: {e}"))
            }
            _ if e.to_string().contains("busy") || e.raw_os_error() == Some(16) => {
                CameraError::DeviceBusy
            }
            _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for YUYV; accept MJPG or GREY if the driver insists.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"MJPG") {
            PixelFormat::Mjpg
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, MJPG, or GREY)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Open a short-lived stream, drop `discard` warmup frames, then return
    /// the first frame that is not dark (or the last one tried).
    pub fn capture_frame(&self, discard: usize) -> Result<Frame, CameraError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;

        for _ in 0..discard {
            stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;
        }

        let mut last = None;
        for _ in 0..MAX_SNAPSHOT_ATTEMPTS {
            let (buf, meta) = stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;
            let frame = self.decode(buf, meta.sequence)?;
            if !frame.is_dark {
                return Ok(frame);
            }
            tracing::debug!(seq = meta.sequence, "skipping dark frame");
            last = Some(frame);
        }

        last.ok_or_else(|| CameraError::CaptureFailed("no frames delivered".into()))
    }

    fn decode(&self, buf: &[u8], sequence: u32) -> Result<Frame, CameraError> {
        let pixels = (self.width * self.height) as usize;
        let (data, layout, is_dark) = match self.pixel_format {
            PixelFormat::Yuyv => {
                let luma = frame::yuyv_to_grayscale(buf, self.width, self.height)
                    .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}")))?;
                let rgb = frame::yuyv_to_rgb(buf, self.width, self.height)
                    .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}")))?;
                (rgb, FrameLayout::Rgb, frame::is_dark_frame(&luma, 0.95))
            }
            PixelFormat::Grey => {
                if buf.len() < pixels {
                    return Err(CameraError::CaptureFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                let gray = buf[..pixels].to_vec();
                let dark = frame::is_dark_frame(&gray, 0.95);
                (gray, FrameLayout::Gray, dark)
            }
            PixelFormat::Mjpg => (buf.to_vec(), FrameLayout::Jpeg, false),
        };

        Ok(Frame {
            data,
            layout,
            width: self.width,
            height: self.height,
            sequence,
            is_dark,
        })
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
}

/// Camera provider backed by a V4L2 device path.
pub struct V4l2Camera {
    device_path: String,
    warmup_frames: usize,
    jpeg_quality: u8,
}

impl V4l2Camera {
    pub fn new(device_path: impl Into<String>, warmup_frames: usize, jpeg_quality: u8) -> Self {
        Self {
            device_path: device_path.into(),
            warmup_frames,
            jpeg_quality,
        }
    }
}

impl CameraProvider for V4l2Camera {
    type Stream = V4l2Stream;

    fn acquire(&mut self) -> Result<V4l2Stream, CaptureError> {
        let camera = Camera::open(&self.device_path)?;
        Ok(V4l2Stream {
            camera: Some(camera),
            warmup_frames: self.warmup_frames,
            jpeg_quality: self.jpeg_quality,
            captured: 0,
        })
    }
}

/// An open V4L2 device. Closed by [`CameraStream::stop`].
pub struct V4l2Stream {
    camera: Option<Camera>,
    warmup_frames: usize,
    jpeg_quality: u8,
    captured: u32,
}

impl CameraStream for V4l2Stream {
    fn snapshot(&mut self) -> Result<ImageBlob, CaptureError> {
        let camera = self
            .camera
            .as_ref()
            .ok_or_else(|| CaptureError::DeviceUnavailable("camera closed".into()))?;

        // Let AGC/AE settle on the first still after opening.
        let discard = if self.captured == 0 { self.warmup_frames } else { 0 };
        let frame = camera.capture_frame(discard)?;
        let jpeg = frame
            .to_jpeg(self.jpeg_quality)
            .map_err(|e| CaptureError::SnapshotFailed(e.to_string()))?;
        self.captured += 1;

        tracing::debug!(
            seq = frame.sequence,
            width = frame.width,
            height = frame.height,
            bytes = jpeg.len(),
            "camera snapshot"
        );
        Ok(ImageBlob::new(jpeg, "camera_capture.jpg", "image/jpeg"))
    }

    fn stop(&mut self) {
        if let Some(camera) = self.camera.take() {
            tracing::info!(device = %camera.device_path, "closing camera");
        }
    }
}
