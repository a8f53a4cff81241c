//! meshid-hw: V4L2 camera capture for the meshid pipeline.
//!
//! Implements the capture traits from `meshid-core` on top of a real
//! video device and turns raw frames into JPEG stills.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat, V4l2Camera, V4l2Stream};
pub use frame::{Frame, FrameError, FrameLayout};
