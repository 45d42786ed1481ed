//! facegate-hw: hardware abstraction for camera capture.
//!
//! Provides a [`FrameSource`] trait for anything that yields RGBA frames and
//! a V4L2 implementation of it.

pub mod camera;
pub mod frame;

pub use camera::{list_devices, Camera, CameraError, DeviceInfo, FrameSource, PixelFormat};
pub use frame::{Frame, FrameError};
