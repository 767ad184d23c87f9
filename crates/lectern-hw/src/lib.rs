//! lectern-hw — Hardware abstraction for the venue camera.
//!
//! Provides V4L2-based continuous capture and the `Frame` type with the
//! image operations the client needs: grayscale conversion, dark-frame
//! detection, face cropping, and JPEG encoding for transport.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, FrameStream, PixelFormat};
pub use frame::{Frame, FrameError};
