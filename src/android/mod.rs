//! Android device port
//!
//! The device is an opaque collaborator: something that accepts taps and
//! swipes, runs shell commands, and streams screen frames. [`adb`] provides
//! the implementation used by the binary; tests substitute fakes.

pub mod adb;
pub mod input;

pub use adb::{AdbDevice, AdbScreencap};
pub use input::{Controller, ScreenCoordinates};

use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// Input and shell channel to one device
pub trait Device: Send {
    /// Device serial, used in logs
    fn serial(&self) -> &str;

    /// Tap at device pixel coordinates
    fn tap(&mut self, x: i32, y: i32) -> Result<(), DeviceError>;

    /// Swipe between two device pixel coordinates
    fn swipe(
        &mut self,
        x1: i32,
        y1: i32,
        x2: i32,
        y2: i32,
        duration_ms: u32,
    ) -> Result<(), DeviceError>;

    /// Run a shell command on the device and return its stdout
    fn shell(&mut self, command: &str) -> Result<String, DeviceError>;
}

/// Continuous feed of raw screen frames, consumed by the frame source thread
pub trait FrameFeed: Send + 'static {
    /// Block until the next raw frame is available
    fn next_frame(&mut self) -> Result<RgbaImage, DeviceError>;
}

/// A single tap, in reference coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TapCommand {
    pub x: i32,
    pub y: i32,
    /// Settle time after the tap, in wait units
    pub settle: f32,
}

impl TapCommand {
    /// Create a tap with the given settle time
    pub fn new(x: i32, y: i32, settle: f32) -> Self {
        Self { x, y, settle }
    }
}

/// A swipe gesture, in reference coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwipeCommand {
    pub start_x: i32,
    pub start_y: i32,
    pub end_x: i32,
    pub end_y: i32,
    pub duration_ms: u32,
    /// Settle time after the swipe, in wait units
    pub settle: f32,
}

/// Parse the output of `wm size`
///
/// An override size takes precedence over the physical size.
pub fn parse_wm_size(output: &str) -> Result<(u32, u32), DeviceError> {
    let mut physical = None;
    let mut override_size = None;

    for line in output.lines() {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim();
        if label.starts_with("Override") {
            override_size = Some(parse_dimensions(value.trim())?);
        } else if label.starts_with("Physical") {
            physical = Some(parse_dimensions(value.trim())?);
        }
    }

    override_size
        .or(physical)
        .ok_or_else(|| DeviceError::Resolution(output.trim().to_string()))
}

fn parse_dimensions(value: &str) -> Result<(u32, u32), DeviceError> {
    let invalid = || DeviceError::Resolution(value.to_string());
    let (w, h) = value.split_once('x').ok_or_else(invalid)?;
    let w = w.trim().parse().map_err(|_| invalid())?;
    let h = h.trim().parse().map_err(|_| invalid())?;
    Ok((w, h))
}

/// Device and mirroring faults
///
/// These are distinct from detection misses: a missing element is a normal
/// result, a device fault means the device can no longer be trusted.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("adb command failed: {0}")]
    Adb(String),
    #[error("I/O error talking to device: {0}")]
    Io(#[from] std::io::Error),
    #[error("no device found: {0}")]
    DeviceNotFound(String),
    #[error("screen mirror unreachable: {0}")]
    MirrorUnreachable(String),
    #[error("no frame received within {0:?}")]
    NoFrame(std::time::Duration),
    #[error("failed to decode frame: {0}")]
    FrameDecode(#[from] image::ImageError),
    #[error("tap ({x}, {y}) outside device resolution {width}x{height}")]
    TapOutOfBounds {
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    #[error("unsupported orientation {width}x{height}, only portrait is supported")]
    UnsupportedOrientation { width: u32, height: u32 },
    #[error("could not read resolution from {0:?}")]
    Resolution(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_physical_size() {
        let size = parse_wm_size("Physical size: 1080x1920\n").unwrap();
        assert_eq!(size, (1080, 1920));
    }

    #[test]
    fn test_override_size_wins() {
        let output = "Physical size: 1440x2560\r\nOverride size: 1080x1920\r\n";
        assert_eq!(parse_wm_size(output).unwrap(), (1080, 1920));
    }

    #[test]
    fn test_garbage_resolution() {
        assert!(parse_wm_size("").is_err());
        assert!(parse_wm_size("Physical size: wide").is_err());
    }
}
