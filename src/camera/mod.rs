//! Camera capture: device traits, frames, and the single-owner controller.
//!
//! A [`CameraDevice`] knows how to open sessions; a [`CameraSession`] is one live
//! handle to the hardware. The [`CameraController`] owns at most one session at a
//! time and replaces it whenever a capture faults.
//!
//! Backends:
//! - [`mock::MockCamera`] - simulated device with fault injection (always built)
//! - `v4l2::V4l2Camera` - Linux V4L2 device (feature `v4l2`)

pub mod controller;
pub mod mock;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use controller::{CameraController, CameraState, CameraTiming};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Byte order of the three 8-bit channels in a packed pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    /// Blue, green, red
    Bgr8,
    /// Red, green, blue (what the image encoder expects)
    Rgb8,
}

impl PixelLayout {
    /// Bytes per pixel
    pub const fn bytes_per_pixel(self) -> usize {
        3
    }
}

/// Resolution and pixel layout requested when a session opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureMode {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Native pixel layout
    pub layout: PixelLayout,
}

/// One frame as read from a session.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Channel order of `data`
    pub layout: PixelLayout,
    /// Packed pixel data, row-major
    pub data: Vec<u8>,
}

impl Frame {
    /// Expected `data` length for the frame's dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.layout.bytes_per_pixel()
    }

    /// Convert to RGB channel order.
    ///
    /// BGR frames are always swapped in place; the device's native order and the
    /// encoder's order differ, and skipping this writes files with red and blue
    /// exchanged.
    pub fn into_rgb(mut self) -> Result<Frame, String> {
        if self.width == 0 || self.height == 0 {
            return Err(format!("empty frame {}x{}", self.width, self.height));
        }
        if self.data.len() != self.expected_len() {
            return Err(format!(
                "frame data size mismatch: expected {} bytes for {}x{}, got {}",
                self.expected_len(),
                self.width,
                self.height,
                self.data.len()
            ));
        }

        if self.layout == PixelLayout::Bgr8 {
            for pixel in self.data.chunks_exact_mut(3) {
                pixel.swap(0, 2);
            }
            self.layout = PixelLayout::Rgb8;
        }
        Ok(self)
    }
}

/// A persisted capture, handed to the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    /// Where the encoded image was written
    pub path: PathBuf,
    /// Capture time (also encoded in the file name)
    pub captured_at: DateTime<Utc>,
    /// Bean the image belongs to
    pub bean_id: u64,
    /// Rig position the bean was photographed at
    pub position: u32,
}

/// A device that can open capture sessions.
///
/// # Contract
/// - `open` configures the fixed capture mode and starts the device
/// - Opening while another session from the same device is open is a caller bug;
///   the controller guarantees it never happens
#[async_trait]
pub trait CameraDevice: Send + Sync {
    /// Human-readable backend name for logs
    fn name(&self) -> &str;

    /// Open and start a new session
    async fn open(&self, mode: &CaptureMode) -> Result<Box<dyn CameraSession>>;
}

/// One live handle to the camera.
#[async_trait]
pub trait CameraSession: Send {
    /// Start a one-shot autofocus cycle
    async fn trigger_autofocus(&mut self) -> Result<()>;

    /// Read one frame
    async fn read_frame(&mut self) -> Result<Frame>;

    /// Stop and release the device
    async fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(layout: PixelLayout, data: Vec<u8>) -> Frame {
        Frame {
            width: 2,
            height: 1,
            layout,
            data,
        }
    }

    #[test]
    fn bgr_frames_are_swapped() {
        let rgb = frame(PixelLayout::Bgr8, vec![1, 2, 3, 4, 5, 6])
            .into_rgb()
            .unwrap();
        assert_eq!(rgb.layout, PixelLayout::Rgb8);
        assert_eq!(rgb.data, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn rgb_frames_pass_through() {
        let rgb = frame(PixelLayout::Rgb8, vec![1, 2, 3, 4, 5, 6])
            .into_rgb()
            .unwrap();
        assert_eq!(rgb.data, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let err = frame(PixelLayout::Bgr8, vec![1, 2, 3]).into_rgb().unwrap_err();
        assert!(err.contains("size mismatch"));
    }

    #[test]
    fn layout_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            layout: PixelLayout,
        }
        let parsed: Wrapper = toml::from_str("layout = \"bgr8\"").unwrap();
        assert_eq!(parsed.layout, PixelLayout::Bgr8);
    }
}
