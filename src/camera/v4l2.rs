//! Linux V4L2 camera backend.
//!
//! Opens a capture device through the `v4l` crate, negotiates the fixed capture
//! mode, and grabs single frames through a short-lived mmap stream. All device
//! calls block, so each one runs on the blocking pool.
//!
//! Autofocus uses the V4L2 camera-class controls. Continuous focus is switched off
//! when the session opens, since `AUTO_FOCUS_START` only acts while it is off, and a
//! one-shot `AUTO_FOCUS_START` is sent per capture. Devices without these controls
//! (common on UVC webcams) capture at their fixed focus.
//!
//! # Example Usage
//!
//! ```no_run
//! use bean_bridge::camera::v4l2::V4l2Camera;
//! use bean_bridge::camera::{CameraDevice, CaptureMode, PixelLayout};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let camera = V4l2Camera::new("/dev/video0", 2);
//!     let mode = CaptureMode { width: 2304, height: 1296, layout: PixelLayout::Bgr8 };
//!     let mut session = camera.open(&mode).await?;
//!     session.trigger_autofocus().await?;
//!     let frame = session.read_frame().await?;
//!     println!("Frame: {}x{}", frame.width, frame.height);
//!     session.close().await
//! }
//! ```

use super::{CameraDevice, CameraSession, CaptureMode, Frame, PixelLayout};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::sync::Arc;
use tokio::task::spawn_blocking;
use tracing::{debug, info};
use v4l::buffer::Type;
use v4l::control::{Control, Value};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

/// `V4L2_CID_CAMERA_CLASS_BASE + 12`
const CID_FOCUS_AUTO: u32 = 0x009a_090c;
/// `V4L2_CID_CAMERA_CLASS_BASE + 28`
const CID_AUTO_FOCUS_START: u32 = 0x009a_091c;

const STREAM_BUFFERS: u32 = 2;

/// Linux `ENOTTY`, returned by drivers that lack the control ioctl
const ENOTTY: i32 = 25;

/// V4L2 capture device at a fixed path.
#[derive(Debug, Clone)]
pub struct V4l2Camera {
    path: String,
    warmup_frames: u32,
}

impl V4l2Camera {
    /// Camera at `path` (e.g. "/dev/video0"), discarding `warmup_frames` per capture
    pub fn new(path: impl Into<String>, warmup_frames: u32) -> Self {
        Self {
            path: path.into(),
            warmup_frames,
        }
    }
}

fn fourcc_for(layout: PixelLayout) -> FourCC {
    match layout {
        PixelLayout::Bgr8 => FourCC::new(b"BGR3"),
        PixelLayout::Rgb8 => FourCC::new(b"RGB3"),
    }
}

fn open_device(path: &str, mode: CaptureMode) -> Result<Device> {
    let device =
        Device::with_path(path).with_context(|| format!("Failed to open V4L2 device {path}"))?;

    let mut format = device.format().context("Failed to query V4L2 format")?;
    format.width = mode.width;
    format.height = mode.height;
    format.fourcc = fourcc_for(mode.layout);
    let actual = device
        .set_format(&format)
        .context("Failed to set V4L2 format")?;

    if actual.width != mode.width
        || actual.height != mode.height
        || actual.fourcc != fourcc_for(mode.layout)
    {
        return Err(anyhow!(
            "device negotiated {}x{} {} instead of {}x{} {:?}",
            actual.width,
            actual.height,
            actual.fourcc,
            mode.width,
            mode.height,
            mode.layout
        ));
    }

    if let Err(e) = device.set_control(Control {
        id: CID_FOCUS_AUTO,
        value: Value::Boolean(false),
    }) {
        debug!(error = %e, "V4L2 device has no continuous autofocus control");
    }

    Ok(device)
}

/// Whether a control error means "this device has no such control".
fn is_unsupported_control(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::InvalidInput | ErrorKind::Unsupported
    ) || error.raw_os_error() == Some(ENOTTY)
}

fn grab_frame(device: &Device, mode: CaptureMode, warmup_frames: u32) -> Result<Frame> {
    let mut stream = Stream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
        .context("Failed to start V4L2 stream")?;

    for _ in 0..warmup_frames {
        stream.next().context("V4L2 warm-up frame failed")?;
    }

    let (buffer, meta) = stream.next().context("V4L2 frame read failed")?;
    let used = (meta.bytesused as usize).min(buffer.len());
    let data = if used > 0 { &buffer[..used] } else { buffer };

    Ok(Frame {
        width: mode.width,
        height: mode.height,
        layout: mode.layout,
        data: data.to_vec(),
    })
}

#[async_trait]
impl CameraDevice for V4l2Camera {
    fn name(&self) -> &str {
        "v4l2"
    }

    async fn open(&self, mode: &CaptureMode) -> Result<Box<dyn CameraSession>> {
        let path = self.path.clone();
        let mode = *mode;
        let device = spawn_blocking(move || open_device(&path, mode))
            .await
            .context("V4L2 open task failed")??;

        info!(device = %self.path, width = mode.width, height = mode.height, "V4L2 camera opened");
        Ok(Box::new(V4l2Session {
            device: Some(Arc::new(device)),
            mode,
            warmup_frames: self.warmup_frames,
            autofocus_supported: true,
        }))
    }
}

struct V4l2Session {
    device: Option<Arc<Device>>,
    mode: CaptureMode,
    warmup_frames: u32,
    autofocus_supported: bool,
}

impl V4l2Session {
    fn device(&self) -> Result<Arc<Device>> {
        self.device
            .clone()
            .ok_or_else(|| anyhow!("V4L2 session is closed"))
    }
}

#[async_trait]
impl CameraSession for V4l2Session {
    async fn trigger_autofocus(&mut self) -> Result<()> {
        if !self.autofocus_supported {
            return Ok(());
        }
        let device = self.device()?;
        let result = spawn_blocking(move || {
            device.set_control(Control {
                id: CID_AUTO_FOCUS_START,
                value: Value::None,
            })
        })
        .await
        .context("V4L2 autofocus task failed")?;

        match result {
            Ok(()) => Ok(()),
            Err(e) if is_unsupported_control(&e) => {
                debug!(error = %e, "V4L2 device has no autofocus trigger, using fixed focus");
                self.autofocus_supported = false;
                Ok(())
            }
            Err(e) => Err(e).context("V4L2 autofocus trigger failed"),
        }
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        let device = self.device()?;
        let mode = self.mode;
        let warmup = self.warmup_frames;
        spawn_blocking(move || grab_frame(&device, mode, warmup))
            .await
            .context("V4L2 capture task failed")?
    }

    async fn close(&mut self) -> Result<()> {
        // Dropping the last handle closes the file descriptor.
        self.device.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_control_is_not_a_fault() {
        // EINVAL: control id unknown to the driver
        assert!(is_unsupported_control(&std::io::Error::from_raw_os_error(22)));
        assert!(is_unsupported_control(&std::io::Error::from_raw_os_error(ENOTTY)));
        assert!(is_unsupported_control(&std::io::Error::from(
            ErrorKind::Unsupported
        )));
    }

    #[test]
    fn device_errors_stay_faults() {
        // EIO and EBUSY come from a device that is present but failing
        assert!(!is_unsupported_control(&std::io::Error::from_raw_os_error(5)));
        assert!(!is_unsupported_control(&std::io::Error::from_raw_os_error(16)));
        assert!(!is_unsupported_control(&std::io::Error::from(
            ErrorKind::TimedOut
        )));
    }
}
