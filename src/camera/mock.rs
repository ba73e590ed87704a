//! Simulated camera with fault injection.
//!
//! Produces uniform frames in the requested layout and counts every device
//! operation, so tests can assert exactly how often the controller opened, closed,
//! or read from the device. Faults are armed through [`MockFaults`]:
//!
//! - `fail_opens(n)` - the next `n` opens fail
//! - `fail_autofocus(n)` - the next `n` autofocus triggers fail
//! - `fail_reads(n)` - the next `n` frame reads fail
//! - `fail_close(true)` - every close reports an error (the session is still released)
//! - `read_delay(d)` - each frame read takes `d`
//!
//! Like real hardware, the device refuses a second open while a session is live.

use super::{CameraDevice, CameraSession, CaptureMode, Frame, PixelLayout};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Fault switches shared between a [`MockCamera`] and its sessions.
#[derive(Debug, Default)]
pub struct MockFaults {
    opens: AtomicU32,
    autofocus: AtomicU32,
    reads: AtomicU32,
    close: AtomicBool,
    read_delay_ms: AtomicU64,
}

impl MockFaults {
    /// Fail the next `count` opens
    pub fn fail_opens(&self, count: u32) {
        self.opens.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` autofocus triggers
    pub fn fail_autofocus(&self, count: u32) {
        self.autofocus.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` frame reads
    pub fn fail_reads(&self, count: u32) {
        self.reads.store(count, Ordering::SeqCst);
    }

    /// Make every close report an error
    pub fn fail_close(&self, enabled: bool) {
        self.close.store(enabled, Ordering::SeqCst);
    }

    /// Delay each frame read
    pub fn read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[derive(Debug, Default)]
struct MockShared {
    faults: MockFaults,
    opens: AtomicU64,
    closes: AtomicU64,
    frames: AtomicU64,
    autofocus_triggers: AtomicU64,
    live_session: AtomicBool,
}

/// Simulated camera device. Clones share counters and fault switches.
#[derive(Debug, Clone, Default)]
pub struct MockCamera {
    shared: Arc<MockShared>,
}

impl MockCamera {
    /// Colour of every pixel once converted to RGB.
    pub const REFERENCE_RGB: [u8; 3] = [200, 120, 30];

    /// Healthy camera with no faults armed
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault switches
    pub fn faults(&self) -> &MockFaults {
        &self.shared.faults
    }

    /// Successful opens so far
    pub fn opens(&self) -> u64 {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// Session closes so far (failed closes included)
    pub fn closes(&self) -> u64 {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Frames delivered so far
    pub fn frames(&self) -> u64 {
        self.shared.frames.load(Ordering::SeqCst)
    }

    /// Autofocus triggers accepted so far
    pub fn autofocus_triggers(&self) -> u64 {
        self.shared.autofocus_triggers.load(Ordering::SeqCst)
    }

    /// Whether a session is currently open
    pub fn has_live_session(&self) -> bool {
        self.shared.live_session.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraDevice for MockCamera {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(&self, mode: &CaptureMode) -> Result<Box<dyn CameraSession>> {
        if MockFaults::take(&self.shared.faults.opens) {
            return Err(anyhow!("MockCamera: injected open failure"));
        }
        if self.shared.live_session.swap(true, Ordering::SeqCst) {
            return Err(anyhow!("MockCamera: device busy, a session is already open"));
        }
        let count = self.shared.opens.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(opens = count, "MockCamera: session opened");

        Ok(Box::new(MockSession {
            shared: Arc::clone(&self.shared),
            mode: *mode,
            open: true,
        }))
    }
}

struct MockSession {
    shared: Arc<MockShared>,
    mode: CaptureMode,
    open: bool,
}

impl MockSession {
    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(anyhow!("MockCamera: session is closed"))
        }
    }

    fn pixel(&self) -> [u8; 3] {
        let [r, g, b] = MockCamera::REFERENCE_RGB;
        match self.mode.layout {
            PixelLayout::Bgr8 => [b, g, r],
            PixelLayout::Rgb8 => [r, g, b],
        }
    }
}

#[async_trait]
impl CameraSession for MockSession {
    async fn trigger_autofocus(&mut self) -> Result<()> {
        self.ensure_open()?;
        if MockFaults::take(&self.shared.faults.autofocus) {
            return Err(anyhow!("MockCamera: injected autofocus failure"));
        }
        self.shared.autofocus_triggers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        self.ensure_open()?;

        let delay_ms = self.shared.faults.read_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        if MockFaults::take(&self.shared.faults.reads) {
            return Err(anyhow!("MockCamera: injected frame read failure"));
        }

        let pixel = self.pixel();
        let pixels = self.mode.width as usize * self.mode.height as usize;
        let data = pixel.iter().copied().cycle().take(pixels * 3).collect();
        self.shared.frames.fetch_add(1, Ordering::SeqCst);

        Ok(Frame {
            width: self.mode.width,
            height: self.mode.height,
            layout: self.mode.layout,
            data,
        })
    }

    async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.shared.live_session.store(false, Ordering::SeqCst);
        self.shared.closes.fetch_add(1, Ordering::SeqCst);

        if self.shared.faults.close.load(Ordering::SeqCst) {
            return Err(anyhow!("MockCamera: injected close failure"));
        }
        Ok(())
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        if self.open {
            self.shared.live_session.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODE: CaptureMode = CaptureMode {
        width: 2,
        height: 2,
        layout: PixelLayout::Bgr8,
    };

    #[tokio::test]
    async fn frames_use_requested_layout() {
        let camera = MockCamera::new();
        let mut session = camera.open(&MODE).await.unwrap();

        let frame = session.read_frame().await.unwrap();

        assert_eq!(frame.layout, PixelLayout::Bgr8);
        assert_eq!(frame.data.len(), 12);
        assert_eq!(&frame.data[..3], &[30, 120, 200]);
        assert_eq!(camera.frames(), 1);
    }

    #[tokio::test]
    async fn second_open_is_refused_while_live() {
        let camera = MockCamera::new();
        let mut first = camera.open(&MODE).await.unwrap();
        assert!(camera.open(&MODE).await.is_err());

        first.close().await.unwrap();
        assert!(camera.open(&MODE).await.is_ok());
        assert_eq!(camera.opens(), 2);
    }

    #[tokio::test]
    async fn injected_faults_are_consumed() {
        let camera = MockCamera::new();
        camera.faults().fail_reads(2);
        let mut session = camera.open(&MODE).await.unwrap();

        assert!(session.read_frame().await.is_err());
        assert!(session.read_frame().await.is_err());
        assert!(session.read_frame().await.is_ok());
    }

    #[tokio::test]
    async fn failing_close_still_releases_device() {
        let camera = MockCamera::new();
        camera.faults().fail_close(true);
        let mut session = camera.open(&MODE).await.unwrap();

        assert!(session.close().await.is_err());
        assert!(!camera.has_live_session());
        assert_eq!(camera.closes(), 1);
    }

    #[tokio::test]
    async fn closed_session_rejects_reads() {
        let camera = MockCamera::new();
        let mut session = camera.open(&MODE).await.unwrap();
        session.close().await.unwrap();

        assert!(session.read_frame().await.is_err());
    }
}
