//! Single-owner camera controller with restart-on-fault.
//!
//! The controller is the only holder of the camera session. A capture that fails at
//! any stage (autofocus, frame read, channel conversion, persistence) closes the
//! session, waits the restart settle interval, opens a fresh one, and only then
//! returns the fault. One capture call performs at most one restart.

use super::{CameraDevice, CameraSession, CaptureMode, ImageArtifact};
use crate::error::{BridgeError, BridgeResult, CaptureFault};
use crate::protocol::CaptureRequest;
use crate::storage::ImageStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Fixed waits around device operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraTiming {
    /// Wait after triggering autofocus, before reading the frame
    pub autofocus_settle: Duration,
    /// Wait between closing a faulted session and reopening
    pub restart_settle: Duration,
    /// Wait after a session opens, before it is used
    pub start_settle: Duration,
}

impl Default for CameraTiming {
    fn default() -> Self {
        Self {
            autofocus_settle: Duration::from_millis(250),
            restart_settle: Duration::from_millis(300),
            start_settle: Duration::from_millis(300),
        }
    }
}

impl CameraTiming {
    /// No waits at all (tests and simulated devices)
    pub fn immediate() -> Self {
        Self {
            autofocus_settle: Duration::ZERO,
            restart_settle: Duration::ZERO,
            start_settle: Duration::ZERO,
        }
    }
}

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    /// A session is open and usable
    Ready,
    /// Inside a capture call, tearing down and reopening after a fault
    Recovering,
    /// The last reopen failed; the next capture faults with `NoSession` and restarts again
    Offline,
    /// Closed for shutdown
    Closed,
}

/// Owns the camera session and turns capture requests into artifacts.
pub struct CameraController {
    device: Arc<dyn CameraDevice>,
    session: Option<Box<dyn CameraSession>>,
    mode: CaptureMode,
    timing: CameraTiming,
    autofocus: bool,
    store: ImageStore,
    state: CameraState,
    restarts: u64,
}

impl CameraController {
    /// Open the device. Failure here is fatal for the process; nothing is retried.
    pub async fn start(
        device: Arc<dyn CameraDevice>,
        mode: CaptureMode,
        store: ImageStore,
        timing: CameraTiming,
    ) -> BridgeResult<Self> {
        let session = device.open(&mode).await.map_err(|e| {
            BridgeError::CameraStart(format!("{} camera: {e:#}", device.name()))
        })?;
        sleep(timing.start_settle).await;

        info!(
            backend = device.name(),
            width = mode.width,
            height = mode.height,
            layout = ?mode.layout,
            "Camera started"
        );

        Ok(Self {
            device,
            session: Some(session),
            mode,
            timing,
            autofocus: true,
            store,
            state: CameraState::Ready,
            restarts: 0,
        })
    }

    /// Enable or disable the autofocus trigger before each capture
    pub fn with_autofocus(mut self, enabled: bool) -> Self {
        self.autofocus = enabled;
        self
    }

    /// Photograph the bean described by `request` and persist the image.
    pub async fn capture(
        &mut self,
        request: &CaptureRequest,
    ) -> Result<ImageArtifact, CaptureFault> {
        if self.state == CameraState::Closed {
            return Err(CaptureFault::NoSession);
        }
        match self.try_capture(request).await {
            Ok(artifact) => Ok(artifact),
            Err(fault) => {
                warn!(
                    bean_id = request.bean_id,
                    position = request.position,
                    %fault,
                    "Capture failed, restarting camera"
                );
                self.restart().await;
                Err(fault)
            }
        }
    }

    async fn try_capture(
        &mut self,
        request: &CaptureRequest,
    ) -> Result<ImageArtifact, CaptureFault> {
        let session = self.session.as_mut().ok_or(CaptureFault::NoSession)?;

        if self.autofocus {
            session
                .trigger_autofocus()
                .await
                .map_err(|e| CaptureFault::Autofocus(format!("{e:#}")))?;
            sleep(self.timing.autofocus_settle).await;
        }

        let frame = session
            .read_frame()
            .await
            .map_err(|e| CaptureFault::Read(format!("{e:#}")))?;
        debug!(
            width = frame.width,
            height = frame.height,
            layout = ?frame.layout,
            "Frame read"
        );

        let frame = frame.into_rgb().map_err(CaptureFault::Frame)?;
        self.store.persist(request, frame).await
    }

    /// Close the current session (best effort), settle, and open a fresh one.
    ///
    /// A failed reopen leaves the controller [`CameraState::Offline`]; the next capture
    /// faults with [`CaptureFault::NoSession`] and restarts again.
    pub async fn restart(&mut self) {
        self.state = CameraState::Recovering;
        self.restarts += 1;

        self.close_session().await;
        sleep(self.timing.restart_settle).await;

        match self.device.open(&self.mode).await {
            Ok(session) => {
                sleep(self.timing.start_settle).await;
                self.session = Some(session);
                self.state = CameraState::Ready;
                info!(restarts = self.restarts, "Camera restarted");
            }
            Err(e) => {
                self.state = CameraState::Offline;
                error!(restarts = self.restarts, error = %format!("{e:#}"), "Camera reopen failed");
            }
        }
    }

    /// Close the session for shutdown. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state == CameraState::Closed {
            return;
        }
        self.close_session().await;
        self.state = CameraState::Closed;
        info!("Camera closed");
    }

    async fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!(error = %format!("{e:#}"), "Closing camera session failed (ignored)");
            }
        }
    }

    /// Current state
    pub fn state(&self) -> CameraState {
        self.state
    }

    /// Number of fault-driven restarts so far
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::mock::MockCamera;
    use crate::camera::PixelLayout;
    use crate::storage::StorageFormat;
    use tempfile::{tempdir, TempDir};

    const MODE: CaptureMode = CaptureMode {
        width: 8,
        height: 4,
        layout: PixelLayout::Bgr8,
    };

    fn request(bean_id: u64) -> CaptureRequest {
        CaptureRequest {
            bean_id,
            position: 6,
        }
    }

    async fn controller(camera: &MockCamera) -> (CameraController, TempDir) {
        let dir = tempdir().unwrap();
        let store = ImageStore::new(dir.path(), StorageFormat::Png).unwrap();
        let controller = CameraController::start(
            Arc::new(camera.clone()),
            MODE,
            store,
            CameraTiming::immediate(),
        )
        .await
        .unwrap();
        (controller, dir)
    }

    #[tokio::test]
    async fn healthy_capture_writes_one_file() {
        let camera = MockCamera::new();
        let (mut controller, dir) = controller(&camera).await;

        let artifact = controller.capture(&request(42)).await.unwrap();

        assert!(artifact.path.starts_with(dir.path()));
        assert!(artifact.path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        assert_eq!(camera.opens(), 1);
        assert_eq!(controller.state(), CameraState::Ready);
    }

    #[tokio::test]
    async fn persisted_colors_are_rgb() {
        let camera = MockCamera::new();
        let (mut controller, _dir) = controller(&camera).await;

        let artifact = controller.capture(&request(1)).await.unwrap();

        let image = image::open(&artifact.path).unwrap().to_rgb8();
        let pixel = image.get_pixel(0, 0);
        assert_eq!(pixel.0, MockCamera::REFERENCE_RGB);
    }

    #[tokio::test]
    async fn read_fault_restarts_once() {
        let camera = MockCamera::new();
        camera.faults().fail_reads(1);
        let (mut controller, _dir) = controller(&camera).await;

        let fault = controller.capture(&request(3)).await.unwrap_err();

        assert!(matches!(fault, CaptureFault::Read(_)));
        assert_eq!(controller.restarts(), 1);
        assert_eq!(camera.opens(), 2);
        assert_eq!(camera.closes(), 1);
        assert_eq!(controller.state(), CameraState::Ready);

        // the fresh session works
        assert!(controller.capture(&request(3)).await.is_ok());
        assert_eq!(camera.opens(), 2);
    }

    #[tokio::test]
    async fn autofocus_fault_is_reported_by_stage() {
        let camera = MockCamera::new();
        camera.faults().fail_autofocus(1);
        let (mut controller, _dir) = controller(&camera).await;

        let fault = controller.capture(&request(3)).await.unwrap_err();
        assert!(matches!(fault, CaptureFault::Autofocus(_)));
        assert_eq!(camera.opens(), 2);
    }

    #[tokio::test]
    async fn disabled_autofocus_skips_trigger() {
        let camera = MockCamera::new();
        camera.faults().fail_autofocus(1);
        let (controller, _dir) = controller(&camera).await;
        let mut controller = controller.with_autofocus(false);

        assert!(controller.capture(&request(3)).await.is_ok());
        assert_eq!(camera.autofocus_triggers(), 0);
    }

    #[tokio::test]
    async fn persist_fault_restarts_like_device_fault() {
        let camera = MockCamera::new();
        let (mut controller, dir) = controller(&camera).await;
        std::fs::remove_dir_all(dir.path()).unwrap();

        let fault = controller.capture(&request(1)).await.unwrap_err();

        assert!(matches!(fault, CaptureFault::Persist(_)));
        assert_eq!(controller.restarts(), 1);
        assert_eq!(camera.opens(), 2);
        assert_eq!(camera.closes(), 1);
        assert_eq!(controller.state(), CameraState::Ready);
    }

    #[tokio::test]
    async fn close_failure_during_restart_is_swallowed() {
        let camera = MockCamera::new();
        camera.faults().fail_reads(1);
        camera.faults().fail_close(true);
        let (mut controller, _dir) = controller(&camera).await;

        assert!(controller.capture(&request(3)).await.is_err());
        assert_eq!(controller.state(), CameraState::Ready);
        assert_eq!(camera.opens(), 2);
    }

    #[tokio::test]
    async fn failed_reopen_goes_offline_then_recovers() {
        let camera = MockCamera::new();
        let (mut controller, _dir) = controller(&camera).await;
        camera.faults().fail_reads(1);
        camera.faults().fail_opens(1);

        assert!(controller.capture(&request(1)).await.is_err());
        assert_eq!(controller.state(), CameraState::Offline);

        // next request has no session: one more restart, still a fault
        let fault = controller.capture(&request(2)).await.unwrap_err();
        assert_eq!(fault, CaptureFault::NoSession);
        assert_eq!(controller.state(), CameraState::Ready);
        assert_eq!(controller.restarts(), 2);

        assert!(controller.capture(&request(3)).await.is_ok());
    }

    #[tokio::test]
    async fn start_failure_is_fatal() {
        let camera = MockCamera::new();
        camera.faults().fail_opens(1);
        let dir = tempdir().unwrap();
        let store = ImageStore::new(dir.path(), StorageFormat::Png).unwrap();

        let result = CameraController::start(
            Arc::new(camera.clone()),
            MODE,
            store,
            CameraTiming::immediate(),
        )
        .await;

        assert!(matches!(result, Err(BridgeError::CameraStart(_))));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let camera = MockCamera::new();
        let (mut controller, _dir) = controller(&camera).await;

        controller.close().await;
        controller.close().await;

        assert_eq!(camera.closes(), 1);
        assert_eq!(controller.state(), CameraState::Closed);
        assert_eq!(
            controller.capture(&request(1)).await.unwrap_err(),
            CaptureFault::NoSession
        );
        // no reopen after shutdown
        assert_eq!(camera.opens(), 1);
    }
}
