//! Bridge lifecycle: startup ordering, main loop, shutdown ordering.
//!
//! Startup opens the serial link (waiting for the controller to finish its reset),
//! prepares the image directory, and starts the camera. Any of these failing is fatal
//! and the main loop is never entered.
//!
//! The main loop reads one line at a time and hands it to the [`Dispatcher`]. A
//! `CAP` is fully processed, restart included, before the next line is read.
//! Meanwhile the operator channel runs as its own task and writes through a clone of
//! the same [`LineWriter`]. Both loops watch one [`RunningFlag`].

use crate::camera::{CameraController, CameraDevice};
use crate::classifier::{self, Classifier, Label};
use crate::config::BridgeConfig;
use crate::dispatcher::{DispatchStats, Dispatcher};
use crate::error::{BridgeError, BridgeResult};
use crate::lifecycle::RunningFlag;
use crate::operator::OperatorChannel;
use crate::storage::{ImageStore, StorageFormat};
use crate::transport::{self, DynSerial, LineReader, LineWriter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// What a finished run looked like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Dispatcher counters at shutdown
    pub stats: DispatchStats,
    /// Camera restarts during the run
    pub camera_restarts: u64,
    /// Why the running flag was cleared
    pub stop_reason: Option<String>,
}

/// The running bridge node.
pub struct Bridge {
    dispatcher: Dispatcher,
    reader: LineReader,
    writer: LineWriter,
    flag: RunningFlag,
    shut_down: bool,
}

impl Bridge {
    /// Assemble a bridge from an already-open serial stream and a started camera.
    pub fn new(
        port: DynSerial,
        camera: CameraController,
        classifier: Box<dyn Classifier>,
        fail_safe: Label,
        read_timeout: Duration,
    ) -> Self {
        let (reader, writer) = transport::split(port, read_timeout);
        let dispatcher = Dispatcher::new(camera, classifier, writer.clone(), fail_safe);
        Self {
            dispatcher,
            reader,
            writer,
            flag: RunningFlag::new(),
            shut_down: false,
        }
    }

    /// Open the hardware described by `config` in startup order.
    ///
    /// Serial port, then image directory, then camera. The first failure is returned
    /// and everything opened before it is released on drop.
    pub async fn connect(
        config: &BridgeConfig,
        device: Arc<dyn CameraDevice>,
    ) -> BridgeResult<Self> {
        let classifier = classifier::from_config(&config.classifier)?;
        let format = StorageFormat::from_name(&config.storage.format)?;

        let serial = &config.serial;
        let port =
            transport::open_serial(&serial.port, serial.baud_rate, serial.read_timeout()).await?;
        // Opening the port resets the controller; give it time to boot.
        tokio::time::sleep(serial.open_settle()).await;

        let store = ImageStore::new(&config.storage.base_dir, format)?;
        info!(base_dir = %store.base_dir().display(), "Image directory ready");

        let camera = CameraController::start(
            device,
            config.camera.capture_mode(),
            store,
            config.camera.timing(),
        )
        .await?
        .with_autofocus(config.camera.autofocus);

        Ok(Self::new(
            Box::new(port),
            camera,
            classifier,
            Label::new(config.classifier.fail_safe_label),
            serial.read_timeout(),
        ))
    }

    /// Handle on the shared running flag (for signal handlers)
    pub fn flag(&self) -> RunningFlag {
        self.flag.clone()
    }

    /// Dispatcher counters so far
    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Run until the flag clears, then shut down.
    ///
    /// `operator` supplies console lines to the operator channel. End-of-stream on the
    /// serial link is a normal stop; any other transport failure stops the bridge and
    /// is returned after shutdown.
    pub async fn run(&mut self, operator: mpsc::Receiver<String>) -> BridgeResult<RunSummary> {
        let channel = OperatorChannel::new(self.writer.clone(), self.flag.clone());
        let operator_task = tokio::spawn(channel.run(operator));

        info!("Bridge running");
        let outcome = self.main_loop().await;

        self.shutdown().await;
        if let Err(e) = operator_task.await {
            warn!(error = %e, "Operator task ended abnormally");
        }

        let summary = RunSummary {
            stats: self.dispatcher.stats(),
            camera_restarts: self.dispatcher.camera().restarts(),
            stop_reason: self.flag.reason(),
        };
        outcome.map(|()| summary)
    }

    async fn main_loop(&mut self) -> BridgeResult<()> {
        while self.flag.is_running() {
            let read = tokio::select! {
                biased;
                _ = self.flag.stopped() => break,
                read = self.reader.read_line() => read,
            };

            let line = match read {
                Ok(Some(line)) => line,
                Ok(None) => continue,
                Err(BridgeError::TransportClosed) => {
                    self.flag.stop("serial link closed");
                    return Ok(());
                }
                Err(e) => {
                    error!(error = %e, "Serial read failed");
                    self.flag.stop("serial read failed");
                    return Err(e);
                }
            };

            if let Err(e) = self.dispatcher.handle_line(&line).await {
                if matches!(e, BridgeError::TransportClosed) && !self.flag.is_running() {
                    // shutdown already closed the writer
                    return Ok(());
                }
                error!(error = %e, "Sending response failed");
                self.flag.stop("serial write failed");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Stop everything. Only the first call does anything.
    ///
    /// Clears the running flag, closes the serial writer, then closes the camera.
    /// Close failures are logged and swallowed.
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.flag.stop("shutdown");
        self.writer.close().await;
        self.dispatcher.camera_mut().close().await;

        let stats = self.dispatcher.stats();
        info!(
            requests = stats.requests,
            classified = stats.classified,
            failed = stats.failed,
            malformed = stats.malformed,
            ignored = stats.ignored,
            camera_restarts = self.dispatcher.camera().restarts(),
            reason = self.flag.reason().as_deref().unwrap_or("unknown"),
            "stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::mock::MockCamera;
    use crate::camera::{CameraState, CameraTiming, CaptureMode, PixelLayout};
    use crate::classifier::AlternatingClassifier;
    use tempfile::tempdir;

    #[tokio::test]
    async fn shutdown_runs_once() {
        let camera = MockCamera::new();
        let dir = tempdir().unwrap();
        let store = ImageStore::new(dir.path(), StorageFormat::Png).unwrap();
        let controller = CameraController::start(
            Arc::new(camera.clone()),
            CaptureMode {
                width: 2,
                height: 2,
                layout: PixelLayout::Bgr8,
            },
            store,
            CameraTiming::immediate(),
        )
        .await
        .unwrap();
        let (_host, device) = tokio::io::duplex(64);
        let mut bridge = Bridge::new(
            Box::new(device),
            controller,
            Box::new(AlternatingClassifier::new()),
            Label::FAIL_SAFE,
            Duration::from_millis(20),
        );

        bridge.shutdown().await;
        bridge.shutdown().await;

        assert!(!bridge.flag().is_running());
        assert_eq!(camera.closes(), 1);
        assert_eq!(bridge.dispatcher.camera().state(), CameraState::Closed);
    }

    #[tokio::test]
    async fn connect_fails_on_missing_serial_port() {
        let mut config = BridgeConfig::default();
        config.serial.port = "/dev/bean-bridge-does-not-exist".to_string();
        config.serial.open_settle_ms = 0;

        let result = Bridge::connect(&config, Arc::new(MockCamera::new())).await;

        let Err(e) = result else {
            panic!("connect should fail");
        };
        assert!(matches!(e, BridgeError::SerialOpen { .. }));
        assert!(e.is_startup_fatal());
    }
}
