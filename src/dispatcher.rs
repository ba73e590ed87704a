//! Per-line protocol handling.
//!
//! The dispatcher owns the camera controller and the classifier. Each inbound line
//! is parsed; a valid `CAP` is captured, classified and answered with exactly one
//! `RES` frame. A failed capture is answered with the fail-safe label. Malformed
//! `CAP` lines and controller chatter are logged and dropped.

use crate::camera::CameraController;
use crate::classifier::{classify_or_fail_safe, Classifier, Label};
use crate::error::BridgeResult;
use crate::protocol::{parse_line, CaptureRequest, Inbound, Response};
use crate::transport::LineWriter;
use tracing::{debug, info, warn};

/// Counters logged at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Valid `CAP` commands received
    pub requests: u64,
    /// Requests answered with a classifier label
    pub classified: u64,
    /// Requests answered with the fail-safe label after a capture fault
    pub failed: u64,
    /// `CAP` lines that could not be parsed
    pub malformed: u64,
    /// Lines not addressed to the bridge
    pub ignored: u64,
}

/// Turns inbound lines into `RES` frames.
pub struct Dispatcher {
    camera: CameraController,
    classifier: Box<dyn Classifier>,
    writer: LineWriter,
    fail_safe: Label,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Dispatcher answering on `writer`
    pub fn new(
        camera: CameraController,
        classifier: Box<dyn Classifier>,
        writer: LineWriter,
        fail_safe: Label,
    ) -> Self {
        Self {
            camera,
            classifier,
            writer,
            fail_safe,
            stats: DispatchStats::default(),
        }
    }

    /// Handle one trimmed inbound line.
    ///
    /// Returns the response that was written, if any. Only a transport failure while
    /// writing the response is an error.
    pub async fn handle_line(&mut self, line: &str) -> BridgeResult<Option<Response>> {
        let request = match parse_line(line) {
            Ok(Inbound::Capture(request)) => request,
            Ok(Inbound::Other) => {
                self.stats.ignored += 1;
                debug!(line = %line, "Ignoring controller chatter");
                return Ok(None);
            }
            Err(e) => {
                self.stats.malformed += 1;
                warn!(line = %line, error = %e, "bad CAP");
                return Ok(None);
            }
        };

        let response = self.process(request).await;
        self.writer.write_line(&response.to_string()).await?;
        Ok(Some(response))
    }

    async fn process(&mut self, request: CaptureRequest) -> Response {
        self.stats.requests += 1;
        info!(
            bean_id = request.bean_id,
            position = request.position,
            "CAP received"
        );

        let label = match self.camera.capture(&request).await {
            Ok(artifact) => {
                let label =
                    classify_or_fail_safe(self.classifier.as_mut(), &artifact, self.fail_safe);
                self.stats.classified += 1;
                info!(
                    bean_id = request.bean_id,
                    path = %artifact.path.display(),
                    %label,
                    "saved -> RES"
                );
                label
            }
            Err(fault) => {
                self.stats.failed += 1;
                warn!(
                    bean_id = request.bean_id,
                    %fault,
                    label = %self.fail_safe,
                    "capture FAILED -> RES"
                );
                self.fail_safe
            }
        };

        Response {
            bean_id: request.bean_id,
            label,
        }
    }

    /// Counters so far
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// The owned camera controller
    pub fn camera(&self) -> &CameraController {
        &self.camera
    }

    /// Mutable access to the camera controller (shutdown)
    pub fn camera_mut(&mut self) -> &mut CameraController {
        &mut self.camera
    }
}
