//! Integration tests for graceful shutdown behavior.

use bean_bridge::camera::mock::MockCamera;
use bean_bridge::camera::{CameraController, CameraTiming, CaptureMode, PixelLayout};
use bean_bridge::classifier::{AlternatingClassifier, Label};
use bean_bridge::storage::{ImageStore, StorageFormat};
use bean_bridge::Bridge;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::mpsc;

/// Helper to build a bridge on a mock camera and an in-memory serial link.
async fn create_test_bridge(camera: &MockCamera, dir: &Path) -> (Bridge, DuplexStream) {
    let store = ImageStore::new(dir, StorageFormat::Png).unwrap();
    let controller = CameraController::start(
        Arc::new(camera.clone()),
        CaptureMode {
            width: 4,
            height: 4,
            layout: PixelLayout::Bgr8,
        },
        store,
        CameraTiming::immediate(),
    )
    .await
    .unwrap();

    let (host, device) = tokio::io::duplex(1024);
    let bridge = Bridge::new(
        Box::new(device),
        controller,
        Box::new(AlternatingClassifier::new()),
        Label::FAIL_SAFE,
        Duration::from_millis(20),
    );
    (bridge, host)
}

#[tokio::test]
async fn test_operator_quit_stops_bridge() {
    let camera = MockCamera::new();
    let dir = tempdir().unwrap();
    let (mut bridge, mut host) = create_test_bridge(&camera, dir.path()).await;

    let (tx, rx) = mpsc::channel(4);
    tx.send("q".to_string()).await.unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(2), bridge.run(rx))
        .await
        .expect("bridge did not stop")
        .unwrap();

    assert_eq!(summary.stop_reason.as_deref(), Some("operator quit"));
    assert!(!camera.has_live_session());
    assert_eq!(camera.closes(), 1);

    // transport closed at shutdown: the controller side sees end-of-stream
    let mut rest = Vec::new();
    host.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_console_eof_means_quit() {
    let camera = MockCamera::new();
    let dir = tempdir().unwrap();
    let (mut bridge, _host) = create_test_bridge(&camera, dir.path()).await;

    let (tx, rx) = mpsc::channel::<String>(1);
    drop(tx);

    let summary = tokio::time::timeout(Duration::from_secs(2), bridge.run(rx))
        .await
        .expect("bridge did not stop")
        .unwrap();

    assert_eq!(summary.stop_reason.as_deref(), Some("operator input closed"));
}

#[tokio::test]
async fn test_serial_eof_stops_bridge() {
    let camera = MockCamera::new();
    let dir = tempdir().unwrap();
    let (mut bridge, host) = create_test_bridge(&camera, dir.path()).await;
    let (_tx, rx) = mpsc::channel::<String>(1);

    drop(host);
    let summary = tokio::time::timeout(Duration::from_secs(2), bridge.run(rx))
        .await
        .expect("bridge did not stop")
        .unwrap();

    assert_eq!(summary.stop_reason.as_deref(), Some("serial link closed"));
    assert_eq!(camera.closes(), 1);
}

#[tokio::test]
async fn test_external_stop_is_observed_promptly() {
    let camera = MockCamera::new();
    let dir = tempdir().unwrap();
    let (mut bridge, _host) = create_test_bridge(&camera, dir.path()).await;
    let (_tx, rx) = mpsc::channel::<String>(1);

    let flag = bridge.flag();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        flag.stop("interrupted");
    });

    let start = Instant::now();
    let summary = tokio::time::timeout(Duration::from_secs(2), bridge.run(rx))
        .await
        .expect("bridge did not stop")
        .unwrap();

    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(summary.stop_reason.as_deref(), Some("interrupted"));
}

#[tokio::test]
async fn test_multiple_shutdown_calls() {
    let camera = MockCamera::new();
    camera.faults().fail_close(true);
    let dir = tempdir().unwrap();
    let (mut bridge, _host) = create_test_bridge(&camera, dir.path()).await;

    let (tx, rx) = mpsc::channel(1);
    tx.send("q".to_string()).await.unwrap();
    bridge.run(rx).await.unwrap();

    // run already shut down; further calls are no-ops and close failures stay quiet
    bridge.shutdown().await;
    bridge.shutdown().await;

    assert_eq!(camera.closes(), 1);
    assert!(!bridge.flag().is_running());
}

#[tokio::test]
async fn test_shutdown_before_run() {
    let camera = MockCamera::new();
    let dir = tempdir().unwrap();
    let (mut bridge, _host) = create_test_bridge(&camera, dir.path()).await;

    bridge.shutdown().await;

    let (_tx, rx) = mpsc::channel::<String>(1);
    let summary = tokio::time::timeout(Duration::from_secs(2), bridge.run(rx))
        .await
        .expect("bridge did not stop")
        .unwrap();

    assert_eq!(summary.stop_reason.as_deref(), Some("shutdown"));
    assert_eq!(camera.closes(), 1);
}
