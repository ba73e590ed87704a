//! # Bean Bridge Library
//!
//! This crate is the bridge node of the bean sorting rig. It sits between the motion
//! controller (serial link) and the camera: the controller stops a bean under the lens
//! and sends `CAP <bean_id> <position>`; the bridge photographs it, stores the image,
//! classifies it, and answers `RES <bean_id> <label>`. In parallel, operator commands
//! typed at the console are forwarded to the controller over the same link.
//!
//! ## Crate Structure
//!
//! - **`bridge`**: Startup ordering, the read/dispatch main loop, and shutdown ordering.
//! - **`camera`**: Device traits, the single-owner `CameraController` with
//!   restart-on-fault, a fault-injecting mock device, and (feature `v4l2`) a Linux
//!   V4L2 backend.
//! - **`classifier`**: The `Classifier` trait, the alternating reference stub, and the
//!   fail-safe wrapper.
//! - **`config`**: Layered `BridgeConfig` loading (defaults, TOML, environment).
//! - **`dispatcher`**: Per-line handling: parse, capture, classify, respond.
//! - **`error`**: `BridgeError`, `CaptureFault` and `ProtocolError`.
//! - **`lifecycle`**: The shared `RunningFlag`.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`operator`**: Console intents and the operator command channel.
//! - **`protocol`**: Wire frames.
//! - **`storage`**: Collision-free image persistence.
//! - **`transport`**: Line-framed serial I/O with a lock-guarded shared writer.

pub mod bridge;
pub mod camera;
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod operator;
pub mod protocol;
pub mod storage;
pub mod transport;

pub use bridge::{Bridge, RunSummary};
pub use error::{BridgeError, BridgeResult};
