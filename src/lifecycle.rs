//! Shared running flag.
//!
//! The one piece of state shared by the main loop and the operator channel. Either
//! activity (or shutdown itself) clears it; both loops `select!` on
//! [`RunningFlag::stopped`] so they notice within one polling interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;
use tracing::info;

/// Cloneable "keep running" flag with the reason it was cleared.
#[derive(Clone, Debug)]
pub struct RunningFlag {
    running: Arc<AtomicBool>,
    reason: Arc<RwLock<Option<String>>>,
    notify: Arc<Notify>,
}

impl Default for RunningFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningFlag {
    /// A flag in the running state
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            reason: Arc::new(RwLock::new(None)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Whether activities should keep going
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clear the flag and wake every waiter. The first reason wins.
    pub fn stop(&self, reason: impl Into<String>) {
        if self.running.swap(false, Ordering::SeqCst) {
            let reason = reason.into();
            info!(reason = %reason, "Stop requested");
            if let Ok(mut slot) = self.reason.write() {
                *slot = Some(reason);
            }
        }
        self.notify.notify_waiters();
    }

    /// Why the flag was cleared, if it was
    pub fn reason(&self) -> Option<String> {
        self.reason.read().ok().and_then(|r| r.clone())
    }

    /// Resolves once the flag is cleared (immediately if it already is).
    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }
}
