//! Run state shared between the control surface and the worker

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle status published by the run loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Connecting,
    Running,
    Stopping,
    /// The last run ended with a fault
    Error(String),
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Idle => write!(f, "Not running"),
            RunStatus::Connecting => write!(f, "Connecting..."),
            RunStatus::Running => write!(f, "Listening to input stream..."),
            RunStatus::Stopping => write!(f, "Stopping..."),
            RunStatus::Error(cause) => write!(f, "Error: {}", cause),
        }
    }
}

struct Shared {
    running: Mutex<bool>,
    wake: Condvar,
    status: Mutex<RunStatus>,
}

/// Running flag plus published status. Clones share the same state.
#[derive(Clone)]
pub struct RunState {
    inner: Arc<Shared>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Shared {
                running: Mutex::new(false),
                wake: Condvar::new(),
                status: Mutex::new(RunStatus::Idle),
            }),
        }
    }

    /// Set the running flag ahead of a new run
    pub fn arm(&self) {
        *self.inner.running.lock() = true;
    }

    /// Clear the running flag and wake any interruptible sleep
    pub fn request_stop(&self) {
        let mut running = self.inner.running.lock();
        *running = false;
        self.inner.wake.notify_all();
    }

    pub fn is_running(&self) -> bool {
        *self.inner.running.lock()
    }

    /// Sleep for `duration` or until a stop is requested.
    ///
    /// Returns whether the run should continue.
    pub fn sleep(&self, duration: Duration) -> bool {
        let mut running = self.inner.running.lock();
        if !duration.is_zero() && *running {
            self.inner
                .wake
                .wait_while_for(&mut running, |running| *running, duration);
        }
        *running
    }

    pub fn status(&self) -> RunStatus {
        self.inner.status.lock().clone()
    }

    pub fn set_status(&self, status: RunStatus) {
        let mut current = self.inner.status.lock();
        if *current != status {
            log::info!("Status: {}", status);
            *current = status;
        }
    }

    /// Move to `Stopping` unless the worker already published its final status
    pub(crate) fn mark_stopping(&self) {
        let mut current = self.inner.status.lock();
        if matches!(*current, RunStatus::Connecting | RunStatus::Running) {
            log::info!("Status: {}", RunStatus::Stopping);
            *current = RunStatus::Stopping;
        }
    }
}
