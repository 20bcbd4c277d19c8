//! Periodic task runner.
//!
//! Every periodic component of the agent (user reconciliation, traffic
//! reporting, heartbeat) runs under a [`PeriodicTask`]. The runner owns the
//! failure policy for all of them:
//!
//! - Executions never overlap. The next tick is scheduled one interval after
//!   the previous execution returns, whatever its outcome.
//! - An error returned by an action is logged and the schedule continues.
//!   Server-side failures log at `warn`, everything else at `error`.
//! - A panicking action is logged like an error and does not kill the task.
//! - [`PeriodicTask::close`] stops future ticks and waits for an in-flight
//!   execution to finish. It is idempotent.
//!
//! The first execution happens one interval after the task is spawned.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// A fallible operation run on every tick of a [`PeriodicTask`].
#[async_trait]
pub trait TaskAction: Send + Sync {
    /// Run one cycle.
    ///
    /// # Errors
    ///
    /// Any error is logged by the runner; it never stops the schedule.
    async fn run(&self) -> Result<()>;
}

/// A named action running on a fixed interval in a background tokio task.
pub struct PeriodicTask {
    name: &'static str,
    interval: Duration,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    /// Spawn `action` to run every `interval`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(name: &'static str, interval: Duration, action: Arc<dyn TaskAction>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(name, interval, action, shutdown_rx));

        info!(
            task = name,
            interval_secs = interval.as_secs(),
            "Periodic task started"
        );

        Self {
            name,
            interval,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// The task's name, used in log fields.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// The delay between the end of one execution and the start of the next.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop the task, waiting for an in-flight execution to complete.
    ///
    /// Calls after the first return once the task has stopped.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);

        let mut handle = self.handle.lock().await;
        let Some(handle) = handle.take() else {
            return;
        };
        if let Err(e) = handle.await {
            error!(task = self.name, error = %e, "Periodic task aborted");
            return;
        }
        info!(task = self.name, "Periodic task closed");
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn run_loop(
    name: &'static str,
    interval: Duration,
    action: Arc<dyn TaskAction>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            // Also fires when the sender is dropped.
            _ = shutdown.changed() => break,
            () = tokio::time::sleep(interval) => {}
        }
        if *shutdown.borrow() {
            break;
        }
        run_once(name, action.as_ref()).await;
    }
    debug!(task = name, "Periodic task loop exited");
}

async fn run_once(name: &'static str, action: &dyn TaskAction) {
    match AssertUnwindSafe(action.run()).catch_unwind().await {
        Ok(Ok(())) => debug!(task = name, "Task cycle completed"),
        Ok(Err(e)) if e.is_server_error() => warn!(
            task = name,
            error = %e,
            error_kind = e.kind(),
            "Task cycle failed, retrying next interval"
        ),
        Ok(Err(e)) => error!(
            task = name,
            error = %e,
            error_kind = e.kind(),
            "Task cycle failed"
        ),
        Err(_) => error!(task = name, "Task cycle panicked"),
    }
}
