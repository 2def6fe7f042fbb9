//! Owns one worker's two tasks: the consumer loop and the heartbeat.
//!
//! The heartbeat starts with the supervisor and keeps running while the loop
//! is stopped, so a paused worker still shows up as registered with
//! `is_running = false`.

use crate::error::{WorkerError, WorkerResult};
use crate::heartbeat::HeartbeatPublisher;
use crate::worker::WorkerLoop;
use article_queue_core::WorkerRecord;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct RunningLoop {
    cancel: CancellationToken,
    task: JoinHandle<WorkerLoop>,
}

pub struct Supervisor {
    worker_id: String,
    snapshots: watch::Receiver<WorkerRecord>,
    stopped: Option<WorkerLoop>,
    running: Option<RunningLoop>,
    heartbeat_cancel: CancellationToken,
    heartbeat: JoinHandle<HeartbeatPublisher>,
}

impl Supervisor {
    /// Start heartbeating right away; the loop waits for [`Supervisor::start`].
    /// Must be called inside a tokio runtime.
    pub fn new(worker: WorkerLoop, heartbeat: HeartbeatPublisher) -> Self {
        let heartbeat_cancel = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat.run(heartbeat_cancel.clone()));

        Self {
            worker_id: worker.worker_id().to_string(),
            snapshots: worker.subscribe(),
            stopped: Some(worker),
            running: None,
            heartbeat_cancel,
            heartbeat,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Latest counters published by the loop
    pub fn status(&self) -> WorkerRecord {
        self.snapshots.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Spawn the consumer loop. Returns false if it is already running or
    /// was lost to a panic.
    pub fn start(&mut self) -> bool {
        let Some(worker) = self.stopped.take() else {
            return false;
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(worker.run(cancel.clone()));
        self.running = Some(RunningLoop { cancel, task });
        info!(worker_id = %self.worker_id, "Worker started");
        true
    }

    /// Ask the loop to stop and wait for it. The job in progress, if any,
    /// finishes first.
    pub async fn stop(&mut self) -> WorkerResult<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        running.cancel.cancel();
        let worker = running
            .task
            .await
            .map_err(|e| WorkerError::TaskFailed(e.to_string()))?;
        self.stopped = Some(worker);
        info!(worker_id = %self.worker_id, "Worker stopped");
        Ok(())
    }

    /// Stop both tasks and publish one last heartbeat carrying the final
    /// counters.
    pub async fn shutdown(mut self) -> WorkerResult<WorkerRecord> {
        let stopped = self.stop().await;

        self.heartbeat_cancel.cancel();
        let heartbeat = self
            .heartbeat
            .await
            .map_err(|e| WorkerError::TaskFailed(e.to_string()))?;
        if let Err(e) = heartbeat.beat().await {
            warn!(worker_id = %self.worker_id, error = %e, "Final heartbeat failed");
        }

        stopped?;
        let record = self.snapshots.borrow().clone();
        Ok(record)
    }
}
