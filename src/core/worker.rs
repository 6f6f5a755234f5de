// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Cancellable background tasks

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};

/// Spawned task plus the sender that tells it to stop
pub struct Worker {
    name: String,
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawn `task` with a shutdown receiver. The task runs inside a span
    /// named after the worker.
    pub fn spawn<F, Fut>(name: &str, task: F) -> Self
    where
        F: FnOnce(broadcast::Receiver<()>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, rx) = broadcast::channel(1);
        let span = tracing::info_span!("worker", name);
        let handle = tokio::spawn(task(rx).instrument(span));
        debug!("Started worker '{}'", name);

        Self {
            name: name.to_string(),
            shutdown,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task and wait up to `timeout` for it. Returns `false` when
    /// the task had to be abandoned.
    pub async fn stop(self, timeout: Duration) -> bool {
        let _ = self.shutdown.send(());

        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(())) => {
                debug!("Worker '{}' stopped", self.name);
                true
            }
            Ok(Err(e)) => {
                warn!("Worker '{}' ended abnormally: {}", self.name, e);
                true
            }
            Err(_) => {
                warn!("Worker '{}' did not stop within {:?}; abandoning it", self.name, timeout);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_stop_signals_loop() {
        let exited = Arc::new(AtomicBool::new(false));
        let flag = exited.clone();

        let worker = Worker::spawn("looper", move |mut shutdown| async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(Duration::from_millis(5)) => {}
                }
            }
            flag.store(true, Ordering::SeqCst);
        });

        assert_eq!(worker.name(), "looper");
        assert!(worker.stop(Duration::from_secs(1)).await);
        assert!(exited.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_task_is_abandoned() {
        let worker = Worker::spawn("stuck", |_shutdown| async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        assert!(!worker.stop(Duration::from_millis(50)).await);
    }
}
