//! Background workers: outbox dispatcher and receive endpoint loop.

pub mod outbox_dispatcher;
pub mod receive_endpoint;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

pub use outbox_dispatcher::{DispatchReport, OutboxDispatcher};
pub use receive_endpoint::spawn_receive_endpoint;

/// Handle to control and join a background worker.
///
/// Only [`WorkerHandle::shutdown`] stops the worker. Dropping the handle
/// detaches it; the worker keeps running until its input closes.
#[derive(Debug)]
pub struct WorkerHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn new(name: &'static str, shutdown: watch::Sender<bool>, join: JoinHandle<()>) -> Self {
        Self {
            name,
            shutdown,
            join,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            warn!(worker = self.name, error = %err, "worker task ended abnormally");
        }
    }
}

/// Shutdown signal pair; the receiver side is handed to the worker loop.
pub(crate) fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolves once shutdown is requested; never resolves after the handle is dropped.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_does_not_signal_shutdown() {
        let (tx, mut rx) = shutdown_channel();
        drop(tx);

        let waited = tokio::time::timeout(Duration::from_secs(60), shutdown_requested(&mut rx)).await;

        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn sent_signal_is_observed() {
        let (tx, mut rx) = shutdown_channel();
        tx.send(true).unwrap();

        shutdown_requested(&mut rx).await;
    }
}
