//! Persist queue
//!
//! One writer task owns the block store writes. Jobs run one at a time in
//! submission order, so the last committed snapshot is always the one taken
//! after the last completed mutation.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::block_store::BlockStore;
use crate::error::StorageError;
use crate::Result;

enum PersistJob {
    Put {
        blob: Vec<u8>,
        respond_to: oneshot::Sender<Result<()>>,
    },
    Clear {
        respond_to: oneshot::Sender<bool>,
    },
}

#[derive(Clone)]
pub(crate) struct PersistQueue {
    tx: mpsc::UnboundedSender<PersistJob>,
}

impl PersistQueue {
    /// Start the writer task. Must be called from within a Tokio runtime.
    pub(crate) fn spawn(store: Arc<dyn BlockStore>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(store, rx));
        Self { tx }
    }

    /// Enqueue a snapshot write. Enqueueing is synchronous so the caller can
    /// do it while still holding the handle lock.
    pub(crate) fn put(&self, blob: Vec<u8>) -> Result<oneshot::Receiver<Result<()>>> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(PersistJob::Put { blob, respond_to })
            .map_err(|_| StorageError::QueueClosed)?;
        Ok(rx)
    }

    pub(crate) fn clear(&self) -> Result<oneshot::Receiver<bool>> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(PersistJob::Clear { respond_to })
            .map_err(|_| StorageError::QueueClosed)?;
        Ok(rx)
    }
}

/// Wait for a queued write to commit.
pub(crate) async fn committed(ack: oneshot::Receiver<Result<()>>) -> Result<()> {
    ack.await.map_err(|_| StorageError::QueueClosed)?
}

async fn run(store: Arc<dyn BlockStore>, mut rx: mpsc::UnboundedReceiver<PersistJob>) {
    let mut seq: u64 = 0;

    while let Some(job) = rx.recv().await {
        seq += 1;
        match job {
            PersistJob::Put { blob, respond_to } => {
                let bytes = blob.len();
                let result = store.put(blob).await;
                match &result {
                    Ok(()) => tracing::debug!(seq, bytes, "Persisted database snapshot"),
                    Err(e) => tracing::error!(seq, error = %e, "Failed to persist database snapshot"),
                }
                // The caller may have gone away; the write still happened.
                let _ = respond_to.send(result);
            }
            PersistJob::Clear { respond_to } => {
                let cleared = store.clear().await;
                tracing::debug!(seq, cleared, "Processed clear request");
                let _ = respond_to.send(cleared);
            }
        }
    }

    tracing::debug!("Persist queue closed");
}
