//! Tracks running backup jobs so they can be cancelled.

use std::collections::HashMap;
use tokio::sync::{RwLock, oneshot};

/// Map of backup id to the cancel signal of its running job.
///
/// A job registers itself before it starts and calls [`finish`](Self::finish)
/// when done. Cancelling removes the entry and fires the signal; the job drops
/// its `pg_dump` child, which kills the process.
pub struct BackupTaskManager {
    pub(crate) running: RwLock<HashMap<i32, oneshot::Sender<()>>>,
}

impl Default for BackupTaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BackupTaskManager {
    pub fn new() -> Self {
        Self {
            running: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a job and returns the receiver it must watch. Registering an
    /// id twice cancels the earlier job.
    #[tracing::instrument(skip(self))]
    pub async fn register(&self, backup_id: i32) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let mut running = self.running.write().await;
        if let Some(old) = running.insert(backup_id, tx) {
            let _ = old.send(());
        }
        rx
    }

    #[tracing::instrument(skip(self))]
    pub async fn is_running(&self, backup_id: i32) -> bool {
        self.running.read().await.contains_key(&backup_id)
    }

    /// Removes a finished job. Returns false when the job was cancelled in the
    /// meantime.
    #[tracing::instrument(skip(self))]
    pub async fn finish(&self, backup_id: i32) -> bool {
        self.running.write().await.remove(&backup_id).is_some()
    }

    /// Signals the job to stop. Returns whether a job was registered.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, backup_id: i32) -> bool {
        match self.running.write().await.remove(&backup_id) {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn cancel_all(&self) {
        let mut running = self.running.write().await;
        for (_, tx) in running.drain() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_fires_signal_and_forgets_job() {
        let manager = BackupTaskManager::new();
        let rx = manager.register(7).await;
        assert!(manager.is_running(7).await);
        assert!(manager.cancel(7).await);
        assert!(rx.await.is_ok());
        assert!(!manager.is_running(7).await);
        assert!(!manager.cancel(7).await);
    }

    #[tokio::test]
    async fn finish_reports_whether_job_was_still_registered() {
        let manager = BackupTaskManager::new();
        let _rx = manager.register(1).await;
        assert!(manager.finish(1).await);
        assert!(!manager.finish(1).await);
    }

    #[tokio::test]
    async fn reregistering_cancels_previous_job() {
        let manager = BackupTaskManager::new();
        let first = manager.register(3).await;
        let _second = manager.register(3).await;
        assert!(first.await.is_ok());
        assert!(manager.is_running(3).await);
    }

    #[tokio::test]
    async fn cancel_all_clears_everything() {
        let manager = BackupTaskManager::new();
        let a = manager.register(1).await;
        let b = manager.register(2).await;
        manager.cancel_all().await;
        assert!(a.await.is_ok());
        assert!(b.await.is_ok());
        assert!(!manager.is_running(1).await);
    }
}
