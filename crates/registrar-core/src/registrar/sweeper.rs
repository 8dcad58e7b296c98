//! Background expiry sweep

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::RegistrarDb;

/// Handle on the periodic expiry task
pub struct ExpirySweeper {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl ExpirySweeper {
    pub(crate) fn spawn(db: Arc<RegistrarDb>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            debug!("Expiry sweeper started, interval {:?}", interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        db.purge_expired(Utc::now()).await;
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            debug!("Expiry sweeper stopped");
        });

        Self {
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    /// Stop the task and wait for it to finish
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            error!("Expiry sweeper task failed: {}", e);
        }
    }
}
