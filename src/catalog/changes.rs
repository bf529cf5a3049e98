use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;

use crate::domain::InstallationChange;

const DEFAULT_CAPACITY: usize = 32;

/// Fan-out bus for [`InstallationChange`] events.
///
/// Publishing never waits on subscribers. A subscriber that falls more than
/// the channel capacity behind skips the oldest events.
#[derive(Debug, Clone)]
pub struct InstallationChanges {
    tx: broadcast::Sender<InstallationChange>,
}

impl Default for InstallationChanges {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl InstallationChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn notify(&self, change: InstallationChange) {
        tracing::debug!(pkg = %change.pkg_name, kind = ?change.kind, trigger = ?change.trigger, "Installation changed");
        // Nobody listening is fine.
        let _ = self.tx.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InstallationChange> {
        self.tx.subscribe()
    }

    pub fn stream(&self) -> BoxStream<'static, InstallationChange> {
        stream::unfold(self.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(change) => return Some((change, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Installation change listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}
