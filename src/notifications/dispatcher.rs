//! Bounded, fire-and-forget delivery of dispatch units.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

use crate::channels::{ChannelKind, ChannelManager};
use crate::config::DispatchConfig;

/// One message to one recipient over one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchUnit {
    pub recipient_id: i64,
    pub channel: ChannelKind,
    pub destination: String,
    pub text: String,
}

/// Submission handle for the dispatch queue. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<DispatchUnit>,
}

impl Dispatcher {
    /// Create the queue and spawn the task that drains it.
    pub fn spawn(channels: ChannelManager, config: &DispatchConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let limit = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        let handle = tokio::spawn(run_dispatcher(rx, channels, limit));
        (Self { tx }, handle)
    }

    /// Enqueue without waiting. A full or closed queue drops the unit.
    pub fn submit(&self, unit: DispatchUnit) -> bool {
        match self.tx.try_send(unit) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(unit)) => {
                tracing::warn!(
                    recipient = unit.recipient_id,
                    channel = %unit.channel,
                    "Dispatch queue full, dropping notification"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(unit)) => {
                tracing::warn!(
                    recipient = unit.recipient_id,
                    channel = %unit.channel,
                    "Dispatch queue closed, dropping notification"
                );
                false
            }
        }
    }
}

async fn run_dispatcher(
    mut rx: mpsc::Receiver<DispatchUnit>,
    channels: ChannelManager,
    limit: Arc<Semaphore>,
) {
    tracing::info!(channels = ?channels.kinds(), "Notification dispatcher started");

    while let Some(unit) = rx.recv().await {
        let Ok(permit) = limit.clone().acquire_owned().await else {
            break;
        };
        let channels = channels.clone();
        tokio::spawn(async move {
            deliver(&channels, unit).await;
            drop(permit);
        });
    }

    tracing::info!("Notification dispatcher stopped");
}

/// One attempt. Outcomes are logged and never propagated.
async fn deliver(channels: &ChannelManager, unit: DispatchUnit) {
    let Some(connector) = channels.get(unit.channel) else {
        tracing::warn!(
            channel = %unit.channel,
            recipient = unit.recipient_id,
            "Channel not configured, skipping notification"
        );
        return;
    };

    match connector.send(&unit.destination, &unit.text).await {
        Ok(()) => tracing::info!(
            channel = %unit.channel,
            recipient = unit.recipient_id,
            "Notification delivered"
        ),
        Err(e) => tracing::warn!(
            channel = %unit.channel,
            recipient = unit.recipient_id,
            error = %e,
            "Notification delivery failed"
        ),
    }
}
