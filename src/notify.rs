use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::{Event, Scope};

const CHANNEL_CAPACITY: usize = 256;

/// A committed event as seen by a subscriber: channel name plus JSON payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

/// Broadcast hub, one channel per scope.
pub struct NotifyHub {
    channels: DashMap<Scope, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a scope. Creates the channel if needed.
    pub fn subscribe(&self, scope: Scope) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(scope)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish a committed event. No-op if nobody is listening.
    pub fn send(&self, scope: Scope, event: &Event) {
        let Some(sender) = self.channels.get(&scope) else {
            return;
        };
        if sender.receiver_count() == 0 {
            return;
        }
        let payload = match serde_json::to_string(event) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("notification payload for {} not encodable: {e}", scope.channel());
                return;
            }
        };
        let _ = sender.send(Notification {
            channel: scope.channel(),
            payload,
        });
    }

    /// Drop channels whose subscribers have all gone away.
    pub fn prune(&self) -> usize {
        let before = self.channels.len();
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
        before - self.channels.len()
    }
}
