//! In-process, fan-out event bus (expansion, grounds spec.md §5 and §6).
//!
//! Backed by `tokio::sync::broadcast`, generalizing the single
//! `broadcast::Sender<SystemEvent>` the teacher's orchestrator owns into
//! the four named channels spec.md §6 documents plus the per-plugin
//! namespaced `emitEvent` channel. Listeners run synchronously on the
//! emitter's task and must be idempotent; this bus does not change that
//! backpressure policy, only documents it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel")]
pub enum DevrigEvent {
    #[serde(rename = "plugin:sync-progress")]
    SyncProgress {
        plugin_id: String,
        data_source_id: String,
        progress: u8,
    },
    #[serde(rename = "plugin:sync-complete")]
    SyncComplete {
        plugin_id: String,
        data_source_id: String,
        items_synced: i64,
    },
    #[serde(rename = "plugin:sync-error")]
    SyncError {
        plugin_id: String,
        data_source_id: String,
        error: String,
    },
    #[serde(rename = "inbox:updated")]
    InboxUpdated { unsnoozed: usize },
    /// A plugin-namespaced event emitted via `devrig.emitEvent`. The full
    /// channel name is `plugin:<plugin_id>:<name>`.
    #[serde(rename = "plugin:emit")]
    PluginEmitted {
        plugin_id: String,
        name: String,
        data: Value,
    },
}

impl DevrigEvent {
    /// The channel name this event is published under, matching spec.md
    /// §6's event-channel naming exactly.
    pub fn channel(&self) -> String {
        match self {
            DevrigEvent::SyncProgress { .. } => "plugin:sync-progress".to_string(),
            DevrigEvent::SyncComplete { .. } => "plugin:sync-complete".to_string(),
            DevrigEvent::SyncError { .. } => "plugin:sync-error".to_string(),
            DevrigEvent::InboxUpdated { .. } => "inbox:updated".to_string(),
            DevrigEvent::PluginEmitted { plugin_id, name, .. } => {
                format!("plugin:{plugin_id}:{name}")
            }
        }
    }
}

/// The shared event bus. Cloning yields a new handle onto the same
/// underlying broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DevrigEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DevrigEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. A send with no subscribers is not an error —
    /// the bus is fan-out, not a queue with required consumers.
    pub fn publish(&self, event: DevrigEvent) {
        trace!(channel = %event.channel(), "publishing event");
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(DevrigEvent::InboxUpdated { unsnoozed: 3 });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, DevrigEvent::InboxUpdated { unsnoozed: 3 }));
    }

    #[test]
    fn plugin_emit_channel_is_namespaced() {
        let event = DevrigEvent::PluginEmitted {
            plugin_id: "gmail".into(),
            name: "new-label".into(),
            data: Value::Null,
        };
        assert_eq!(event.channel(), "plugin:gmail:new-label");
    }
}
