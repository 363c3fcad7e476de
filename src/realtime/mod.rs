//! Realtime pub/sub broadcaster.
//!
//! Every emit result is fanned out to local WebSocket subscribers through
//! a tokio broadcast channel; dead receivers fall off lazily. An optional
//! distributed mode mirrors the same payloads through a shared broker on
//! `omen:realtime:`-prefixed channels, filtering out messages stamped with
//! this instance's own id so nothing is re-broadcast twice locally.
//!
//! Broadcast failures never affect the emit path.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

pub const REALTIME_CHANNEL_PREFIX: &str = "omen:realtime:";
pub const SIGNALS_CHANNEL: &str = "signals";

/// Payload sent to every subscriber on emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalBroadcast {
    pub event_type: String,
    pub signal_id: String,
    pub title: String,
    pub category: String,
    pub status: String,
    /// Origin instance, used to filter self-echo in distributed mode.
    pub instance_id: String,
}

/// Broker port for distributed fan-out. Single-node deployments use the
/// in-memory implementation; multi-node deployments back this with a
/// shared broker.
#[async_trait]
pub trait FanoutBroker: Send + Sync {
    async fn publish(&self, channel: &str, payload: String);
    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String>;
}

/// In-memory broker: enough for one process and for tests.
#[derive(Default)]
pub struct InMemoryBroker {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .lock()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }
}

#[async_trait]
impl FanoutBroker for InMemoryBroker {
    async fn publish(&self, channel: &str, payload: String) {
        let _ = self.sender(channel).send(payload);
    }

    fn subscribe(&self, channel: &str) -> broadcast::Receiver<String> {
        self.sender(channel).subscribe()
    }
}

pub struct Broadcaster {
    instance_id: String,
    local: broadcast::Sender<SignalBroadcast>,
    broker: Option<Arc<dyn FanoutBroker>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().simple().to_string(),
            local: broadcast::channel(1024).0,
            broker: None,
        }
    }

    /// Enable distributed fan-out through a shared broker.
    pub fn with_broker(mut self, broker: Arc<dyn FanoutBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Local subscription for WebSocket handlers.
    pub fn subscribe(&self) -> broadcast::Receiver<SignalBroadcast> {
        self.local.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.local.receiver_count()
    }

    /// Fan out a signal_emitted event. Errors are swallowed: the emit
    /// result was already decided before this runs.
    pub fn broadcast_signal_emitted(
        &self,
        signal_id: &str,
        title: &str,
        category: &str,
        status: &str,
    ) {
        let message = SignalBroadcast {
            event_type: "signal_emitted".to_string(),
            signal_id: signal_id.to_string(),
            title: title.to_string(),
            category: category.to_string(),
            status: status.to_string(),
            instance_id: self.instance_id.clone(),
        };

        // send() errs only when no receiver is subscribed.
        let _ = self.local.send(message.clone());

        if let Some(broker) = &self.broker {
            let broker = broker.clone();
            let channel = format!("{}{}", REALTIME_CHANNEL_PREFIX, SIGNALS_CHANNEL);
            match serde_json::to_string(&message) {
                Ok(payload) => {
                    tokio::spawn(async move {
                        broker.publish(&channel, payload).await;
                    });
                }
                Err(err) => warn!(error = %err, "broadcast serialization failed"),
            }
        }
    }

    /// Bridge broker messages back into the local channel, dropping our
    /// own (already locally broadcast) messages.
    pub fn spawn_broker_bridge(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        let broker = self.broker.clone()?;
        let channel = format!("{}{}", REALTIME_CHANNEL_PREFIX, SIGNALS_CHANNEL);
        let mut receiver = broker.subscribe(&channel);
        let broadcaster = self.clone();

        Some(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => {
                        let Ok(message) = serde_json::from_str::<SignalBroadcast>(&payload) else {
                            continue;
                        };
                        if message.instance_id == broadcaster.instance_id {
                            continue;
                        }
                        debug!(signal_id = %message.signal_id, "relaying broker broadcast");
                        let _ = broadcaster.local.send(message);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "broker bridge lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_subscribers_receive_broadcasts() {
        let broadcaster = Broadcaster::new();
        let mut rx = broadcaster.subscribe();
        broadcaster.broadcast_signal_emitted("OMEN-1", "title", "GEOPOLITICAL", "delivered");

        let message = rx.recv().await.unwrap();
        assert_eq!(message.event_type, "signal_emitted");
        assert_eq!(message.signal_id, "OMEN-1");
        assert_eq!(message.status, "delivered");
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_harmless() {
        let broadcaster = Broadcaster::new();
        broadcaster.broadcast_signal_emitted("OMEN-1", "t", "OTHER", "ledger_only");
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn broker_bridge_filters_own_instance() {
        let broker: Arc<dyn FanoutBroker> = Arc::new(InMemoryBroker::new());
        let a = Arc::new(Broadcaster::new().with_broker(broker.clone()));
        let b = Arc::new(Broadcaster::new().with_broker(broker.clone()));

        let _bridge_a = a.spawn_broker_bridge().unwrap();
        let _bridge_b = b.spawn_broker_bridge().unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut a_rx = a.subscribe();
        let mut b_rx = b.subscribe();

        a.broadcast_signal_emitted("OMEN-X", "t", "OTHER", "delivered");

        // A sees its own local copy exactly once.
        let first = a_rx.recv().await.unwrap();
        assert_eq!(first.signal_id, "OMEN-X");
        let echo = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            a_rx.recv(),
        )
        .await;
        assert!(echo.is_err(), "instance must not re-receive its own message");

        // B receives it over the broker.
        let relayed = tokio::time::timeout(
            std::time::Duration::from_millis(500),
            b_rx.recv(),
        )
        .await
        .expect("bridge relays within timeout")
        .unwrap();
        assert_eq!(relayed.signal_id, "OMEN-X");
        assert_eq!(relayed.instance_id, a.instance_id());
    }
}
