//! Per-run pub/sub signaling.
//!
//! Containers announce readiness on a per-run status channel and receive
//! shutdown requests on a per-run command channel. The bus itself is a
//! deployment concern: `LocalBus` covers single-process deployments and
//! tests, while a networked broker can be plugged in behind the same trait.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, BusError>;

pub fn status_channel(run_id: &str) -> String {
    format!("run:{run_id}:status")
}

pub fn command_channel(run_id: &str) -> String {
    format!("run:{run_id}:cmd")
}

/// Message published on a run's status channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusMessage {
    Ready {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// Message published on a run's command channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandMessage {
    Shutdown { timestamp: i64 },
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Subscriptions must be closed on every exit path; a leaked
    /// subscription is a defect. `Subscription` deregisters on drop as a
    /// backstop, but callers close explicitly.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}

pub struct Subscription {
    rx: mpsc::UnboundedReceiver<String>,
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        rx: mpsc::UnboundedReceiver<String>,
        unsubscribe: Box<dyn FnOnce() + Send>,
    ) -> Self {
        Self {
            rx,
            unsubscribe: Some(unsubscribe),
        }
    }

    /// Next payload, or `None` once the channel is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn close(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

type SubscriberMap = HashMap<String, Vec<(u64, mpsc::UnboundedSender<String>)>>;

/// In-process bus. Channel entries are pruned once their last subscriber
/// unsubscribes, so the map does not grow with the number of finished runs.
#[derive(Default)]
pub struct LocalBus {
    subscribers: Arc<Mutex<SubscriberMap>>,
    next_id: AtomicU64,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscribers on a channel. Test observability.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .lock()
            .expect("bus map poisoned")
            .get(channel)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut map = self.subscribers.lock().expect("bus map poisoned");
        if let Some(subs) = map.get_mut(channel) {
            subs.retain(|(_, tx)| tx.send(payload.to_string()).is_ok());
            if subs.is_empty() {
                map.remove(channel);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut map = self.subscribers.lock().expect("bus map poisoned");
        map.entry(channel.to_string()).or_default().push((id, tx));

        let subscribers = Arc::clone(&self.subscribers);
        let channel = channel.to_string();
        Ok(Subscription::new(
            rx,
            Box::new(move || {
                let mut map = subscribers.lock().expect("bus map poisoned");
                if let Some(subs) = map.get_mut(&channel) {
                    subs.retain(|(sub_id, _)| *sub_id != id);
                    if subs.is_empty() {
                        map.remove(&channel);
                    }
                }
            }),
        ))
    }
}
