use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

/// Fan-out channel: every subscriber sees every message published on a
/// topic it subscribed to. Backed by a broadcast ring; a subscriber that
/// lags far enough to be overwritten logs the loss and continues, which
/// matches the at-most-once contract of control traffic.
pub struct PubSub<T: Clone> {
    name: Arc<str>,
    tx: broadcast::Sender<(Arc<str>, T)>,
}

impl<T: Clone> Clone for PubSub<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> PubSub<T> {
    pub fn new(name: &str, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            name: Arc::from(name),
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish to a topic. Dropped silently when nobody subscribes,
    /// like a pubsub with no connected peers.
    pub fn publish(&self, topic: &str, msg: T) {
        let _ = self.tx.send((Arc::from(topic), msg));
    }

    pub fn subscribe(&self, topics: &[&str]) -> Subscriber<T> {
        Subscriber {
            pubsub: self.name.clone(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            rx: self.tx.subscribe(),
        }
    }
}

pub struct Subscriber<T: Clone> {
    pubsub: Arc<str>,
    topics: Vec<String>,
    rx: broadcast::Receiver<(Arc<str>, T)>,
}

impl<T: Clone + Send> Subscriber<T> {
    /// Next message on a subscribed topic; None once the pubsub closed.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok((topic, msg)) => {
                    if self.topics.iter().any(|t| *t == *topic) {
                        return Some(msg);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(pubsub = %self.pubsub, skipped = n, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant used by loops that poll between queue work.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.rx.try_recv() {
                Ok((topic, msg)) => {
                    if self.topics.iter().any(|t| *t == *topic) {
                        return Some(msg);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(pubsub = %self.pubsub, skipped = n, "subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }
}
