use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::trace;

/// Create a named point-to-point queue. FIFO, bounded at `capacity` (the
/// stall high-water mark): a producer that exceeds it blocks in `put`
/// until a consumer drains. Receivers share one cursor, so multiple
/// component replicas on the same queue are load-balanced.
pub fn queue<T: Send>(name: &str, capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let name: Arc<str> = Arc::from(name);
    (
        QueueSender {
            name: name.clone(),
            tx,
        },
        QueueReceiver {
            name,
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

pub struct QueueSender<T> {
    name: Arc<str>,
    tx: mpsc::Sender<T>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send> QueueSender<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue one item, blocking on back-pressure. Err means every
    /// receiver is gone, i.e. the consuming component shut down.
    pub async fn put(&self, item: T) -> Result<(), ()> {
        self.tx.send(item).await.map_err(|_| ())
    }

    pub async fn put_bulk(&self, items: impl IntoIterator<Item = T>) -> Result<(), ()> {
        for item in items {
            self.put(item).await?;
        }
        Ok(())
    }
}

pub struct QueueReceiver<T> {
    name: Arc<str>,
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T: Send> QueueReceiver<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the next item. None means every sender is gone.
    pub async fn get(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Wait for one item, then drain whatever else is immediately
    /// available, up to `max`. This is the bulk intake used by the
    /// scheduler: batching is an optimization on the consumer only.
    pub async fn get_bulk(&self, max: usize) -> Option<Vec<T>> {
        let mut rx = self.rx.lock().await;
        let first = rx.recv().await?;
        let mut items = vec![first];
        while items.len() < max {
            match rx.try_recv() {
                Ok(item) => items.push(item),
                Err(_) => break,
            }
        }
        trace!(queue = %self.name, n = items.len(), "drained bulk");
        Some(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_order_preserved() {
        let (tx, rx) = queue::<u32>("test", 8);
        for i in 0..5 {
            tx.put(i).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(rx.get().await, Some(i));
        }
    }

    #[tokio::test]
    async fn bulk_drains_available_items_only() {
        let (tx, rx) = queue::<u32>("test", 8);
        tx.put_bulk(0..3).await.unwrap();
        let items = rx.get_bulk(10).await.unwrap();
        assert_eq!(items, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn bulk_respects_max() {
        let (tx, rx) = queue::<u32>("test", 16);
        tx.put_bulk(0..8).await.unwrap();
        assert_eq!(rx.get_bulk(3).await.unwrap().len(), 3);
        assert_eq!(rx.get_bulk(100).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn producer_blocks_at_high_water_mark() {
        let (tx, rx) = queue::<u32>("test", 2);
        tx.put(0).await.unwrap();
        tx.put(1).await.unwrap();
        // The third put must not complete until the consumer drains.
        let blocked = tokio::time::timeout(std::time::Duration::from_millis(50), tx.put(2)).await;
        assert!(blocked.is_err());
        assert_eq!(rx.get().await, Some(0));
        tx.put(2).await.unwrap();
    }

    #[tokio::test]
    async fn two_receivers_load_balance() {
        let (tx, rx1) = queue::<u32>("test", 8);
        let rx2 = rx1.clone();
        tx.put_bulk(0..4).await.unwrap();
        let a = rx1.get().await.unwrap();
        let b = rx2.get().await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn recv_none_after_senders_drop() {
        let (tx, rx) = queue::<u32>("test", 8);
        drop(tx);
        assert_eq!(rx.get().await, None);
    }
}
