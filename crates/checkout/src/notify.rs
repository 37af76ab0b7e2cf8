//! Post-settlement notifications, delivered off the request path.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{Money, Order, OrderId, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Tells a buyer their order was placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub order_id: OrderId,
    pub order_number: String,
    pub user_id: UserId,
    pub total: Money,
}

impl From<&Order> for Notification {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            order_number: order.order_number.clone(),
            user_id: order.user_id,
            total: order.total,
        }
    }
}

/// Delivers notifications, e.g. by email.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), String>;
}

/// Notifier that only writes a log line.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), String> {
        tracing::info!(
            order_id = %notification.order_id,
            order_number = %notification.order_number,
            user_id = %notification.user_id,
            total = %notification.total,
            "Order confirmation"
        );
        Ok(())
    }
}

/// Bounded queue drained by a single worker task.
///
/// Enqueueing never blocks and never fails the caller; a full or closed
/// queue drops the notification with a warning.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<Notification>,
}

impl NotificationQueue {
    /// Starts the worker and returns the queue feeding it.
    ///
    /// The worker exits once every queue handle has been dropped and the
    /// backlog is drained.
    pub fn spawn(notifier: Arc<dyn Notifier>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::channel::<Notification>(capacity);

        let worker = tokio::spawn(async move {
            while let Some(notification) = receiver.recv().await {
                if let Err(error) = notifier.notify(&notification).await {
                    tracing::error!(
                        order_id = %notification.order_id,
                        %error,
                        "Failed to deliver order notification"
                    );
                }
            }
            tracing::debug!("Notification worker stopped");
        });

        (Self { sender }, worker)
    }

    pub fn enqueue(&self, notification: Notification) {
        if let Err(e) = self.sender.try_send(notification) {
            tracing::warn!(error = %e, "Dropping order notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Recording {
        async fn notify(&self, notification: &Notification) -> Result<(), String> {
            self.seen
                .lock()
                .unwrap()
                .push(notification.order_number.clone());
            if self.fail {
                Err("smtp down".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn notification(number: &str) -> Notification {
        Notification {
            order_id: OrderId::new(1),
            order_number: number.to_string(),
            user_id: UserId::new(2),
            total: Money::from_units(10),
        }
    }

    #[tokio::test]
    async fn test_worker_delivers_in_order() {
        let notifier = Arc::new(Recording::default());
        let (queue, worker) = NotificationQueue::spawn(notifier.clone(), 8);

        queue.enqueue(notification("A"));
        queue.enqueue(notification("B"));
        drop(queue);
        worker.await.unwrap();

        assert_eq!(*notifier.seen.lock().unwrap(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_the_worker() {
        let notifier = Arc::new(Recording {
            fail: true,
            ..Default::default()
        });
        let (queue, worker) = NotificationQueue::spawn(notifier.clone(), 8);

        queue.enqueue(notification("A"));
        queue.enqueue(notification("B"));
        drop(queue);
        worker.await.unwrap();

        assert_eq!(notifier.seen.lock().unwrap().len(), 2);
    }
}
