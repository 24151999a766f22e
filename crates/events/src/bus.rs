//! Live notification feed.
//!
//! Committed notifications are broadcast to whoever is watching (a front desk screen,
//! a log tailer). Copies only: a watcher that falls behind or goes away loses nothing
//! the inbox does not still hold.

use std::sync::{Mutex, mpsc};

use crate::notification::Notification;

/// One watcher's view of the feed.
#[derive(Debug)]
pub struct FeedWatcher {
    receiver: mpsc::Receiver<Notification>,
}

impl FeedWatcher {
    /// Everything published since the last call, oldest first.
    pub fn drain(&self) -> Vec<Notification> {
        self.receiver.try_iter().collect()
    }
}

/// Where a [`BusNotificationSink`](crate::BusNotificationSink) publishes.
pub trait NotificationBus: Send + Sync {
    type Error: core::fmt::Debug;

    fn publish(&self, notification: Notification) -> Result<(), Self::Error>;

    fn watch(&self) -> FeedWatcher;
}

#[derive(Debug, thiserror::Error)]
#[error("notification feed lock poisoned")]
pub struct FeedPoisoned;

/// In-process feed. Watchers that were dropped are forgotten on the next publish.
#[derive(Debug, Default)]
pub struct InMemoryNotificationBus {
    watchers: Mutex<Vec<mpsc::Sender<Notification>>>,
}

impl InMemoryNotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().map(|w| w.len()).unwrap_or(0)
    }
}

impl NotificationBus for InMemoryNotificationBus {
    type Error = FeedPoisoned;

    fn publish(&self, notification: Notification) -> Result<(), Self::Error> {
        let mut watchers = self.watchers.lock().map_err(|_| FeedPoisoned)?;
        watchers.retain(|tx| tx.send(notification.clone()).is_ok());
        Ok(())
    }

    fn watch(&self) -> FeedWatcher {
        let (tx, receiver) = mpsc::channel();
        if let Ok(mut watchers) = self.watchers.lock() {
            watchers.push(tx);
        }
        FeedWatcher { receiver }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use clinicflow_auth::Role;

    use super::*;
    use crate::notification::{NotificationType, Recipient};

    fn payment_note(title: &str) -> Notification {
        Notification::new(
            Recipient::Role(Role::Cashier),
            NotificationType::Payment,
            title,
            "",
            None,
            Utc::now(),
        )
    }

    #[test]
    fn every_watcher_sees_each_notification_in_order() {
        let bus = InMemoryNotificationBus::new();
        let desk = bus.watch();
        let tailer = bus.watch();

        bus.publish(payment_note("Lab Payment Pending")).unwrap();
        bus.publish(payment_note("Medicine Payment Pending")).unwrap();

        for watcher in [&desk, &tailer] {
            let titles: Vec<_> = watcher.drain().into_iter().map(|n| n.title).collect();
            assert_eq!(titles, ["Lab Payment Pending", "Medicine Payment Pending"]);
        }
        assert!(desk.drain().is_empty());
    }

    #[test]
    fn closed_watchers_are_forgotten() {
        let bus = InMemoryNotificationBus::new();
        drop(bus.watch());
        let live = bus.watch();

        bus.publish(payment_note("Payment Received")).unwrap();

        assert_eq!(live.drain().len(), 1);
        assert_eq!(bus.watcher_count(), 1);
    }
}
