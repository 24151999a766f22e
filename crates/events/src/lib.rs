//! Domain events, aggregate execution and notification plumbing.

pub mod bus;
pub mod event;
pub mod handler;
pub mod notification;

pub use bus::{FeedPoisoned, FeedWatcher, InMemoryNotificationBus, NotificationBus};
pub use event::Event;
pub use handler::execute;
pub use notification::{
    BusNotificationSink, InMemoryNotificationSink, Notification, NotificationSink,
    NotificationType, NotifyError, Recipient,
};
