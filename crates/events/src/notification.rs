//! Workflow notifications and the sink they are delivered to.
//!
//! Notifications are produced inside a unit of work, collected in an outbox, and
//! handed to a [`NotificationSink`] only after the unit of work commits. Delivery is
//! fire-and-forget: a failing sink is logged by the caller and never undoes the
//! committed state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clinicflow_auth::{Role, StaffMember};
use clinicflow_core::{BusinessRef, StaffId};

use crate::bus::NotificationBus;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    LabRequest,
    LabResult,
    Prescription,
    Payment,
    System,
    PatientAssignment,
    ConsultationReady,
}

/// Who a notification is addressed to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Recipient {
    Staff(StaffId),
    /// Every active staff member holding the role at dispatch time.
    Role(Role),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient: Recipient,
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub related_object_id: Option<BusinessRef>,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn new(
        recipient: Recipient,
        kind: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
        related_object_id: Option<BusinessRef>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            recipient,
            kind,
            title: title.into(),
            message: message.into(),
            related_object_id,
            created_at,
            read_at: None,
        }
    }

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    /// Resolve the recipient against the staff directory.
    ///
    /// A staff recipient passes through unchanged. A role recipient becomes one
    /// notification per active staff member holding that role (possibly none).
    pub fn fan_out<'a, I>(self, directory: I) -> Vec<Notification>
    where
        I: IntoIterator<Item = &'a StaffMember>,
    {
        match self.recipient {
            Recipient::Staff(_) => vec![self],
            Recipient::Role(role) => directory
                .into_iter()
                .filter(|member| member.is_active_with_role(role))
                .map(|member| Notification {
                    id: Uuid::now_v7(),
                    recipient: Recipient::Staff(member.id),
                    ..self.clone()
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Destination for committed notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

impl<S> NotificationSink for Arc<S>
where
    S: NotificationSink + ?Sized,
{
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        (**self).notify(notification)
    }
}

/// Keeps every delivered notification in memory, indexed by id.
#[derive(Debug, Default)]
pub struct InMemoryNotificationSink {
    notifications: RwLock<HashMap<Uuid, Notification>>,
}

impl InMemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications visible to `staff_id`, newest first.
    ///
    /// Returns an empty list if the lock is poisoned.
    pub fn inbox(&self, staff_id: StaffId) -> Vec<Notification> {
        let Ok(guard) = self.notifications.read() else {
            return Vec::new();
        };
        let mut out: Vec<Notification> = guard
            .values()
            .filter(|n| n.recipient == Recipient::Staff(staff_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    pub fn unread_count(&self, staff_id: StaffId) -> usize {
        self.inbox(staff_id).iter().filter(|n| !n.is_read()).count()
    }

    /// Mark one notification read. Returns `false` if it does not exist or belongs to
    /// someone else.
    pub fn mark_read(&self, staff_id: StaffId, id: Uuid, at: DateTime<Utc>) -> bool {
        let Ok(mut guard) = self.notifications.write() else {
            return false;
        };
        match guard.get_mut(&id) {
            Some(n) if n.recipient == Recipient::Staff(staff_id) => {
                n.read_at.get_or_insert(at);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.notifications.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for InMemoryNotificationSink {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        let mut guard = self
            .notifications
            .write()
            .map_err(|_| NotifyError::Delivery("notification store lock poisoned".into()))?;
        guard.insert(notification.id, notification);
        Ok(())
    }
}

/// Publishes notifications on a bus for live consumers.
#[derive(Debug)]
pub struct BusNotificationSink<B> {
    bus: B,
}

impl<B> BusNotificationSink<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

impl<B> NotificationSink for BusNotificationSink<B>
where
    B: NotificationBus,
{
    fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.bus
            .publish(notification)
            .map_err(|e| NotifyError::Delivery(format!("{e:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryNotificationBus;

    fn note(recipient: Recipient) -> Notification {
        Notification::new(
            recipient,
            NotificationType::LabRequest,
            "New Lab Test Request",
            "Complete Blood Count requested",
            None,
            Utc::now(),
        )
    }

    #[test]
    fn role_recipient_fans_out_to_active_members_only() {
        let tech_a = StaffMember::new("Ana", Role::LabTech);
        let mut tech_b = StaffMember::new("Ben", Role::LabTech);
        tech_b.active = false;
        let doctor = StaffMember::new("Dr. Cole", Role::Doctor);
        let directory = vec![tech_a.clone(), tech_b, doctor];

        let fanned = note(Recipient::Role(Role::LabTech)).fan_out(&directory);

        assert_eq!(fanned.len(), 1);
        assert_eq!(fanned[0].recipient, Recipient::Staff(tech_a.id));
    }

    #[test]
    fn staff_recipient_is_not_expanded() {
        let staff = StaffId::new();
        let fanned = note(Recipient::Staff(staff)).fan_out(&[]);
        assert_eq!(fanned.len(), 1);
    }

    #[test]
    fn inbox_and_mark_read() {
        let sink = InMemoryNotificationSink::new();
        let staff = StaffId::new();
        let other = StaffId::new();
        let n = note(Recipient::Staff(staff));
        let id = n.id;

        sink.notify(n).unwrap();
        sink.notify(note(Recipient::Staff(other))).unwrap();

        assert_eq!(sink.inbox(staff).len(), 1);
        assert_eq!(sink.unread_count(staff), 1);

        assert!(!sink.mark_read(other, id, Utc::now()));
        assert!(sink.mark_read(staff, id, Utc::now()));
        assert_eq!(sink.unread_count(staff), 0);
    }

    #[test]
    fn bus_sink_publishes_to_watchers() {
        let sink = BusNotificationSink::new(InMemoryNotificationBus::new());
        let desk = sink.bus.watch();

        sink.notify(note(Recipient::Role(Role::Cashier))).unwrap();

        let received = desk.drain();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind, NotificationType::LabRequest);
    }
}
