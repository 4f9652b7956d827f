use dashmap::DashMap;
use futures::Stream;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{BookingStatus, Event};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    TechnicianCreated,
    TechnicianUpdated,
    TechnicianDeleted,
    ServiceUpdated,
    BookingCreated,
    BookingUpdated,
    BookingDeleted,
    PaymentVerified,
    TimeSlotBlocked,
    TimeSlotUnblocked,
}

/// What viewers are told after a committed change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(skip)]
    pub technician_id: Option<Ulid>,
    pub data: serde_json::Value,
}

impl Notification {
    /// Describe a committed event. `created` separates inserts from edits for
    /// events that carry a whole row.
    pub fn from_event(event: &Event, created: bool) -> Self {
        let kind = match event {
            Event::TechnicianSaved(_) if created => NotificationKind::TechnicianCreated,
            Event::TechnicianSaved(_) => NotificationKind::TechnicianUpdated,
            Event::TechnicianDeleted { .. } => NotificationKind::TechnicianDeleted,
            Event::ServiceSaved(_) | Event::AdditionalServiceSaved(_) => NotificationKind::ServiceUpdated,
            Event::BookingCreated(_) => NotificationKind::BookingCreated,
            Event::BookingStatusChanged {
                status: BookingStatus::Confirmed,
                ..
            } => NotificationKind::PaymentVerified,
            Event::BookingStatusChanged { .. }
            | Event::BookingRescheduled { .. }
            | Event::BookingDetailsUpdated { .. } => NotificationKind::BookingUpdated,
            Event::BookingDeleted { .. } => NotificationKind::BookingDeleted,
            Event::TimeBlocked(_) => NotificationKind::TimeSlotBlocked,
            Event::BlockUpdated(_) => NotificationKind::TimeSlotBlocked,
            Event::TimeUnblocked { .. } => NotificationKind::TimeSlotUnblocked,
        };
        let data = match event {
            Event::TechnicianSaved(t) => serde_json::to_value(t),
            Event::ServiceSaved(s) => serde_json::to_value(s),
            Event::AdditionalServiceSaved(s) => serde_json::to_value(s),
            Event::BookingCreated(b) => serde_json::to_value(b),
            Event::TimeBlocked(b) | Event::BlockUpdated(b) => serde_json::to_value(b),
            Event::TechnicianDeleted { id }
            | Event::TimeUnblocked { id, .. }
            | Event::BookingDeleted { id, .. } => Ok(serde_json::json!({ "id": id })),
            Event::BookingRescheduled {
                id,
                technician,
                date,
                span,
                ..
            } => Ok(serde_json::json!({
                "id": id,
                "technician": technician,
                "date": date,
                "start_time": crate::clock::format_minutes(span.start),
                "end_time": crate::clock::format_minutes(span.end),
            })),
            Event::BookingDetailsUpdated { id, customer, .. } => Ok(serde_json::json!({
                "id": id,
                "customer": customer,
            })),
            Event::BookingStatusChanged {
                id,
                status,
                is_paid,
                payment_method,
                ..
            } => Ok(serde_json::json!({
                "id": id,
                "status": status,
                "is_paid": is_paid,
                "payment_method": payment_method,
            })),
        }
        .unwrap_or_else(|e| {
            tracing::warn!("notification payload not serializable: {e}");
            serde_json::Value::Null
        });
        Self {
            kind,
            technician_id: event.technician_id(),
            data,
        }
    }
}

/// Sink for post-commit notifications. Delivery is best effort.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Broadcast hub: one channel for everything plus one per technician.
pub struct NotifyHub {
    all: broadcast::Sender<Notification>,
    technicians: DashMap<Ulid, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            all: broadcast::channel(CHANNEL_CAPACITY).0,
            technicians: DashMap::new(),
        }
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Notification> {
        self.all.subscribe()
    }

    /// Subscribe to one technician's changes. Creates the channel if needed.
    pub fn subscribe(&self, technician_id: Ulid) -> broadcast::Receiver<Notification> {
        self.technicians
            .entry(technician_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Every notification as a stream. Lagged messages are skipped.
    pub fn stream(&self) -> impl Stream<Item = Notification> + use<> {
        futures::stream::unfold(self.all.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(n) => return Some((n, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("notification stream lagged by {skipped}");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }
}

impl Notifier for NotifyHub {
    /// No-op if nobody is listening. A deleted technician's channel is closed
    /// after its last message.
    fn notify(&self, notification: &Notification) {
        let _ = self.all.send(notification.clone());
        let Some(tid) = notification.technician_id else {
            return;
        };
        if let Some(sender) = self.technicians.get(&tid) {
            let _ = sender.send(notification.clone());
        }
        if notification.kind == NotificationKind::TechnicianDeleted {
            self.technicians.remove(&tid);
        }
    }
}
