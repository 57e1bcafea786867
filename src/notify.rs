use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Contact, Notice};
use crate::observability;
use crate::ports::{Notifier, NotifyError};

/// Broadcast hub delivering notices to whoever listens on a contact.
pub struct NotifyHub {
    channels: DashMap<Contact, broadcast::Sender<Notice>>,
    capacity: usize,
}

impl NotifyHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to notices for a contact. Creates the channel if needed.
    pub fn subscribe(&self, contact: &Contact) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(contact.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        sender.subscribe()
    }

    /// Drop a contact's channel; its receivers see the stream close.
    pub fn remove(&self, contact: &Contact) {
        self.channels.remove(contact);
    }
}

#[async_trait]
impl Notifier for NotifyHub {
    /// No listener is not a failure: the notice is simply not observed.
    async fn send(&self, notice: &Notice) -> Result<(), NotifyError> {
        if notice.contact.0.is_empty() {
            return Err(NotifyError::Undeliverable {
                contact: notice.contact.clone(),
                reason: "empty contact".into(),
            });
        }
        if let Some(sender) = self.channels.get(&notice.contact) {
            let _ = sender.send(notice.clone());
        }
        metrics::counter!(observability::NOTICES_SENT_TOTAL, "kind" => notice.kind.as_str())
            .increment(1);
        tracing::debug!(
            reservation = %notice.reservation_id,
            "{:?} notice to {}",
            notice.kind,
            notice.contact
        );
        Ok(())
    }
}
