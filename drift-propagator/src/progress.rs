//! Progress fan-out from running jobs to the listener.

use tokio::sync::mpsc;

use crate::item::SyncItem;

/// Events emitted while a propagation runs.
#[derive(Debug, Clone)]
pub enum PropagatorEvent {
    /// Byte progress of one transfer.
    Progress { file: String, bytes: u64 },
    /// An item reached its terminal status.
    ItemCompleted { item: SyncItem },
}

pub type EventSender = mpsc::UnboundedSender<PropagatorEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<PropagatorEvent>;

/// Handle given to a transfer job for reporting byte progress of its item.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    file: String,
    events: Option<EventSender>,
}

impl ProgressHandle {
    pub(crate) fn new(file: String, events: Option<EventSender>) -> Self {
        Self { file, events }
    }

    /// Detached handle for contexts without a listener.
    pub fn disconnected(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            events: None,
        }
    }

    pub fn report(&self, bytes: u64) {
        if let Some(events) = &self.events {
            let _ = events.send(PropagatorEvent::Progress {
                file: self.file.clone(),
                bytes,
            });
        }
    }
}
