use crate::engine::{MachineHandle, SessionRecord};
use filler_core::{EventEnvelope, EventLevel};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// One item on the event stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Published {
    Event(EventEnvelope),
    /// A production session closed by a reset; the record a persistence
    /// collaborator stores.
    Session(SessionRecord),
}

pub type EventTx = broadcast::Sender<Vec<Published>>;

#[derive(Clone)]
pub struct AppState {
    /// In configuration order.
    pub machines: Arc<Vec<MachineHandle>>,
    pub event_tx: EventTx,
    pub event_level: EventLevel,
}

impl AppState {
    pub fn machine(&self, id: &str) -> Option<&MachineHandle> {
        self.machines.iter().find(|m| m.id().0 == id)
    }
}
