//! Signals the core emits for notification delivery. Sending never blocks
//! and never fails the state transition that produced the signal.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::domain::takeout::TakeoutReason;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoreEvent {
    ContainerBecameFull {
        container_id: i64,
        building_id: i64,
        section_id: Option<i64>,
    },
    PickupConditionMet {
        building_id: i64,
        section_id: Option<i64>,
        reasons: Vec<TakeoutReason>,
        container_ids: Vec<i64>,
    },
    PickupRequestResolved {
        request_id: i64,
        building_id: i64,
        section_id: Option<i64>,
    },
    TankTakeoutRequested {
        request_id: i64,
        building_id: i64,
    },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: CoreEvent) {
        tracing::debug!(?event, "emitting core event");
        // No subscriber is not an error.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
