//! Colony events and the publish/subscribe bus that delivers them.
//!
//! Subscribers register once at system init and receive every event published
//! afterwards on their own channel. `shutdown` drops all senders so that
//! subscribers observe a disconnect and can tear down.

use colony_rules::{BuildingId, ItemKind, Position, WorkerId};
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tracing::trace;

use crate::construction::SiteId;
use crate::task_registry::TaskId;

/// Descriptor of a finished structure, handed to the external building system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingDescriptor {
    pub id: BuildingId,
    pub blueprint: String,
    pub anchor: Position,
    /// World positions of every placed tile.
    pub tiles: Vec<Position>,
}

/// Everything the core reports to UI, audio and achievement collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColonyEvent {
    TaskStarted {
        task: TaskId,
        worker: WorkerId,
    },
    TaskCompleted {
        task: TaskId,
    },
    /// A claim was returned to the open pool.
    TaskReleased {
        task: TaskId,
    },
    TaskCancelled {
        task: TaskId,
    },
    /// First material arrived; the site left PLANNED.
    ConstructionStarted {
        site: SiteId,
    },
    ConstructionProgress {
        site: SiteId,
        tile: usize,
        progress: f32,
    },
    ConstructionCompleted {
        site: SiteId,
        building: BuildingDescriptor,
    },
    ConstructionCancelled {
        site: SiteId,
        /// Delivered materials left behind at the site.
        refund: BTreeMap<ItemKind, u32>,
    },
}

impl ColonyEvent {
    pub fn task(&self) -> Option<TaskId> {
        match self {
            ColonyEvent::TaskStarted { task, .. }
            | ColonyEvent::TaskCompleted { task }
            | ColonyEvent::TaskReleased { task }
            | ColonyEvent::TaskCancelled { task } => Some(*task),
            _ => None,
        }
    }

    pub fn site(&self) -> Option<SiteId> {
        match self {
            ColonyEvent::ConstructionStarted { site }
            | ColonyEvent::ConstructionProgress { site, .. }
            | ColonyEvent::ConstructionCompleted { site, .. }
            | ColonyEvent::ConstructionCancelled { site, .. } => Some(*site),
            _ => None,
        }
    }
}

/// Receiving end handed to a subscriber.
#[derive(Debug)]
pub struct Subscription {
    receiver: Receiver<ColonyEvent>,
}

impl Subscription {
    /// Next pending event, if any, without blocking.
    pub fn try_next(&self) -> Option<ColonyEvent> {
        self.receiver.try_recv().ok()
    }

    /// Drain every pending event.
    pub fn drain(&self) -> Vec<ColonyEvent> {
        self.receiver.try_iter().collect()
    }

    /// Block until the next event arrives. `None` once the bus has shut down
    /// and every pending event was read.
    pub fn wait_next(&self) -> Option<ColonyEvent> {
        self.receiver.recv().ok()
    }

    pub fn receiver(&self) -> &Receiver<ColonyEvent> {
        &self.receiver
    }
}

/// Fan-out bus. Dead subscribers are pruned on the next publish.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<ColonyEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        Subscription { receiver }
    }

    pub fn publish(&self, event: ColonyEvent) {
        trace!(?event, "publish");
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Disconnect every subscriber.
    pub fn shutdown(&self) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
