use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::workflows::domain::{ActorId, Assignment};
use crate::workflows::store::{LedgerStore, StoreError, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    Assigned,
    Redeemed,
    Reassigned,
    Expired,
}

impl LifecycleEventKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::Redeemed => "redeemed",
            Self::Reassigned => "reassigned",
            Self::Expired => "expired",
        }
    }
}

/// Snapshot of an assignment at the moment a lifecycle transition committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    pub assignment: Assignment,
    pub actor: Option<ActorId>,
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(
        kind: LifecycleEventKind,
        assignment: Assignment,
        actor: Option<ActorId>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            assignment,
            actor,
            occurred_at,
        }
    }
}

/// Receives events strictly after the write that produced them committed.
pub trait LifecycleListener: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, events: Vec<LifecycleEvent>);
}

/// Delivers events on the committing thread.
pub struct InlineDispatcher {
    listener: Arc<dyn LifecycleListener>,
}

impl InlineDispatcher {
    pub fn new(listener: Arc<dyn LifecycleListener>) -> Self {
        Self { listener }
    }
}

impl EventDispatcher for InlineDispatcher {
    fn dispatch(&self, events: Vec<LifecycleEvent>) {
        for event in &events {
            self.listener.on_event(event);
        }
    }
}

/// Hands events to a background worker so listener side effects never block the caller.
pub struct ChannelDispatcher {
    sender: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ChannelDispatcher {
    /// Spawns the delivery worker on the current tokio runtime.
    pub fn spawn(listener: Arc<dyn LifecycleListener>) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<LifecycleEvent>();
        let worker = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                listener.on_event(&event);
            }
            debug!("lifecycle event channel closed");
        });
        (Self { sender }, worker)
    }
}

impl EventDispatcher for ChannelDispatcher {
    fn dispatch(&self, events: Vec<LifecycleEvent>) {
        for event in events {
            let kind = event.kind;
            let assignment_id = event.assignment.id;
            if self.sender.send(event).is_err() {
                error!(
                    kind = kind.label(),
                    %assignment_id,
                    "lifecycle worker stopped; event dropped"
                );
            }
        }
    }
}

/// Runs a unit of work in one transaction and dispatches its events after commit.
#[derive(Clone)]
pub struct UnitOfWork {
    store: Arc<LedgerStore>,
    dispatcher: Arc<dyn EventDispatcher>,
}

impl UnitOfWork {
    pub fn new(store: Arc<LedgerStore>, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    /// Any error from `work` or from the commit rolls everything back, events included.
    ///
    /// After committing, the caller drains the store's outbox. A drain may carry events from
    /// other units that committed earlier but have not delivered yet; they go out first.
    pub fn run<T, E>(
        &self,
        work: impl FnOnce(&mut Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut tx = self.store.begin();
        let value = work(&mut tx)?;
        tx.commit()?;

        self.deliver_committed();
        Ok(value)
    }

    /// The write already committed, so a failed drain is logged and left for the next unit.
    pub fn deliver_committed(&self) {
        let dispatcher = &self.dispatcher;
        let drained = self.store.drain_committed(|events| {
            debug!(count = events.len(), "dispatching committed lifecycle events");
            dispatcher.dispatch(events);
        });
        if let Err(err) = drained {
            error!(%err, "committed lifecycle events could not be drained");
        }
    }
}
