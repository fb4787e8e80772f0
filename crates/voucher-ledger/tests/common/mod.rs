#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::task::JoinHandle;
use voucher_ledger::workflows::assignments::{
    Actor, ActorDirectory, Candidate, CandidateDirectory,
};
use voucher_ledger::workflows::domain::{ActorId, CandidateId, CandidateListId, ServiceKey};
use voucher_ledger::workflows::lifecycle::{
    NewTaskAssignment, Notification, NotificationDispatcher, NotificationError, TaskAssignment,
    TaskAssignmentId, TaskService, TaskServiceError,
};
use voucher_ledger::workflows::providers::ProviderCatalogue;
use voucher_ledger::workflows::{Collaborators, Delivery, LedgerServices};

pub const ADMIN: &str = "ops-admin";

pub fn admin() -> ActorId {
    ActorId(ADMIN.to_string())
}

pub fn candidate(id: &str) -> CandidateId {
    CandidateId(id.to_string())
}

pub struct Directory {
    candidates: HashMap<CandidateId, Candidate>,
    lists: HashMap<CandidateListId, Vec<CandidateId>>,
}

impl Directory {
    pub fn with_candidates(count: usize) -> Self {
        let candidates = (1..=count)
            .map(|index| {
                let id = candidate(&format!("C{index}"));
                let record = Candidate {
                    id: id.clone(),
                    display_name: format!("Candidate {index}"),
                    email: format!("c{index}@example.test"),
                };
                (id, record)
            })
            .collect();
        Self {
            candidates,
            lists: HashMap::new(),
        }
    }
}

impl CandidateDirectory for Directory {
    fn find(&self, id: &CandidateId) -> Option<Candidate> {
        self.candidates.get(id).cloned()
    }

    fn list_members(&self, list: &CandidateListId) -> Option<Vec<CandidateId>> {
        self.lists.get(list).cloned()
    }
}

impl ActorDirectory for Directory {
    fn find(&self, id: &ActorId) -> Option<Actor> {
        (id.0 == ADMIN).then(|| Actor {
            id: id.clone(),
            display_name: "Operations".to_string(),
        })
    }
}

#[derive(Default)]
pub struct Tasks {
    rows: Mutex<Vec<TaskAssignment>>,
    offline: bool,
    hold: Mutex<Option<(Sender<()>, Receiver<()>)>>,
}

/// Test side of a held first `create`: `entered` fires when it blocks, `release` lets it go.
pub struct Hold {
    pub entered: Receiver<()>,
    pub release: Sender<()>,
}

impl Tasks {
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    /// The first `create` call parks until the returned [`Hold`] releases it.
    pub fn holding_first_create() -> (Self, Hold) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let tasks = Self {
            hold: Mutex::new(Some((entered_tx, release_rx))),
            ..Self::default()
        };
        let hold = Hold {
            entered: entered_rx,
            release: release_tx,
        };
        (tasks, hold)
    }

    pub fn rows(&self) -> Vec<TaskAssignment> {
        self.rows.lock().expect("task mutex poisoned").clone()
    }

    pub fn active_for(&self, id: &CandidateId) -> Vec<String> {
        self.rows()
            .into_iter()
            .filter(|task| task.active && &task.candidate_id == id)
            .map(|task| task.task_name)
            .collect()
    }
}

impl TaskService for Tasks {
    fn create(&self, task: NewTaskAssignment) -> Result<TaskAssignment, TaskServiceError> {
        if self.offline {
            return Err(TaskServiceError::Unavailable("task backend offline".to_string()));
        }
        let held = self.hold.lock().expect("hold mutex poisoned").take();
        if let Some((entered, release)) = held {
            entered.send(()).expect("test waits for the held create");
            release.recv().expect("test releases the held create");
        }
        let mut rows = self.rows.lock().expect("task mutex poisoned");
        let row = TaskAssignment {
            id: TaskAssignmentId(rows.len() as u64 + 1),
            candidate_id: task.candidate_id,
            task_name: task.task_name,
            source_assignment: task.source_assignment,
            active: true,
            inactive_reason: None,
            retired_by: None,
            created_at: Utc::now(),
        };
        rows.push(row.clone());
        Ok(row)
    }

    fn find_active(
        &self,
        candidate: &CandidateId,
        task_name: &str,
    ) -> Result<Vec<TaskAssignment>, TaskServiceError> {
        Ok(self
            .rows()
            .into_iter()
            .filter(|task| task.active && &task.candidate_id == candidate)
            .filter(|task| task.task_name == task_name)
            .collect())
    }

    fn retire(
        &self,
        id: TaskAssignmentId,
        reason: &str,
        actor: Option<&ActorId>,
    ) -> Result<(), TaskServiceError> {
        let mut rows = self.rows.lock().expect("task mutex poisoned");
        let row = rows
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or(TaskServiceError::NotFound(id))?;
        row.active = false;
        row.inactive_reason = Some(reason.to_string());
        row.retired_by = actor.cloned();
        Ok(())
    }
}

#[derive(Default)]
pub struct Outbox {
    pub sent: Mutex<Vec<Notification>>,
}

impl NotificationDispatcher for Outbox {
    fn send(&self, notification: Notification) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .expect("outbox mutex poisoned")
            .push(notification);
        Ok(())
    }
}

pub struct World {
    pub services: Arc<LedgerServices>,
    pub tasks: Arc<Tasks>,
    pub outbox: Arc<Outbox>,
    pub worker: Option<JoinHandle<()>>,
}

impl World {
    pub fn build(tasks: Tasks, delivery: Delivery) -> Self {
        let directory = Arc::new(Directory::with_candidates(5));
        let tasks = Arc::new(tasks);
        let outbox = Arc::new(Outbox::default());
        let (services, worker) = LedgerServices::assemble(
            ProviderCatalogue::builtin(),
            Collaborators {
                candidates: directory.clone(),
                actors: directory,
                tasks: tasks.clone(),
                notifications: outbox.clone(),
            },
            delivery,
        )
        .expect("builtin catalogue assembles");
        Self {
            services: Arc::new(services),
            tasks,
            outbox,
            worker,
        }
    }

    pub fn inline() -> Self {
        Self::build(Tasks::default(), Delivery::Inline)
    }

    pub fn import(&self, key: &ServiceKey, rows: &str) {
        let csv = format!("coupon code,expiration date,date sent,coupon status\n{rows}");
        self.services
            .import(key, Cursor::new(csv))
            .expect("pool configured")
            .expect("import succeeds");
    }
}
