use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::Utc;
use serde_json::Value;

use crate::workflows::assignments::{
    Actor, ActorDirectory, Candidate, CandidateDirectory, LedgerError,
};
use crate::workflows::domain::{
    ActorId, Assignment, CandidateId, CandidateListId, ServiceCode, ServiceKey,
};
use crate::workflows::lifecycle::{
    NewTaskAssignment, Notification, NotificationDispatcher, NotificationError, TaskAssignment,
    TaskAssignmentId, TaskService, TaskServiceError,
};
use crate::workflows::providers::{ProviderCatalogue, ACCREDIT};
use crate::workflows::{Collaborators, Delivery, LedgerServices};

pub(super) const ADMIN: &str = "admin";
pub(super) const COHORT: &str = "cohort-a";

pub(super) const CSV_HEADER: &str = "Coupon Code,Expiration Date,Date Sent,Coupon Status\n";

pub(super) fn admin() -> ActorId {
    ActorId(ADMIN.to_string())
}

pub(super) fn candidate(id: &str) -> CandidateId {
    CandidateId(id.to_string())
}

pub(super) fn proctored() -> ServiceKey {
    ServiceKey::new(ACCREDIT, ServiceCode::Proctored)
}

#[derive(Default)]
pub(super) struct People {
    candidates: HashMap<CandidateId, Candidate>,
    lists: HashMap<CandidateListId, Vec<CandidateId>>,
    actors: HashMap<ActorId, Actor>,
}

impl People {
    pub(super) fn standard() -> Self {
        let mut people = Self::default();
        for index in 1..=5 {
            let id = candidate(&format!("c-{index}"));
            people.candidates.insert(
                id.clone(),
                Candidate {
                    id,
                    display_name: format!("Candidate {index}"),
                    email: format!("c{index}@example.test"),
                },
            );
        }
        people.lists.insert(
            CandidateListId(COHORT.to_string()),
            vec![candidate("c-1"), candidate("c-2"), candidate("c-3")],
        );
        people.actors.insert(
            admin(),
            Actor {
                id: admin(),
                display_name: "Ledger Admin".to_string(),
            },
        );
        people
    }
}

impl CandidateDirectory for People {
    fn find(&self, id: &CandidateId) -> Option<Candidate> {
        self.candidates.get(id).cloned()
    }

    fn list_members(&self, list: &CandidateListId) -> Option<Vec<CandidateId>> {
        self.lists.get(list).cloned()
    }
}

impl ActorDirectory for People {
    fn find(&self, id: &ActorId) -> Option<Actor> {
        self.actors.get(id).cloned()
    }
}

#[derive(Default)]
pub(super) struct MemoryTasks {
    rows: Mutex<Vec<TaskAssignment>>,
}

impl MemoryTasks {
    pub(super) fn rows(&self) -> Vec<TaskAssignment> {
        self.rows.lock().expect("task mutex poisoned").clone()
    }

    pub(super) fn named(
        &self,
        candidate_id: &CandidateId,
        task_name: &str,
    ) -> Vec<TaskAssignment> {
        self.rows()
            .into_iter()
            .filter(|task| &task.candidate_id == candidate_id && task.task_name == task_name)
            .collect()
    }
}

impl TaskService for MemoryTasks {
    fn create(&self, task: NewTaskAssignment) -> Result<TaskAssignment, TaskServiceError> {
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
            .named(candidate, task_name)
            .into_iter()
            .filter(|task| task.active)
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
pub(super) struct MemoryOutbox {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryOutbox {
    pub(super) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("outbox mutex poisoned").clone()
    }
}

impl NotificationDispatcher for MemoryOutbox {
    fn send(&self, notification: Notification) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .expect("outbox mutex poisoned")
            .push(notification);
        Ok(())
    }
}

pub(super) struct Harness {
    pub(super) services: Arc<LedgerServices>,
    pub(super) tasks: Arc<MemoryTasks>,
    pub(super) outbox: Arc<MemoryOutbox>,
}

impl Harness {
    /// Imports `codes` into the pool for `key` with no dates and a blank status.
    pub(super) fn seed(&self, key: &ServiceKey, codes: &[&str]) {
        let mut csv = CSV_HEADER.to_string();
        for code in codes {
            csv.push_str(&format!("{code},,,\n"));
        }
        self.services
            .import(key, Cursor::new(csv))
            .expect("pool is configured")
            .expect("seed import succeeds");
    }

    pub(super) fn assign(&self, id: &str) -> Result<Assignment, LedgerError> {
        self.services
            .ledger
            .assign_to_candidate(&proctored(), &candidate(id), Some(&admin()))
    }
}

pub(super) fn harness() -> Harness {
    let people = Arc::new(People::standard());
    let tasks = Arc::new(MemoryTasks::default());
    let outbox = Arc::new(MemoryOutbox::default());

    let (services, worker) = LedgerServices::assemble(
        ProviderCatalogue::builtin(),
        Collaborators {
            candidates: people.clone(),
            actors: people,
            tasks: tasks.clone(),
            notifications: outbox.clone(),
        },
        Delivery::Inline,
    )
    .expect("builtin catalogue is consistent");
    assert!(worker.is_none());

    Harness {
        services: Arc::new(services),
        tasks,
        outbox,
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
