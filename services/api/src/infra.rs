use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::info;
use voucher_ledger::workflows::assignments::{
    Actor, ActorDirectory, Candidate, CandidateDirectory,
};
use voucher_ledger::workflows::domain::{ActorId, CandidateId, CandidateListId};
use voucher_ledger::workflows::lifecycle::{
    NewTaskAssignment, Notification, NotificationDispatcher, NotificationError, TaskAssignment,
    TaskAssignmentId, TaskService, TaskServiceError,
};
use voucher_ledger::workflows::Collaborators;

pub(crate) const OPERATIONS_ACTOR: &str = "ops";
pub(crate) const DEMO_COHORT: &str = "spring-cohort";

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Candidate and staff records held in memory; stands in for the people directory.
#[derive(Default)]
pub(crate) struct InMemoryPeople {
    candidates: HashMap<CandidateId, Candidate>,
    lists: HashMap<CandidateListId, Vec<CandidateId>>,
    actors: HashMap<ActorId, Actor>,
}

impl InMemoryPeople {
    /// Five candidates, one operations actor and a cohort list holding the first four.
    pub(crate) fn demo_roster() -> Self {
        let mut people = Self::default();
        for (index, name) in ["Ada Park", "Bea Ruiz", "Cal Moss", "Dee Lund", "Eli Shaw"]
            .into_iter()
            .enumerate()
        {
            let id = CandidateId(format!("cand-{}", index + 1));
            let email = format!("{}@example.test", name.to_ascii_lowercase().replace(' ', "."));
            people.add_candidate(Candidate {
                id,
                display_name: name.to_string(),
                email,
            });
        }
        let cohort = (1..=4).map(|n| CandidateId(format!("cand-{n}"))).collect();
        people
            .lists
            .insert(CandidateListId(DEMO_COHORT.to_string()), cohort);
        people.actors.insert(
            ActorId(OPERATIONS_ACTOR.to_string()),
            Actor {
                id: ActorId(OPERATIONS_ACTOR.to_string()),
                display_name: "Exam operations".to_string(),
            },
        );
        people
    }

    pub(crate) fn add_candidate(&mut self, candidate: Candidate) {
        self.candidates.insert(candidate.id.clone(), candidate);
    }
}

impl CandidateDirectory for InMemoryPeople {
    fn find(&self, id: &CandidateId) -> Option<Candidate> {
        self.candidates.get(id).cloned()
    }

    fn list_members(&self, list: &CandidateListId) -> Option<Vec<CandidateId>> {
        self.lists.get(list).cloned()
    }
}

impl ActorDirectory for InMemoryPeople {
    fn find(&self, id: &ActorId) -> Option<Actor> {
        self.actors.get(id).cloned()
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryTaskService {
    tasks: Arc<Mutex<Vec<TaskAssignment>>>,
}

impl InMemoryTaskService {
    pub(crate) fn tasks(&self) -> Vec<TaskAssignment> {
        self.tasks.lock().expect("task mutex poisoned").clone()
    }
}

impl TaskService for InMemoryTaskService {
    fn create(&self, task: NewTaskAssignment) -> Result<TaskAssignment, TaskServiceError> {
        let mut guard = self.tasks.lock().expect("task mutex poisoned");
        let record = TaskAssignment {
            id: TaskAssignmentId(guard.len() as u64 + 1),
            candidate_id: task.candidate_id,
            task_name: task.task_name,
            source_assignment: task.source_assignment,
            active: true,
            inactive_reason: None,
            retired_by: None,
            created_at: Utc::now(),
        };
        guard.push(record.clone());
        Ok(record)
    }

    fn find_active(
        &self,
        candidate: &CandidateId,
        task_name: &str,
    ) -> Result<Vec<TaskAssignment>, TaskServiceError> {
        let guard = self.tasks.lock().expect("task mutex poisoned");
        Ok(guard
            .iter()
            .filter(|task| task.active && &task.candidate_id == candidate)
            .filter(|task| task.task_name == task_name)
            .cloned()
            .collect())
    }

    fn retire(
        &self,
        id: TaskAssignmentId,
        reason: &str,
        actor: Option<&ActorId>,
    ) -> Result<(), TaskServiceError> {
        let mut guard = self.tasks.lock().expect("task mutex poisoned");
        let task = guard
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or(TaskServiceError::NotFound(id))?;
        task.active = false;
        task.inactive_reason = Some(reason.to_string());
        task.retired_by = actor.cloned();
        Ok(())
    }
}

/// Records notifications and logs them instead of sending mail.
#[derive(Default, Clone)]
pub(crate) struct LoggingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl LoggingNotifier {
    pub(crate) fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }
}

impl NotificationDispatcher for LoggingNotifier {
    fn send(&self, notification: Notification) -> Result<(), NotificationError> {
        info!(
            provider = %notification.provider,
            recipient = %notification.recipient,
            template = %notification.template,
            resource_code = %notification.assignment.resource_code,
            "notification queued"
        );
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push(notification);
        Ok(())
    }
}

/// In-memory collaborators plus handles the caller can inspect afterwards.
pub(crate) struct InMemoryCollaborators {
    pub(crate) collaborators: Collaborators,
    pub(crate) tasks: InMemoryTaskService,
    pub(crate) notifier: LoggingNotifier,
}

pub(crate) fn in_memory_collaborators(people: InMemoryPeople) -> InMemoryCollaborators {
    let people = Arc::new(people);
    let tasks = InMemoryTaskService::default();
    let notifier = LoggingNotifier::default();
    InMemoryCollaborators {
        collaborators: Collaborators {
            candidates: people.clone(),
            actors: people,
            tasks: Arc::new(tasks.clone()),
            notifications: Arc::new(notifier.clone()),
        },
        tasks,
        notifier,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voucher_ledger::workflows::domain::AssignmentId;

    #[test]
    fn demo_roster_resolves_cohort_and_operator() {
        let people = InMemoryPeople::demo_roster();

        let members = people
            .list_members(&CandidateListId(DEMO_COHORT.to_string()))
            .expect("cohort exists");
        assert_eq!(members.len(), 4);
        let first = CandidateDirectory::find(&people, &members[0]).expect("member known");
        assert_eq!(first.email, "ada.park@example.test");
        assert!(ActorDirectory::find(&people, &ActorId(OPERATIONS_ACTOR.to_string())).is_some());
        assert!(ActorDirectory::find(&people, &ActorId("cand-1".to_string())).is_none());
    }

    #[test]
    fn retired_tasks_stay_listed_but_inactive() {
        let service = InMemoryTaskService::default();
        let task = service
            .create(NewTaskAssignment {
                candidate_id: CandidateId("cand-1".to_string()),
                task_name: "schedule_exam".to_string(),
                source_assignment: AssignmentId(1),
            })
            .expect("created");

        service
            .retire(task.id, "superseded", None)
            .expect("retired");

        let active = service
            .find_active(&CandidateId("cand-1".to_string()), "schedule_exam")
            .expect("lookup");
        assert!(active.is_empty());
        assert_eq!(service.tasks().len(), 1);
        assert_eq!(
            service.tasks()[0].inactive_reason.as_deref(),
            Some("superseded")
        );
        assert!(matches!(
            service.retire(TaskAssignmentId(99), "missing", None),
            Err(TaskServiceError::NotFound(_))
        ));
    }
}
