use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflows::domain::{ActorId, Assignment, AssignmentId, CandidateId, ProviderId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskAssignmentId(pub u64);

/// A follow-up task handed to a candidate; retired tasks stay on record as inactive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub id: TaskAssignmentId,
    pub candidate_id: CandidateId,
    pub task_name: String,
    pub source_assignment: AssignmentId,
    pub active: bool,
    pub inactive_reason: Option<String>,
    pub retired_by: Option<ActorId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTaskAssignment {
    pub candidate_id: CandidateId,
    pub task_name: String,
    pub source_assignment: AssignmentId,
}

pub trait TaskService: Send + Sync {
    fn create(&self, task: NewTaskAssignment) -> Result<TaskAssignment, TaskServiceError>;
    fn find_active(
        &self,
        candidate: &CandidateId,
        task_name: &str,
    ) -> Result<Vec<TaskAssignment>, TaskServiceError>;
    fn retire(
        &self,
        id: TaskAssignmentId,
        reason: &str,
        actor: Option<&ActorId>,
    ) -> Result<(), TaskServiceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TaskServiceError {
    #[error("task assignment {0:?} not found")]
    NotFound(TaskAssignmentId),
    #[error("task service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub provider: ProviderId,
    pub recipient: String,
    pub template: String,
    pub assignment: Assignment,
}

pub trait NotificationDispatcher: Send + Sync {
    fn send(&self, notification: Notification) -> Result<(), NotificationError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}
