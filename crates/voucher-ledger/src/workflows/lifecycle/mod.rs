//! Post-commit lifecycle: events, provider policies, follow-up orchestration and expiry.

pub mod events;
mod orchestrator;
mod policy;
mod sweeper;
pub mod tasks;

pub use events::{
    ChannelDispatcher, EventDispatcher, InlineDispatcher, LifecycleEvent, LifecycleEventKind,
    LifecycleListener, UnitOfWork,
};
pub use orchestrator::{HandlerReport, LifecycleOrchestrator, OrchestratorSnapshot};
pub use policy::{
    FollowUpOutcome, FollowUpPolicy, PolicyRegistry, PolicyRegistryBuilder, PolicyRegistryError,
};
pub use sweeper::{ExpiryCandidate, ExpirySweeper, SweepReport};
pub use tasks::{
    NewTaskAssignment, Notification, NotificationDispatcher, NotificationError, TaskAssignment,
    TaskAssignmentId, TaskService, TaskServiceError,
};
