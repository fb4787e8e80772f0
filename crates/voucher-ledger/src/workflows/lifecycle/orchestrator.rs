use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info};

use super::events::{LifecycleEvent, LifecycleEventKind, LifecycleListener};
use super::policy::{FollowUpPolicy, PolicyRegistry};
use super::tasks::{
    NewTaskAssignment, Notification, NotificationDispatcher, TaskAssignmentId, TaskService,
};
use crate::workflows::assignments::CandidateDirectory;

/// What one event produced. Failures are recorded here instead of being propagated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandlerReport {
    pub created: Vec<TaskAssignmentId>,
    pub retired: Vec<TaskAssignmentId>,
    pub notified: bool,
    pub failures: Vec<String>,
}

impl HandlerReport {
    fn fail(&mut self, message: String) {
        self.failures.push(message);
    }
}

#[derive(Debug, Default)]
struct OrchestratorStats {
    events_handled: AtomicU64,
    tasks_created: AtomicU64,
    tasks_retired: AtomicU64,
    notifications_sent: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorSnapshot {
    pub events_handled: u64,
    pub tasks_created: u64,
    pub tasks_retired: u64,
    pub notifications_sent: u64,
    pub failures: u64,
}

/// Turns committed lifecycle events into follow-up tasks and notifications.
///
/// Side effects are best-effort and at-most-once: a failing task service or notifier is
/// logged and counted, never retried, and never reaches the transaction that emitted the
/// event.
pub struct LifecycleOrchestrator {
    policies: Arc<PolicyRegistry>,
    tasks: Arc<dyn TaskService>,
    notifications: Arc<dyn NotificationDispatcher>,
    candidates: Arc<dyn CandidateDirectory>,
    stats: OrchestratorStats,
}

impl LifecycleOrchestrator {
    pub fn new(
        policies: Arc<PolicyRegistry>,
        tasks: Arc<dyn TaskService>,
        notifications: Arc<dyn NotificationDispatcher>,
        candidates: Arc<dyn CandidateDirectory>,
    ) -> Self {
        Self {
            policies,
            tasks,
            notifications,
            candidates,
            stats: OrchestratorStats::default(),
        }
    }

    pub fn stats(&self) -> OrchestratorSnapshot {
        OrchestratorSnapshot {
            events_handled: self.stats.events_handled.load(Ordering::Relaxed),
            tasks_created: self.stats.tasks_created.load(Ordering::Relaxed),
            tasks_retired: self.stats.tasks_retired.load(Ordering::Relaxed),
            notifications_sent: self.stats.notifications_sent.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
        }
    }

    pub fn handle(&self, event: &LifecycleEvent) -> HandlerReport {
        let mut report = HandlerReport::default();
        let assignment = &event.assignment;

        match self.policies.for_provider(&assignment.provider) {
            Ok(policy) => match event.kind {
                LifecycleEventKind::Assigned => {
                    self.create_tasks(event, policy.tasks_on_assigned(event), &mut report);
                    self.notify(event, policy, &mut report);
                }
                LifecycleEventKind::Redeemed => {
                    self.create_tasks(event, policy.tasks_on_redeemed(event), &mut report);
                }
                LifecycleEventKind::Reassigned => {
                    self.retire_tasks(event, policy.tasks_on_reassigned(event), &mut report);
                }
                LifecycleEventKind::Expired => {
                    match policy.handle_expired(event, self.tasks.as_ref()) {
                        Ok(outcome) => {
                            report.created.extend(outcome.created);
                            report.retired.extend(outcome.retired);
                        }
                        Err(err) => report.fail(format!("expiry handler failed: {err}")),
                    }
                }
            },
            Err(err) => report.fail(err.to_string()),
        }

        self.record(event, &report);
        report
    }

    fn create_tasks(
        &self,
        event: &LifecycleEvent,
        task_names: Vec<String>,
        report: &mut HandlerReport,
    ) {
        for task_name in task_names {
            let request = NewTaskAssignment {
                candidate_id: event.assignment.candidate_id.clone(),
                task_name: task_name.clone(),
                source_assignment: event.assignment.id,
            };
            match self.tasks.create(request) {
                Ok(task) => report.created.push(task.id),
                Err(err) => report.fail(format!("creating task '{task_name}' failed: {err}")),
            }
        }
    }

    /// Marks the candidate's active tasks inactive; the records themselves are kept.
    fn retire_tasks(
        &self,
        event: &LifecycleEvent,
        task_names: Vec<String>,
        report: &mut HandlerReport,
    ) {
        let candidate = &event.assignment.candidate_id;
        let reason = format!(
            "superseded by reassignment of {}",
            event.assignment.resource_code
        );

        for task_name in task_names {
            let active = match self.tasks.find_active(candidate, &task_name) {
                Ok(active) => active,
                Err(err) => {
                    report.fail(format!("looking up task '{task_name}' failed: {err}"));
                    continue;
                }
            };
            for task in active {
                match self.tasks.retire(task.id, &reason, event.actor.as_ref()) {
                    Ok(()) => report.retired.push(task.id),
                    Err(err) => report.fail(format!("retiring task {:?} failed: {err}", task.id)),
                }
            }
        }
    }

    fn notify(
        &self,
        event: &LifecycleEvent,
        policy: &dyn FollowUpPolicy,
        report: &mut HandlerReport,
    ) {
        let Some(template) = policy.notification_on_assigned() else {
            return;
        };
        let Some(candidate) = self.candidates.find(&event.assignment.candidate_id) else {
            report.fail(format!(
                "candidate {} not found for notification",
                event.assignment.candidate_id
            ));
            return;
        };

        let notification = Notification {
            provider: event.assignment.provider.clone(),
            recipient: candidate.email,
            template: template.to_string(),
            assignment: event.assignment.clone(),
        };
        match self.notifications.send(notification) {
            Ok(()) => report.notified = true,
            Err(err) => report.fail(format!("notification '{template}' failed: {err}")),
        }
    }

    fn record(&self, event: &LifecycleEvent, report: &HandlerReport) {
        let stats = &self.stats;
        stats.events_handled.fetch_add(1, Ordering::Relaxed);
        stats
            .tasks_created
            .fetch_add(report.created.len() as u64, Ordering::Relaxed);
        stats
            .tasks_retired
            .fetch_add(report.retired.len() as u64, Ordering::Relaxed);
        if report.notified {
            stats.notifications_sent.fetch_add(1, Ordering::Relaxed);
        }

        let assignment = &event.assignment;
        for failure in &report.failures {
            stats.failures.fetch_add(1, Ordering::Relaxed);
            error!(
                kind = event.kind.label(),
                provider = %assignment.provider,
                assignment_id = %assignment.id,
                candidate = %assignment.candidate_id,
                %failure,
                "lifecycle follow-up failed"
            );
        }

        if report.created.is_empty() && report.retired.is_empty() && !report.notified {
            debug!(
                kind = event.kind.label(),
                assignment_id = %assignment.id,
                "no follow-up required"
            );
        } else {
            info!(
                kind = event.kind.label(),
                assignment_id = %assignment.id,
                created = report.created.len(),
                retired = report.retired.len(),
                notified = report.notified,
                "lifecycle follow-up applied"
            );
        }
    }
}

impl LifecycleListener for LifecycleOrchestrator {
    fn on_event(&self, event: &LifecycleEvent) {
        self.handle(event);
    }
}
