use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use super::people::{ActorDirectory, CandidateDirectory};
use crate::workflows::directory::{ServiceBinding, ServiceDirectory};
use crate::workflows::domain::{
    ActorId, Assignment, AssignmentId, AssignmentStatus, CandidateId, CandidateListId,
    NewAssignment, ProviderId, Resource, ResourceStatus, ServiceKey,
};
use crate::workflows::inventory::AllocationError;
use crate::workflows::lifecycle::{LifecycleEvent, LifecycleEventKind, UnitOfWork};
use crate::workflows::store::{StoreError, Transaction};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("{0}")]
    NoSuchObject(String),
    #[error("an identified acting user is required")]
    InvalidSession,
    #[error("candidate {candidate} already holds an active {key} assignment; reassign instead")]
    AlreadyAssigned {
        candidate: CandidateId,
        key: ServiceKey,
    },
    #[error("assignment {id} is {from}; cannot move to {to}")]
    InvalidTransition {
        id: AssignmentId,
        from: &'static str,
        to: &'static str,
    },
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::CandidateAlreadyAssigned { candidate, key } => {
                Self::AlreadyAssigned { candidate, key }
            }
            other => Self::Store(other),
        }
    }
}

impl From<AllocationError> for LedgerError {
    fn from(value: AllocationError) -> Self {
        match value {
            exhausted @ AllocationError::Exhausted(_) => Self::NoSuchObject(exhausted.to_string()),
            AllocationError::Store(err) => err.into(),
        }
    }
}

/// Per-member outcome of a list assignment; members never affect each other.
#[derive(Debug)]
pub struct MemberOutcome {
    pub candidate_id: CandidateId,
    pub result: Result<Assignment, LedgerError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberOutcomeView {
    pub candidate_id: CandidateId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment: Option<Assignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&MemberOutcome> for MemberOutcomeView {
    fn from(value: &MemberOutcome) -> Self {
        let (assignment, error) = match &value.result {
            Ok(assignment) => (Some(assignment.clone()), None),
            Err(err) => (None, Some(err.to_string())),
        };
        Self {
            candidate_id: value.candidate_id.clone(),
            assignment,
            error,
        }
    }
}

/// Records who holds which resource. Every write commits before its events are dispatched.
#[derive(Clone)]
pub struct AssignmentLedger {
    unit: UnitOfWork,
    directory: Arc<ServiceDirectory>,
    candidates: Arc<dyn CandidateDirectory>,
    actors: Arc<dyn ActorDirectory>,
}

impl AssignmentLedger {
    pub fn new(
        unit: UnitOfWork,
        directory: Arc<ServiceDirectory>,
        candidates: Arc<dyn CandidateDirectory>,
        actors: Arc<dyn ActorDirectory>,
    ) -> Self {
        Self {
            unit,
            directory,
            candidates,
            actors,
        }
    }

    /// Reserves a resource and records the assignment in one transaction.
    pub fn assign_to_candidate(
        &self,
        key: &ServiceKey,
        candidate: &CandidateId,
        actor: Option<&ActorId>,
    ) -> Result<Assignment, LedgerError> {
        let actor = self.resolve_actor(actor)?;
        let binding = self.binding(key)?;
        self.ensure_candidate(candidate)?;

        let assignment = self.unit.run(|tx| {
            if tx.active_assignment_for_candidate(candidate, key)?.is_some() {
                return Err(LedgerError::AlreadyAssigned {
                    candidate: candidate.clone(),
                    key: key.clone(),
                });
            }
            let assignment = record_assignment(tx, binding, candidate, &actor)?;
            tx.queue_event(LifecycleEvent::new(
                LifecycleEventKind::Assigned,
                assignment.clone(),
                Some(actor.clone()),
                assignment.assigned_at,
            ));
            Ok(assignment)
        })?;

        info!(
            key = %key,
            %candidate,
            assignment_id = %assignment.id,
            resource_code = %assignment.resource_code,
            actor = %actor,
            "resource assigned"
        );
        Ok(assignment)
    }

    /// Assigns to every list member independently: one member's failure leaves the others'
    /// committed assignments in place.
    pub fn assign_to_list(
        &self,
        key: &ServiceKey,
        list: &CandidateListId,
        actor: Option<&ActorId>,
    ) -> Result<Vec<MemberOutcome>, LedgerError> {
        let actor = self.resolve_actor(actor)?;
        self.binding(key)?;
        let members = self
            .candidates
            .list_members(list)
            .ok_or_else(|| LedgerError::NoSuchObject(format!("candidate list {list} not found")))?;

        let outcomes: Vec<MemberOutcome> = members
            .into_iter()
            .map(|candidate_id| {
                let result = self.assign_to_candidate(key, &candidate_id, Some(&actor));
                MemberOutcome {
                    candidate_id,
                    result,
                }
            })
            .collect();

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        info!(
            key = %key,
            %list,
            assigned = outcomes.len() - failed,
            failed,
            "list assignment finished"
        );
        Ok(outcomes)
    }

    /// Only a reserved or sent resource can be redeemed.
    pub fn redeem(
        &self,
        id: AssignmentId,
        actor: Option<&ActorId>,
    ) -> Result<Assignment, LedgerError> {
        let actor = self.resolve_actor(actor)?;

        let assignment = self.unit.run(|tx| {
            let (mut assignment, mut resource) = lock_assignment(tx, id)?;
            require_active(&assignment, AssignmentStatus::Redeemed.label())?;
            if !matches!(resource.status, ResourceStatus::Reserved | ResourceStatus::Sent) {
                return Err(LedgerError::InvalidTransition {
                    id,
                    from: resource.status.label(),
                    to: ResourceStatus::Redeemed.label(),
                });
            }

            assignment.status = AssignmentStatus::Redeemed;
            resource.status = ResourceStatus::Redeemed;
            tx.update_resource(resource)?;
            tx.update_assignment(assignment.clone())?;
            tx.queue_event(LifecycleEvent::new(
                LifecycleEventKind::Redeemed,
                assignment.clone(),
                Some(actor.clone()),
                Utc::now(),
            ));
            Ok::<_, LedgerError>(assignment)
        })?;

        info!(assignment_id = %id, actor = %actor, "assignment redeemed");
        Ok(assignment)
    }

    /// Moves the assigned resource from reserved to sent. Repeating the call is a no-op.
    pub fn mark_sent(
        &self,
        id: AssignmentId,
        actor: Option<&ActorId>,
    ) -> Result<Resource, LedgerError> {
        let actor = self.resolve_actor(actor)?;

        let resource = self.unit.run(|tx| {
            let (assignment, mut resource) = lock_assignment(tx, id)?;
            require_active(&assignment, ResourceStatus::Sent.label())?;

            match resource.status {
                ResourceStatus::Sent => return Ok(resource),
                ResourceStatus::Reserved => {}
                other => {
                    return Err(LedgerError::InvalidTransition {
                        id,
                        from: other.label(),
                        to: ResourceStatus::Sent.label(),
                    })
                }
            }

            resource.status = ResourceStatus::Sent;
            resource.sent_at = Some(Utc::now());
            tx.update_resource(resource.clone())?;
            Ok::<_, LedgerError>(resource)
        })?;

        info!(
            assignment_id = %id,
            resource_code = %resource.code,
            actor = %actor,
            "resource sent"
        );
        Ok(resource)
    }

    /// Supersedes the candidate's active assignment for `key` with a freshly allocated one.
    ///
    /// Emits `Reassigned` for the old assignment followed by `Assigned` for the new one.
    pub fn reassign(
        &self,
        key: &ServiceKey,
        candidate: &CandidateId,
        actor: Option<&ActorId>,
    ) -> Result<Assignment, LedgerError> {
        let actor = self.resolve_actor(actor)?;
        let binding = self.binding(key)?;
        self.ensure_candidate(candidate)?;

        let (previous, assignment) = self.unit.run(|tx| {
            let current = tx
                .active_assignment_for_candidate(candidate, key)?
                .ok_or_else(|| {
                    LedgerError::NoSuchObject(format!(
                        "candidate {candidate} has no active {key} assignment to reassign"
                    ))
                })?;
            let (mut previous, _) = lock_assignment(tx, current.id)?;
            require_active(&previous, AssignmentStatus::Reassigned.label())?;

            previous.status = AssignmentStatus::Reassigned;
            tx.update_assignment(previous.clone())?;
            let assignment = record_assignment(tx, binding, candidate, &actor)?;

            tx.queue_event(LifecycleEvent::new(
                LifecycleEventKind::Reassigned,
                previous.clone(),
                Some(actor.clone()),
                assignment.assigned_at,
            ));
            tx.queue_event(LifecycleEvent::new(
                LifecycleEventKind::Assigned,
                assignment.clone(),
                Some(actor.clone()),
                assignment.assigned_at,
            ));
            Ok::<_, LedgerError>((previous, assignment))
        })?;

        info!(
            key = %key,
            %candidate,
            previous = %previous.id,
            assignment_id = %assignment.id,
            resource_code = %assignment.resource_code,
            actor = %actor,
            "resource reassigned"
        );
        Ok(assignment)
    }

    /// Administrative status change outside the normal lifecycle. Assignments are left as-is.
    pub fn override_status(
        &self,
        provider: &ProviderId,
        code: &str,
        status: ResourceStatus,
        actor: Option<&ActorId>,
    ) -> Result<Resource, LedgerError> {
        let actor = self.resolve_actor(actor)?;
        let code = code.trim();
        let existing = self
            .unit
            .store()
            .resource_by_code(provider, code)?
            .ok_or_else(|| {
                LedgerError::NoSuchObject(format!("resource {code} not found for {provider}"))
            })?;

        let (previous, resource) = self.unit.run(|tx| {
            let mut resource = tx.lock_resource(existing.id)?;
            let previous = resource.status;
            resource.status = status;
            if status == ResourceStatus::Sent && resource.sent_at.is_none() {
                resource.sent_at = Some(Utc::now());
            }
            tx.update_resource(resource.clone())?;
            Ok::<_, LedgerError>((previous, resource))
        })?;

        warn!(
            %provider,
            resource_code = %resource.code,
            from = previous.label(),
            to = status.label(),
            actor = %actor,
            "resource status overridden"
        );
        Ok(resource)
    }

    /// Missing and unknown actors are both an invalid session.
    pub fn resolve_actor(&self, actor: Option<&ActorId>) -> Result<ActorId, LedgerError> {
        let actor = actor.ok_or(LedgerError::InvalidSession)?;
        self.actors
            .find(actor)
            .map(|found| found.id)
            .ok_or(LedgerError::InvalidSession)
    }

    fn binding(&self, key: &ServiceKey) -> Result<&ServiceBinding, LedgerError> {
        self.directory
            .binding(key)
            .ok_or_else(|| LedgerError::NoSuchObject(format!("no service registered for {key}")))
    }

    fn ensure_candidate(&self, candidate: &CandidateId) -> Result<(), LedgerError> {
        self.candidates
            .find(candidate)
            .map(|_| ())
            .ok_or_else(|| LedgerError::NoSuchObject(format!("candidate {candidate} not found")))
    }
}

fn record_assignment(
    tx: &mut Transaction<'_>,
    binding: &ServiceBinding,
    candidate: &CandidateId,
    actor: &ActorId,
) -> Result<Assignment, LedgerError> {
    let resource = binding.allocator().allocate_for(tx, candidate)?;
    let assignment = tx.insert_assignment(NewAssignment {
        resource,
        candidate_id: candidate.clone(),
        assigned_by: actor.clone(),
        assigned_at: Utc::now(),
    })?;
    Ok(assignment)
}

/// Locks the assignment's resource row, then re-reads the assignment under that lock.
fn lock_assignment(
    tx: &mut Transaction<'_>,
    id: AssignmentId,
) -> Result<(Assignment, Resource), LedgerError> {
    let not_found = || LedgerError::NoSuchObject(format!("assignment {id} not found"));
    let resource_id = tx.assignment(id)?.ok_or_else(not_found)?.resource_id;
    let resource = tx.lock_resource(resource_id)?;
    let assignment = tx.assignment(id)?.ok_or_else(not_found)?;
    Ok((assignment, resource))
}

fn require_active(assignment: &Assignment, to: &'static str) -> Result<(), LedgerError> {
    if assignment.is_active() {
        return Ok(());
    }
    Err(LedgerError::InvalidTransition {
        id: assignment.id,
        from: assignment.status.label(),
        to,
    })
}
