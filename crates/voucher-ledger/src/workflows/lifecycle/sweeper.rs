use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::events::{LifecycleEvent, LifecycleEventKind, UnitOfWork};
use crate::workflows::domain::{
    Assignment, AssignmentStatus, ProviderId, Resource, ResourceId, ResourceStatus,
};
use crate::workflows::store::StoreError;

/// A resource past its expiry together with the assignment that would be expired with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpiryCandidate {
    pub resource: Resource,
    pub assignment: Option<Assignment>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub selected: usize,
    pub resources_expired: usize,
    pub assignments_expired: usize,
    pub errors: usize,
}

/// Finalizes resources whose expiry has passed, one transaction per resource.
///
/// Safe to re-run: already terminal rows never match the selection predicate.
#[derive(Clone)]
pub struct ExpirySweeper {
    unit: UnitOfWork,
}

impl ExpirySweeper {
    pub fn new(unit: UnitOfWork) -> Self {
        Self { unit }
    }

    pub fn due_for_expiry(
        &self,
        now: DateTime<Utc>,
        provider: Option<&ProviderId>,
    ) -> Result<Vec<ExpiryCandidate>, StoreError> {
        let store = self.unit.store();
        store
            .expiry_candidates(now, provider)?
            .into_iter()
            .map(|resource| {
                let assignment = store.active_assignment_for_resource(resource.id)?;
                Ok(ExpiryCandidate {
                    resource,
                    assignment,
                })
            })
            .collect()
    }

    pub fn sweep(
        &self,
        now: DateTime<Utc>,
        provider: Option<&ProviderId>,
    ) -> Result<SweepReport, StoreError> {
        let selected = self.unit.store().expiry_candidates(now, provider)?;
        let mut report = SweepReport {
            selected: selected.len(),
            ..SweepReport::default()
        };

        for resource in selected {
            match self.expire_one(resource.id, now) {
                Ok(Some(expired_assignment)) => {
                    report.resources_expired += 1;
                    if expired_assignment {
                        report.assignments_expired += 1;
                    }
                }
                Ok(None) => {
                    debug!(resource_id = %resource.id, "resource changed before expiry; skipped")
                }
                Err(err) => {
                    report.errors += 1;
                    warn!(resource_id = %resource.id, error = %err, "failed to expire resource");
                }
            }
        }

        info!(
            provider = provider.map(ProviderId::as_str).unwrap_or("all"),
            selected = report.selected,
            resources_expired = report.resources_expired,
            assignments_expired = report.assignments_expired,
            errors = report.errors,
            "expiry sweep finished"
        );
        Ok(report)
    }

    /// Re-checks the predicate under the row lock. `None` means the row no longer qualified;
    /// otherwise the flag says whether an active assignment was expired with it.
    fn expire_one(&self, id: ResourceId, now: DateTime<Utc>) -> Result<Option<bool>, StoreError> {
        self.unit.run(|tx| {
            let mut resource = tx.lock_resource(id)?;
            if !resource.is_expired_at(now) {
                return Ok(None);
            }

            resource.status = ResourceStatus::Expired;
            tx.update_resource(resource)?;

            let Some(mut assignment) = tx.active_assignment_for_resource(id)? else {
                return Ok(Some(false));
            };
            assignment.status = AssignmentStatus::Expired;
            tx.update_assignment(assignment.clone())?;
            tx.queue_event(LifecycleEvent::new(
                LifecycleEventKind::Expired,
                assignment,
                None,
                now,
            ));
            Ok(Some(true))
        })
    }
}
