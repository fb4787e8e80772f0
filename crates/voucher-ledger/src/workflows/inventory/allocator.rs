use tracing::{debug, warn};

use crate::workflows::domain::{CandidateId, Resource, ResourceStatus, ServiceKey};
use crate::workflows::store::{StoreError, Transaction};

#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("no available resources for {0}; import more resources")]
    Exhausted(ServiceKey),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reserves exactly one available resource of a (provider, service code) pool per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceAllocator {
    key: ServiceKey,
}

impl ResourceAllocator {
    pub fn new(key: ServiceKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    /// Flips the lowest-id unlocked `Available` row to `Reserved` inside `tx`.
    ///
    /// Rows held by concurrent transactions are skipped rather than waited on, so the call
    /// fails immediately once nothing is left to take.
    pub fn allocate_for(
        &self,
        tx: &mut Transaction<'_>,
        candidate: &CandidateId,
    ) -> Result<Resource, AllocationError> {
        let Some(mut resource) = tx.lock_next_available(&self.key)? else {
            warn!(key = %self.key, %candidate, "resource pool exhausted");
            return Err(AllocationError::Exhausted(self.key.clone()));
        };

        resource.status = ResourceStatus::Reserved;
        tx.update_resource(resource.clone())?;
        debug!(key = %self.key, %candidate, resource_id = %resource.id, "resource reserved");

        Ok(resource)
    }
}
