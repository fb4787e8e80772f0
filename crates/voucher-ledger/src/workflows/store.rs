//! In-memory resource store honoring the ledger's locking contract.
//!
//! Rows are protected by logical row locks owned by a [`Transaction`]. Allocation takes the
//! lowest-id available row that nobody else holds (skip-locked), every other write path waits
//! for the row the way `SELECT ... FOR UPDATE` would. Staged writes become visible only when
//! [`Transaction::commit`] succeeds; dropping a transaction rolls it back.
//!
//! Lifecycle events join the store's outbox in the same critical section that applies the
//! writes, so outbox order is commit order. [`LedgerStore::drain_committed`] hands them out
//! in that order.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use super::domain::{
    Assignment, AssignmentId, AssignmentStatus, CandidateId, NewAssignment, NewResource,
    ProviderId, Resource, ResourceId, ResourceStatus, ServiceCode, ServiceKey,
};
use super::lifecycle::events::LifecycleEvent;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("resource code {code} already exists for provider {provider}")]
    DuplicateCode { provider: ProviderId, code: String },
    #[error("resource {0} already has an active assignment")]
    ResourceAlreadyAssigned(ResourceId),
    #[error("candidate {candidate} already holds an active {key} assignment")]
    CandidateAlreadyAssigned {
        candidate: CandidateId,
        key: ServiceKey,
    },
    #[error("resource {0} not found")]
    ResourceNotFound(ResourceId),
    #[error("assignment {0} not found")]
    AssignmentNotFound(AssignmentId),
    #[error("resource {0} is not locked by this transaction")]
    NotLocked(ResourceId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

type TxId = u64;

#[derive(Debug, Default)]
struct StoreState {
    resources: BTreeMap<ResourceId, Resource>,
    codes: HashMap<(ProviderId, String), ResourceId>,
    assignments: BTreeMap<AssignmentId, Assignment>,
    row_locks: HashMap<ResourceId, TxId>,
    outbox: VecDeque<LifecycleEvent>,
}

#[derive(Debug, Default)]
pub struct LedgerStore {
    state: Mutex<StoreState>,
    released: Condvar,
    delivery: Mutex<()>,
    next_tx: AtomicU64,
    next_resource: AtomicU64,
    next_assignment: AtomicU64,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> Transaction<'_> {
        Transaction {
            store: self,
            id: self.next_tx.fetch_add(1, Ordering::Relaxed) + 1,
            locked: HashSet::new(),
            resource_writes: BTreeMap::new(),
            inserted_resources: Vec::new(),
            assignment_writes: BTreeMap::new(),
            events: Vec::new(),
            finished: false,
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("store mutex poisoned".to_string()))
    }

    pub fn resource(&self, id: ResourceId) -> Result<Option<Resource>, StoreError> {
        Ok(self.lock_state()?.resources.get(&id).cloned())
    }

    pub fn resource_by_code(
        &self,
        provider: &ProviderId,
        code: &str,
    ) -> Result<Option<Resource>, StoreError> {
        let state = self.lock_state()?;
        Ok(state
            .codes
            .get(&(provider.clone(), code.to_string()))
            .and_then(|id| state.resources.get(id))
            .cloned())
    }

    pub fn contains_code(&self, provider: &ProviderId, code: &str) -> Result<bool, StoreError> {
        let state = self.lock_state()?;
        Ok(state
            .codes
            .contains_key(&(provider.clone(), code.to_string())))
    }

    /// Committed `Available` rows for the key in id order.
    pub fn available(&self, key: &ServiceKey) -> Result<Vec<Resource>, StoreError> {
        let state = self.lock_state()?;
        Ok(state
            .resources
            .values()
            .filter(|resource| {
                resource.provider == key.provider
                    && resource.service_code == key.service_code
                    && resource.status == ResourceStatus::Available
            })
            .cloned()
            .collect())
    }

    pub fn available_count(
        &self,
        provider: &ProviderId,
        service_code: Option<ServiceCode>,
    ) -> Result<usize, StoreError> {
        let state = self.lock_state()?;
        Ok(state
            .resources
            .values()
            .filter(|resource| {
                &resource.provider == provider
                    && service_code.map_or(true, |code| resource.service_code == code)
                    && resource.status == ResourceStatus::Available
            })
            .count())
    }

    pub fn assignment(&self, id: AssignmentId) -> Result<Option<Assignment>, StoreError> {
        Ok(self.lock_state()?.assignments.get(&id).cloned())
    }

    pub fn assignments_for_candidate(
        &self,
        candidate: &CandidateId,
    ) -> Result<Vec<Assignment>, StoreError> {
        let state = self.lock_state()?;
        Ok(state
            .assignments
            .values()
            .filter(|assignment| &assignment.candidate_id == candidate)
            .cloned()
            .collect())
    }

    pub fn active_assignment_for_resource(
        &self,
        id: ResourceId,
    ) -> Result<Option<Assignment>, StoreError> {
        let state = self.lock_state()?;
        Ok(state
            .assignments
            .values()
            .find(|assignment| assignment.resource_id == id && assignment.is_active())
            .cloned())
    }

    /// Drains every committed event and passes the batch to `deliver`.
    ///
    /// Drainers take turns on the delivery gate and `deliver` runs while the gate is held, so
    /// a batch committed later is never delivered ahead of an earlier one.
    pub fn drain_committed(
        &self,
        deliver: impl FnOnce(Vec<LifecycleEvent>),
    ) -> Result<usize, StoreError> {
        let _gate = self.delivery.lock().unwrap_or_else(PoisonError::into_inner);
        let events: Vec<LifecycleEvent> = self.lock_state()?.outbox.drain(..).collect();
        let count = events.len();
        if count > 0 {
            deliver(events);
        }
        Ok(count)
    }

    pub fn pending_events(&self) -> Result<usize, StoreError> {
        Ok(self.lock_state()?.outbox.len())
    }

    /// Rows whose expiry has passed and that are not already terminal.
    pub fn expiry_candidates(
        &self,
        now: DateTime<Utc>,
        provider: Option<&ProviderId>,
    ) -> Result<Vec<Resource>, StoreError> {
        let state = self.lock_state()?;
        Ok(state
            .resources
            .values()
            .filter(|resource| provider.map_or(true, |provider| &resource.provider == provider))
            .filter(|resource| resource.is_expired_at(now))
            .cloned()
            .collect())
    }
}

/// Unit of staged writes plus the row locks that guard them.
#[derive(Debug)]
pub struct Transaction<'s> {
    store: &'s LedgerStore,
    id: TxId,
    locked: HashSet<ResourceId>,
    resource_writes: BTreeMap<ResourceId, Resource>,
    inserted_resources: Vec<Resource>,
    assignment_writes: BTreeMap<AssignmentId, Assignment>,
    events: Vec<LifecycleEvent>,
    finished: bool,
}

impl<'s> Transaction<'s> {
    /// Locks the lowest-id available row for `key`, skipping rows other transactions hold.
    ///
    /// Rows already past their expiry are left for the sweep. Never waits: `None` means the
    /// pool is exhausted or every remaining row is in flight.
    pub fn lock_next_available(
        &mut self,
        key: &ServiceKey,
    ) -> Result<Option<Resource>, StoreError> {
        let store = self.store;
        let now = Utc::now();
        let mut state = store.lock_state()?;
        let candidate = state
            .resources
            .values()
            .find(|resource| {
                resource.provider == key.provider
                    && resource.service_code == key.service_code
                    && resource.status == ResourceStatus::Available
                    && !resource.is_expired_at(now)
                    && !state.row_locks.contains_key(&resource.id)
            })
            .cloned();

        if let Some(resource) = &candidate {
            state.row_locks.insert(resource.id, self.id);
            self.locked.insert(resource.id);
        }

        Ok(candidate)
    }

    /// Locks a specific row, waiting while another transaction holds it.
    pub fn lock_resource(&mut self, id: ResourceId) -> Result<Resource, StoreError> {
        if self.locked.contains(&id) {
            return self.resource(id)?.ok_or(StoreError::ResourceNotFound(id));
        }

        let store = self.store;
        let mut state = store.lock_state()?;
        loop {
            let resource = state
                .resources
                .get(&id)
                .cloned()
                .ok_or(StoreError::ResourceNotFound(id))?;

            if !state.row_locks.contains_key(&id) {
                state.row_locks.insert(id, self.id);
                self.locked.insert(id);
                return Ok(resource);
            }

            state = store
                .released
                .wait(state)
                .map_err(|_| StoreError::Unavailable("store mutex poisoned".to_string()))?;
        }
    }

    pub fn resource(&self, id: ResourceId) -> Result<Option<Resource>, StoreError> {
        if let Some(staged) = self.resource_writes.get(&id) {
            return Ok(Some(staged.clone()));
        }
        self.store.resource(id)
    }

    pub fn update_resource(&mut self, resource: Resource) -> Result<(), StoreError> {
        if !self.locked.contains(&resource.id) {
            return Err(StoreError::NotLocked(resource.id));
        }
        self.resource_writes.insert(resource.id, resource);
        Ok(())
    }

    pub fn insert_resource(&mut self, new: NewResource) -> Resource {
        let id = ResourceId(self.store.next_resource.fetch_add(1, Ordering::Relaxed) + 1);
        let resource = Resource {
            id,
            provider: new.provider,
            service_code: new.service_code,
            code: new.code,
            status: new.status,
            sent_at: new.sent_at,
            expires_at: new.expires_at,
            created_at: Utc::now(),
        };
        self.inserted_resources.push(resource.clone());
        resource
    }

    /// Records a new active assignment; the resource row must be locked by this transaction.
    pub fn insert_assignment(&mut self, new: NewAssignment) -> Result<Assignment, StoreError> {
        if !self.locked.contains(&new.resource.id) {
            return Err(StoreError::NotLocked(new.resource.id));
        }

        let id = AssignmentId(self.store.next_assignment.fetch_add(1, Ordering::Relaxed) + 1);
        let assignment = Assignment {
            id,
            provider: new.resource.provider.clone(),
            service_code: new.resource.service_code,
            resource_id: new.resource.id,
            resource_code: new.resource.code.clone(),
            candidate_id: new.candidate_id,
            assigned_by: new.assigned_by,
            status: AssignmentStatus::Assigned,
            assigned_at: new.assigned_at,
            created_at: Utc::now(),
        };
        self.assignment_writes.insert(id, assignment.clone());
        Ok(assignment)
    }

    /// Assignments are guarded by the lock on the resource they reference.
    pub fn update_assignment(&mut self, assignment: Assignment) -> Result<(), StoreError> {
        if !self.locked.contains(&assignment.resource_id) {
            return Err(StoreError::NotLocked(assignment.resource_id));
        }
        self.assignment_writes.insert(assignment.id, assignment);
        Ok(())
    }

    pub fn assignment(&self, id: AssignmentId) -> Result<Option<Assignment>, StoreError> {
        if let Some(staged) = self.assignment_writes.get(&id) {
            return Ok(Some(staged.clone()));
        }
        self.store.assignment(id)
    }

    pub fn active_assignment_for_resource(
        &self,
        id: ResourceId,
    ) -> Result<Option<Assignment>, StoreError> {
        self.find_assignment(|assignment| assignment.resource_id == id && assignment.is_active())
    }

    pub fn active_assignment_for_candidate(
        &self,
        candidate: &CandidateId,
        key: &ServiceKey,
    ) -> Result<Option<Assignment>, StoreError> {
        self.find_assignment(|assignment| {
            &assignment.candidate_id == candidate
                && &assignment.key() == key
                && assignment.is_active()
        })
    }

    fn find_assignment(
        &self,
        predicate: impl Fn(&Assignment) -> bool,
    ) -> Result<Option<Assignment>, StoreError> {
        if let Some(staged) = self.assignment_writes.values().find(|a| predicate(a)) {
            return Ok(Some(staged.clone()));
        }
        let state = self.store.lock_state()?;
        Ok(state
            .assignments
            .values()
            .filter(|assignment| !self.assignment_writes.contains_key(&assignment.id))
            .find(|assignment| predicate(assignment))
            .cloned())
    }

    /// Queues an event for delivery once this transaction has committed.
    pub fn queue_event(&mut self, event: LifecycleEvent) {
        self.events.push(event);
    }

    /// Applies every staged write atomically and appends the queued events to the outbox.
    pub fn commit(mut self) -> Result<(), StoreError> {
        let outcome = {
            let mut state = self.store.lock_state()?;
            let outcome = self.validate(&state).map(|()| self.apply(&mut state));
            release_locks(&mut state, self.id);
            outcome
        };
        self.finished = true;
        self.store.released.notify_all();

        outcome
    }

    pub fn rollback(self) {}

    fn validate(&self, state: &StoreState) -> Result<(), StoreError> {
        let mut batch_codes = HashSet::new();
        for resource in &self.inserted_resources {
            let code_key = (resource.provider.clone(), resource.code.clone());
            if state.codes.contains_key(&code_key) || !batch_codes.insert(code_key) {
                return Err(StoreError::DuplicateCode {
                    provider: resource.provider.clone(),
                    code: resource.code.clone(),
                });
            }
        }

        for written in self.assignment_writes.values().filter(|a| a.is_active()) {
            for other in self
                .merged_assignments(state)
                .filter(|other| other.id != written.id && other.is_active())
            {
                if other.resource_id == written.resource_id {
                    return Err(StoreError::ResourceAlreadyAssigned(written.resource_id));
                }
                if other.candidate_id == written.candidate_id && other.key() == written.key() {
                    return Err(StoreError::CandidateAlreadyAssigned {
                        candidate: written.candidate_id.clone(),
                        key: written.key(),
                    });
                }
            }
        }

        Ok(())
    }

    fn merged_assignments<'a>(
        &'a self,
        state: &'a StoreState,
    ) -> impl Iterator<Item = &'a Assignment> + 'a {
        state
            .assignments
            .values()
            .filter(move |assignment| !self.assignment_writes.contains_key(&assignment.id))
            .chain(self.assignment_writes.values())
    }

    fn apply(&mut self, state: &mut StoreState) {
        for resource in self.inserted_resources.drain(..) {
            state
                .codes
                .insert((resource.provider.clone(), resource.code.clone()), resource.id);
            state.resources.insert(resource.id, resource);
        }
        for (id, resource) in std::mem::take(&mut self.resource_writes) {
            state.resources.insert(id, resource);
        }
        for (id, assignment) in std::mem::take(&mut self.assignment_writes) {
            state.assignments.insert(id, assignment);
        }
        state.outbox.extend(self.events.drain(..));
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self
            .store
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        release_locks(&mut state, self.id);
        drop(state);
        self.store.released.notify_all();
    }
}

fn release_locks(state: &mut StoreState, tx: TxId) {
    state.row_locks.retain(|_, holder| *holder != tx);
}
