use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::events::LifecycleEvent;
use super::tasks::{NewTaskAssignment, TaskAssignmentId, TaskService, TaskServiceError};
use crate::workflows::domain::ProviderId;

/// Task names a provider wants created or retired in reaction to lifecycle events.
///
/// Only `tasks_on_assigned` is mandatory; every other hook defaults to doing nothing.
pub trait FollowUpPolicy: Send + Sync {
    fn provider(&self) -> ProviderId;

    fn tasks_on_assigned(&self, event: &LifecycleEvent) -> Vec<String>;

    fn tasks_on_redeemed(&self, _event: &LifecycleEvent) -> Vec<String> {
        Vec::new()
    }

    fn tasks_on_reassigned(&self, _event: &LifecycleEvent) -> Vec<String> {
        Vec::new()
    }

    fn tasks_on_expired(&self, _event: &LifecycleEvent) -> Vec<String> {
        Vec::new()
    }

    /// Template sent to the candidate once an assignment commits.
    fn notification_on_assigned(&self) -> Option<&str> {
        None
    }

    /// Expiry extension point. The default creates whatever `tasks_on_expired` names.
    fn handle_expired(
        &self,
        event: &LifecycleEvent,
        tasks: &dyn TaskService,
    ) -> Result<FollowUpOutcome, TaskServiceError> {
        let mut outcome = FollowUpOutcome::default();
        for task_name in self.tasks_on_expired(event) {
            let created = tasks.create(NewTaskAssignment {
                candidate_id: event.assignment.candidate_id.clone(),
                task_name,
                source_assignment: event.assignment.id,
            })?;
            outcome.created.push(created.id);
        }
        Ok(outcome)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FollowUpOutcome {
    pub created: Vec<TaskAssignmentId>,
    pub retired: Vec<TaskAssignmentId>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PolicyRegistryError {
    #[error("more than one follow-up policy registered for provider {0}")]
    DuplicateProvider(ProviderId),
    #[error("no follow-up policy registered for provider {0}")]
    MissingPolicy(ProviderId),
}

/// Collects policies at startup; a second policy for the same provider is rejected.
#[derive(Default)]
pub struct PolicyRegistryBuilder {
    policies: HashMap<ProviderId, Arc<dyn FollowUpPolicy>>,
}

impl PolicyRegistryBuilder {
    pub fn register(
        mut self,
        policy: Arc<dyn FollowUpPolicy>,
    ) -> Result<Self, PolicyRegistryError> {
        let provider = policy.provider();
        if self.policies.contains_key(&provider) {
            return Err(PolicyRegistryError::DuplicateProvider(provider));
        }
        self.policies.insert(provider, policy);
        Ok(self)
    }

    pub fn build(self) -> PolicyRegistry {
        PolicyRegistry {
            policies: self.policies,
        }
    }
}

/// Immutable provider-to-policy map shared by reference after startup.
pub struct PolicyRegistry {
    policies: HashMap<ProviderId, Arc<dyn FollowUpPolicy>>,
}

impl PolicyRegistry {
    pub fn builder() -> PolicyRegistryBuilder {
        PolicyRegistryBuilder::default()
    }

    pub fn new(
        policies: impl IntoIterator<Item = Arc<dyn FollowUpPolicy>>,
    ) -> Result<Self, PolicyRegistryError> {
        policies
            .into_iter()
            .try_fold(Self::builder(), PolicyRegistryBuilder::register)
            .map(PolicyRegistryBuilder::build)
    }

    pub fn for_provider(
        &self,
        provider: &ProviderId,
    ) -> Result<&dyn FollowUpPolicy, PolicyRegistryError> {
        self.policies
            .get(provider)
            .map(|policy| policy.as_ref())
            .ok_or_else(|| PolicyRegistryError::MissingPolicy(provider.clone()))
    }

    pub fn contains(&self, provider: &ProviderId) -> bool {
        self.policies.contains_key(provider)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl std::fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers: Vec<&str> = self.policies.keys().map(ProviderId::as_str).collect();
        providers.sort_unstable();
        f.debug_struct("PolicyRegistry")
            .field("providers", &providers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl FollowUpPolicy for Fixed {
        fn provider(&self) -> ProviderId {
            ProviderId::new(self.0)
        }

        fn tasks_on_assigned(&self, _event: &LifecycleEvent) -> Vec<String> {
            vec!["onboard".to_string()]
        }
    }

    #[test]
    fn duplicate_provider_is_rejected_at_construction() {
        let policies: Vec<Arc<dyn FollowUpPolicy>> =
            vec![Arc::new(Fixed("accredit")), Arc::new(Fixed("accredit"))];
        let err = PolicyRegistry::new(policies).expect_err("duplicate must fail");
        assert_eq!(
            err,
            PolicyRegistryError::DuplicateProvider(ProviderId::new("accredit"))
        );
    }

    #[test]
    fn lookups_resolve_registered_providers_only() {
        let registry = PolicyRegistry::builder()
            .register(Arc::new(Fixed("accredit")))
            .and_then(|builder| builder.register(Arc::new(Fixed("langcert"))))
            .expect("distinct providers")
            .build();

        assert_eq!(registry.len(), 2);
        assert!(registry.for_provider(&ProviderId::new("langcert")).is_ok());
        assert!(matches!(
            registry.for_provider(&ProviderId::new("unknown")),
            Err(PolicyRegistryError::MissingPolicy(_))
        ));
    }
}
