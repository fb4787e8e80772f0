use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::workflows::domain::{
    Assignment, CandidateId, ProviderId, Resource, ServiceCode, ServiceKey,
};
use crate::workflows::inventory::{ClassificationRule, InventoryImporter, ResourceAllocator};
use crate::workflows::lifecycle::PolicyRegistry;
use crate::workflows::store::{LedgerStore, StoreError};

/// What a provider contributes to the directory: its service codes and code-prefix rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderProfile {
    pub provider: ProviderId,
    pub service_codes: Vec<ServiceCode>,
    pub classification: ClassificationRule,
}

impl ProviderProfile {
    pub fn new(
        provider: impl Into<String>,
        service_codes: &[ServiceCode],
        prefixes: &[(&str, ServiceCode)],
    ) -> Self {
        Self {
            provider: ProviderId::new(provider),
            service_codes: service_codes.to_vec(),
            classification: ClassificationRule::new(prefixes),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("provider {0} is configured more than once")]
    DuplicateProvider(ProviderId),
    #[error("provider {0} declares no service codes")]
    EmptyProfile(ProviderId),
    #[error("provider {0} has no follow-up policy")]
    MissingPolicy(ProviderId),
}

/// Allocator and importer serving one (provider, service code) pool.
#[derive(Debug, Clone)]
pub struct ServiceBinding {
    allocator: ResourceAllocator,
    importer: InventoryImporter,
}

impl ServiceBinding {
    pub fn allocator(&self) -> &ResourceAllocator {
        &self.allocator
    }

    pub fn importer(&self) -> &InventoryImporter {
        &self.importer
    }
}

/// Immutable lookup from (provider, service code) to its binding, built once at startup.
#[derive(Debug)]
pub struct ServiceDirectory {
    bindings: HashMap<ServiceKey, ServiceBinding>,
    providers: BTreeMap<ProviderId, Vec<ServiceCode>>,
}

impl ServiceDirectory {
    pub fn new(profiles: impl IntoIterator<Item = ProviderProfile>) -> Result<Self, DirectoryError> {
        let mut bindings = HashMap::new();
        let mut providers = BTreeMap::new();

        for profile in profiles {
            if providers.contains_key(&profile.provider) {
                return Err(DirectoryError::DuplicateProvider(profile.provider));
            }
            if profile.service_codes.is_empty() {
                return Err(DirectoryError::EmptyProfile(profile.provider));
            }

            for service_code in &profile.service_codes {
                let key = ServiceKey {
                    provider: profile.provider.clone(),
                    service_code: *service_code,
                };
                bindings.insert(
                    key.clone(),
                    ServiceBinding {
                        allocator: ResourceAllocator::new(key.clone()),
                        importer: InventoryImporter::new(key, profile.classification.clone()),
                    },
                );
            }
            providers.insert(profile.provider, profile.service_codes);
        }

        Ok(Self {
            bindings,
            providers,
        })
    }

    /// `None` means the pairing is unknown; callers report it as a missing object.
    pub fn for_provider_and_service_code(
        &self,
        provider: &ProviderId,
        service_code: ServiceCode,
    ) -> Option<&ServiceBinding> {
        self.bindings.get(&ServiceKey {
            provider: provider.clone(),
            service_code,
        })
    }

    pub fn binding(&self, key: &ServiceKey) -> Option<&ServiceBinding> {
        self.bindings.get(key)
    }

    pub fn service_codes(&self, provider: &ProviderId) -> Option<&[ServiceCode]> {
        self.providers.get(provider).map(Vec::as_slice)
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderId> {
        self.providers.keys()
    }

    /// Every configured provider must have a policy, or lifecycle events would be dropped.
    pub fn ensure_policies(&self, registry: &PolicyRegistry) -> Result<(), DirectoryError> {
        match self
            .providers
            .keys()
            .find(|provider| !registry.contains(provider))
        {
            Some(provider) => Err(DirectoryError::MissingPolicy(provider.clone())),
            None => Ok(()),
        }
    }
}

/// Read-only queries over the ledger.
#[derive(Debug, Clone)]
pub struct QueryFacade {
    store: Arc<LedgerStore>,
}

impl QueryFacade {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        Self { store }
    }

    pub fn resource_by_code(
        &self,
        provider: &ProviderId,
        code: &str,
    ) -> Result<Option<Resource>, StoreError> {
        self.store.resource_by_code(provider, code.trim())
    }

    pub fn available(&self, key: &ServiceKey) -> Result<Vec<Resource>, StoreError> {
        self.store.available(key)
    }

    pub fn available_count(
        &self,
        provider: &ProviderId,
        service_code: Option<ServiceCode>,
    ) -> Result<usize, StoreError> {
        self.store.available_count(provider, service_code)
    }

    /// Assignment history across every provider, most recent first.
    pub fn list_for_candidate(&self, candidate: &CandidateId) -> Result<Vec<Assignment>, StoreError> {
        let mut assignments = self.store.assignments_for_candidate(candidate)?;
        assignments.sort_by(|a, b| {
            b.assigned_at
                .cmp(&a.assigned_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(assignments)
    }
}
