use std::io::Read;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::workflows::assignments::{ActorDirectory, AssignmentLedger, CandidateDirectory};
use crate::workflows::directory::{DirectoryError, QueryFacade, ServiceBinding, ServiceDirectory};
use crate::workflows::domain::ServiceKey;
use crate::workflows::inventory::{ImportError, ImportSummary};
use crate::workflows::lifecycle::{
    ChannelDispatcher, EventDispatcher, ExpirySweeper, InlineDispatcher, LifecycleOrchestrator,
    NotificationDispatcher, PolicyRegistry, PolicyRegistryError, TaskService, UnitOfWork,
};
use crate::workflows::providers::ProviderCatalogue;
use crate::workflows::store::LedgerStore;

/// External systems the ledger talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub candidates: Arc<dyn CandidateDirectory>,
    pub actors: Arc<dyn ActorDirectory>,
    pub tasks: Arc<dyn TaskService>,
    pub notifications: Arc<dyn NotificationDispatcher>,
}

/// Misconfiguration that must stop the process before it serves anything.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Policy(#[from] PolicyRegistryError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Listeners run on the committing thread right after commit.
    Inline,
    /// Listeners run on a spawned tokio task; requires a runtime.
    Background,
}

/// Everything a caller needs, wired once at startup and shared by reference.
pub struct LedgerServices {
    pub store: Arc<LedgerStore>,
    pub directory: Arc<ServiceDirectory>,
    pub ledger: AssignmentLedger,
    pub queries: QueryFacade,
    pub sweeper: ExpirySweeper,
    pub orchestrator: Arc<LifecycleOrchestrator>,
}

impl LedgerServices {
    /// Returns the delivery worker handle when `delivery` is `Background`.
    pub fn assemble(
        catalogue: ProviderCatalogue,
        collaborators: Collaborators,
        delivery: Delivery,
    ) -> Result<(Self, Option<JoinHandle<()>>), StartupError> {
        let policies = Arc::new(PolicyRegistry::new(catalogue.policies)?);
        let directory = Arc::new(ServiceDirectory::new(catalogue.profiles)?);
        directory.ensure_policies(&policies)?;

        let orchestrator = Arc::new(LifecycleOrchestrator::new(
            policies.clone(),
            collaborators.tasks,
            collaborators.notifications,
            collaborators.candidates.clone(),
        ));

        let (dispatcher, worker) = match delivery {
            Delivery::Inline => {
                let inline = InlineDispatcher::new(orchestrator.clone());
                (Arc::new(inline) as Arc<dyn EventDispatcher>, None)
            }
            Delivery::Background => {
                let (channel, worker) = ChannelDispatcher::spawn(orchestrator.clone());
                (Arc::new(channel) as Arc<dyn EventDispatcher>, Some(worker))
            }
        };

        let store = Arc::new(LedgerStore::new());
        let unit = UnitOfWork::new(store.clone(), dispatcher);
        let ledger = AssignmentLedger::new(
            unit.clone(),
            directory.clone(),
            collaborators.candidates,
            collaborators.actors,
        );

        info!(
            providers = policies.len(),
            delivery = ?delivery,
            "ledger services assembled"
        );

        Ok((
            Self {
                queries: QueryFacade::new(store.clone()),
                sweeper: ExpirySweeper::new(unit),
                store,
                directory,
                ledger,
                orchestrator,
            },
            worker,
        ))
    }

    pub fn binding(&self, key: &ServiceKey) -> Option<&ServiceBinding> {
        self.directory.binding(key)
    }

    /// Imports into the pool for `key`; `None` when no such pool is configured.
    pub fn import<R: Read>(
        &self,
        key: &ServiceKey,
        reader: R,
    ) -> Option<Result<ImportSummary, ImportError>> {
        self.binding(key)
            .map(|binding| binding.importer().import_reader(&self.store, reader))
    }
}
