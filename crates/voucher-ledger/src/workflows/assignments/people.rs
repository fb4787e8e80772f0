use serde::{Deserialize, Serialize};

use crate::workflows::domain::{ActorId, CandidateId, CandidateListId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CandidateId,
    pub display_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub display_name: String,
}

/// Lookup of beneficiaries and the named lists they are grouped into.
pub trait CandidateDirectory: Send + Sync {
    fn find(&self, id: &CandidateId) -> Option<Candidate>;
    fn list_members(&self, list: &CandidateListId) -> Option<Vec<CandidateId>>;
}

/// Lookup of the users allowed to act on the ledger.
pub trait ActorDirectory: Send + Sync {
    fn find(&self, id: &ActorId) -> Option<Actor>;
}
