//! Assignment ledger: who holds which resource, and the transitions an assignment goes
//! through after it is recorded.

mod ledger;
mod people;

#[cfg(test)]
mod tests;

pub use ledger::{AssignmentLedger, LedgerError, MemberOutcome, MemberOutcomeView};
pub use people::{Actor, ActorDirectory, Candidate, CandidateDirectory};
