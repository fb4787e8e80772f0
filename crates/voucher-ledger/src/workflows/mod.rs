pub mod assignments;
pub mod directory;
pub mod domain;
pub mod inventory;
pub mod lifecycle;
pub mod providers;
pub mod router;
pub mod services;
pub mod store;

pub use router::ledger_router;
pub use services::{Collaborators, Delivery, LedgerServices, StartupError};
