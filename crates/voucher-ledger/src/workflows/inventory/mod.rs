//! Resource pools: bulk import of voucher codes and race-free allocation.

mod allocator;
pub mod import;

pub use allocator::{AllocationError, ResourceAllocator};
pub use import::{ClassificationRule, ImportError, ImportSummary, InventoryImporter};
