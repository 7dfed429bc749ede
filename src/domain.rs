//! Domain module - core records, classification rules and batch policies
//!
//! Everything in here is pure: no network, no database handles. The
//! infrastructure layer feeds raw listing items in and persists the
//! resulting records.

pub mod classifier;
pub mod dedupe;
pub mod error;
pub mod product;

// Re-export commonly used items for convenience
pub use classifier::CategoryClassifier;
pub use product::{CanonicalCategory, ProductRecord, RawItem, SyncMode, SyncOutcome, UnitKey};
