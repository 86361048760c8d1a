//! Client-side state consistency for the storefront: optimistic keyed
//! collections with exact rollback, and debounced coalescing of rapid
//! quantity edits into a single network commit.

pub mod debounce;
pub mod store;

pub use debounce::{DebounceBuffer, DebounceCommit};
pub use store::{KeyedItem, OptimisticStore, Reconciliation, StoreError};
