//! srsync-server: The authoritative side of progress synchronization.
//!
//! Holds decks, cards, per-user progress and statistics in a
//! snapshot-persisted memory store, applies the merge comparator to every
//! incoming write, and repairs duplicate canonical decks.

pub mod resolver;
pub mod service;
pub mod store;
pub mod transport;

pub use resolver::{ConsolidationReport, IdentityResolver};
pub use service::{DeckCard, SyncService};
pub use store::{MemoryStore, StoreSnapshot};
pub use transport::ServiceTransport;
