//! srsync-core: Scheduling, review transitions, merge and queue building.
//!
//! This crate defines the data model, the pure scheduling and merge logic,
//! the wire payloads of the sync boundary, and the storage/transport traits
//! that the server and client crates implement.

pub mod clock;
pub mod config;
pub mod error;
pub mod merge;
pub mod model;
pub mod queue;
pub mod review;
pub mod schedule;
pub mod stats;
pub mod traits;
pub mod wire;
