//! srsync-client: Client-side review session and synchronization.
//!
//! A `Session` owns the locally cached progress and card mirror of one
//! profile and the review queue built from them. Local mutations are
//! synchronous; the `SyncClient` pushes pending snapshots and pulls the
//! server state whenever the caller chooses to.

pub mod http;
pub mod mock;
pub mod session;
pub mod state;
pub mod storage;
pub mod sync;

pub use http::HttpTransport;
pub use mock::MockTransport;
pub use session::Session;
pub use state::{CardEntry, DeckEntry, LocalState, Registry};
pub use storage::LocalStorage;
pub use sync::{PullReport, SyncClient, SyncStatus};
