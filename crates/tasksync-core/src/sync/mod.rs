//! Sync orchestration.
//!
//! A full sync is a pull phase followed by a push phase. Each phase fans
//! out to every entity repository at once and waits for all of them; one
//! entity failing does not stop its siblings, but the first error fails the
//! run. Only one run may be active at a time.

pub mod orchestrator;
pub mod state;

pub use orchestrator::SyncOrchestrator;
pub use state::SyncState;
