//! Offline-first data layer for the daily planner.
//!
//! Keeps an on-device JSON store and a remote path-addressable store in
//! step under intermittent connectivity, and serves task reads from an
//! in-memory cache bounded by a rolling date window.
//!
//! - [`cache`]: windowed per-day task cache
//! - [`local`]: durable on-device store
//! - [`remote`]: remote store trait, REST and in-memory implementations
//! - [`repository`]: profile, task and completion repositories
//! - [`sync`]: pull/push orchestration and its state machine
//! - [`session`]: composition root and sign-in/out handling
//! - [`assistant`]: task operations for the AI function-calling layer

pub mod assistant;
pub mod cache;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod date_key;
pub mod dedup;
pub mod error;
pub mod listeners;
pub mod local;
pub mod models;
pub mod remote;
pub mod repository;
pub mod session;
pub mod sync;

pub use assistant::TaskAssistant;
pub use cache::EntityCache;
pub use clock::{Calendar, Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use date_key::{CacheWindow, DateKey};
pub use dedup::{OpKey, OperationDedupGuard};
pub use error::{Result, SyncError};
pub use listeners::ListenerRegistry;
pub use local::LocalStore;
pub use models::{CompletionRecord, ProfileRecord, TaskCategory, TaskDraft, TaskPatch, TaskRecord};
pub use remote::{MemoryRemoteStore, RemoteStore, RestRemoteStore, Subscription};
pub use repository::{CompletionRepository, ProfileRepository, SyncRange, SyncReport, TaskRepository};
pub use session::{DataLayer, SessionEvent};
pub use sync::{SyncOrchestrator, SyncState};
