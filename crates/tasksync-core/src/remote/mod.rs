//! Remote store client module.
//!
//! The remote store is a hierarchical, path-addressable JSON tree (see
//! [`paths`] for the layout). [`RemoteStore`] is the seam the repositories
//! talk to; two implementations ship with the crate:
//!
//! - [`RestRemoteStore`]: REST + server-sent events over HTTPS
//! - [`MemoryRemoteStore`]: in-process tree used for tests and local demos
//!
//! Listener callbacks run on background tasks. Updates for one path are
//! delivered in the order the store applied them; nothing is promised
//! across different paths.

pub mod codec;
pub mod memory;
pub mod paths;
pub mod rest;
pub mod subscription;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub use memory::MemoryRemoteStore;
pub use rest::RestRemoteStore;
pub use subscription::Subscription;

/// Receives the current value at a subscribed path (`None` once deleted).
pub type SnapshotCallback = Arc<dyn Fn(Option<Value>) + Send + Sync>;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Replace the value at `path`.
    async fn write(&self, path: &str, value: Value) -> Result<()>;

    /// Remove the value at `path` and everything below it.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Read the value at `path`. A missing path is `Ok(None)`, not an error.
    async fn read_once(&self, path: &str) -> Result<Option<Value>>;

    /// Start listening on `path`. The current value is delivered first,
    /// then every change. Disposing the returned handle stops delivery.
    fn subscribe(&self, path: &str, callback: SnapshotCallback) -> Result<Subscription>;
}
