//! On-device storage module.
//!
//! `LocalStore` keeps profile, completion and task records as JSON files
//! under the data directory. It is the source of truth while offline and is
//! queried by `(userId, dateKey)` using the same keys as the task cache.

pub mod store;

pub use store::{LocalStore, Tombstone};
