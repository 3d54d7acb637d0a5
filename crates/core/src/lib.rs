//! Group Sync Core: directory group resolution, membership reconciliation,
//! and the sync engine driving a target system.

pub mod config;
pub mod directory;
pub mod error;
pub mod lock;
pub mod models;
pub mod reconcile;
pub mod resolver;
pub mod sync;
pub mod target;
