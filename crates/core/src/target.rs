//! Target-system group/user API contract.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::UserProfile;

/// User and group management API of the application being kept in sync.
///
/// Mutating calls fail with `TargetUnavailable` (transport, auth) or
/// `TargetConflict` (object already exists). Implementations whose
/// membership updates are read-modify-write over a user's whole group list
/// must serialize those updates per user (see [`KeyedLocks`](crate::lock::KeyedLocks)).
#[async_trait]
pub trait TargetDirectoryClient: Send + Sync {
    async fn list_groups(&self) -> Result<BTreeSet<String>>;
    async fn list_users(&self) -> Result<BTreeSet<String>>;
    async fn group_members(&self, group: &str) -> Result<BTreeSet<String>>;
    async fn user_groups(&self, username: &str) -> Result<BTreeSet<String>>;
    async fn create_group(&self, group: &str) -> Result<()>;
    async fn create_user(&self, profile: &UserProfile) -> Result<()>;
    async fn add_membership(&self, username: &str, group: &str) -> Result<()>;
    async fn remove_membership(&self, username: &str, group: &str) -> Result<()>;
    fn name(&self) -> &str;
}
