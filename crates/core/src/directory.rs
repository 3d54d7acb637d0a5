//! Directory capability interface implemented once per directory flavor.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{DirectoryGroup, DirectoryUser, GroupPattern, ResolvedMember, UserAttributes};

/// How a single member reference should be resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberLookup {
    /// Exclude disabled accounts.
    pub skip_disabled: bool,
    /// Also report references that point at nested groups.
    pub include_groups: bool,
}

/// Read-only view of a directory service.
///
/// Implementations turn loosely typed directory entries into the typed
/// models at this boundary. Connection or bind failures are reported as
/// [`GroupSyncError::DirectoryUnavailable`](crate::error::GroupSyncError).
#[async_trait]
pub trait DirectoryAdapter: Send + Sync {
    /// All groups whose name matches the pattern, using the directory's
    /// native filter syntax.
    async fn expand_wildcard(&self, pattern: &GroupPattern) -> Result<Vec<DirectoryGroup>>;

    /// Look up a group by its literal name.
    async fn find_group(&self, name: &str) -> Result<Option<DirectoryGroup>>;

    /// Resolve one member reference of `group` to a user (or a nested group
    /// when `lookup.include_groups` is set). `None` when the reference is
    /// filtered out or is neither.
    async fn resolve_member(
        &self,
        group: &DirectoryGroup,
        reference: &str,
        lookup: MemberLookup,
    ) -> Result<Option<ResolvedMember>>;

    /// All users that are transitively members of `group`, in one query.
    /// `None` when the directory cannot answer this natively.
    async fn transitive_members(
        &self,
        group: &DirectoryGroup,
        skip_disabled: bool,
    ) -> Result<Option<Vec<DirectoryUser>>>;

    /// Profile attributes of the user entry at `dn`.
    async fn user_attributes(&self, dn: &str) -> Result<UserAttributes>;

    fn flavor_name(&self) -> &str;
}
