//! Data model shared by the resolver, the reconciler and the sync engine.
//!
//! Everything here is scoped to a single sync pass; nothing is persisted.

pub mod group;
pub mod member;
pub mod plan;

pub use group::{
    DesiredGroup, DesiredMembership, DirectoryGroup, GroupPattern, GroupSpec, SkippedGroup,
};
pub use member::{DirectoryUser, MemberIdentity, ResolvedMember, UserAttributes, UserProfile};
pub use plan::{Mutation, MutationPlan};
