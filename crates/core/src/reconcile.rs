//! Set reconciliation between desired (directory) and observed (target)
//! membership.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{Mutation, MutationPlan, UserProfile};

/// Result of comparing desired and observed usernames for one group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl MembershipDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// `to_add = desired - observed`, `to_remove = observed - desired`.
pub fn diff(desired: &BTreeSet<String>, observed: &BTreeSet<String>) -> MembershipDiff {
    MembershipDiff {
        to_add: desired.difference(observed).cloned().collect(),
        to_remove: observed.difference(desired).cloned().collect(),
    }
}

/// What the target system currently reports for one group.
#[derive(Debug, Clone, Copy)]
pub struct TargetGroupState<'a> {
    pub exists: bool,
    /// Current members; ignored when the group does not exist yet.
    pub observed: &'a BTreeSet<String>,
    /// Every username the target system knows.
    pub known_users: &'a BTreeSet<String>,
}

/// Compute the ordered plan converging one group.
///
/// Desired users unknown to the target are created from `profiles`; a desired
/// user that is unknown and has no profile is left out of the plan entirely
/// (no creation, no addition) so the next pass can pick it up.
pub fn plan_group(
    group: &str,
    desired: &BTreeSet<String>,
    state: TargetGroupState<'_>,
    profiles: &BTreeMap<String, UserProfile>,
) -> MutationPlan {
    let mut plan = MutationPlan::new(group);

    if !state.exists {
        plan.mutations.push(Mutation::CreateGroup {
            group: group.to_string(),
        });
    }

    let mut creatable = BTreeSet::new();
    for username in desired.difference(state.known_users) {
        if let Some(profile) = profiles.get(username) {
            plan.mutations.push(Mutation::CreateUser {
                profile: profile.clone(),
            });
            creatable.insert(username.clone());
        }
    }

    let empty = BTreeSet::new();
    let observed = if state.exists { state.observed } else { &empty };
    let MembershipDiff { to_add, to_remove } = diff(desired, observed);

    for username in to_add {
        if state.known_users.contains(&username) || creatable.contains(&username) {
            plan.mutations.push(Mutation::AddMembership {
                group: group.to_string(),
                username,
            });
        }
    }
    for username in to_remove {
        plan.mutations.push(Mutation::RemoveMembership {
            group: group.to_string(),
            username,
        });
    }

    plan
}
