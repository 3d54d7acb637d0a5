//! Typed mutation plans produced by the reconciler.

use std::fmt;

use super::member::UserProfile;

/// One operation against the target system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateGroup { group: String },
    CreateUser { profile: UserProfile },
    AddMembership { group: String, username: String },
    RemoveMembership { group: String, username: String },
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateGroup { group } => write!(f, "create group {group}"),
            Self::CreateUser { profile } => {
                write!(f, "create user {} ({})", profile.username, profile.display_name)
            }
            Self::AddMembership { group, username } => write!(f, "add {username} to {group}"),
            Self::RemoveMembership { group, username } => {
                write!(f, "remove {username} from {group}")
            }
        }
    }
}

/// Ordered mutations for one group: group creation, then user creation, then
/// additions, then removals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationPlan {
    pub group: String,
    pub mutations: Vec<Mutation>,
}

impl MutationPlan {
    pub fn new(group: &str) -> Self {
        Self {
            group: group.to_string(),
            mutations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn creates_group(&self) -> bool {
        self.mutations
            .iter()
            .any(|m| matches!(m, Mutation::CreateGroup { .. }))
    }

    pub fn users_to_create(&self) -> impl Iterator<Item = &UserProfile> {
        self.mutations.iter().filter_map(|m| match m {
            Mutation::CreateUser { profile } => Some(profile),
            _ => None,
        })
    }

    pub fn additions(&self) -> impl Iterator<Item = &str> {
        self.mutations.iter().filter_map(|m| match m {
            Mutation::AddMembership { username, .. } => Some(username.as_str()),
            _ => None,
        })
    }

    pub fn removals(&self) -> impl Iterator<Item = &str> {
        self.mutations.iter().filter_map(|m| match m {
            Mutation::RemoveMembership { username, .. } => Some(username.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> MutationPlan {
        MutationPlan {
            group: "App.Admins".into(),
            mutations: vec![
                Mutation::CreateGroup {
                    group: "App.Admins".into(),
                },
                Mutation::CreateUser {
                    profile: UserProfile {
                        username: "alice".into(),
                        display_name: "Alice Liddell".into(),
                        email: None,
                    },
                },
                Mutation::AddMembership {
                    group: "App.Admins".into(),
                    username: "alice".into(),
                },
                Mutation::RemoveMembership {
                    group: "App.Admins".into(),
                    username: "carol".into(),
                },
            ],
        }
    }

    #[test]
    fn accessors_filter_by_kind() {
        let plan = sample_plan();
        assert!(plan.creates_group());
        assert_eq!(plan.users_to_create().count(), 1);
        assert_eq!(plan.additions().collect::<Vec<_>>(), vec!["alice"]);
        assert_eq!(plan.removals().collect::<Vec<_>>(), vec!["carol"]);
    }

    #[test]
    fn empty_plan() {
        let plan = MutationPlan::new("App.Admins");
        assert!(plan.is_empty());
        assert!(!plan.creates_group());
    }

    #[test]
    fn mutation_display() {
        let lines: Vec<String> = sample_plan().mutations.iter().map(|m| m.to_string()).collect();
        assert_eq!(
            lines,
            vec![
                "create group App.Admins",
                "create user alice (Alice Liddell)",
                "add alice to App.Admins",
                "remove carol from App.Admins",
            ]
        );
    }
}
