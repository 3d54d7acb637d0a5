//! Member identities and user profiles.

/// A user entry as returned by the directory, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub dn: String,
    pub username: String,
}

/// What a group's member reference resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedMember {
    User(DirectoryUser),
    /// A nested group, with its own member references.
    Group(super::DirectoryGroup),
}

/// Normalized user handle plus the directory reference used for later
/// attribute lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberIdentity {
    pub username: String,
    pub dn: String,
}

impl MemberIdentity {
    /// Build an identity from a directory user, lower-casing the username
    /// when requested.
    pub fn normalized(user: DirectoryUser, lowercase: bool) -> Self {
        let username = if lowercase {
            user.username.to_lowercase()
        } else {
            user.username
        };
        Self {
            username,
            dn: user.dn,
        }
    }
}

/// Typed view of the directory attributes needed to create a target user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAttributes {
    pub given_name: Option<String>,
    pub surname: Option<String>,
    pub contact: Option<String>,
}

/// Profile used to create a user in the target system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
}

impl UserProfile {
    /// Display name is `givenName sn`, falling back to the username when the
    /// surname is absent.
    pub fn from_attributes(username: &str, attrs: &UserAttributes) -> Self {
        let display_name = match attrs.surname.as_deref().map(str::trim) {
            Some(sn) if !sn.is_empty() => {
                let given = attrs.given_name.as_deref().unwrap_or("").trim();
                format!("{given} {sn}").trim().to_string()
            }
            _ => username.to_string(),
        };

        Self {
            username: username.to_string(),
            display_name,
            email: attrs.contact.clone().filter(|c| !c.is_empty()),
        }
    }
}
