//! Configured group references and resolved directory groups.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::member::MemberIdentity;

/// A configured directory group reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupSpec {
    /// A literal group name.
    Name(String),
    /// A wildcard pattern such as `R.*.App.*`.
    Pattern(GroupPattern),
}

impl GroupSpec {
    /// Parse a configured entry. `*` is only treated as a wildcard when
    /// wildcard search is enabled; otherwise it is part of a literal name.
    pub fn parse(raw: &str, wildcard: bool) -> Self {
        let raw = raw.trim();
        if wildcard && raw.contains('*') {
            Self::Pattern(GroupPattern::new(raw))
        } else {
            Self::Name(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Name(name) => name,
            Self::Pattern(pattern) => pattern.as_str(),
        }
    }
}

impl fmt::Display for GroupSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wildcard group-name pattern; `*` matches any run of characters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPattern(String);

impl GroupPattern {
    pub fn new(pattern: &str) -> Self {
        Self(pattern.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive match of a group name against this pattern, with the
    /// same semantics as an LDAP substring filter on the name attribute.
    pub fn matches(&self, name: &str) -> bool {
        let pattern = self.0.to_lowercase();
        let name = name.to_lowercase();

        let parts: Vec<&str> = pattern.split('*').collect();
        if parts.len() == 1 {
            return pattern == name;
        }

        let first = parts[0];
        let last = parts[parts.len() - 1];
        if !name.starts_with(first) {
            return false;
        }

        let mut rest = &name[first.len()..];
        for part in &parts[1..parts.len() - 1] {
            match rest.find(part) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
        rest.ends_with(last)
    }
}

impl fmt::Display for GroupPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A group entry found in the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryGroup {
    pub dn: String,
    /// Name used for the group in the target system.
    pub name: String,
    /// Raw values of the configured membership attribute.
    pub member_refs: Vec<String>,
}

/// Resolved members of one concrete group, keyed by normalized username.
#[derive(Debug, Clone)]
pub struct DesiredGroup {
    pub group: DirectoryGroup,
    pub members: BTreeMap<String, MemberIdentity>,
}

impl DesiredGroup {
    pub fn usernames(&self) -> BTreeSet<String> {
        self.members.keys().cloned().collect()
    }
}

/// A configured or expanded group that could not be resolved this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedGroup {
    pub name: String,
    pub reason: String,
}

/// Desired state for a whole pass, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct DesiredMembership {
    pub groups: Vec<DesiredGroup>,
    pub skipped: Vec<SkippedGroup>,
}
