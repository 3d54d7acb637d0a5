//! Resolution of configured group specs into desired membership.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use tracing::{debug, info, warn};

use crate::directory::{DirectoryAdapter, MemberLookup};
use crate::error::{GroupSyncError, Result};
use crate::models::{
    DesiredGroup, DesiredMembership, DirectoryGroup, DirectoryUser, GroupPattern, GroupSpec,
    MemberIdentity, ResolvedMember, SkippedGroup,
};

/// Switches controlling how groups and members are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Treat `*` in configured group names as a wildcard.
    pub wildcard: bool,
    /// Include members of nested groups.
    pub recursive: bool,
    /// Lower-case usernames before comparison.
    pub lowercase: bool,
    /// Exclude disabled directory accounts.
    pub skip_disabled: bool,
}

/// Concrete groups produced by expanding the configured specs.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    pub groups: Vec<DirectoryGroup>,
    pub skipped: Vec<SkippedGroup>,
}

/// Turns group specs into a flat username -> identity mapping per group.
pub struct GroupResolver<'a> {
    directory: &'a dyn DirectoryAdapter,
    options: ResolveOptions,
}

impl<'a> GroupResolver<'a> {
    pub fn new(directory: &'a dyn DirectoryAdapter, options: ResolveOptions) -> Self {
        Self { directory, options }
    }

    pub fn parse_specs(&self, raw: &[String]) -> Vec<GroupSpec> {
        raw.iter()
            .map(|g| GroupSpec::parse(g, self.options.wildcard))
            .collect()
    }

    /// Resolve every group spec into desired membership.
    ///
    /// A group whose members cannot be resolved is skipped as a whole: a
    /// partial member list would turn into spurious removals.
    pub async fn resolve(&self, specs: &[GroupSpec]) -> Result<DesiredMembership> {
        let expansion = self.expand(specs).await?;
        let mut desired = DesiredMembership {
            groups: Vec::with_capacity(expansion.groups.len()),
            skipped: expansion.skipped,
        };

        for group in expansion.groups {
            match self.members(&group).await {
                Ok(members) => {
                    info!(group = %group.name, members = members.len(), "resolved group members");
                    desired.groups.push(DesiredGroup { group, members });
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(group = %group.name, error = %e, "failed to resolve group members, skipping group");
                    desired.skipped.push(SkippedGroup {
                        name: group.name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(desired)
    }

    /// Expand specs into concrete directory groups.
    ///
    /// Literal names that do not exist are skipped. A wildcard pattern that
    /// matches nothing is a configuration error and aborts the run. Each
    /// target group is fed by one directory group: a later group with the
    /// same name (e.g. from another OU) is skipped.
    pub async fn expand(&self, specs: &[GroupSpec]) -> Result<Expansion> {
        let mut expansion = Expansion::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut targets: HashMap<String, String> = HashMap::new();

        for spec in specs {
            match spec {
                GroupSpec::Name(name) => match self.directory.find_group(name).await {
                    Ok(Some(group)) => {
                        info!(group = %name, dn = %group.dn, "found group");
                        admit(&mut expansion, &mut seen, &mut targets, group);
                    }
                    Ok(None) => {
                        warn!(group = %name, "unable to find group, skipping group");
                        expansion.skipped.push(SkippedGroup {
                            name: name.clone(),
                            reason: GroupSyncError::GroupNotFound(name.clone()).to_string(),
                        });
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(group = %name, error = %e, "group lookup failed, skipping group");
                        expansion.skipped.push(SkippedGroup {
                            name: name.clone(),
                            reason: e.to_string(),
                        });
                    }
                },
                GroupSpec::Pattern(pattern) => {
                    let matches = self.expand_pattern(pattern).await?;
                    for group in matches {
                        admit(&mut expansion, &mut seen, &mut targets, group);
                    }
                }
            }
        }

        Ok(expansion)
    }

    async fn expand_pattern(&self, pattern: &GroupPattern) -> Result<Vec<DirectoryGroup>> {
        info!(pattern = %pattern, "searching groups with wildcard");
        let groups: Vec<DirectoryGroup> = self
            .directory
            .expand_wildcard(pattern)
            .await?
            .into_iter()
            .filter(|g| pattern.matches(&g.name))
            .collect();

        if groups.is_empty() {
            return Err(GroupSyncError::Config(format!(
                "no groups found matching wildcard {pattern}"
            )));
        }

        for group in &groups {
            info!(pattern = %pattern, group = %group.name, "wildcard matched group");
        }
        Ok(groups)
    }

    /// Resolve the members of one concrete group.
    pub async fn members(&self, group: &DirectoryGroup) -> Result<BTreeMap<String, MemberIdentity>> {
        let mut members = BTreeMap::new();

        if self.options.recursive {
            match self
                .directory
                .transitive_members(group, self.options.skip_disabled)
                .await?
            {
                Some(users) => {
                    for user in users {
                        self.insert(&mut members, user);
                    }
                }
                None => self.walk_nested(group, &mut members).await?,
            }
            return Ok(members);
        }

        let lookup = MemberLookup {
            skip_disabled: self.options.skip_disabled,
            include_groups: false,
        };
        for reference in &group.member_refs {
            match self.directory.resolve_member(group, reference, lookup).await? {
                Some(ResolvedMember::User(user)) => self.insert(&mut members, user),
                Some(ResolvedMember::Group(nested)) => {
                    debug!(group = %group.name, nested = %nested.name, "ignoring nested group in direct mode");
                }
                None => debug!(group = %group.name, reference = %reference, "member reference is not a user"),
            }
        }
        Ok(members)
    }

    /// Breadth-first walk over nested groups. Each group DN is descended into
    /// at most once per top-level group, so membership cycles terminate.
    async fn walk_nested(
        &self,
        root: &DirectoryGroup,
        members: &mut BTreeMap<String, MemberIdentity>,
    ) -> Result<()> {
        let lookup = MemberLookup {
            skip_disabled: self.options.skip_disabled,
            include_groups: true,
        };
        let mut visited: HashSet<String> = HashSet::from([root.dn.to_lowercase()]);
        let mut queue: VecDeque<DirectoryGroup> = VecDeque::from([root.clone()]);

        while let Some(group) = queue.pop_front() {
            for reference in &group.member_refs {
                match self.directory.resolve_member(&group, reference, lookup).await? {
                    Some(ResolvedMember::User(user)) => self.insert(members, user),
                    Some(ResolvedMember::Group(nested)) => {
                        if visited.insert(nested.dn.to_lowercase()) {
                            debug!(parent = %group.name, nested = %nested.name, "descending into nested group");
                            queue.push_back(nested);
                        } else {
                            debug!(parent = %group.name, nested = %nested.name, "nested group already visited");
                        }
                    }
                    None => {}
                }
            }
        }

        debug!(group = %root.name, groups_visited = visited.len(), "nested walk finished");
        Ok(())
    }

    /// Later occurrences of the same normalized username replace earlier ones.
    fn insert(&self, members: &mut BTreeMap<String, MemberIdentity>, user: DirectoryUser) {
        if user.username.is_empty() {
            debug!(dn = %user.dn, "directory user has no username, ignoring");
            return;
        }
        let identity = MemberIdentity::normalized(user, self.options.lowercase);
        members.insert(identity.username.clone(), identity);
    }
}

/// Add `group` unless its DN was already expanded or another directory group
/// already claimed its target name.
fn admit(
    expansion: &mut Expansion,
    seen: &mut HashSet<String>,
    targets: &mut HashMap<String, String>,
    group: DirectoryGroup,
) {
    if !seen.insert(group.dn.to_lowercase()) {
        return;
    }
    if let Some(first) = targets.get(&group.name) {
        warn!(group = %group.name, dn = %group.dn, first = %first, "group name already synced from another DN, skipping group");
        expansion.skipped.push(SkippedGroup {
            reason: format!("name already synced from {first}, skipping {}", group.dn),
            name: group.name,
        });
        return;
    }
    targets.insert(group.name.clone(), group.dn.clone());
    expansion.groups.push(group);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserAttributes;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory directory. Member references are DNs; a DN is either a
    /// user or a group.
    #[derive(Default)]
    struct MockDirectory {
        groups: Vec<DirectoryGroup>,
        users: HashMap<String, (String, bool)>,
        transitive: bool,
        fail_lookups: bool,
        expanded_groups: Mutex<Vec<String>>,
    }

    impl MockDirectory {
        fn group(mut self, name: &str, members: &[&str]) -> Self {
            self.groups.push(DirectoryGroup {
                dn: group_dn(name),
                name: name.to_string(),
                member_refs: members.iter().map(|m| m.to_string()).collect(),
            });
            self
        }

        fn user(mut self, username: &str, enabled: bool) -> Self {
            self.users
                .insert(user_dn(username), (username.to_string(), enabled));
            self
        }

        fn group_by_dn(&self, dn: &str) -> Option<DirectoryGroup> {
            self.groups
                .iter()
                .find(|g| g.dn.eq_ignore_ascii_case(dn))
                .cloned()
        }

        fn collect_users(&self, group: &DirectoryGroup, seen: &mut HashSet<String>, out: &mut Vec<DirectoryUser>) {
            for reference in &group.member_refs {
                if let Some((name, _)) = self.users.get(reference) {
                    out.push(DirectoryUser {
                        dn: reference.clone(),
                        username: name.clone(),
                    });
                } else if let Some(nested) = self.group_by_dn(reference) {
                    if seen.insert(nested.dn.clone()) {
                        self.collect_users(&nested, seen, out);
                    }
                }
            }
        }
    }

    fn group_dn(name: &str) -> String {
        format!("CN={name},OU=Groups,DC=example,DC=com")
    }

    fn user_dn(name: &str) -> String {
        format!("CN={name},OU=Users,DC=example,DC=com")
    }

    #[async_trait]
    impl DirectoryAdapter for MockDirectory {
        async fn expand_wildcard(&self, _pattern: &GroupPattern) -> Result<Vec<DirectoryGroup>> {
            // Loose server-side filter: the resolver narrows the result.
            Ok(self.groups.clone())
        }

        async fn find_group(&self, name: &str) -> Result<Option<DirectoryGroup>> {
            Ok(self.groups.iter().find(|g| g.name == name).cloned())
        }

        async fn resolve_member(
            &self,
            group: &DirectoryGroup,
            reference: &str,
            lookup: MemberLookup,
        ) -> Result<Option<ResolvedMember>> {
            if self.fail_lookups {
                return Err(GroupSyncError::Directory("lookup failed".into()));
            }
            self.expanded_groups.lock().unwrap().push(group.dn.clone());
            if let Some((name, enabled)) = self.users.get(reference) {
                if lookup.skip_disabled && !enabled {
                    return Ok(None);
                }
                return Ok(Some(ResolvedMember::User(DirectoryUser {
                    dn: reference.to_string(),
                    username: name.clone(),
                })));
            }
            if lookup.include_groups {
                return Ok(self.group_by_dn(reference).map(ResolvedMember::Group));
            }
            Ok(None)
        }

        async fn transitive_members(
            &self,
            group: &DirectoryGroup,
            _skip_disabled: bool,
        ) -> Result<Option<Vec<DirectoryUser>>> {
            if !self.transitive {
                return Ok(None);
            }
            let mut out = Vec::new();
            let mut seen = HashSet::from([group.dn.clone()]);
            self.collect_users(group, &mut seen, &mut out);
            Ok(Some(out))
        }

        async fn user_attributes(&self, _dn: &str) -> Result<UserAttributes> {
            Ok(UserAttributes::default())
        }

        fn flavor_name(&self) -> &str {
            "mock"
        }
    }

    fn names(members: &BTreeMap<String, MemberIdentity>) -> Vec<&str> {
        members.keys().map(String::as_str).collect()
    }

    fn wildcard() -> ResolveOptions {
        ResolveOptions {
            wildcard: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn wildcard_expansion_keeps_only_matches() {
        let dir = MockDirectory::default()
            .group("R.Ops.App.Admins", &[])
            .group("R.Ops.App.Users", &[])
            .group("Other.Group", &[]);
        let resolver = GroupResolver::new(&dir, wildcard());

        let specs = resolver.parse_specs(&["R.*.App.*".to_string()]);
        let expansion = resolver.expand(&specs).await.unwrap();
        let found: Vec<&str> = expansion.groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(found, vec!["R.Ops.App.Admins", "R.Ops.App.Users"]);
    }

    #[tokio::test]
    async fn wildcard_without_match_is_config_error() {
        let dir = MockDirectory::default().group("Other.Group", &[]);
        let resolver = GroupResolver::new(&dir, wildcard());

        let specs = resolver.parse_specs(&["R.*.App.*".to_string()]);
        let err = resolver.expand(&specs).await.unwrap_err();
        assert!(matches!(err, GroupSyncError::Config(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn overlapping_patterns_yield_each_group_once() {
        let dir = MockDirectory::default().group("R.Ops.App.Admins", &[]);
        let resolver = GroupResolver::new(&dir, wildcard());

        let specs = resolver.parse_specs(&["R.*".to_string(), "*.Admins".to_string()]);
        let expansion = resolver.expand(&specs).await.unwrap();
        assert_eq!(expansion.groups.len(), 1);
    }

    #[tokio::test]
    async fn same_name_in_two_ous_feeds_target_once() {
        let mut dir = MockDirectory::default().group("App.Admins", &[]);
        dir.groups.push(DirectoryGroup {
            dn: "CN=App.Admins,OU=Legacy,DC=example,DC=com".to_string(),
            name: "App.Admins".to_string(),
            member_refs: Vec::new(),
        });
        let resolver = GroupResolver::new(&dir, wildcard());

        let specs = resolver.parse_specs(&["App.*".to_string()]);
        let expansion = resolver.expand(&specs).await.unwrap();
        assert_eq!(expansion.groups.len(), 1);
        assert_eq!(expansion.groups[0].dn, group_dn("App.Admins"));
        assert_eq!(expansion.skipped.len(), 1);
        assert_eq!(expansion.skipped[0].name, "App.Admins");
        assert!(expansion.skipped[0].reason.contains("OU=Legacy"));
    }

    #[tokio::test]
    async fn missing_literal_group_is_skipped() {
        let dir = MockDirectory::default().group("App.Admins", &[]);
        let resolver = GroupResolver::new(&dir, ResolveOptions::default());

        let specs = resolver.parse_specs(&["App.Admins".to_string(), "Missing".to_string()]);
        let desired = resolver.resolve(&specs).await.unwrap();
        assert_eq!(desired.groups.len(), 1);
        assert_eq!(desired.skipped.len(), 1);
        assert_eq!(desired.skipped[0].name, "Missing");
        assert!(desired.skipped[0].reason.contains("group not found"));
    }

    #[tokio::test]
    async fn direct_members_ignore_nested_groups() {
        let alice = user_dn("alice");
        let bob = user_dn("bob");
        let nested = group_dn("Nested");
        let dir = MockDirectory::default()
            .user("alice", true)
            .user("bob", true)
            .group("App.Admins", &[&alice, &nested])
            .group("Nested", &[&bob]);
        let resolver = GroupResolver::new(&dir, ResolveOptions::default());

        let group = dir.find_group("App.Admins").await.unwrap().unwrap();
        let members = resolver.members(&group).await.unwrap();
        assert_eq!(names(&members), vec!["alice"]);
        assert_eq!(members["alice"].dn, alice);
    }

    #[tokio::test]
    async fn disabled_users_are_skipped_on_request() {
        let alice = user_dn("alice");
        let bob = user_dn("bob");
        let dir = MockDirectory::default()
            .user("alice", true)
            .user("bob", false)
            .group("App.Admins", &[&alice, &bob]);
        let group = dir.find_group("App.Admins").await.unwrap().unwrap();

        let all = GroupResolver::new(&dir, ResolveOptions::default())
            .members(&group)
            .await
            .unwrap();
        assert_eq!(names(&all), vec!["alice", "bob"]);

        let options = ResolveOptions {
            skip_disabled: true,
            ..Default::default()
        };
        let enabled = GroupResolver::new(&dir, options).members(&group).await.unwrap();
        assert_eq!(names(&enabled), vec!["alice"]);
    }

    #[tokio::test]
    async fn recursive_walk_terminates_on_cycle() {
        let alice = user_dn("alice");
        let bob = user_dn("bob");
        let a = group_dn("A");
        let b = group_dn("B");
        let dir = MockDirectory::default()
            .user("alice", true)
            .user("bob", true)
            .group("A", &[&alice, &b])
            .group("B", &[&bob, &a]);
        let options = ResolveOptions {
            recursive: true,
            ..Default::default()
        };
        let resolver = GroupResolver::new(&dir, options);

        let group = dir.find_group("A").await.unwrap().unwrap();
        let members = resolver.members(&group).await.unwrap();
        assert_eq!(names(&members), vec!["alice", "bob"]);

        // Each group's references are resolved exactly once.
        let expanded = dir.expanded_groups.lock().unwrap().clone();
        assert_eq!(expanded.iter().filter(|dn| **dn == a).count(), 2);
        assert_eq!(expanded.iter().filter(|dn| **dn == b).count(), 2);
    }

    #[tokio::test]
    async fn recursive_walk_handles_self_membership() {
        let alice = user_dn("alice");
        let a = group_dn("A");
        let dir = MockDirectory::default()
            .user("alice", true)
            .group("A", &[&a, &alice]);
        let options = ResolveOptions {
            recursive: true,
            ..Default::default()
        };
        let group = dir.find_group("A").await.unwrap().unwrap();
        let members = GroupResolver::new(&dir, options).members(&group).await.unwrap();
        assert_eq!(names(&members), vec!["alice"]);
    }

    #[tokio::test]
    async fn recursive_prefers_transitive_query() {
        let alice = user_dn("alice");
        let bob = user_dn("bob");
        let nested = group_dn("Nested");
        let mut dir = MockDirectory::default()
            .user("alice", true)
            .user("bob", true)
            .group("App.Admins", &[&alice, &nested])
            .group("Nested", &[&bob]);
        dir.transitive = true;
        let options = ResolveOptions {
            recursive: true,
            ..Default::default()
        };

        let group = dir.find_group("App.Admins").await.unwrap().unwrap();
        let members = GroupResolver::new(&dir, options).members(&group).await.unwrap();
        assert_eq!(names(&members), vec!["alice", "bob"]);
        assert!(dir.expanded_groups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn lowercase_normalization() {
        let alice = user_dn("Alice");
        let dir = MockDirectory::default()
            .user("Alice", true)
            .group("App.Admins", &[&alice]);
        let options = ResolveOptions {
            lowercase: true,
            ..Default::default()
        };
        let group = dir.find_group("App.Admins").await.unwrap().unwrap();
        let members = GroupResolver::new(&dir, options).members(&group).await.unwrap();
        assert_eq!(names(&members), vec!["alice"]);
        assert_eq!(members["alice"].username, "alice");
    }

    #[tokio::test]
    async fn duplicate_normalized_username_keeps_later_entry() {
        let upper = "CN=Alice,OU=Old,DC=example,DC=com".to_string();
        let lower = "CN=alice,OU=New,DC=example,DC=com".to_string();
        let mut dir = MockDirectory::default().group("App.Admins", &[&upper, &lower]);
        dir.users.insert(upper.clone(), ("Alice".into(), true));
        dir.users.insert(lower.clone(), ("alice".into(), true));
        let options = ResolveOptions {
            lowercase: true,
            ..Default::default()
        };
        let group = dir.find_group("App.Admins").await.unwrap().unwrap();
        let members = GroupResolver::new(&dir, options).members(&group).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members["alice"].dn, lower);
    }

    #[tokio::test]
    async fn member_lookup_failure_skips_whole_group() {
        let alice = user_dn("alice");
        let mut dir = MockDirectory::default()
            .user("alice", true)
            .group("App.Admins", &[&alice]);
        dir.fail_lookups = true;
        let resolver = GroupResolver::new(&dir, ResolveOptions::default());

        let specs = resolver.parse_specs(&["App.Admins".to_string()]);
        let desired = resolver.resolve(&specs).await.unwrap();
        assert!(desired.groups.is_empty());
        assert_eq!(desired.skipped[0].name, "App.Admins");
    }
}
