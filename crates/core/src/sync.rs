//! Sync engine that converges target-system groups on directory membership.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::directory::DirectoryAdapter;
use crate::error::{GroupSyncError, Result};
use crate::models::{DesiredGroup, MutationPlan, UserProfile};
use crate::reconcile::{plan_group, TargetGroupState};
use crate::resolver::{GroupResolver, ResolveOptions};
use crate::target::TargetDirectoryClient;

/// Options for one sync pass.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    pub resolve: ResolveOptions,
    /// Compute plans without applying them.
    pub dry_run: bool,
    /// Maximum membership mutations in flight within one group phase.
    pub concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            resolve: ResolveOptions::default(),
            dry_run: false,
            concurrency: 1,
        }
    }
}

/// Outcome for a single group.
#[derive(Debug, Clone, Default)]
pub struct GroupOutcome {
    pub group: String,
    pub plan: Option<MutationPlan>,
    pub group_created: bool,
    pub users_created: u32,
    pub memberships_added: u32,
    pub memberships_removed: u32,
    pub users_skipped: u32,
    /// Set when the group was not processed at all.
    pub skipped: Option<String>,
    pub errors: u32,
    pub error_details: Option<String>,
}

impl GroupOutcome {
    fn new(group: &str) -> Self {
        Self {
            group: group.to_string(),
            ..Default::default()
        }
    }

    fn skip(mut self, reason: &dyn std::fmt::Display) -> Self {
        let subject = self.group.clone();
        record_error(&mut self, &subject, reason);
        self.skipped = Some(reason.to_string());
        self
    }
}

/// Summary of a sync run.
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub groups: Vec<GroupOutcome>,
    pub groups_synced: u32,
    pub groups_created: u32,
    pub groups_skipped: u32,
    pub users_created: u32,
    pub users_skipped: u32,
    pub memberships_added: u32,
    pub memberships_removed: u32,
    pub errors: u32,
    pub error_details: Option<String>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SyncSummary {
    fn new(dry_run: bool) -> Self {
        Self {
            groups: Vec::new(),
            groups_synced: 0,
            groups_created: 0,
            groups_skipped: 0,
            users_created: 0,
            users_skipped: 0,
            memberships_added: 0,
            memberships_removed: 0,
            errors: 0,
            error_details: None,
            dry_run,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn record(&mut self, outcome: GroupOutcome) {
        if outcome.skipped.is_some() {
            self.groups_skipped += 1;
        } else {
            self.groups_synced += 1;
        }
        if outcome.group_created {
            self.groups_created += 1;
        }
        self.users_created += outcome.users_created;
        self.users_skipped += outcome.users_skipped;
        self.memberships_added += outcome.memberships_added;
        self.memberships_removed += outcome.memberships_removed;
        self.errors += outcome.errors;
        if let Some(details) = &outcome.error_details {
            self.error_details
                .get_or_insert_with(String::new)
                .push_str(details);
        }
        self.groups.push(outcome);
    }
}

/// Drives one full pass: resolve desired membership, compare each group with
/// the target system, and apply the resulting plan.
pub struct SyncEngine {
    directory: Arc<dyn DirectoryAdapter>,
    target: Arc<dyn TargetDirectoryClient>,
    options: SyncOptions,
}

impl SyncEngine {
    pub fn new(
        directory: Arc<dyn DirectoryAdapter>,
        target: Arc<dyn TargetDirectoryClient>,
        options: SyncOptions,
    ) -> Self {
        Self {
            directory,
            target,
            options,
        }
    }

    /// Run a sync pass over the configured group names.
    ///
    /// Returns an error only for fatal conditions (directory unreachable,
    /// wildcard matching nothing). Per-group and per-mutation failures are
    /// recorded in the summary.
    pub async fn run(&self, groups: &[String]) -> Result<SyncSummary> {
        let mut summary = SyncSummary::new(self.options.dry_run);
        info!(
            directory = self.directory.flavor_name(),
            target = self.target.name(),
            groups = groups.len(),
            wildcard = self.options.resolve.wildcard,
            recursive = self.options.resolve.recursive,
            lowercase = self.options.resolve.lowercase,
            skip_disabled = self.options.resolve.skip_disabled,
            dry_run = self.options.dry_run,
            "Starting group sync"
        );

        let resolver = GroupResolver::new(self.directory.as_ref(), self.options.resolve);
        let specs = resolver.parse_specs(groups);
        let desired = resolver.resolve(&specs).await?;

        for skipped in &desired.skipped {
            summary.record(GroupOutcome::new(&skipped.name).skip(&skipped.reason));
        }

        let (target_groups, mut known_users) = match self.target_inventory().await {
            Ok(inventory) => inventory,
            Err(e) => {
                error!(error = %e, "failed to read target system state, skipping all groups");
                for group in &desired.groups {
                    summary.record(GroupOutcome::new(&group.group.name).skip(&e));
                }
                summary.completed_at = Some(Utc::now());
                return Ok(summary);
            }
        };

        for group in &desired.groups {
            let outcome = self
                .sync_group(group, &target_groups, &mut known_users)
                .await;
            summary.record(outcome);
        }

        summary.completed_at = Some(Utc::now());
        info!(
            groups_synced = summary.groups_synced,
            groups_skipped = summary.groups_skipped,
            groups_created = summary.groups_created,
            users_created = summary.users_created,
            memberships_added = summary.memberships_added,
            memberships_removed = summary.memberships_removed,
            errors = summary.errors,
            "Group sync completed"
        );
        Ok(summary)
    }

    async fn target_inventory(&self) -> Result<(BTreeSet<String>, BTreeSet<String>)> {
        let groups = self.target.list_groups().await?;
        let users = self.target.list_users().await?;
        info!(
            groups = groups.len(),
            users = users.len(),
            "Loaded target system inventory"
        );
        Ok((groups, users))
    }

    async fn sync_group(
        &self,
        group: &DesiredGroup,
        target_groups: &BTreeSet<String>,
        known_users: &mut BTreeSet<String>,
    ) -> GroupOutcome {
        let name = group.group.name.as_str();
        let mut outcome = GroupOutcome::new(name);
        let desired = group.usernames();
        let exists = target_groups.contains(name);

        let observed = if exists {
            match self.target.group_members(name).await {
                Ok(members) => members,
                Err(e) => {
                    warn!(group = %name, error = %e, "failed to read target group members, skipping group");
                    return outcome.skip(&e);
                }
            }
        } else {
            BTreeSet::new()
        };

        let mut profiles = BTreeMap::new();
        for username in desired.difference(&*known_users) {
            let Some(identity) = group.members.get(username) else {
                continue;
            };
            match self.directory.user_attributes(&identity.dn).await {
                Ok(attrs) => {
                    profiles.insert(
                        username.clone(),
                        UserProfile::from_attributes(username, &attrs),
                    );
                }
                Err(e) => {
                    warn!(group = %name, user = %username, error = %e, "failed to read user attributes, skipping user");
                    outcome.users_skipped += 1;
                    record_error(&mut outcome, username, &e);
                }
            }
        }

        let plan = plan_group(
            name,
            &desired,
            TargetGroupState {
                exists,
                observed: &observed,
                known_users: &*known_users,
            },
            &profiles,
        );

        if plan.is_empty() {
            info!(group = %name, members = desired.len(), "group already in sync");
        } else if self.options.dry_run {
            for mutation in &plan.mutations {
                info!(group = %name, mutation = %mutation, "dry run: planned");
            }
            outcome.group_created = plan.creates_group();
            outcome.users_created = plan.users_to_create().count() as u32;
            outcome.memberships_added = plan.additions().count() as u32;
            outcome.memberships_removed = plan.removals().count() as u32;
            // Later groups see planned users as existing.
            for profile in plan.users_to_create() {
                known_users.insert(profile.username.clone());
            }
        } else {
            self.apply(&plan, &mut outcome, known_users).await;
        }

        outcome.plan = Some(plan);
        outcome
    }

    /// Apply a plan in order: group, users, additions, removals.
    async fn apply(
        &self,
        plan: &MutationPlan,
        outcome: &mut GroupOutcome,
        known_users: &mut BTreeSet<String>,
    ) {
        let group = plan.group.as_str();

        if plan.creates_group() {
            match self.target.create_group(group).await {
                Ok(()) => {
                    info!(group = %group, "created group");
                    outcome.group_created = true;
                }
                Err(GroupSyncError::TargetConflict(msg)) => {
                    warn!(group = %group, detail = %msg, "group already exists, continuing");
                }
                Err(e) => {
                    warn!(group = %group, error = %e, "failed to create group, skipping group");
                    record_error(outcome, group, &e);
                    outcome.skipped = Some(e.to_string());
                    return;
                }
            }
        }

        let mut failed_users = HashSet::new();
        for profile in plan.users_to_create() {
            match self.target.create_user(profile).await {
                Ok(()) => {
                    info!(user = %profile.username, name = %profile.display_name, "created user");
                    outcome.users_created += 1;
                    known_users.insert(profile.username.clone());
                }
                Err(GroupSyncError::TargetConflict(msg)) => {
                    warn!(user = %profile.username, detail = %msg, "user already exists, continuing");
                    known_users.insert(profile.username.clone());
                }
                Err(e) => {
                    warn!(user = %profile.username, error = %e, "failed to create user, skipping user");
                    outcome.users_skipped += 1;
                    record_error(outcome, &profile.username, &e);
                    failed_users.insert(profile.username.as_str());
                }
            }
        }

        let additions: Vec<&str> = plan
            .additions()
            .filter(|u| !failed_users.contains(u))
            .collect();
        for (username, result) in self.apply_memberships(group, additions, true).await {
            match result {
                Ok(()) => {
                    info!(group = %group, user = %username, "added membership");
                    outcome.memberships_added += 1;
                }
                Err(e) => {
                    warn!(group = %group, user = %username, error = %e, "failed to add membership");
                    record_error(outcome, username, &e);
                }
            }
        }

        let removals: Vec<&str> = plan.removals().collect();
        for (username, result) in self.apply_memberships(group, removals, false).await {
            match result {
                Ok(()) => {
                    info!(group = %group, user = %username, "removed membership");
                    outcome.memberships_removed += 1;
                }
                Err(e) => {
                    warn!(group = %group, user = %username, error = %e, "failed to remove membership");
                    record_error(outcome, username, &e);
                }
            }
        }
    }

    /// Run one membership phase with bounded concurrency. Each username
    /// appears at most once per phase; cross-group races on the same user are
    /// serialized by the target client.
    async fn apply_memberships<'a>(
        &self,
        group: &str,
        usernames: Vec<&'a str>,
        add: bool,
    ) -> Vec<(&'a str, Result<()>)> {
        let concurrency = self.options.concurrency.max(1);
        let target = self.target.as_ref();
        let mut results: Vec<(&'a str, Result<()>)> = stream::iter(usernames)
            .map(|username| async move {
                let result = if add {
                    target.add_membership(username, group).await
                } else {
                    target.remove_membership(username, group).await
                };
                (username, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        results.sort_by(|a, b| a.0.cmp(b.0));
        results
    }
}

/// Record a per-item error in the group outcome, incrementing the error count
/// and appending the subject and error message to the error details string.
fn record_error(outcome: &mut GroupOutcome, subject: &str, error: &dyn std::fmt::Display) {
    outcome.errors += 1;
    outcome
        .error_details
        .get_or_insert_with(String::new)
        .push_str(&format!("{}: {}\n", subject, error));
}
