use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use groupsync_core::config::GroupSyncConfig;
use groupsync_core::models::Mutation;
use groupsync_core::resolver::ResolveOptions;
use groupsync_core::sync::{GroupOutcome, SyncEngine, SyncOptions, SyncSummary};
use groupsync_teamcity::TeamCityClient;
use tracing::info;

/// Command-line toggles for one sync run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncFlags {
    pub wildcard: bool,
    pub recursive: bool,
    pub lowercase: bool,
    pub skip_disabled: bool,
    pub dry_run: bool,
}

impl SyncFlags {
    fn options(&self, config: &GroupSyncConfig) -> SyncOptions {
        SyncOptions {
            resolve: ResolveOptions {
                wildcard: self.wildcard,
                recursive: self.recursive,
                lowercase: self.lowercase,
                skip_disabled: self.skip_disabled,
            },
            dry_run: self.dry_run,
            concurrency: config.sync.concurrency,
        }
    }
}

/// Run a sync: resolve the configured directory groups and converge the
/// TeamCity groups of the same name.
pub async fn run(config_path: &str, flags: SyncFlags) -> anyhow::Result<()> {
    let config = GroupSyncConfig::load(Path::new(config_path))?;
    config.validate()?;

    info!("Loaded configuration from {}", config_path);

    let directory = groupsync_ldap::connect(&config).await?;
    let target = Arc::new(TeamCityClient::new(&config.teamcity)?);

    let start = Instant::now();
    let engine = SyncEngine::new(directory, target, flags.options(&config));
    let summary = engine.run(&config.ldap.groups).await?;

    print_summary(&summary, &config.ldap.contact_label);
    println!("  Duration:            {:.1}s", start.elapsed().as_secs_f64());

    if summary.dry_run {
        println!();
        println!("This was a dry run. No changes were made to TeamCity.");
        println!("Run without --dry-run to apply changes.");
    }

    Ok(())
}

fn print_summary(summary: &SyncSummary, contact_label: &str) {
    if summary.dry_run {
        for outcome in &summary.groups {
            let Some(plan) = outcome.plan.as_ref().filter(|p| !p.is_empty()) else {
                continue;
            };
            println!("Plan for {}:", plan.group);
            for mutation in &plan.mutations {
                println!("  {}", describe(mutation, contact_label));
            }
        }
        println!();
    }

    if !summary.groups.is_empty() {
        println!("Groups:");
        for outcome in &summary.groups {
            println!("  {}", group_line(outcome));
        }
        println!();
    }

    println!(
        "Group sync {}!",
        if summary.dry_run {
            "preview"
        } else {
            "completed"
        }
    );
    println!("  Groups synced:       {}", summary.groups_synced);
    println!("  Groups skipped:      {}", summary.groups_skipped);
    println!("  Groups created:      {}", summary.groups_created);
    println!("  Users created:       {}", summary.users_created);
    println!("  Users skipped:       {}", summary.users_skipped);
    println!("  Memberships added:   {}", summary.memberships_added);
    println!("  Memberships removed: {}", summary.memberships_removed);
    println!("  Errors:              {}", summary.errors);

    if let Some(ref details) = summary.error_details {
        println!("  Error details:");
        for line in details.lines() {
            println!("    {}", line);
        }
    }
}

/// One line per group: what happened to it, or why it was skipped.
fn group_line(outcome: &GroupOutcome) -> String {
    if let Some(reason) = &outcome.skipped {
        return format!("{}: skipped ({})", outcome.group, reason);
    }
    let mut parts = Vec::new();
    if outcome.group_created {
        parts.push("group created".to_string());
    }
    parts.push(format!("users created {}", outcome.users_created));
    parts.push(format!("added {}", outcome.memberships_added));
    parts.push(format!("removed {}", outcome.memberships_removed));
    if outcome.errors > 0 {
        parts.push(format!("errors {}", outcome.errors));
    }
    format!("{}: {}", outcome.group, parts.join(", "))
}

fn describe(mutation: &Mutation, contact_label: &str) -> String {
    match mutation {
        Mutation::CreateUser { profile } => match profile.email.as_deref() {
            Some(contact) => format!("{mutation}, {contact_label}: {contact}"),
            None => mutation.to_string(),
        },
        _ => mutation.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groupsync_core::models::UserProfile;

    #[test]
    fn describe_user_creation_with_contact_label() {
        let mutation = Mutation::CreateUser {
            profile: UserProfile {
                username: "alice".to_string(),
                display_name: "Alice Liddell".to_string(),
                email: Some("alice@example.com".to_string()),
            },
        };
        assert_eq!(
            describe(&mutation, "Email"),
            "create user alice (Alice Liddell), Email: alice@example.com"
        );
    }

    #[test]
    fn describe_membership_change() {
        let mutation = Mutation::AddMembership {
            group: "App.Admins".to_string(),
            username: "alice".to_string(),
        };
        assert_eq!(describe(&mutation, "Email"), "add alice to App.Admins");
    }

    #[test]
    fn group_line_reports_counts() {
        let outcome = GroupOutcome {
            group: "App.Admins".to_string(),
            group_created: true,
            users_created: 1,
            memberships_added: 2,
            memberships_removed: 1,
            ..Default::default()
        };
        assert_eq!(
            group_line(&outcome),
            "App.Admins: group created, users created 1, added 2, removed 1"
        );
    }

    #[test]
    fn group_line_reports_errors() {
        let outcome = GroupOutcome {
            group: "App.Users".to_string(),
            memberships_added: 1,
            errors: 1,
            ..Default::default()
        };
        assert_eq!(
            group_line(&outcome),
            "App.Users: users created 0, added 1, removed 0, errors 1"
        );
    }

    #[test]
    fn group_line_reports_skip_reason() {
        let outcome = GroupOutcome {
            group: "Missing".to_string(),
            skipped: Some("group not found: Missing".to_string()),
            errors: 1,
            ..Default::default()
        };
        assert_eq!(group_line(&outcome), "Missing: skipped (group not found: Missing)");
    }

    #[test]
    fn flags_map_to_options() {
        let config: GroupSyncConfig = toml::from_str(
            r#"
            [ldap]
            uri = "ldap://ldap.example.com"
            base = "dc=example,dc=com"
            groups = "App.Admins"

            [teamcity]
            server = "https://teamcity.example.com"

            [sync]
            concurrency = 4
            "#,
        )
        .unwrap();
        let flags = SyncFlags {
            recursive: true,
            dry_run: true,
            ..Default::default()
        };
        let options = flags.options(&config);
        assert!(options.resolve.recursive);
        assert!(!options.resolve.wildcard);
        assert!(options.dry_run);
        assert_eq!(options.concurrency, 4);
    }
}
