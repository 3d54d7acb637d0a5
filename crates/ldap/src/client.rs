//! Bound LDAP connection shared by both directory flavors.

use std::time::Duration;

use groupsync_core::config::LdapConfig;
use groupsync_core::error::{GroupSyncError, Result};
use groupsync_core::models::{DirectoryGroup, UserAttributes};
use ldap3::result::LdapError;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapResult, ResultEntry, Scope, SearchEntry, SearchResult};
use tracing::debug;

/// `noSuchObject` result code, returned when a base-scoped search names a
/// DN that does not exist.
const RC_NO_SUCH_OBJECT: u32 = 32;

/// Attribute naming a group in search results.
pub const GROUP_NAME_ATTRIBUTE: &str = "cn";

/// LDAP client holding one bound connection for the whole sync pass.
pub struct LdapClient {
    ldap: Ldap,
    base: String,
    contact_attribute: String,
}

impl LdapClient {
    /// Connect and bind. Any failure here means the directory is unavailable.
    pub async fn connect(config: &LdapConfig) -> Result<Self> {
        let settings = LdapConnSettings::new()
            .set_no_tls_verify(!config.tls_verify)
            .set_conn_timeout(Duration::from_secs(config.timeout_secs));
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &config.uri)
            .await
            .map_err(|e| GroupSyncError::DirectoryUnavailable(format!("LDAP connect failed: {e}")))?;

        ldap3::drive!(conn);

        ldap.simple_bind(&config.bind_user, &config.bind_password)
            .await
            .map_err(|e| GroupSyncError::DirectoryUnavailable(format!("LDAP bind failed: {e}")))?
            .success()
            .map_err(|e| GroupSyncError::DirectoryUnavailable(format!("LDAP bind rejected: {e}")))?;

        debug!(uri = %config.uri, "LDAP bind successful");
        Ok(Self {
            ldap,
            base: config.base.clone(),
            contact_attribute: config.contact_attribute.clone(),
        })
    }

    /// Subtree search under the configured base.
    pub async fn search(&self, filter: &str, attrs: &[&str]) -> Result<Vec<SearchEntry>> {
        self.search_at(&self.base, Scope::Subtree, filter, attrs)
            .await
    }

    /// Base-scoped search of a single entry. A missing entry is `None`.
    pub async fn lookup(&self, dn: &str, filter: &str, attrs: &[&str]) -> Result<Option<SearchEntry>> {
        Ok(self
            .search_at(dn, Scope::Base, filter, attrs)
            .await?
            .into_iter()
            .next())
    }

    async fn search_at(
        &self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<SearchEntry>> {
        debug!(base = %base, filter = %filter, "LDAP search");
        let mut ldap = self.ldap.clone();
        let outcome = ldap.search(base, scope, filter, attrs.to_vec()).await;
        search_outcome(outcome)
    }

    /// Build a group from its entry, fetching the rest of the member
    /// attribute when the server returned it in ranges.
    pub async fn group(
        &self,
        entry: &SearchEntry,
        name: &str,
        member_attribute: &str,
    ) -> Result<DirectoryGroup> {
        let mut group = group_from_entry(entry, name, member_attribute);
        let Some(first) = member_range(entry, member_attribute) else {
            return Ok(group);
        };

        group.member_refs = first.values;
        let mut next = first.next;
        while let Some(start) = next {
            let attr = format!("{member_attribute};range={start}-*");
            let page = self
                .lookup(&entry.dn, "(objectClass=*)", &[attr.as_str()])
                .await?
                .and_then(|e| member_range(&e, member_attribute))
                .ok_or_else(|| {
                    GroupSyncError::Directory(format!(
                        "incomplete {member_attribute} values for {}",
                        entry.dn
                    ))
                })?;
            if page.next.is_some_and(|n| n <= start) {
                return Err(GroupSyncError::Directory(format!(
                    "{member_attribute} range for {} did not advance",
                    entry.dn
                )));
            }
            group.member_refs.extend(page.values);
            next = page.next;
        }

        debug!(group = %name, members = group.member_refs.len(), "fetched ranged member attribute");
        Ok(group)
    }

    /// Name, contact and given name of the user at `dn`.
    pub async fn user_attributes(&self, dn: &str) -> Result<UserAttributes> {
        let entry = self
            .lookup(
                dn,
                "(objectClass=*)",
                &["givenName", "sn", self.contact_attribute.as_str()],
            )
            .await?
            .ok_or_else(|| GroupSyncError::Directory(format!("no directory entry for {dn}")))?;

        Ok(UserAttributes {
            given_name: optional_attr(&entry, "givenName"),
            surname: optional_attr(&entry, "sn"),
            contact: optional_attr(&entry, &self.contact_attribute),
        })
    }
}

/// Map a search call to entries. Errors from the call itself mean the
/// connection is gone; an error result code is a failed query.
fn search_outcome(outcome: std::result::Result<SearchResult, LdapError>) -> Result<Vec<SearchEntry>> {
    let SearchResult(entries, result) = outcome
        .map_err(|e| GroupSyncError::DirectoryUnavailable(format!("LDAP search failed: {e}")))?;
    result_entries(entries, result)
}

fn result_entries(entries: Vec<ResultEntry>, result: LdapResult) -> Result<Vec<SearchEntry>> {
    match result.rc {
        0 => Ok(entries.into_iter().map(SearchEntry::construct).collect()),
        RC_NO_SUCH_OBJECT => Ok(Vec::new()),
        _ => Err(GroupSyncError::Directory(format!("LDAP search error: {result}"))),
    }
}

/// One page of a ranged attribute (`member;range=0-1499`).
#[derive(Debug, PartialEq, Eq)]
pub struct MemberRange {
    pub values: Vec<String>,
    /// First index of the next page; `None` once the server sent `*`.
    pub next: Option<u64>,
}

/// Find a ranged variant of `attr` in `entry`, if the server paged it.
pub fn member_range(entry: &SearchEntry, attr: &str) -> Option<MemberRange> {
    let prefix = format!("{};range=", attr.to_ascii_lowercase());
    entry.attrs.iter().find_map(|(name, values)| {
        let lower = name.to_ascii_lowercase();
        let (_, high) = lower.strip_prefix(&prefix)?.split_once('-')?;
        let next = match high {
            "*" => None,
            n => Some(n.parse::<u64>().ok()? + 1),
        };
        Some(MemberRange {
            values: values.clone(),
            next,
        })
    })
}

/// Build a [`DirectoryGroup`] from a group entry. Ranged member values are
/// not followed here; see [`LdapClient::group`].
pub fn group_from_entry(entry: &SearchEntry, name: &str, member_attribute: &str) -> DirectoryGroup {
    DirectoryGroup {
        dn: entry.dn.clone(),
        name: name.to_string(),
        member_refs: all_attrs(entry, member_attribute),
    }
}

/// Extract the first value of an attribute, returning empty string if missing.
/// Attribute names are matched case-insensitively.
pub fn first_attr(entry: &SearchEntry, attr: &str) -> String {
    optional_attr(entry, attr).unwrap_or_default()
}

/// Extract the first value of an attribute as Option.
pub fn optional_attr(entry: &SearchEntry, attr: &str) -> Option<String> {
    attr_values(entry, attr).and_then(|v| v.first()).cloned()
}

/// All values of an attribute.
pub fn all_attrs(entry: &SearchEntry, attr: &str) -> Vec<String> {
    attr_values(entry, attr).cloned().unwrap_or_default()
}

fn attr_values<'a>(entry: &'a SearchEntry, attr: &str) -> Option<&'a Vec<String>> {
    entry.attrs.get(attr).or_else(|| {
        entry
            .attrs
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attr))
            .map(|(_, values)| values)
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    pub(crate) fn entry(dn: &str, attrs: &[(&str, &[&str])]) -> SearchEntry {
        SearchEntry {
            dn: dn.to_string(),
            attrs: attrs
                .iter()
                .map(|(name, values)| {
                    (
                        name.to_string(),
                        values.iter().map(|v| v.to_string()).collect(),
                    )
                })
                .collect::<HashMap<_, _>>(),
            bin_attrs: HashMap::new(),
        }
    }

    #[test]
    fn first_attr_matches_case_insensitively() {
        let e = entry("uid=alice,dc=example", &[("sAMAccountName", &["alice"])]);
        assert_eq!(first_attr(&e, "samaccountname"), "alice");
        assert_eq!(first_attr(&e, "sAMAccountName"), "alice");
        assert_eq!(first_attr(&e, "mail"), "");
    }

    #[test]
    fn optional_attr_missing_is_none() {
        let e = entry("uid=alice,dc=example", &[("givenName", &["Alice"])]);
        assert_eq!(optional_attr(&e, "givenName"), Some("Alice".to_string()));
        assert_eq!(optional_attr(&e, "sn"), None);
    }

    #[test]
    fn group_from_entry_collects_members() {
        let e = entry(
            "CN=App.Admins,OU=Groups,DC=example,DC=com",
            &[
                ("cn", &["App.Admins"]),
                ("member", &["CN=alice,DC=example,DC=com", "CN=bob,DC=example,DC=com"]),
            ],
        );
        let group = group_from_entry(&e, "App.Admins", "member");
        assert_eq!(group.dn, "CN=App.Admins,OU=Groups,DC=example,DC=com");
        assert_eq!(group.name, "App.Admins");
        assert_eq!(group.member_refs.len(), 2);
    }

    #[test]
    fn ranged_member_attribute_is_detected() {
        let e = entry(
            "CN=Big,OU=Groups,DC=example,DC=com",
            &[("member;range=0-1", &["CN=a,DC=example", "CN=b,DC=example"])],
        );
        assert!(group_from_entry(&e, "Big", "member").member_refs.is_empty());
        assert_eq!(
            member_range(&e, "member"),
            Some(MemberRange {
                values: vec!["CN=a,DC=example".to_string(), "CN=b,DC=example".to_string()],
                next: Some(2),
            })
        );
    }

    #[test]
    fn last_range_page_ends_with_star() {
        let e = entry("CN=Big,DC=example", &[("Member;Range=2-*", &["CN=c,DC=example"])]);
        let page = member_range(&e, "member").unwrap();
        assert_eq!(page.values.len(), 1);
        assert_eq!(page.next, None);
    }

    #[test]
    fn plain_member_attribute_is_not_ranged() {
        let e = entry("CN=Small,DC=example", &[("member", &["CN=a,DC=example"])]);
        assert_eq!(member_range(&e, "member"), None);
        let e = entry("CN=Odd,DC=example", &[("member;range=0-x", &["CN=a,DC=example"])]);
        assert_eq!(member_range(&e, "member"), None);
    }

    fn ldap_result(rc: u32) -> LdapResult {
        LdapResult {
            rc,
            matched: String::new(),
            text: String::new(),
            refs: Vec::new(),
            ctrls: Vec::new(),
        }
    }

    #[test]
    fn transport_failure_is_unavailable() {
        let dropped = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
        let err = search_outcome(Err(LdapError::from(dropped))).unwrap_err();
        assert!(matches!(err, GroupSyncError::DirectoryUnavailable(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn error_result_code_is_query_failure() {
        let err = search_outcome(Ok(SearchResult(Vec::new(), ldap_result(50)))).unwrap_err();
        assert!(matches!(err, GroupSyncError::Directory(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn missing_base_entry_is_empty() {
        let entries = search_outcome(Ok(SearchResult(Vec::new(), ldap_result(32)))).unwrap();
        assert!(entries.is_empty());
        let entries = result_entries(Vec::new(), ldap_result(0)).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn group_without_members_has_empty_refs() {
        let e = entry("cn=empty,dc=example", &[("cn", &["empty"])]);
        assert!(group_from_entry(&e, "empty", "memberUid").member_refs.is_empty());
    }
}
