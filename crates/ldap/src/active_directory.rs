//! Active Directory flavor.

use async_trait::async_trait;
use groupsync_core::config::AdConfig;
use groupsync_core::directory::{DirectoryAdapter, MemberLookup};
use groupsync_core::error::Result;
use groupsync_core::models::{DirectoryGroup, DirectoryUser, GroupPattern, ResolvedMember, UserAttributes};
use tracing::debug;

use crate::client::{first_attr, LdapClient, GROUP_NAME_ATTRIBUTE};
use crate::filter;

const GROUP_OBJECT_CLASS: &str = "group";

/// Active Directory: members are DNs, accounts carry `sAMAccountName`, and
/// nested membership can be queried in one shot with the transitive
/// `memberOf` matching rule.
pub struct ActiveDirectory {
    client: LdapClient,
    config: AdConfig,
}

impl ActiveDirectory {
    pub fn new(client: LdapClient, config: AdConfig) -> Self {
        Self { client, config }
    }

    fn user_from_entry(&self, entry: &ldap3::SearchEntry) -> Option<DirectoryUser> {
        let username = first_attr(entry, &self.config.user_attribute);
        if username.is_empty() {
            return None;
        }
        Some(DirectoryUser {
            dn: entry.dn.clone(),
            username,
        })
    }
}

/// User filter, with the disabled-account exclusion conjoined on request.
fn user_filter(config: &AdConfig, skip_disabled: bool) -> String {
    let disabled = if skip_disabled {
        config.filter_disabled.as_str()
    } else {
        ""
    };
    filter::and(&[config.filter_user.as_str(), disabled])
}

/// Transitive membership filter for a group DN, if configured.
fn member_of_filter(config: &AdConfig, group_dn: &str, skip_disabled: bool) -> Option<String> {
    let member_of = filter::render(config.member_of_filter()?, &filter::escape_value(group_dn));
    let disabled = if skip_disabled {
        config.filter_disabled.as_str()
    } else {
        ""
    };
    Some(filter::and(&[config.filter_user.as_str(), member_of.as_str(), disabled]))
}

#[async_trait]
impl DirectoryAdapter for ActiveDirectory {
    async fn expand_wildcard(&self, pattern: &GroupPattern) -> Result<Vec<DirectoryGroup>> {
        let search = filter::render(&self.config.filter_group, &filter::escape_pattern(pattern));
        let entries = self
            .client
            .search(&search, &[GROUP_NAME_ATTRIBUTE, self.config.group_attribute.as_str()])
            .await?;

        let mut groups = Vec::with_capacity(entries.len());
        for entry in &entries {
            let name = first_attr(entry, GROUP_NAME_ATTRIBUTE);
            if name.is_empty() {
                continue;
            }
            groups.push(self.client.group(entry, &name, &self.config.group_attribute).await?);
        }
        Ok(groups)
    }

    async fn find_group(&self, name: &str) -> Result<Option<DirectoryGroup>> {
        let search = filter::render(&self.config.filter_group, &filter::escape_value(name));
        let entries = self
            .client
            .search(&search, &[self.config.group_attribute.as_str()])
            .await?;
        match entries.first() {
            Some(entry) => Ok(Some(
                self.client.group(entry, name, &self.config.group_attribute).await?,
            )),
            None => Ok(None),
        }
    }

    async fn resolve_member(
        &self,
        _group: &DirectoryGroup,
        reference: &str,
        lookup: MemberLookup,
    ) -> Result<Option<ResolvedMember>> {
        let users = user_filter(&self.config, lookup.skip_disabled);
        if let Some(entry) = self
            .client
            .lookup(reference, &users, &[self.config.user_attribute.as_str()])
            .await?
        {
            return Ok(self.user_from_entry(&entry).map(ResolvedMember::User));
        }

        if !lookup.include_groups {
            return Ok(None);
        }

        let groups = filter::object_class(GROUP_OBJECT_CLASS);
        let nested = self
            .client
            .lookup(reference, &groups, &[GROUP_NAME_ATTRIBUTE, self.config.group_attribute.as_str()])
            .await?;
        let Some(entry) = nested else {
            return Ok(None);
        };
        let name = first_attr(&entry, GROUP_NAME_ATTRIBUTE);
        let group = self.client.group(&entry, &name, &self.config.group_attribute).await?;
        Ok(Some(ResolvedMember::Group(group)))
    }

    async fn transitive_members(
        &self,
        group: &DirectoryGroup,
        skip_disabled: bool,
    ) -> Result<Option<Vec<DirectoryUser>>> {
        let Some(search) = member_of_filter(&self.config, &group.dn, skip_disabled) else {
            return Ok(None);
        };
        let entries = self
            .client
            .search(&search, &[self.config.user_attribute.as_str()])
            .await?;
        debug!(group = %group.name, entries = entries.len(), "transitive membership query");
        Ok(Some(
            entries
                .iter()
                .filter_map(|entry| self.user_from_entry(entry))
                .collect(),
        ))
    }

    async fn user_attributes(&self, dn: &str) -> Result<UserAttributes> {
        self.client.user_attributes(dn).await
    }

    fn flavor_name(&self) -> &str {
        "activedirectory"
    }
}
