//! Generic LDAP flavor (OpenLDAP and friends).

use async_trait::async_trait;
use groupsync_core::config::{GenericLdapConfig, GroupObjectType};
use groupsync_core::directory::{DirectoryAdapter, MemberLookup};
use groupsync_core::error::Result;
use groupsync_core::models::{DirectoryGroup, DirectoryUser, GroupPattern, ResolvedMember, UserAttributes};
use tracing::debug;

use crate::client::{first_attr, LdapClient, GROUP_NAME_ATTRIBUTE};
use crate::dn::member_uid;
use crate::filter;

/// Generic LDAP directory. Member values are mapped to uids according to the
/// configured group object type, then each uid is looked up with the user
/// filter.
pub struct GenericLdap {
    client: LdapClient,
    config: GenericLdapConfig,
}

impl GenericLdap {
    pub fn new(client: LdapClient, config: GenericLdapConfig) -> Self {
        Self { client, config }
    }
}

/// Object class of groups for a configured group object type.
fn group_object_class(object_type: GroupObjectType) -> &'static str {
    match object_type {
        GroupObjectType::GroupOfNames => "groupOfNames",
        GroupObjectType::GroupOfUniqueNames => "groupOfUniqueNames",
        GroupObjectType::PosixGroup => "posixGroup",
    }
}

/// User lookup filter for one uid.
fn user_filter(config: &GenericLdapConfig, uid: &str, skip_disabled: bool) -> String {
    let user = filter::render(&config.filter_user, &filter::escape_value(uid));
    match config.filter_disabled.as_deref() {
        Some(disabled) if skip_disabled && !disabled.trim().is_empty() => {
            filter::and(&[user.as_str(), disabled])
        }
        _ => user,
    }
}

#[async_trait]
impl DirectoryAdapter for GenericLdap {
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
        group: &DirectoryGroup,
        reference: &str,
        lookup: MemberLookup,
    ) -> Result<Option<ResolvedMember>> {
        let Some(uid) = member_uid(reference, self.config.group_object) else {
            debug!(group = %group.name, reference = %reference, "unparseable member reference");
            return Ok(None);
        };

        let search = user_filter(&self.config, &uid, lookup.skip_disabled);
        let entries = self
            .client
            .search(&search, &[self.config.user_attribute.as_str()])
            .await?;
        if let Some(entry) = entries.first() {
            let username = first_attr(entry, &self.config.user_attribute);
            return Ok(Some(ResolvedMember::User(DirectoryUser {
                dn: entry.dn.clone(),
                username: if username.is_empty() { uid } else { username },
            })));
        }

        // posixGroup members are bare uids and never name a group.
        if !lookup.include_groups || self.config.group_object == GroupObjectType::PosixGroup {
            return Ok(None);
        }

        let groups = filter::object_class(group_object_class(self.config.group_object));
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

    /// Generic servers have no standard transitive membership filter; the
    /// resolver walks nested groups instead.
    async fn transitive_members(
        &self,
        _group: &DirectoryGroup,
        _skip_disabled: bool,
    ) -> Result<Option<Vec<DirectoryUser>>> {
        Ok(None)
    }

    async fn user_attributes(&self, dn: &str) -> Result<UserAttributes> {
        self.client.user_attributes(dn).await
    }

    fn flavor_name(&self) -> &str {
        "generic"
    }
}
