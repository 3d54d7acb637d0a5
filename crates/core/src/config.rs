//! TOML-based configuration for group sync.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{GroupSyncError, Result};

/// Placeholder substituted into filter templates.
pub const PLACEHOLDER: &str = "%s";

/// Top-level configuration, deserialized from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSyncConfig {
    pub ldap: LdapConfig,
    #[serde(default)]
    pub ad: AdConfig,
    #[serde(default)]
    pub openldap: GenericLdapConfig,
    pub teamcity: TeamCityConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Directory connection and the group specs to sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdapConfig {
    pub uri: String,
    pub base: String,
    #[serde(default)]
    pub bind_user: String,
    #[serde(default)]
    pub bind_password: String,
    /// Group names or wildcard patterns. Accepts a TOML array or a
    /// comma-separated string.
    #[serde(deserialize_with = "deserialize_group_list")]
    pub groups: Vec<String>,
    #[serde(default, rename = "type")]
    pub flavor: DirectoryFlavor,
    #[serde(default = "default_contact_attribute")]
    pub contact_attribute: String,
    #[serde(default = "default_contact_label")]
    pub contact_label: String,
    #[serde(default = "default_true")]
    pub tls_verify: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Supported directory flavors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DirectoryFlavor {
    #[serde(rename = "activedirectory")]
    ActiveDirectory,
    #[default]
    #[serde(rename = "generic", alias = "openldap")]
    Generic,
}

/// Active Directory filter templates and attribute names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdConfig {
    #[serde(default = "default_ad_filter_group")]
    pub filter_group: String,
    #[serde(default = "default_ad_filter_user")]
    pub filter_user: String,
    #[serde(default = "default_ad_filter_disabled")]
    pub filter_disabled: String,
    /// Transitive membership filter; `%s` is the group DN. Set to an empty
    /// string to make recursive resolution walk nested groups itself.
    #[serde(default = "default_ad_filter_member_of")]
    pub filter_member_of: Option<String>,
    #[serde(default = "default_member_attribute")]
    pub group_attribute: String,
    #[serde(default = "default_ad_user_attribute")]
    pub user_attribute: String,
}

impl Default for AdConfig {
    fn default() -> Self {
        Self {
            filter_group: default_ad_filter_group(),
            filter_user: default_ad_filter_user(),
            filter_disabled: default_ad_filter_disabled(),
            filter_member_of: default_ad_filter_member_of(),
            group_attribute: default_member_attribute(),
            user_attribute: default_ad_user_attribute(),
        }
    }
}

impl AdConfig {
    /// The transitive membership filter, if one is configured.
    pub fn member_of_filter(&self) -> Option<&str> {
        self.filter_member_of
            .as_deref()
            .filter(|f| !f.trim().is_empty())
    }
}

fn default_ad_filter_group() -> String {
    "(&(objectClass=group)(name=%s))".into()
}

fn default_ad_filter_user() -> String {
    "(objectClass=user)(objectCategory=Person)".into()
}

fn default_ad_filter_disabled() -> String {
    "(!(userAccountControl:1.2.840.113556.1.4.803:=2))".into()
}

fn default_ad_filter_member_of() -> Option<String> {
    Some("(memberOf:1.2.840.113556.1.4.1941:=%s)".into())
}

fn default_ad_user_attribute() -> String {
    "sAMAccountName".into()
}

/// Generic LDAP (OpenLDAP-style) filter templates and attribute names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenericLdapConfig {
    #[serde(default, rename = "type")]
    pub group_object: GroupObjectType,
    #[serde(default = "default_generic_filter_group")]
    pub filter_group: String,
    /// User lookup; `%s` is the uid taken from the member reference.
    #[serde(default = "default_generic_filter_user")]
    pub filter_user: String,
    #[serde(default)]
    pub filter_disabled: Option<String>,
    #[serde(default = "default_member_attribute")]
    pub group_attribute: String,
    #[serde(default = "default_generic_user_attribute")]
    pub user_attribute: String,
}

impl Default for GenericLdapConfig {
    fn default() -> Self {
        Self {
            group_object: GroupObjectType::default(),
            filter_group: default_generic_filter_group(),
            filter_user: default_generic_filter_user(),
            filter_disabled: None,
            group_attribute: default_member_attribute(),
            user_attribute: default_generic_user_attribute(),
        }
    }
}

fn default_generic_filter_group() -> String {
    "(&(objectClass=groupOfNames)(cn=%s))".into()
}

fn default_generic_filter_user() -> String {
    "(&(objectClass=inetOrgPerson)(uid=%s))".into()
}

fn default_generic_user_attribute() -> String {
    "uid".into()
}

/// Object class of groups in a generic directory. Decides how member
/// attribute values map to a user id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GroupObjectType {
    /// `member` values are full DNs; the uid is the first RDN value.
    #[default]
    GroupOfNames,
    /// `uniqueMember` values are DNs with an optional `#uid` suffix.
    GroupOfUniqueNames,
    /// `memberUid` values are bare user ids.
    PosixGroup,
}

/// Target (TeamCity) server connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamCityConfig {
    pub server: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_true")]
    pub tls_verify: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Sync pass tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum concurrent membership mutations within one group phase.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

fn default_member_attribute() -> String {
    "member".into()
}

fn default_contact_attribute() -> String {
    "mail".into()
}

fn default_contact_label() -> String {
    "Email".into()
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_concurrency() -> usize {
    1
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GroupList {
    Joined(String),
    Items(Vec<String>),
}

fn deserialize_group_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<String> = match GroupList::deserialize(deserializer)? {
        GroupList::Joined(s) => s.split(',').map(str::to_string).collect(),
        GroupList::Items(items) => items,
    };
    Ok(raw
        .into_iter()
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .collect())
}

impl GroupSyncConfig {
    /// Load configuration from a TOML file at the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| GroupSyncError::Config(format!("failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Validate the configuration, returning an error for invalid combinations.
    pub fn validate(&self) -> Result<()> {
        let uri = url::Url::parse(&self.ldap.uri)
            .map_err(|e| GroupSyncError::Config(format!("ldap.uri is not a valid URL: {e}")))?;
        if !matches!(uri.scheme(), "ldap" | "ldaps") {
            return Err(GroupSyncError::Config(format!(
                "ldap.uri must use ldap:// or ldaps://, got {}://",
                uri.scheme()
            )));
        }

        if self.ldap.base.trim().is_empty() {
            return Err(GroupSyncError::Config("ldap.base must not be empty".into()));
        }

        if self.ldap.groups.is_empty() {
            return Err(GroupSyncError::Config(
                "ldap.groups must list at least one group".into(),
            ));
        }

        if self.ldap.contact_attribute.trim().is_empty() {
            return Err(GroupSyncError::Config(
                "ldap.contact_attribute must not be empty".into(),
            ));
        }

        match self.ldap.flavor {
            DirectoryFlavor::ActiveDirectory => {
                require_placeholder("ad.filter_group", &self.ad.filter_group)?;
                if let Some(member_of) = self.ad.member_of_filter() {
                    require_placeholder("ad.filter_member_of", member_of)?;
                }
            }
            DirectoryFlavor::Generic => {
                require_placeholder("openldap.filter_group", &self.openldap.filter_group)?;
                require_placeholder("openldap.filter_user", &self.openldap.filter_user)?;
            }
        }

        let server = url::Url::parse(&self.teamcity.server).map_err(|e| {
            GroupSyncError::Config(format!("teamcity.server is not a valid URL: {e}"))
        })?;
        if !matches!(server.scheme(), "http" | "https") {
            return Err(GroupSyncError::Config(format!(
                "teamcity.server must use http:// or https://, got {}://",
                server.scheme()
            )));
        }

        if self.sync.concurrency == 0 {
            return Err(GroupSyncError::Config(
                "sync.concurrency must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

fn require_placeholder(key: &str, template: &str) -> Result<()> {
    if template.contains(PLACEHOLDER) {
        Ok(())
    } else {
        Err(GroupSyncError::Config(format!(
            "{key} must contain the {PLACEHOLDER} placeholder"
        )))
    }
}
