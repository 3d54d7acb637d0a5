//! Typed reqwest wrapper for the TeamCity REST API.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use groupsync_core::config::TeamCityConfig;
use groupsync_core::error::{GroupSyncError, Result};
use groupsync_core::lock::KeyedLocks;
use groupsync_core::models::UserProfile;
use groupsync_core::target::TargetDirectoryClient;
use reqwest::header::ACCEPT;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::models::{GroupDetail, GroupList, GroupRef, NewGroup, NewUser, UserList};

const REST_PATH: &str = "app/rest";

/// Maximum length of a TeamCity group key derived from a group name.
pub const GROUP_KEY_LENGTH: usize = 16;

/// Group key derived from a group name: its first 16 characters.
pub fn group_key(name: &str) -> String {
    name.chars().take(GROUP_KEY_LENGTH).collect()
}

/// HTTP client for TeamCity user and group management.
pub struct TeamCityClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    /// Group name -> reference, refreshed by `list_groups`.
    groups: Mutex<BTreeMap<String, GroupRef>>,
    user_locks: KeyedLocks,
}

impl TeamCityClient {
    /// Create a new client from configuration.
    pub fn new(config: &TeamCityConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.tls_verify)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GroupSyncError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.server.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            groups: Mutex::new(BTreeMap::new()),
            user_locks: KeyedLocks::new(),
        })
    }

    /// Override the base URL (for testing with wiremock).
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// REST endpoint for the given path segments, percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, REST_PATH))
            .map_err(|e| GroupSyncError::Config(format!("invalid TeamCity URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| GroupSyncError::Config(format!("invalid TeamCity URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
            .header(ACCEPT, "application/json")
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<Response> {
        let resp = request
            .send()
            .await
            .map_err(|e| GroupSyncError::TargetUnavailable(format!("{action} request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::CONFLICT || body.contains("already exists") {
            return Err(GroupSyncError::TargetConflict(format!(
                "{action} failed ({status}): {body}"
            )));
        }
        Err(GroupSyncError::TargetUnavailable(format!(
            "{action} failed ({status}): {body}"
        )))
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str], action: &str) -> Result<T> {
        let url = self.endpoint(segments)?;
        let resp = self.send(self.request(Method::GET, url), action).await?;
        resp.json::<T>()
            .await
            .map_err(|e| GroupSyncError::Serialization(format!("{action} parse failed: {e}")))
    }

    fn cache_groups(&self, groups: &[GroupRef]) {
        let mut cache = self.groups.lock().unwrap_or_else(|e| e.into_inner());
        cache.clear();
        cache.extend(groups.iter().map(|g| (g.name.clone(), g.clone())));
    }

    fn cached_group(&self, name: &str) -> Option<GroupRef> {
        self.groups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Reference for a group by name, refreshing the cache once on a miss.
    async fn group_ref(&self, name: &str) -> Result<GroupRef> {
        if let Some(group) = self.cached_group(name) {
            return Ok(group);
        }
        self.list_groups().await?;
        self.cached_group(name)
            .ok_or_else(|| GroupSyncError::GroupNotFound(format!("{name} (TeamCity)")))
    }

    async fn fetch_user_groups(&self, username: &str) -> Result<GroupList> {
        self.get_json(&["users", username, "groups"], "get user groups")
            .await
    }

    async fn put_user_groups(&self, username: &str, groups: &GroupList) -> Result<()> {
        let url = self.endpoint(&["users", username, "groups"])?;
        self.send(
            self.request(Method::PUT, url).json(groups),
            "update user groups",
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TargetDirectoryClient for TeamCityClient {
    async fn list_groups(&self) -> Result<BTreeSet<String>> {
        let list: GroupList = self.get_json(&["userGroups"], "list groups").await?;
        self.cache_groups(&list.group);
        Ok(list.group.into_iter().map(|g| g.name).collect())
    }

    async fn list_users(&self) -> Result<BTreeSet<String>> {
        let list: UserList = self.get_json(&["users"], "list users").await?;
        Ok(list.user.into_iter().map(|u| u.username).collect())
    }

    async fn group_members(&self, group: &str) -> Result<BTreeSet<String>> {
        let group_ref = self.group_ref(group).await?;
        let locator = format!("key:{}", group_ref.key);
        let detail: GroupDetail = self
            .get_json(&["userGroups", &locator], "get group")
            .await?;
        Ok(detail
            .users
            .map(|list| list.user.into_iter().map(|u| u.username).collect())
            .unwrap_or_default())
    }

    async fn user_groups(&self, username: &str) -> Result<BTreeSet<String>> {
        let list = self.fetch_user_groups(username).await?;
        Ok(list.group.into_iter().map(|g| g.name).collect())
    }

    async fn create_group(&self, group: &str) -> Result<()> {
        let body = NewGroup {
            name: group,
            key: group_key(group),
        };
        let url = self.endpoint(&["userGroups"])?;
        let resp = self
            .send(self.request(Method::POST, url).json(&body), "create group")
            .await?;

        let created = match resp.json::<GroupRef>().await {
            Ok(created) => created,
            Err(e) => {
                debug!(group = %group, error = %e, "unreadable create group response, caching derived key");
                GroupRef {
                    key: body.key,
                    name: group.to_string(),
                    href: None,
                }
            }
        };
        self.groups
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(group.to_string(), created);
        Ok(())
    }

    async fn create_user(&self, profile: &UserProfile) -> Result<()> {
        let body = NewUser {
            username: &profile.username,
            name: &profile.display_name,
            email: profile.email.as_deref().unwrap_or(""),
        };
        let url = self.endpoint(&["users"])?;
        self.send(self.request(Method::POST, url).json(&body), "create user")
            .await?;
        Ok(())
    }

    async fn add_membership(&self, username: &str, group: &str) -> Result<()> {
        let group_ref = self.group_ref(group).await?;
        let _guard = self.user_locks.lock(username).await;

        let mut current = self.fetch_user_groups(username).await?;
        if current
            .group
            .iter()
            .any(|g| g.key == group_ref.key || g.name == group_ref.name)
        {
            debug!(user = %username, group = %group, "already a member");
            return Ok(());
        }
        current.group.push(group_ref);
        self.put_user_groups(username, &current).await
    }

    async fn remove_membership(&self, username: &str, group: &str) -> Result<()> {
        let _guard = self.user_locks.lock(username).await;

        let mut current = self.fetch_user_groups(username).await?;
        let before = current.group.len();
        current.group.retain(|g| g.name != group);
        if current.group.len() == before {
            debug!(user = %username, group = %group, "not a member");
            return Ok(());
        }
        self.put_user_groups(username, &current).await
    }

    fn name(&self) -> &str {
        "teamcity"
    }
}
