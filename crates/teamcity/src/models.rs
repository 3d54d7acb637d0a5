//! TeamCity REST API request/response structs.

use serde::{Deserialize, Serialize};

/// Reference to a user group, as listed by `/userGroups` and
/// `/users/{user}/groups`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupRef {
    pub key: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
}

/// List of groups. Also the whole-list body of `PUT /users/{user}/groups`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupList {
    #[serde(default)]
    pub group: Vec<GroupRef>,
}

/// A user entry as listed by `/users`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRef {
    pub username: String,
}

/// List of users.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserList {
    #[serde(default)]
    pub user: Vec<UserRef>,
}

/// A group with its direct members, from `/userGroups/key:{key}`.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupDetail {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub users: Option<UserList>,
}

/// Body of `POST /userGroups`.
#[derive(Debug, Clone, Serialize)]
pub struct NewGroup<'a> {
    pub name: &'a str,
    pub key: String,
}

/// Body of `POST /users`.
#[derive(Debug, Clone, Serialize)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub name: &'a str,
    pub email: &'a str,
}
