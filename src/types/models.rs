use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

pub type Uid = u64;
pub type Gid = u64;

/// How an account proves its identity at login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthMethod {
    Internal,
    /// Delegated to an external directory server, binding as `name`.
    Directory { server: String, name: String },
}

impl AuthMethod {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            AuthMethod::Internal => "internal",
            AuthMethod::Directory { .. } => "directory",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub uid: Uid,
    pub login_name: String,
    pub user_name: String,
    pub email: String,
    #[serde(skip)]
    pub password_hash: Option<String>,
    pub auth_method: AuthMethod,
    pub first_name: String,
    pub last_name: String,
    pub quota: u64,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
}

impl Account {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }
}

/// An account together with its group memberships.
#[derive(Debug, Clone, Serialize)]
pub struct AccountInfo {
    #[serde(flatten)]
    pub account: Account,
    pub groups: Vec<String>,
    pub gids: Vec<Gid>,
}

/// Fields for a new account. `uid` is assigned when left empty.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub user_name: String,
    pub email: String,
    pub password: Option<String>,
    pub auth_method: AuthMethod,
    pub first_name: String,
    pub last_name: String,
    pub quota: u64,
    pub locked: bool,
    pub expires: Option<DateTime<Utc>>,
    pub uid: Option<Uid>,
}

impl NewAccount {
    #[must_use]
    pub fn internal(user_name: &str, email: &str, password: &str, quota: u64) -> Self {
        Self {
            user_name: user_name.to_string(),
            email: email.to_string(),
            password: Some(password.to_string()),
            auth_method: AuthMethod::Internal,
            first_name: String::new(),
            last_name: String::new(),
            quota,
            locked: false,
            expires: None,
            uid: None,
        }
    }
}

/// A partial account update. Keys that do not name a field end up in
/// `unknown` and are reported back instead of failing the update.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountPatch {
    pub user_name: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password: Option<String>,
    pub auth_method: Option<AuthMethod>,
    pub quota: Option<u64>,
    pub locked: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    pub expires: Option<Option<DateTime<Utc>>>,
    pub last_login: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

impl AccountPatch {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::InvalidField(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub gid: Gid,
    pub group_name: String,
    pub info: String,
    pub members: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupPatch {
    pub group_name: Option<String>,
    pub info: Option<String>,
    pub members: Option<Vec<String>>,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

impl GroupPatch {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::InvalidField(e.to_string()))
    }
}

/// Result of a mutation that tolerates partially bad input.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Outcome {
    pub changed: bool,
    pub notes: Vec<String>,
}

/// Accounts are addressed by login name or uid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountId {
    Name(String),
    Uid(Uid),
}

impl From<&str> for AccountId {
    fn from(name: &str) -> Self {
        AccountId::Name(name.to_string())
    }
}

impl From<Uid> for AccountId {
    fn from(uid: Uid) -> Self {
        AccountId::Uid(uid)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountId::Name(name) => f.write_str(name),
            AccountId::Uid(uid) => write!(f, "uid {uid}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupId {
    Name(String),
    Gid(Gid),
}

impl From<&str> for GroupId {
    fn from(name: &str) -> Self {
        GroupId::Name(name.to_string())
    }
}

impl From<Gid> for GroupId {
    fn from(gid: Gid) -> Self {
        GroupId::Gid(gid)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupId::Name(name) => f.write_str(name),
            GroupId::Gid(gid) => write!(f, "gid {gid}"),
        }
    }
}

// Distinguishes an explicit `null` (clear the value) from an absent key.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_patch_collects_unknown_keys() {
        let patch = AccountPatch::from_value(json!({
            "first_name": "Alice",
            "shoe_size": 38,
        }))
        .unwrap();

        assert_eq!(patch.first_name.as_deref(), Some("Alice"));
        assert!(patch.unknown.contains_key("shoe_size"));
        assert!(patch.expires.is_none());
    }

    #[test]
    fn test_patch_null_expires_clears() {
        let patch = AccountPatch::from_value(json!({ "expires": null })).unwrap();
        assert_eq!(patch.expires, Some(None));
    }

    #[test]
    fn test_patch_rejects_wrong_type() {
        let result = AccountPatch::from_value(json!({ "quota": "lots" }));
        assert!(matches!(result, Err(Error::InvalidField(_))));
    }

    #[test]
    fn test_auth_method_serialization() {
        let method = AuthMethod::Directory {
            server: "ldap.example.com".into(),
            name: "jdoe".into(),
        };
        let value = serde_json::to_value(&method).unwrap();
        assert_eq!(value["method"], "directory");
        assert_eq!(value["name"], "jdoe");
    }
}
