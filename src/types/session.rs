use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::Uid;

/// The client address a session is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientIp {
    /// Not pinned; any client may present the token.
    Any,
    Addr(IpAddr),
}

impl ClientIp {
    #[must_use]
    pub fn admits(&self, remote: Option<IpAddr>) -> bool {
        match self {
            ClientIp::Any => true,
            ClientIp::Addr(pinned) => remote == Some(*pinned),
        }
    }
}

impl fmt::Display for ClientIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientIp::Any => f.write_str("any"),
            ClientIp::Addr(addr) => write!(f, "{addr}"),
        }
    }
}

/// Which modules a token opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessScope {
    All,
    Module(String),
}

impl AccessScope {
    #[must_use]
    pub fn allows(&self, module: &str) -> bool {
        match self {
            AccessScope::All => true,
            AccessScope::Module(name) => name == module,
        }
    }

    /// Module names end up inside token file names, so they are limited
    /// to ASCII alphanumerics and underscores.
    #[must_use]
    pub fn is_valid_module(name: &str) -> bool {
        !name.is_empty()
            && name != "all"
            && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
    }
}

impl fmt::Display for AccessScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessScope::All => f.write_str("all"),
            AccessScope::Module(name) => f.write_str(name),
        }
    }
}

/// A validated session.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    /// The token to present on the next request. Differs from the one that
    /// was validated when the token was rotated.
    pub token: String,
    pub uid: Uid,
    pub login_name: String,
    pub issued_at: DateTime<Utc>,
    pub session_id: String,
    pub client_ip: ClientIp,
    pub scope: AccessScope,
}
