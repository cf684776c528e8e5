use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::{Error, Result};
use crate::types::{AccessScope, ClientIp, Uid};

const TOKEN_SUFFIX: &str = "tk";
const FIELD_COUNT: usize = 6;
const MIN_SESSION_HEX: usize = 32;

/// A session token. Its string form is also the name of the marker file
/// backing it: `<uid>-<issued_ms>-<session_id>-<client_ip|any>-<scope>-tk`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub uid: Uid,
    pub issued_at: DateTime<Utc>,
    pub session_id: String,
    pub client_ip: ClientIp,
    pub scope: AccessScope,
}

impl SessionToken {
    /// Creates a token with a fresh session id drawn from the OS random source.
    #[must_use]
    pub fn new(uid: Uid, client_ip: ClientIp, scope: AccessScope, random_bytes: usize) -> Self {
        let mut bytes = vec![0u8; random_bytes.max(MIN_SESSION_HEX / 2)];
        OsRng.fill_bytes(&mut bytes);
        Self {
            uid,
            issued_at: truncate_millis(Utc::now()),
            session_id: hex::encode(bytes),
            client_ip,
            scope,
        }
    }

    /// Parses a token string. Anything that does not re-encode to exactly
    /// the same string is rejected, so a parsed token is always safe to use
    /// as a file name.
    pub fn parse(raw: &str) -> Result<Self> {
        let fields: Vec<&str> = raw.split('-').collect();
        if fields.len() != FIELD_COUNT || fields[5] != TOKEN_SUFFIX {
            return Err(Error::InvalidToken);
        }

        let uid: Uid = fields[0].parse().map_err(|_| Error::InvalidToken)?;
        let issued_ms: i64 = fields[1].parse().map_err(|_| Error::InvalidToken)?;
        let issued_at = DateTime::from_timestamp_millis(issued_ms).ok_or(Error::InvalidToken)?;

        let session_id = fields[2];
        if session_id.len() < MIN_SESSION_HEX
            || session_id.len() % 2 != 0
            || !session_id
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(Error::InvalidToken);
        }

        let client_ip = match fields[3] {
            "any" => ClientIp::Any,
            addr => ClientIp::Addr(addr.parse::<IpAddr>().map_err(|_| Error::InvalidToken)?),
        };

        let scope = match fields[4] {
            "all" => AccessScope::All,
            module if AccessScope::is_valid_module(module) => {
                AccessScope::Module(module.to_string())
            }
            _ => return Err(Error::InvalidToken),
        };

        let token = Self {
            uid,
            issued_at,
            session_id: session_id.to_string(),
            client_ip,
            scope,
        };
        if token.to_string() != raw {
            return Err(Error::InvalidToken);
        }
        Ok(token)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}-{TOKEN_SUFFIX}",
            self.uid,
            self.issued_at.timestamp_millis(),
            self.session_id,
            self.client_ip,
            self.scope
        )
    }
}

/// Whether a directory entry name looks like a session marker.
#[must_use]
pub fn is_marker_name(name: &str) -> bool {
    name.ends_with(&format!("-{TOKEN_SUFFIX}"))
}

fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_format() {
        let token = SessionToken::new(42, ClientIp::Any, AccessScope::All, 32);
        let raw = token.to_string();

        let parts: Vec<&str> = raw.split('-').collect();
        assert_eq!(parts.len(), 6);
        assert_eq!(parts[0], "42");
        assert_eq!(parts[2].len(), 64);
        assert_eq!(parts[3], "any");
        assert_eq!(parts[4], "all");
        assert_eq!(parts[5], "tk");
        assert!(is_marker_name(&raw));
    }

    #[test]
    fn test_parse_recovers_fields() {
        let ip: IpAddr = "192.0.2.7".parse().unwrap();
        let token = SessionToken::new(3, ClientIp::Addr(ip), AccessScope::Module("profile".into()), 32);

        let parsed = SessionToken::parse(&token.to_string()).unwrap();
        assert_eq!(parsed, token);
    }

    #[test]
    fn test_session_ids_differ() {
        let a = SessionToken::new(1, ClientIp::Any, AccessScope::All, 32);
        let b = SessionToken::new(1, ClientIp::Any, AccessScope::All, 32);
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let good = SessionToken::new(1, ClientIp::Any, AccessScope::All, 32).to_string();
        let bad = vec![
            String::new(),
            "../../etc/passwd".to_string(),
            good.replace("-tk", "-file"),
            format!("+{good}"),
            format!("{good}-tk"),
            good.replacen("any", "999.1.1.1", 1),
            good.replacen("all", "a/b", 1),
            good.to_uppercase(),
        ];
        for raw in &bad {
            assert!(
                matches!(SessionToken::parse(raw), Err(Error::InvalidToken)),
                "accepted {raw:?}"
            );
        }
    }
}
