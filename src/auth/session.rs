//! Session tokens backed by zero-byte marker files.
//!
//! A token's string form is the name of a marker inside the owner's user
//! directory. The marker's existence makes the token live and its mtime is
//! the last time the token was used. Expiry is detected lazily: an expired
//! marker is deleted by the validation that notices it.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, error, info, warn};

use super::token::{SessionToken, is_marker_name};
use crate::config::SessionConfig;
use crate::error::Result;
use crate::store::{Layout, Store};
use crate::types::{AccessScope, ClientIp, Session, Uid};

/// What a caller asks of a token when validating it.
#[derive(Debug, Clone, Copy)]
pub struct SessionCheck<'a> {
    /// Module being accessed; must be allowed by the token's scope.
    pub module: &'a str,
    pub client_ip: Option<IpAddr>,
    /// Enforce the confirmation deadline measured from issuance.
    pub first_use: bool,
    /// Skip per-request rotation, for requests that cannot carry a new token.
    pub holdover: bool,
}

impl<'a> SessionCheck<'a> {
    #[must_use]
    pub fn new(module: &'a str, client_ip: Option<IpAddr>) -> Self {
        Self {
            module,
            client_ip,
            first_use: false,
            holdover: false,
        }
    }

    #[must_use]
    pub fn first_use(mut self) -> Self {
        self.first_use = true;
        self
    }

    #[must_use]
    pub fn holdover(mut self) -> Self {
        self.holdover = true;
        self
    }
}

/// Which tokens of an account to revoke.
#[derive(Debug, Clone, Copy)]
pub enum Revoke<'a> {
    Token(&'a str),
    All,
}

pub struct SessionManager {
    layout: Layout,
    config: SessionConfig,
    store: Arc<dyn Store>,
}

impl SessionManager {
    pub fn new(layout: Layout, config: SessionConfig, store: Arc<dyn Store>) -> Self {
        Self {
            layout,
            config,
            store,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Issues a token for `uid`. Under the single-session or per-request
    /// policies every other token of the account is revoked first.
    pub fn issue(&self, uid: Uid, client_ip: ClientIp, scope: AccessScope) -> Result<String> {
        if self.config.single_session || self.config.per_request_token {
            self.revoke(uid, Revoke::All)?;
        }

        let pin = if self.config.per_client_ip {
            client_ip
        } else {
            ClientIp::Any
        };
        let token = SessionToken::new(uid, pin, scope, self.config.random_bytes).to_string();

        fs::create_dir_all(self.layout.user_dir(uid))?;
        create_marker(&self.layout.token_path(uid, &token))?;
        debug!("Issued session token for uid {uid}");
        Ok(token)
    }

    /// Validates a presented token. Every failure is `Ok(None)`; the cause
    /// is only logged. `Err` means the session storage itself failed.
    pub fn validate(&self, raw: &str, check: &SessionCheck<'_>) -> Result<Option<Session>> {
        let token = match SessionToken::parse(raw) {
            Ok(token) => token,
            Err(_) => {
                error!("Malformed session token presented: {raw:?}");
                return Ok(None);
            }
        };

        let marker = self.layout.token_path(token.uid, raw);
        let modified = match fs::metadata(&marker) {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Session rejected for uid {}: no marker", token.uid);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let now = SystemTime::now();
        let issued: SystemTime = token.issued_at.into();
        let since_issue = elapsed(issued, now);

        if check.first_use && since_issue >= self.config.confirmation_timeout() {
            return self.expire(&marker, token.uid, "confirmation deadline passed");
        }
        if elapsed(modified, now) >= self.config.idle_timeout() {
            return self.expire(&marker, token.uid, "idle timeout");
        }
        if !self.config.per_request_token && since_issue >= self.config.session_timeout() {
            return self.expire(&marker, token.uid, "session timeout");
        }

        if self.config.per_client_ip && !token.client_ip.admits(check.client_ip) {
            debug!(
                "Session rejected for uid {}: pinned to {}, presented from {:?}",
                token.uid, token.client_ip, check.client_ip
            );
            return Ok(None);
        }
        if !token.scope.allows(check.module) {
            debug!(
                "Session rejected for uid {}: scope {} does not open {}",
                token.uid, token.scope, check.module
            );
            return Ok(None);
        }

        let Some(account) = self.store.get_account(token.uid)? else {
            debug!("Session rejected for uid {}: no such account", token.uid);
            return Ok(None);
        };

        touch(&marker)?;

        let presented = if self.config.per_request_token && !check.holdover {
            let rotated = self.issue(token.uid, token.client_ip, token.scope.clone())?;
            debug!("Rotated session token for {}", account.login_name);
            rotated
        } else {
            raw.to_string()
        };

        Ok(Some(Session {
            token: presented,
            uid: token.uid,
            login_name: account.login_name,
            issued_at: token.issued_at,
            session_id: token.session_id,
            client_ip: token.client_ip,
            scope: token.scope,
        }))
    }

    /// Deletes one token of the account, or all of them.
    pub fn revoke(&self, uid: Uid, which: Revoke<'_>) -> Result<()> {
        match which {
            Revoke::Token(raw) => {
                let token = SessionToken::parse(raw)?;
                if token.uid != uid {
                    warn!("Refusing to revoke a token of uid {} for uid {uid}", token.uid);
                    return Ok(());
                }
                remove_marker(&self.layout.token_path(uid, raw))
            }
            Revoke::All => {
                let dir = self.layout.user_dir(uid);
                let entries = match fs::read_dir(&dir) {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
                    Err(e) => return Err(e.into()),
                };
                let mut revoked = 0;
                for entry in entries {
                    let entry = entry?;
                    let name = entry.file_name();
                    let Some(name) = name.to_str() else { continue };
                    if is_marker_name(name) {
                        remove_marker(&entry.path())?;
                        revoked += 1;
                    }
                }
                if revoked > 0 {
                    info!("Revoked {revoked} session token(s) for uid {uid}");
                }
                Ok(())
            }
        }
    }

    fn expire(&self, marker: &Path, uid: Uid, cause: &str) -> Result<Option<Session>> {
        debug!("Session rejected for uid {uid}: {cause}");
        remove_marker(marker)?;
        Ok(None)
    }
}

fn elapsed(since: SystemTime, now: SystemTime) -> Duration {
    now.duration_since(since).unwrap_or(Duration::ZERO)
}

fn create_marker(path: &Path) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)?;
    Ok(())
}

fn touch(path: &Path) -> Result<()> {
    let file = File::options().write(true).open(path)?;
    file.set_modified(SystemTime::now())?;
    Ok(())
}

fn remove_marker(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::types::{Account, AuthMethod};
    use chrono::Utc;
    use tempfile::TempDir;

    fn setup(config: SessionConfig) -> (TempDir, SessionManager) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::in_memory().unwrap();
        store.initialize().unwrap();
        let now = Utc::now();
        store
            .create_account(&Account {
                uid: 0,
                login_name: "alice".into(),
                user_name: "Alice".into(),
                email: "alice@example.com".into(),
                password_hash: None,
                auth_method: AuthMethod::Internal,
                first_name: String::new(),
                last_name: String::new(),
                quota: 1024,
                locked: false,
                expires: None,
                created_at: now,
                updated_at: now,
                last_login: None,
            })
            .unwrap();
        let manager = SessionManager::new(Layout::new(temp.path()), config, Arc::new(store));
        (temp, manager)
    }

    fn age_marker(manager: &SessionManager, token: &str, by: Duration) {
        let parsed = SessionToken::parse(token).unwrap();
        let path = manager.layout.token_path(parsed.uid, token);
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - by).unwrap();
    }

    fn ip(addr: &str) -> Option<IpAddr> {
        Some(addr.parse().unwrap())
    }

    #[test]
    fn test_issue_then_validate() {
        let (_temp, manager) = setup(SessionConfig::default());
        let token = manager.issue(0, ClientIp::Any, AccessScope::All).unwrap();

        let session = manager
            .validate(&token, &SessionCheck::new("file_manager", None))
            .unwrap()
            .unwrap();
        assert_eq!(session.uid, 0);
        assert_eq!(session.login_name, "alice");
        assert_eq!(session.token, token);
    }

    #[test]
    fn test_idle_timeout_expires_and_removes_marker() {
        let (_temp, manager) = setup(SessionConfig::default());
        let token = manager.issue(0, ClientIp::Any, AccessScope::All).unwrap();
        age_marker(&manager, &token, Duration::from_secs(1300));

        let check = SessionCheck::new("profile", None);
        assert!(manager.validate(&token, &check).unwrap().is_none());
        assert!(!manager.layout.token_path(0, &token).exists());
    }

    #[test]
    fn test_absolute_timeout_applies_without_rotation() {
        let (_temp, manager) = setup(SessionConfig {
            session_timeout: 60,
            ..SessionConfig::default()
        });
        let mut old = SessionToken::new(0, ClientIp::Any, AccessScope::All, 32);
        old.issued_at = Utc::now() - chrono::Duration::seconds(120);
        let raw = old.to_string();
        fs::create_dir_all(manager.layout.user_dir(0)).unwrap();
        create_marker(&manager.layout.token_path(0, &raw)).unwrap();

        assert!(
            manager
                .validate(&raw, &SessionCheck::new("profile", None))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_first_use_deadline() {
        let (_temp, manager) = setup(SessionConfig {
            confirmation_timeout: 60,
            ..SessionConfig::default()
        });
        let mut old = SessionToken::new(0, ClientIp::Any, AccessScope::All, 32);
        old.issued_at = Utc::now() - chrono::Duration::seconds(90);
        let raw = old.to_string();
        fs::create_dir_all(manager.layout.user_dir(0)).unwrap();
        create_marker(&manager.layout.token_path(0, &raw)).unwrap();

        let check = SessionCheck::new("confirm", None);
        assert!(manager.validate(&raw, &check.first_use()).unwrap().is_none());
    }

    #[test]
    fn test_ip_pin_and_wildcard() {
        let (_temp, manager) = setup(SessionConfig {
            single_session: false,
            ..SessionConfig::default()
        });
        let pinned = manager
            .issue(0, ClientIp::Addr("192.0.2.1".parse().unwrap()), AccessScope::All)
            .unwrap();
        let open = manager.issue(0, ClientIp::Any, AccessScope::All).unwrap();

        let from_other = SessionCheck::new("profile", ip("192.0.2.9"));
        assert!(manager.validate(&pinned, &from_other).unwrap().is_none());
        assert!(manager.validate(&open, &from_other).unwrap().is_some());

        let from_pin = SessionCheck::new("profile", ip("192.0.2.1"));
        assert!(manager.validate(&pinned, &from_pin).unwrap().is_some());
    }

    #[test]
    fn test_scope_mismatch() {
        let (_temp, manager) = setup(SessionConfig::default());
        let token = manager
            .issue(0, ClientIp::Any, AccessScope::Module("profile".into()))
            .unwrap();

        let files = SessionCheck::new("file_manager", None);
        assert!(manager.validate(&token, &files).unwrap().is_none());
        let profile = SessionCheck::new("profile", None);
        assert!(manager.validate(&token, &profile).unwrap().is_some());
    }

    #[test]
    fn test_single_session_evicts_previous_token() {
        let (_temp, manager) = setup(SessionConfig::default());
        let first = manager.issue(0, ClientIp::Any, AccessScope::All).unwrap();
        let second = manager.issue(0, ClientIp::Any, AccessScope::All).unwrap();

        let check = SessionCheck::new("profile", None);
        assert!(manager.validate(&first, &check).unwrap().is_none());
        assert!(manager.validate(&second, &check).unwrap().is_some());
    }

    #[test]
    fn test_per_request_rotation() {
        let (_temp, manager) = setup(SessionConfig {
            per_request_token: true,
            ..SessionConfig::default()
        });
        let token = manager
            .issue(0, ClientIp::Any, AccessScope::Module("file_manager".into()))
            .unwrap();
        let check = SessionCheck::new("file_manager", None);

        let session = manager.validate(&token, &check).unwrap().unwrap();
        assert_ne!(session.token, token);
        assert_eq!(session.scope, AccessScope::Module("file_manager".into()));
        assert!(manager.validate(&token, &check).unwrap().is_none());

        let held = manager
            .validate(&session.token, &check.holdover())
            .unwrap()
            .unwrap();
        assert_eq!(held.token, session.token);
    }

    #[test]
    fn test_malformed_and_unknown_tokens() {
        let (_temp, manager) = setup(SessionConfig::default());
        let check = SessionCheck::new("profile", None);

        assert!(manager.validate("../../kbasix.db", &check).unwrap().is_none());
        let forged = SessionToken::new(0, ClientIp::Any, AccessScope::All, 32).to_string();
        assert!(manager.validate(&forged, &check).unwrap().is_none());
    }

    #[test]
    fn test_token_of_missing_account() {
        let (_temp, manager) = setup(SessionConfig::default());
        let token = manager.issue(5, ClientIp::Any, AccessScope::All).unwrap();
        assert!(
            manager
                .validate(&token, &SessionCheck::new("profile", None))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_revoke_single_and_all() {
        let (_temp, manager) = setup(SessionConfig {
            single_session: false,
            ..SessionConfig::default()
        });
        let a = manager.issue(0, ClientIp::Any, AccessScope::All).unwrap();
        let b = manager.issue(0, ClientIp::Any, AccessScope::All).unwrap();
        let c = manager.issue(0, ClientIp::Any, AccessScope::All).unwrap();
        let check = SessionCheck::new("profile", None);

        manager.revoke(0, Revoke::Token(&a)).unwrap();
        assert!(manager.validate(&a, &check).unwrap().is_none());
        assert!(manager.validate(&b, &check).unwrap().is_some());

        manager.revoke(0, Revoke::All).unwrap();
        assert!(manager.validate(&b, &check).unwrap().is_none());
        assert!(manager.validate(&c, &check).unwrap().is_none());
    }
}
