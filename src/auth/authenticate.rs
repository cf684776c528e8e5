use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::PasswordHasher;
use crate::config::{DirectoryConfig, DirectoryServer, LoginConfig};
use crate::error::Result;
use crate::store::Store;
use crate::types::{Account, AuthMethod};

/// Why a login was refused. Callers show end users the code, never a
/// free-text cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthFailure {
    NoSuchUser,
    BadPassword,
    /// The external directory refused the bind or could not be reached.
    #[serde(rename = "auth-backend-unavailable")]
    BackendUnavailable,
    #[serde(rename = "account-locked")]
    Locked,
    #[serde(rename = "auth-method-disallowed")]
    MethodDisallowed,
    Banned,
}

impl AuthFailure {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            AuthFailure::NoSuchUser => "no-such-user",
            AuthFailure::BadPassword => "bad-password",
            AuthFailure::BackendUnavailable => "auth-backend-unavailable",
            AuthFailure::Locked => "account-locked",
            AuthFailure::MethodDisallowed => "auth-method-disallowed",
            AuthFailure::Banned => "banned",
        }
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of a directory bind attempt.
#[derive(Debug)]
pub enum DirectoryError {
    Rejected,
    Transport(String),
}

/// Verifies credentials against an external directory server.
pub trait DirectoryAuthenticator: Send + Sync {
    fn bind(
        &self,
        server: &DirectoryServer,
        identity: &str,
        credential: &str,
    ) -> std::result::Result<(), DirectoryError>;
}

/// Used when no directory client is wired in: every bind fails.
pub struct NoDirectory;

impl DirectoryAuthenticator for NoDirectory {
    fn bind(
        &self,
        server: &DirectoryServer,
        _identity: &str,
        _credential: &str,
    ) -> std::result::Result<(), DirectoryError> {
        Err(DirectoryError::Transport(format!(
            "no directory client configured for {}",
            server.server
        )))
    }
}

pub struct Authenticator {
    store: Arc<dyn Store>,
    hasher: PasswordHasher,
    directory: Arc<dyn DirectoryAuthenticator>,
    directory_config: DirectoryConfig,
    login_config: LoginConfig,
}

impl Authenticator {
    pub fn new(
        store: Arc<dyn Store>,
        directory: Arc<dyn DirectoryAuthenticator>,
        directory_config: DirectoryConfig,
        login_config: LoginConfig,
    ) -> Self {
        Self {
            store,
            hasher: PasswordHasher::new(),
            directory,
            directory_config,
            login_config,
        }
    }

    /// Checks credentials and login policy. The inner `Err` is the refusal
    /// reason; the outer one a storage failure.
    pub fn authenticate(
        &self,
        login_name: &str,
        password: &str,
    ) -> Result<std::result::Result<Account, AuthFailure>> {
        let login_name = login_name.to_lowercase();
        let Some(account) = self.store.get_account_by_name(&login_name)? else {
            debug!("Login refused for {login_name}: no such account");
            return Ok(Err(AuthFailure::NoSuchUser));
        };

        if let Err(failure) = self.verify_credentials(&account, password)? {
            debug!("Login refused for {login_name}: {failure}");
            return Ok(Err(failure));
        }

        let refusal = if account.locked {
            Some(AuthFailure::Locked)
        } else if account.auth_method == AuthMethod::Internal
            && !self.login_config.allows_internal(&login_name)
        {
            Some(AuthFailure::MethodDisallowed)
        } else if self.login_config.is_banned(&login_name) {
            Some(AuthFailure::Banned)
        } else {
            None
        };

        match refusal {
            Some(failure) => {
                warn!("Login refused for {login_name}: {failure}");
                Ok(Err(failure))
            }
            None => Ok(Ok(account)),
        }
    }

    /// Checks directory credentials for an identity that has no account yet.
    pub fn check_directory(
        &self,
        server: &str,
        directory_name: &str,
        password: &str,
    ) -> std::result::Result<(), AuthFailure> {
        let Some(descriptor) = self.directory_config.server(server) else {
            debug!("Unknown directory server {server}");
            return Err(AuthFailure::BackendUnavailable);
        };
        self.bind(descriptor, directory_name, password)
    }

    fn verify_credentials(
        &self,
        account: &Account,
        password: &str,
    ) -> Result<std::result::Result<(), AuthFailure>> {
        match &account.auth_method {
            AuthMethod::Internal => {
                let Some(hash) = account.password_hash.as_deref() else {
                    return Ok(Err(AuthFailure::BadPassword));
                };
                if self.hasher.verify(password, hash)? {
                    Ok(Ok(()))
                } else {
                    Ok(Err(AuthFailure::BadPassword))
                }
            }
            AuthMethod::Directory { server, name } => {
                Ok(self.check_directory(server, name, password))
            }
        }
    }

    fn bind(
        &self,
        server: &DirectoryServer,
        directory_name: &str,
        password: &str,
    ) -> std::result::Result<(), AuthFailure> {
        if password.is_empty() || directory_name.len() > server.name_max_length {
            return Err(AuthFailure::BackendUnavailable);
        }
        let identity = server.bind_identity(directory_name);
        match self.directory.bind(server, &identity, password) {
            Ok(()) => Ok(()),
            Err(DirectoryError::Rejected) => {
                debug!("Directory {} rejected {identity}", server.server);
                Err(AuthFailure::BackendUnavailable)
            }
            Err(DirectoryError::Transport(cause)) => {
                warn!("Directory {} unavailable: {cause}", server.server);
                Err(AuthFailure::BackendUnavailable)
            }
        }
    }
}
