//! Runtime configuration.
//!
//! A single immutable [`Config`] is built at startup and handed to every
//! component. Each section falls back to its `Default` for any key the TOML
//! file leaves out, so a config file only needs to name what it overrides.

mod server;

pub use server::ServerConfig;

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub registration: RegistrationConfig,
    pub login: LoginConfig,
    pub files: FilesConfig,
    pub mail: MailConfig,
    pub directory: DirectoryConfig,
}

/// Session token lifetimes and policies. Timeouts are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Absolute session lifetime, measured from issuance. Not enforced when
    /// `per_request_token` is set (rotation makes every token short-lived).
    pub session_timeout: u64,
    /// Maximum time between two uses of a token.
    pub idle_timeout: u64,
    /// Deadline for the first use of a confirmation or reset token.
    pub confirmation_timeout: u64,
    /// Tie tokens to the client IP they were issued to.
    pub per_client_ip: bool,
    /// Rotate the token on every validated request.
    pub per_request_token: bool,
    /// Issuing a token evicts every other token of the same account.
    pub single_session: bool,
    /// Bytes of OS randomness behind each session id.
    pub random_bytes: usize,
}

impl SessionConfig {
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout)
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    #[must_use]
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout: DAY,
            idle_timeout: 20 * 60,
            confirmation_timeout: DAY,
            per_client_ip: true,
            per_request_token: false,
            single_session: true,
            random_bytes: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Names answered with "already taken" even though no account holds them.
    pub reserved_login_names: Vec<String>,
    pub blacklisted_login_names: Vec<String>,
    pub login_name_max_length: usize,
    pub alpha_start_login_name: bool,
    pub email_max_length: usize,
    pub password_min_length: usize,
    pub password_min_letters: usize,
    pub password_min_digits: usize,
    /// Soft quota assigned to new accounts, in bytes.
    pub default_quota: u64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            reserved_login_names: [
                "root",
                "super",
                "superuser",
                "admin",
                "administrator",
                "mod",
                "moderator",
                "supervisor",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            blacklisted_login_names: Vec::new(),
            login_name_max_length: 16,
            alpha_start_login_name: true,
            email_max_length: 100,
            password_min_length: 8,
            password_min_letters: 2,
            password_min_digits: 2,
            default_quota: 32 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Login names allowed to use internal (password) authentication.
    /// `*` allows everyone.
    pub allowed_internal_logins: Vec<String>,
    pub banned_logins: Vec<String>,
}

impl LoginConfig {
    #[must_use]
    pub fn allows_internal(&self, login_name: &str) -> bool {
        self.allowed_internal_logins
            .iter()
            .any(|name| name == "*" || name == login_name)
    }

    #[must_use]
    pub fn is_banned(&self, login_name: &str) -> bool {
        self.banned_logins.iter().any(|name| name == login_name)
    }
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            allowed_internal_logins: vec!["*".to_string()],
            banned_logins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Type labels offered on upload. Anything else is stored as "Unknown".
    pub file_types: Vec<String>,
    /// Advisory lock retry interval, in milliseconds.
    pub lock_slice_ms: u64,
    /// Advisory lock age after which it is treated as abandoned, in milliseconds.
    pub lock_timeout_ms: u64,
    /// Orphaned content, metadata or staging files younger than this are
    /// left alone by garbage collection, in seconds.
    pub orphan_grace: u64,
    /// Hide files shared by accounts that have since been deleted.
    pub exusers_cannot_share: bool,
    /// Streaming buffer size for uploads and downloads.
    pub chunk_size: usize,
}

impl FilesConfig {
    #[must_use]
    pub fn lock_slice(&self) -> Duration {
        Duration::from_millis(self.lock_slice_ms)
    }

    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    #[must_use]
    pub fn orphan_grace(&self) -> Duration {
        Duration::from_secs(self.orphan_grace)
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            file_types: ["audio", "video", "image", "document", "archive", "other"]
                .into_iter()
                .map(String::from)
                .collect(),
            lock_slice_ms: 500,
            lock_timeout_ms: 5_000,
            orphan_grace: HOUR,
            exusers_cannot_share: true,
            chunk_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub from: String,
    pub confirmation_subject: String,
    /// Placeholders: `%(user_name)s`, `%(confirm_url)s`.
    pub confirmation_notice: String,
    pub reset_subject: String,
    /// Placeholders: `%(user_name)s`, `%(profile_url)s`.
    pub reset_notice: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: "system@localhost".to_string(),
            confirmation_subject: "Account confirmation required".to_string(),
            confirmation_notice: "\nPlease go to:\n\n   %(confirm_url)s\n\nto confirm your account."
                .to_string(),
            reset_subject: "Password reset solicited".to_string(),
            reset_notice: "\nPlease go to:\n\n   %(profile_url)s\n\nto reset your password."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub servers: Vec<DirectoryServer>,
}

impl DirectoryConfig {
    #[must_use]
    pub fn server(&self, host: &str) -> Option<&DirectoryServer> {
        self.servers.iter().find(|s| s.server == host)
    }
}

/// An external directory service accounts may authenticate against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryServer {
    pub server: String,
    pub uri: String,
    /// Bind identity template. `%(user_ldap_name)s` is replaced with the
    /// account's directory name.
    pub bind_dn: String,
    /// Directory names allowed to register. `*` allows everyone.
    #[serde(default)]
    pub allowed_registrants: Vec<String>,
    #[serde(default = "default_directory_name_max_length")]
    pub name_max_length: usize,
    #[serde(default = "default_directory_timeout")]
    pub timeout: u64,
}

fn default_directory_name_max_length() -> usize {
    32
}

fn default_directory_timeout() -> u64 {
    10
}

impl DirectoryServer {
    #[must_use]
    pub fn bind_identity(&self, directory_name: &str) -> String {
        self.bind_dn.replace("%(user_ldap_name)s", directory_name)
    }

    #[must_use]
    pub fn allows_registrant(&self, directory_name: &str) -> bool {
        self.allowed_registrants
            .iter()
            .any(|name| name == "*" || name == directory_name)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("server.data_dir cannot be empty".into()));
        }
        if self.session.idle_timeout == 0 || self.session.confirmation_timeout == 0 {
            return Err(Error::Config("session timeouts must be positive".into()));
        }
        if !self.session.per_request_token && self.session.session_timeout == 0 {
            return Err(Error::Config(
                "session.session_timeout must be positive unless per_request_token is set".into(),
            ));
        }
        if self.session.random_bytes < 16 {
            return Err(Error::Config("session.random_bytes must be at least 16".into()));
        }
        if self.files.lock_slice_ms == 0 || self.files.lock_timeout_ms < self.files.lock_slice_ms {
            return Err(Error::Config(
                "files.lock_timeout_ms must be at least files.lock_slice_ms (> 0)".into(),
            ));
        }
        if self.files.chunk_size == 0 {
            return Err(Error::Config("files.chunk_size must be positive".into()));
        }
        Ok(())
    }
}
