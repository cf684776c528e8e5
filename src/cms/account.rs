use std::collections::HashMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::Cms;
use crate::accounts::validation::{check_email, check_password, check_user_name};
use crate::auth::{AuthFailure, Revoke, SessionCheck};
use crate::error::{Error, Result};
use crate::files::quota;
use crate::template::fill;
use crate::types::{
    AccessScope, Account, AccountPatch, AuthMethod, ClientIp, NewAccount, Outcome, Session,
};

const CONFIRM_MODULE: &str = "confirm";
const PROFILE_MODULE: &str = "profile";

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryCredentials {
    pub server: String,
    pub directory_name: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Credentials {
    Internal {
        password: String,
        password_confirmation: String,
    },
    Directory(DirectoryCredentials),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Registration {
    pub user_name: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub credentials: Credentials,
}

#[derive(Debug, Clone, Serialize)]
pub struct Registered {
    pub account: Account,
    /// The account exists even when the confirmation mail could not be sent.
    pub email_sent: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginSuccess {
    pub token: String,
    pub account: Account,
}

#[derive(Debug, Clone, Serialize)]
pub struct Profile {
    pub uid: u64,
    pub user_name: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub auth_method: &'static str,
    pub groups: Vec<String>,
    pub quota: u64,
    pub usage: u64,
    pub registered: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Profile edits. A new password switches the account to internal
/// authentication; directory credentials switch it to the directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub password_confirmation: Option<String>,
    pub directory: Option<DirectoryCredentials>,
}

impl Cms {
    /// Creates a locked account that must be confirmed within the
    /// confirmation timeout, and mails the confirmation link.
    pub fn register(&self, registration: Registration) -> Result<Registered> {
        let rules = &self.config.registration;
        let mut problems = check_user_name(rules, &registration.user_name);
        problems.extend(check_email(rules, &registration.email));

        let auth_method = match &registration.credentials {
            Credentials::Internal {
                password,
                password_confirmation,
            } => {
                problems.extend(check_password(rules, password, password_confirmation));
                AuthMethod::Internal
            }
            Credentials::Directory(credentials) => {
                problems.extend(self.check_directory_credentials(credentials));
                AuthMethod::Directory {
                    server: credentials.server.clone(),
                    name: credentials.directory_name.clone(),
                }
            }
        };

        let login_name = registration.user_name.to_lowercase();
        if problems.is_empty() {
            if let Some(existing) = self.accounts.lookup(login_name.as_str())? {
                if existing.locked && existing.is_expired(Utc::now()) {
                    info!("Removing unconfirmed account {login_name} to reuse its name");
                    self.accounts.delete(existing.uid, true)?;
                } else {
                    problems.push("That user name is already taken".to_string());
                }
            }
        }
        if !problems.is_empty() {
            debug!("Registration of {login_name} refused: {}", problems.join("; "));
            return Err(Error::Validation(problems));
        }

        let password = match registration.credentials {
            Credentials::Internal { password, .. } => Some(password),
            Credentials::Directory(_) => None,
        };
        let expires = chrono::Duration::from_std(self.sessions.config().confirmation_timeout())
            .ok()
            .and_then(|timeout| Utc::now().checked_add_signed(timeout));
        let account = self.accounts.add(NewAccount {
            user_name: registration.user_name,
            email: registration.email,
            password,
            auth_method,
            first_name: registration.first_name,
            last_name: registration.last_name,
            quota: rules.default_quota,
            locked: true,
            expires,
            uid: None,
        })?;

        let token = self.sessions.issue(
            account.uid,
            ClientIp::Any,
            AccessScope::Module(CONFIRM_MODULE.to_string()),
        )?;
        let confirm_url = format!(
            "{}/confirm?token={}",
            self.config.server.base_url(),
            urlencoding::encode(&token)
        );
        let body = fill(
            &self.config.mail.confirmation_notice,
            &HashMap::from([
                ("user_name", account.user_name.clone()),
                ("confirm_url", confirm_url),
            ]),
        );
        let email_sent =
            self.send_mail(&account.email, &self.config.mail.confirmation_subject, body);

        info!(
            "Registered {} (uid {}), confirmation mail sent: {email_sent}",
            account.login_name, account.uid
        );
        Ok(Registered {
            account,
            email_sent,
        })
    }

    /// Activates an account from its confirmation token. The token must be
    /// used before the confirmation deadline and is spent afterwards.
    pub fn confirm(&self, token: &str) -> Result<Account> {
        let check = SessionCheck::new(CONFIRM_MODULE, None).first_use().holdover();
        let session = self
            .sessions
            .validate(token, &check)?
            .ok_or(Error::Unauthorized)?;

        self.accounts.modify(
            session.uid,
            AccountPatch {
                locked: Some(false),
                expires: Some(None),
                ..AccountPatch::default()
            },
        )?;
        self.sessions.revoke(session.uid, Revoke::All)?;

        let account = self.session_account(&session)?;
        info!("Confirmed account {}", account.login_name);
        Ok(account)
    }

    /// Authenticates and opens a session. The inner `Err` is the refusal
    /// reason; callers must not tell apart the credential failures.
    pub fn login(
        &self,
        login_name: &str,
        password: &str,
        client_ip: Option<IpAddr>,
    ) -> Result<std::result::Result<LoginSuccess, AuthFailure>> {
        let account = match self.authenticator.authenticate(login_name, password)? {
            Ok(account) => account,
            Err(failure) => return Ok(Err(failure)),
        };

        let pin = client_ip.map_or(ClientIp::Any, ClientIp::Addr);
        let token = self.sessions.issue(account.uid, pin, AccessScope::All)?;
        self.accounts.modify(
            account.uid,
            AccountPatch {
                last_login: Some(Utc::now()),
                ..AccountPatch::default()
            },
        )?;

        info!("{} logged in", account.login_name);
        Ok(Ok(LoginSuccess { token, account }))
    }

    pub fn logout(&self, session: &Session) -> Result<()> {
        self.sessions.revoke(session.uid, Revoke::Token(&session.token))?;
        info!("{} logged out", session.login_name);
        Ok(())
    }

    /// Mails a link that opens the profile page, where a new password can
    /// be set. Every refusal is the same `Forbidden`.
    pub fn request_password_reset(&self, login_name: &str) -> Result<bool> {
        let login_name = login_name.to_lowercase();
        let account = match self.accounts.lookup(login_name.as_str())? {
            Some(account) if !account.locked && !self.config.login.is_banned(&login_name) => {
                account
            }
            _ => {
                warn!("Password reset refused for {login_name:?}");
                return Err(Error::Forbidden);
            }
        };

        let token = self.sessions.issue(
            account.uid,
            ClientIp::Any,
            AccessScope::Module(PROFILE_MODULE.to_string()),
        )?;
        let profile_url = format!(
            "{}/profile?token={}",
            self.config.server.base_url(),
            urlencoding::encode(&token)
        );
        let body = fill(
            &self.config.mail.reset_notice,
            &HashMap::from([
                ("user_name", account.user_name.clone()),
                ("profile_url", profile_url),
            ]),
        );

        info!("Password reset requested for {login_name}");
        Ok(self.send_mail(&account.email, &self.config.mail.reset_subject, body))
    }

    pub fn profile(&self, session: &Session) -> Result<Profile> {
        let info = self
            .accounts
            .info(session.uid)?
            .ok_or(Error::Unauthorized)?;
        let account = info.account;
        Ok(Profile {
            usage: quota::usage(&self.layout, account.uid)?,
            uid: account.uid,
            auth_method: account.auth_method.label(),
            user_name: account.user_name,
            email: account.email,
            first_name: account.first_name,
            last_name: account.last_name,
            groups: info.groups,
            quota: account.quota,
            registered: account.created_at,
            last_login: account.last_login,
        })
    }

    pub fn update_profile(&self, session: &Session, update: ProfileUpdate) -> Result<Outcome> {
        let rules = &self.config.registration;
        let mut problems = Vec::new();
        let mut patch = AccountPatch {
            first_name: update.first_name,
            last_name: update.last_name,
            ..AccountPatch::default()
        };

        if let Some(email) = update.email {
            problems.extend(check_email(rules, &email));
            patch.email = Some(email);
        }

        match (update.password, update.directory) {
            (Some(_), Some(_)) => {
                problems.push("Choose either a password or directory credentials".to_string());
            }
            (Some(password), None) => {
                let confirmation = update.password_confirmation.unwrap_or_default();
                problems.extend(check_password(rules, &password, &confirmation));
                patch.password = Some(password);
                patch.auth_method = Some(AuthMethod::Internal);
            }
            (None, Some(credentials)) => {
                problems.extend(self.check_directory_credentials(&credentials));
                patch.auth_method = Some(AuthMethod::Directory {
                    server: credentials.server,
                    name: credentials.directory_name,
                });
            }
            (None, None) => {}
        }

        if !problems.is_empty() {
            return Err(Error::Validation(problems));
        }
        self.accounts.modify(session.uid, patch)
    }

    fn check_directory_credentials(&self, credentials: &DirectoryCredentials) -> Vec<String> {
        let allowed = self
            .config
            .directory
            .server(&credentials.server)
            .is_some_and(|server| server.allows_registrant(&credentials.directory_name));
        if !allowed {
            return vec!["That directory account may not be used here".to_string()];
        }
        match self.authenticator.check_directory(
            &credentials.server,
            &credentials.directory_name,
            &credentials.password,
        ) {
            Ok(()) => Vec::new(),
            Err(failure) => {
                debug!(
                    "Directory check for {} failed: {failure}",
                    credentials.directory_name
                );
                vec!["Directory authentication failed".to_string()]
            }
        }
    }
}
