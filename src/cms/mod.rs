//! The site as a library: account flows and the file manager on top of
//! the account store, sessions, file storage and the sharing engine.
//!
//! The HTTP layer in [`crate::server`] is a thin adapter over [`Cms`].

mod account;
mod files;

pub use account::{
    Credentials, DirectoryCredentials, LoginSuccess, Profile, ProfileUpdate, Registered,
    Registration,
};
pub use files::{BulkDelete, Edited, FileEntry, Listing, MetaEdit, Uploaded};

use std::fs;
use std::sync::Arc;

use tracing::{error, info};

use crate::accounts::AccountManager;
use crate::auth::{Authenticator, DirectoryAuthenticator, SessionManager};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::files::FileStore;
use crate::mail::{Mailer, Message};
use crate::sharing::SharingEngine;
use crate::store::{Layout, SqliteStore, Store};
use crate::types::{Account, Session};

pub struct Cms {
    config: Arc<Config>,
    store: Arc<dyn Store>,
    layout: Layout,
    sessions: SessionManager,
    authenticator: Authenticator,
    accounts: AccountManager,
    files: Arc<FileStore>,
    sharing: SharingEngine,
    mailer: Arc<dyn Mailer>,
}

impl Cms {
    pub fn new(
        config: Config,
        store: Arc<dyn Store>,
        mailer: Arc<dyn Mailer>,
        directory: Arc<dyn DirectoryAuthenticator>,
    ) -> Self {
        let config = Arc::new(config);
        let layout = Layout::new(config.server.data_dir.clone());
        let files = Arc::new(FileStore::new(layout.clone(), config.files.clone()));

        Self {
            sessions: SessionManager::new(layout.clone(), config.session.clone(), store.clone()),
            authenticator: Authenticator::new(
                store.clone(),
                directory,
                config.directory.clone(),
                config.login.clone(),
            ),
            accounts: AccountManager::new(store.clone(), layout.clone()),
            sharing: SharingEngine::new(
                store.clone(),
                files.clone(),
                config.files.exusers_cannot_share,
            ),
            files,
            layout,
            store,
            mailer,
            config,
        }
    }

    /// Opens (creating when needed) the data directory and database named
    /// by the configuration.
    pub fn open(
        config: Config,
        mailer: Arc<dyn Mailer>,
        directory: Arc<dyn DirectoryAuthenticator>,
    ) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(config.server.data_dir.join("users"))?;
        let store = SqliteStore::new(config.server.db_path())?;
        store.initialize()?;
        info!("Opened data directory {}", config.server.data_dir.display());
        Ok(Self::new(config, Arc::new(store), mailer, directory))
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    #[must_use]
    pub fn accounts(&self) -> &AccountManager {
        &self.accounts
    }

    #[must_use]
    pub fn files(&self) -> &FileStore {
        &self.files
    }

    #[must_use]
    pub fn sharing(&self) -> &SharingEngine {
        &self.sharing
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The account behind a validated session. A session whose account
    /// vanished since validation is treated as no session.
    pub fn session_account(&self, session: &Session) -> Result<Account> {
        self.store.get_account(session.uid)?.ok_or(Error::Unauthorized)
    }

    fn send_mail(&self, to: &str, subject: &str, body: String) -> bool {
        let message = Message {
            from: self.config.mail.from.clone(),
            to: to.to_string(),
            subject: subject.to_string(),
            body,
        };
        match self.mailer.send(&message) {
            Ok(()) => true,
            Err(e) => {
                error!("Unable to send \"{subject}\" to {to}: {e}");
                false
            }
        }
    }
}
