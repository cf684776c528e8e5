//! Accounts and groups.
//!
//! Identity rules live here; persistence is the `Store`. A uid is stable
//! for the lifetime of an account and is never handed to a different login
//! name while the previous holder's user directory still exists.

pub mod validation;

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::auth::PasswordHasher;
use crate::error::{Error, Result};
use crate::store::{Layout, Store};
use crate::types::*;

const USER_NAME_MAX_LEN: usize = 100;

pub struct AccountManager {
    store: Arc<dyn Store>,
    layout: Layout,
    hasher: PasswordHasher,
}

impl AccountManager {
    pub fn new(store: Arc<dyn Store>, layout: Layout) -> Self {
        Self {
            store,
            layout,
            hasher: PasswordHasher::new(),
        }
    }

    // Accounts

    /// Creates an account and its user directory. The uid is the next free
    /// one unless `new.uid` asks for a specific one, which is only granted
    /// when it is unused and either last belonged to the same login name or
    /// has no data left on disk.
    pub fn add(&self, new: NewAccount) -> Result<Account> {
        check_user_name(&new.user_name)?;
        let login_name = new.user_name.to_lowercase();

        if self.store.get_account_by_name(&login_name)?.is_some() {
            return Err(Error::AlreadyExists(login_name));
        }

        let uid = match new.uid {
            None => self.store.next_uid()?,
            Some(uid) => {
                if self.store.get_account(uid)?.is_some() {
                    return Err(Error::UidInUse(uid));
                }
                match self.store.uid_holder(uid)? {
                    Some(holder) if holder != login_name && self.layout.has_user_dir(uid) => {
                        warn!("Refusing uid {uid} for {login_name}: data of {holder} remains");
                        return Err(Error::UidInUse(uid));
                    }
                    _ => uid,
                }
            }
        };

        let password_hash = match (&new.auth_method, new.password.as_deref()) {
            (AuthMethod::Internal, Some(password)) => Some(self.hasher.hash(password)?),
            _ => None,
        };

        let now = Utc::now();
        let account = Account {
            uid,
            login_name,
            user_name: new.user_name,
            email: new.email,
            password_hash,
            auth_method: new.auth_method,
            first_name: new.first_name,
            last_name: new.last_name,
            quota: new.quota,
            locked: new.locked,
            expires: new.expires,
            created_at: now,
            updated_at: now,
            last_login: None,
        };
        self.store.create_account(&account)?;
        create_private_dir(&self.layout.user_dir(uid))?;

        info!("Added account {} (uid {uid})", account.login_name);
        Ok(account)
    }

    /// Applies a partial update. Unknown keys are ignored and reported in
    /// the returned notes.
    pub fn modify(&self, id: impl Into<AccountId>, patch: AccountPatch) -> Result<Outcome> {
        let mut account = self.lookup(id)?.ok_or(Error::NotFound)?;
        let mut outcome = Outcome::default();

        if let Some(user_name) = patch.user_name {
            check_user_name(&user_name)?;
            account.login_name = user_name.to_lowercase();
            account.user_name = user_name;
            outcome.changed = true;
        }
        if let Some(password) = patch.password {
            account.password_hash = Some(self.hasher.hash(&password)?);
            outcome.changed = true;
        }
        if let Some(auth_method) = patch.auth_method {
            if auth_method != AuthMethod::Internal {
                account.password_hash = None;
            }
            account.auth_method = auth_method;
            outcome.changed = true;
        }
        let simple_changes = [
            patch.email.map(|v| account.email = v),
            patch.first_name.map(|v| account.first_name = v),
            patch.last_name.map(|v| account.last_name = v),
            patch.quota.map(|v| account.quota = v),
            patch.locked.map(|v| account.locked = v),
            patch.expires.map(|v| account.expires = v),
            patch.last_login.map(|v| account.last_login = Some(v)),
        ];
        if simple_changes.iter().any(Option::is_some) {
            outcome.changed = true;
        }

        for key in patch.unknown.keys() {
            if key == "groups" || key == "gids" {
                outcome
                    .notes
                    .push("Group membership can only be changed by modifying groups".into());
            } else {
                outcome.notes.push(format!("Ignoring unknown key: {key}"));
            }
        }

        if outcome.changed {
            account.updated_at = Utc::now();
            self.store.update_account(&account)?;
            info!("Modified account {}", account.login_name);
        } else {
            outcome.notes.push("No changes made".into());
        }
        Ok(outcome)
    }

    /// Removes an account. Without `wipe` the uid stays reserved for the
    /// same identity and its files stay on disk; with `wipe` the user
    /// directory and every grant involving the uid are removed as well.
    pub fn delete(&self, id: impl Into<AccountId>, wipe: bool) -> Result<Account> {
        let account = self.lookup(id)?.ok_or(Error::NotFound)?;

        self.store.delete_account(account.uid)?;
        if wipe {
            match fs::remove_dir_all(self.layout.user_dir(account.uid)) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            self.store.purge_uid(account.uid)?;
        }

        info!(
            "Deleted account {} (uid {}, wipe: {wipe})",
            account.login_name, account.uid
        );
        Ok(account)
    }

    pub fn lookup(&self, id: impl Into<AccountId>) -> Result<Option<Account>> {
        match id.into() {
            AccountId::Name(name) => self.store.get_account_by_name(&name.to_lowercase()),
            AccountId::Uid(uid) => self.store.get_account(uid),
        }
    }

    /// An account with its group memberships.
    pub fn info(&self, id: impl Into<AccountId>) -> Result<Option<AccountInfo>> {
        let Some(account) = self.lookup(id)? else {
            return Ok(None);
        };
        let groups = self.store.list_account_groups(&account.login_name)?;
        Ok(Some(AccountInfo {
            groups: groups.iter().map(|g| g.group_name.clone()).collect(),
            gids: groups.iter().map(|g| g.gid).collect(),
            account,
        }))
    }

    pub fn list(&self) -> Result<Vec<Account>> {
        self.store.list_accounts()
    }

    // Groups

    pub fn add_group(&self, group_name: &str, members: &[String], group_info: &str) -> Result<(Group, Outcome)> {
        if group_name.is_empty() {
            return Err(Error::InvalidField("group name cannot be empty".into()));
        }
        if self.store.get_group_by_name(group_name)?.is_some() {
            return Err(Error::AlreadyExists(group_name.to_string()));
        }

        let mut outcome = Outcome {
            changed: true,
            notes: Vec::new(),
        };
        let members = self.resolve_members(members, &mut outcome.notes)?;
        if members.is_empty() {
            outcome.notes.push("Creating an empty group".into());
        }

        let now = Utc::now();
        let group = Group {
            gid: self.store.next_gid()?,
            group_name: group_name.to_string(),
            info: group_info.to_string(),
            members,
            created_at: now,
            updated_at: now,
        };
        self.store.create_group(&group)?;
        info!("Added group {} (gid {})", group.group_name, group.gid);
        Ok((group, outcome))
    }

    pub fn modify_group(&self, id: impl Into<GroupId>, patch: GroupPatch) -> Result<Outcome> {
        let mut group = self.lookup_group(id)?.ok_or(Error::NotFound)?;
        let mut outcome = Outcome::default();

        if let Some(name) = patch.group_name {
            if name.is_empty() {
                return Err(Error::InvalidField("group name cannot be empty".into()));
            }
            group.group_name = name;
            outcome.changed = true;
        }
        if let Some(info) = patch.info {
            group.info = info;
            outcome.changed = true;
        }
        if let Some(members) = patch.members {
            let members = self.resolve_members(&members, &mut outcome.notes)?;
            if members == group.members {
                outcome.notes.push("Membership did not change".into());
            } else {
                group.members = members;
                outcome.changed = true;
            }
        }
        for key in patch.unknown.keys() {
            outcome.notes.push(format!("Ignoring unknown key: {key}"));
        }

        if outcome.changed {
            group.updated_at = Utc::now();
            self.store.update_group(&group)?;
            info!("Modified group {}", group.group_name);
        } else {
            outcome.notes.push("No changes made".into());
        }
        Ok(outcome)
    }

    pub fn delete_group(&self, id: impl Into<GroupId>) -> Result<Group> {
        let group = self.lookup_group(id)?.ok_or(Error::NotFound)?;
        self.store.delete_group(group.gid)?;
        info!("Deleted group {} (gid {})", group.group_name, group.gid);
        Ok(group)
    }

    pub fn lookup_group(&self, id: impl Into<GroupId>) -> Result<Option<Group>> {
        match id.into() {
            GroupId::Name(name) => self.store.get_group_by_name(&name),
            GroupId::Gid(gid) => self.store.get_group(gid),
        }
    }

    pub fn list_groups(&self) -> Result<Vec<Group>> {
        self.store.list_groups()
    }

    fn resolve_members(&self, names: &[String], notes: &mut Vec<String>) -> Result<BTreeSet<String>> {
        let mut members = BTreeSet::new();
        for name in names {
            let login_name = name.to_lowercase();
            if self.store.get_account_by_name(&login_name)?.is_none() {
                notes.push(format!("Unknown account \"{name}\" in members list, skipping"));
                continue;
            }
            if !members.insert(login_name) {
                notes.push(format!("Member \"{name}\" listed twice, skipping"));
            }
        }
        Ok(members)
    }
}

// The user name is stored as-is, so it is held to the strictest rules.
fn check_user_name(user_name: &str) -> Result<()> {
    if user_name.is_empty()
        || user_name.len() > USER_NAME_MAX_LEN
        || !user_name.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return Err(Error::InvalidField(format!("invalid user name: {user_name:?}")));
    }
    Ok(())
}

fn create_private_dir(path: &std::path::Path) -> Result<()> {
    fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}
