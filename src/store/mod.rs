pub mod lock;
pub mod path;
mod schema;
mod sqlite;

pub use lock::{FileLock, LockSettings};
pub use path::Layout;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::*;

/// Store defines the database interface: accounts, groups and the grant
/// index. Lookups return `Ok(None)` for absence; `Err` is reserved for
/// storage failures.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // Account operations
    fn create_account(&self, account: &Account) -> Result<()>;
    fn get_account(&self, uid: Uid) -> Result<Option<Account>>;
    fn get_account_by_name(&self, login_name: &str) -> Result<Option<Account>>;
    fn list_accounts(&self) -> Result<Vec<Account>>;
    fn update_account(&self, account: &Account) -> Result<()>;
    /// Removes the account and its group memberships in one transaction.
    fn delete_account(&self, uid: Uid) -> Result<bool>;
    fn next_uid(&self) -> Result<Uid>;
    /// The login name a uid was assigned to, even after the account is gone.
    fn uid_holder(&self, uid: Uid) -> Result<Option<String>>;

    // Group operations
    fn create_group(&self, group: &Group) -> Result<()>;
    fn get_group(&self, gid: Gid) -> Result<Option<Group>>;
    fn get_group_by_name(&self, group_name: &str) -> Result<Option<Group>>;
    fn list_groups(&self) -> Result<Vec<Group>>;
    fn update_group(&self, group: &Group) -> Result<()>;
    fn delete_group(&self, gid: Gid) -> Result<bool>;
    fn next_gid(&self) -> Result<Gid>;
    fn list_account_groups(&self, login_name: &str) -> Result<Vec<Group>>;

    // Grant index
    fn apply_grant_update(&self, update: &GrantUpdate) -> Result<()>;
    /// Drops the share rows of a file. Reflections are left for
    /// reconciliation to collect.
    fn delete_file_shares(&self, file_tag: &FileTag) -> Result<()>;
    /// Local grants plus grants to any of `gids`, excluding files the
    /// viewer owns.
    fn list_pool_grants(&self, viewer_uid: Uid, gids: &[Gid]) -> Result<Vec<PoolGrant>>;

    fn add_reflection(&self, reflection: &Reflection) -> Result<bool>;
    fn get_reflection(&self, viewer_uid: Uid, file_tag: &FileTag) -> Result<Option<Reflection>>;
    fn list_reflections(&self, viewer_uid: Uid) -> Result<Vec<Reflection>>;
    fn delete_reflection(&self, viewer_uid: Uid, file_tag: &FileTag) -> Result<bool>;

    /// Hides a pooled grant from the viewer and drops its reflection.
    fn dismiss_share(&self, viewer_uid: Uid, file_tag: &FileTag) -> Result<()>;
    fn is_hidden(&self, viewer_uid: Uid, file_tag: &FileTag) -> Result<bool>;

    /// Forgets every grant, reflection and hidden entry involving `uid`.
    fn purge_uid(&self, uid: Uid) -> Result<()>;

}
