mod commands;
mod group;
mod init;

pub use commands::{AdminCommands, GroupCommands};
pub use group::{run_group_add, run_group_members, run_group_remove};
pub use init::run_init;

use std::path::PathBuf;
use std::sync::Arc;

use crate::accounts::AccountManager;
use crate::store::{Layout, SqliteStore, Store};

const DB_FILE: &str = "kbasix.db";

/// Opens the account store of an initialized data directory.
pub fn init_accounts(data_dir: &str) -> anyhow::Result<AccountManager> {
    let data_path = PathBuf::from(data_dir);
    let db_path = data_path.join(DB_FILE);

    if !db_path.exists() {
        anyhow::bail!(
            "Database not found at {}. Run 'kbasix admin init' first.",
            db_path.display()
        );
    }

    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(&db_path)?);
    Ok(AccountManager::new(store, Layout::new(data_path)))
}

fn split_names(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}
