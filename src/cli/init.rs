use std::fs;
use std::path::PathBuf;

use crate::store::{Layout, SqliteStore, Store};

use super::DB_FILE;

pub fn run_init(data_dir: String) -> anyhow::Result<()> {
    let data_path = PathBuf::from(data_dir);
    let db_path = data_path.join(DB_FILE);

    if db_path.exists() {
        anyhow::bail!("Already initialized: {} exists", db_path.display());
    }

    fs::create_dir_all(Layout::new(&data_path).users_dir())?;
    let store = SqliteStore::new(&db_path)?;
    store.initialize()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(&db_path, fs::Permissions::from_mode(0o600)) {
            tracing::warn!("Failed to set permissions on {}: {e}", db_path.display());
        }
    }

    println!("Initialized data directory {}", data_path.display());
    Ok(())
}
