//! Advisory locking and whole-file JSON records.
//!
//! A lock is a `<file>.lock` marker created exclusively. Waiters retry every
//! `slice`; once a lock has been held for longer than `timeout` it is treated
//! as abandoned and removed. Two writers can therefore interleave when a
//! holder really is that slow. That lost-update window is accepted for the
//! small per-user records kept on disk (metadata sidecars, preferences).

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::FilesConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy)]
pub struct LockSettings {
    pub slice: Duration,
    pub timeout: Duration,
}

impl From<&FilesConfig> for LockSettings {
    fn from(config: &FilesConfig) -> Self {
        Self {
            slice: config.lock_slice(),
            timeout: config.lock_timeout(),
        }
    }
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub async fn acquire(target: &Path, settings: LockSettings) -> Result<Self> {
        let path = lock_path(target);
        let start = Instant::now();
        let mut overridden = false;

        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            if lock_age(&path).await.is_some_and(|age| age > settings.timeout)
                || start.elapsed() > settings.timeout
            {
                if overridden {
                    return Err(Error::LockTimeout(target.display().to_string()));
                }
                warn!("Removing stale lock {}", path.display());
                match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                overridden = true;
                continue;
            }

            sleep(settings.slice).await;
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to release lock {}: {e}", self.path.display()),
        }
    }
}

fn lock_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

async fn lock_age(path: &Path) -> Option<Duration> {
    let modified = fs::metadata(path).await.ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

/// Reads a JSON record without locking. A missing file is `Ok(None)`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Replaces a JSON record under its lock, writing a temporary file first so
/// readers never see a partial record.
pub async fn write_json<T: Serialize>(path: &Path, value: &T, settings: LockSettings) -> Result<()> {
    let _lock = FileLock::acquire(path, settings).await?;
    replace_json(path, value).await
}

/// Read-modify-write of a JSON record under its lock. A missing record
/// starts from `T::default()`.
pub async fn update_json<T, R, F>(path: &Path, settings: LockSettings, apply: F) -> Result<R>
where
    T: Serialize + DeserializeOwned + Default,
    F: FnOnce(&mut T) -> R,
{
    let _lock = FileLock::acquire(path, settings).await?;
    let mut value = read_json(path).await?.unwrap_or_default();
    let result = apply(&mut value);
    replace_json(path, &value).await?;
    Ok(result)
}

/// Read-modify-write of an existing JSON record. A missing record is left
/// alone and yields `Ok(None)`. `commit` runs on the result after the
/// record is saved and before the lock is released, so state derived from
/// the record is written in the same order as the record itself.
pub async fn modify_json<T, R, F, C>(
    path: &Path,
    settings: LockSettings,
    apply: F,
    commit: C,
) -> Result<Option<R>>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce(&mut T) -> R,
    C: FnOnce(&R) -> Result<()>,
{
    let _lock = FileLock::acquire(path, settings).await?;
    let Some(mut value) = read_json::<T>(path).await? else {
        return Ok(None);
    };
    let result = apply(&mut value);
    replace_json(path, &value).await?;
    commit(&result)?;
    Ok(Some(result))
}

async fn replace_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(format!(".{}.tmp", Uuid::new_v4()));
    let temp_path = PathBuf::from(temp_name);

    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    debug!("Saved {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn fast() -> LockSettings {
        LockSettings {
            slice: Duration::from_millis(10),
            timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_until_dropped() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("record");

        let lock = FileLock::acquire(&target, fast()).await.unwrap();
        assert!(temp.path().join("record.lock").exists());
        drop(lock);
        assert!(!temp.path().join("record.lock").exists());

        let _again = FileLock::acquire(&target, fast()).await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_lock_is_overridden() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("record");

        let abandoned = FileLock::acquire(&target, fast()).await.unwrap();
        std::mem::forget(abandoned);

        let start = std::time::Instant::now();
        let _lock = FileLock::acquire(&target, fast()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_update_json_starts_from_default() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("prefs");

        assert!(
            read_json::<BTreeMap<String, u32>>(&path)
                .await
                .unwrap()
                .is_none()
        );

        update_json(&path, fast(), |map: &mut BTreeMap<String, u32>| {
            map.insert("count".into(), 1);
        })
        .await
        .unwrap();
        update_json(&path, fast(), |map: &mut BTreeMap<String, u32>| {
            *map.entry("count".into()).or_default() += 1;
        })
        .await
        .unwrap();

        let map: BTreeMap<String, u32> = read_json(&path).await.unwrap().unwrap();
        assert_eq!(map["count"], 2);
        assert!(!temp.path().join("prefs.lock").exists());
    }

    #[tokio::test]
    async fn test_commit_runs_under_lock() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("record");
        write_json(&path, &BTreeMap::from([("n".to_string(), 1u32)]), fast())
            .await
            .unwrap();

        let lock_path = temp.path().join("record.lock");
        let seen = modify_json(
            &path,
            fast(),
            |map: &mut BTreeMap<String, u32>| {
                *map.get_mut("n").unwrap() += 1;
                map["n"]
            },
            |n| {
                assert_eq!(*n, 2);
                assert!(lock_path.exists());
                Ok(())
            },
        )
        .await
        .unwrap();
        assert_eq!(seen, Some(2));
        assert!(!lock_path.exists());

        let missing = temp.path().join("missing");
        let result = modify_json(
            &missing,
            fast(),
            |_: &mut BTreeMap<String, u32>| (),
            |_| panic!("nothing to commit"),
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }
}
