//! Soft quotas. Usage is recomputed from disk on every check, so files
//! placed or removed behind the server's back are accounted for.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use glob::{Pattern, glob};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::store::Layout;
use crate::types::Uid;

/// Bytes held by the content files a user owns. Metadata sidecars,
/// session markers, preferences and uploads in progress do not count.
pub fn usage(layout: &Layout, uid: Uid) -> Result<u64> {
    let dir = layout.user_dir(uid);
    if !dir.is_dir() {
        return Ok(0);
    }

    let pattern = format!("{}/*-file", Pattern::escape(&dir.to_string_lossy()));
    let entries = glob(&pattern).map_err(|e| Error::Config(format!("bad usage pattern: {e}")))?;

    let paths = entries.filter_map(|entry| match entry {
        Ok(path) => Some(path),
        Err(e) => {
            warn!("Skipping unreadable entry while computing usage: {e}");
            None
        }
    });
    total_size(paths)
}

/// Sums regular files among `paths`. Entries removed since they were
/// listed are skipped.
fn total_size(paths: impl IntoIterator<Item = PathBuf>) -> Result<u64> {
    let mut total = 0u64;
    for path in paths {
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} vanished while computing usage", path.display());
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if meta.file_type().is_file() {
            total = total.saturating_add(meta.len());
        }
    }
    Ok(total)
}

/// Refuses new additions once usage has reached the quota. Existing files
/// are never touched.
pub fn check(layout: &Layout, uid: Uid, quota: u64) -> Result<u64> {
    let used = usage(layout, uid)?;
    debug!("Space usage of uid {uid}: {used}/{quota}");
    if used >= quota {
        info!("Addition refused for uid {uid}: over quota");
        return Err(Error::OverQuota { usage: used, quota });
    }
    Ok(used)
}
