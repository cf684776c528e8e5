use std::path::{Path, PathBuf};

use crate::types::{FileTag, Uid};

const USERS_DIR: &str = "users";
const STAGING_DIR: &str = ".incoming";

/// Where things live under the data directory.
///
/// ```text
/// <data_dir>/kbasix.db
/// <data_dir>/users/<uid>/<file_tag>           content
/// <data_dir>/users/<uid>/<file_tag>-id        metadata sidecar
/// <data_dir>/users/<uid>/<token>              session marker (`-tk`)
/// <data_dir>/users/<uid>/<uid>.prefs          listing preferences
/// <data_dir>/users/<uid>/.incoming/           uploads in progress
/// ```
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: data_dir.into(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn users_dir(&self) -> PathBuf {
        self.root.join(USERS_DIR)
    }

    #[must_use]
    pub fn user_dir(&self, uid: Uid) -> PathBuf {
        self.users_dir().join(uid.to_string())
    }

    #[must_use]
    pub fn staging_dir(&self, uid: Uid) -> PathBuf {
        self.user_dir(uid).join(STAGING_DIR)
    }

    #[must_use]
    pub fn prefs_path(&self, uid: Uid) -> PathBuf {
        self.user_dir(uid).join(format!("{uid}.prefs"))
    }

    #[must_use]
    pub fn content_path(&self, uid: Uid, tag: &FileTag) -> PathBuf {
        self.user_dir(uid).join(tag.as_str())
    }

    #[must_use]
    pub fn meta_path(&self, uid: Uid, tag: &FileTag) -> PathBuf {
        self.user_dir(uid).join(tag.meta_name())
    }

    #[must_use]
    pub fn removed_meta_path(&self, uid: Uid, tag: &FileTag) -> PathBuf {
        self.user_dir(uid).join(tag.removed_name())
    }

    /// Token names are validated before they are joined onto a path.
    #[must_use]
    pub fn token_path(&self, uid: Uid, token: &str) -> PathBuf {
        self.user_dir(uid).join(token)
    }

    #[must_use]
    pub fn has_user_dir(&self, uid: Uid) -> bool {
        self.user_dir(uid).is_dir()
    }
}
