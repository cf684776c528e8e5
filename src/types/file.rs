use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{Gid, Uid};
use crate::error::{Error, Result};

const TAG_SUFFIX: &str = "-file";
const META_SUFFIX: &str = "-id";
const REMOVED_SUFFIX: &str = "-removed";
const HASH_LEN: usize = 64;

/// Identifier of a stored file, `<seconds>.<micros>-<sha256 hex>-file`.
///
/// The tag doubles as the content file name, so any string that does not
/// have exactly this shape is rejected before it reaches the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileTag(String);

impl FileTag {
    #[must_use]
    pub fn generate() -> Self {
        let now = Utc::now();
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let hash = hex::encode(Sha256::digest(seed));
        Self(format!(
            "{}.{:06}-{hash}{TAG_SUFFIX}",
            now.timestamp(),
            now.timestamp_subsec_micros()
        ))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        if is_valid_tag(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(Error::InvalidFileTag)
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the metadata sidecar.
    #[must_use]
    pub fn meta_name(&self) -> String {
        format!("{}{META_SUFFIX}", self.0)
    }

    /// File name a sidecar is renamed to when its owner deletes the file.
    #[must_use]
    pub fn removed_name(&self) -> String {
        format!("{}{META_SUFFIX}{REMOVED_SUFFIX}", self.0)
    }

    /// Recovers the tag from a sidecar file name.
    #[must_use]
    pub fn from_meta_name(name: &str) -> Option<Self> {
        name.strip_suffix(META_SUFFIX)
            .and_then(|tag| Self::parse(tag).ok())
    }
}

fn is_valid_tag(raw: &str) -> bool {
    let Some(stem) = raw.strip_suffix(TAG_SUFFIX) else {
        return false;
    };
    let Some((stamp, hash)) = stem.split_once('-') else {
        return false;
    };
    let Some((secs, micros)) = stamp.split_once('.') else {
        return false;
    };

    !secs.is_empty()
        && secs.bytes().all(|b| b.is_ascii_digit())
        && !secs.starts_with('0')
        && !micros.is_empty()
        && micros.bytes().all(|b| b.is_ascii_digit())
        && hash.len() == HASH_LEN
        && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl fmt::Display for FileTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FileTag {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(&raw)
    }
}

impl From<FileTag> for String {
    fn from(tag: FileTag) -> Self {
        tag.0
    }
}

/// The metadata sidecar stored next to every content file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub file_tag: FileTag,
    pub owner: String,
    pub owner_uid: Uid,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub type_label: String,
    pub file_name: String,
    pub size: u64,
    pub checksum: String,
    #[serde(default)]
    pub uid_shares: BTreeSet<Uid>,
    #[serde(default)]
    pub gid_shares: BTreeSet<Gid>,
    #[serde(default)]
    pub local_share: bool,
    #[serde(default)]
    pub world_share: bool,
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
}

impl FileMeta {
    #[must_use]
    pub fn is_shared(&self) -> bool {
        !self.uid_shares.is_empty() || !self.gid_shares.is_empty() || self.local_share || self.world_share
    }

    /// A private copy of this entry for a new owner: fresh tag and
    /// timestamp, no shares and no custom fields.
    #[must_use]
    pub fn copied_for(&self, owner: &str, owner_uid: Uid) -> Self {
        Self {
            file_tag: FileTag::generate(),
            owner: owner.to_string(),
            owner_uid,
            created_at: Utc::now(),
            uid_shares: BTreeSet::new(),
            gid_shares: BTreeSet::new(),
            local_share: false,
            world_share: false,
            custom: BTreeMap::new(),
            ..self.clone()
        }
    }
}

/// Field values accepted when a file is uploaded.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadFields {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub type_label: String,
    #[serde(default)]
    pub file_name: String,
}
