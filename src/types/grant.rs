use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{FileMeta, FileTag, Gid, Uid};

/// One share target of a file, as recorded in the grant index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ShareTarget {
    Uid(Uid),
    Gid(Gid),
    Local,
    World,
}

impl ShareTarget {
    /// Every target named by a file's sharing fields.
    #[must_use]
    pub fn all_of(meta: &FileMeta) -> Vec<ShareTarget> {
        let mut targets: Vec<ShareTarget> = meta
            .uid_shares
            .iter()
            .map(|&uid| ShareTarget::Uid(uid))
            .chain(meta.gid_shares.iter().map(|&gid| ShareTarget::Gid(gid)))
            .collect();
        if meta.local_share {
            targets.push(ShareTarget::Local);
        }
        if meta.world_share {
            targets.push(ShareTarget::World);
        }
        targets
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ShareTarget::Uid(_) => "uid",
            ShareTarget::Gid(_) => "gid",
            ShareTarget::Local => "local",
            ShareTarget::World => "world",
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            ShareTarget::Uid(id) | ShareTarget::Gid(id) => *id,
            ShareTarget::Local | ShareTarget::World => 0,
        }
    }
}

/// The grant a reflected entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "gid", rename_all = "snake_case")]
pub enum GrantVia {
    /// A point share naming the viewer directly.
    Uid,
    /// A point share naming one of the viewer's groups.
    Gid(Gid),
    /// Shared with every registered account.
    Local,
}

impl GrantVia {
    /// Group and local grants come from shared pools; only those can be
    /// hidden by the viewer.
    #[must_use]
    pub fn is_pooled(&self) -> bool {
        !matches!(self, GrantVia::Uid)
    }

    #[must_use]
    pub fn still_granted(&self, meta: &FileMeta, viewer_uid: Uid) -> bool {
        match self {
            GrantVia::Uid => meta.uid_shares.contains(&viewer_uid),
            GrantVia::Gid(gid) => meta.gid_shares.contains(gid),
            GrantVia::Local => meta.local_share,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            GrantVia::Uid => "uid",
            GrantVia::Gid(_) => "gid",
            GrantVia::Local => "local",
        }
    }

    #[must_use]
    pub fn gid(&self) -> Option<Gid> {
        match self {
            GrantVia::Gid(gid) => Some(*gid),
            _ => None,
        }
    }

    #[must_use]
    pub fn from_parts(kind: &str, gid: Option<Gid>) -> Option<Self> {
        match (kind, gid) {
            ("uid", _) => Some(GrantVia::Uid),
            ("gid", Some(gid)) => Some(GrantVia::Gid(gid)),
            ("local", _) => Some(GrantVia::Local),
            _ => None,
        }
    }
}

impl fmt::Display for GrantVia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrantVia::Gid(gid) => write!(f, "gid:{gid}"),
            other => f.write_str(other.kind()),
        }
    }
}

/// A grant currently projected into a viewer's listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reflection {
    pub viewer_uid: Uid,
    pub file_tag: FileTag,
    pub owner_uid: Uid,
    pub via: GrantVia,
    pub created_at: DateTime<Utc>,
}

/// A group or local grant sitting in a shared pool, available for
/// reflection into a viewer's listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolGrant {
    pub file_tag: FileTag,
    pub owner_uid: Uid,
    pub via: GrantVia,
}

/// Grant index changes for one file, applied in a single transaction.
#[derive(Debug, Clone)]
pub struct GrantUpdate {
    pub file_tag: FileTag,
    pub owner_uid: Uid,
    /// Replaces every share row of the file.
    pub targets: Vec<ShareTarget>,
    /// Newly point-shared viewers: reflected directly (replacing any pooled
    /// reflection) and removed from their hidden set.
    pub reflect: Vec<Uid>,
    /// Viewers whose point share was revoked.
    pub unreflect: Vec<Uid>,
}
