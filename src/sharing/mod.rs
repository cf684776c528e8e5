//! Who may see a file.
//!
//! Visibility is computed from a file's sharing fields and the viewer's
//! groups. Listings are served from an explicit grant index: every file
//! granted to a viewer has a reflection row, kept in step with the sharing
//! fields by [`SharingEngine::publish`] and [`SharingEngine::reconcile`].
//! A direct (uid) share always owns its reflection; group and local grants
//! are reflected lazily and can be hidden by the viewer.

mod engine;

pub use engine::{ReconcileReport, ShareSummary, SharedEntry, SharingEngine};

use serde::Serialize;

use crate::types::{FileMeta, Gid, Uid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Owner,
    SharedUid,
    SharedGid,
    SharedLocal,
    SharedWorld,
    None,
}

impl Visibility {
    /// Whether a registered viewer other than the owner may open the file.
    /// World shares are only served on the anonymous path.
    #[must_use]
    pub fn grants_member_access(&self) -> bool {
        matches!(
            self,
            Visibility::SharedUid | Visibility::SharedGid | Visibility::SharedLocal
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Viewer {
    Anonymous,
    Account { uid: Uid, gids: Vec<Gid> },
}

#[must_use]
pub fn effective_visibility(meta: &FileMeta, viewer: &Viewer) -> Visibility {
    match viewer {
        Viewer::Anonymous => {
            if meta.world_share {
                Visibility::SharedWorld
            } else {
                Visibility::None
            }
        }
        Viewer::Account { uid, gids } => {
            if meta.owner_uid == *uid {
                Visibility::Owner
            } else if meta.uid_shares.contains(uid) {
                Visibility::SharedUid
            } else if gids.iter().any(|gid| meta.gid_shares.contains(gid)) {
                Visibility::SharedGid
            } else if meta.local_share {
                Visibility::SharedLocal
            } else if meta.world_share {
                Visibility::SharedWorld
            } else {
                Visibility::None
            }
        }
    }
}
