use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Viewer, Visibility, effective_visibility};
use crate::error::Result;
use crate::files::FileStore;
use crate::store::Store;
use crate::types::{
    Account, FileMeta, FileTag, Gid, GrantUpdate, GrantVia, PoolGrant, Reflection, ShareTarget,
    Uid,
};

const RAW_ID_PREFIX: &str = "*.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: usize,
    pub removed: usize,
}

/// A file another account shares with the viewer.
#[derive(Debug, Clone, Serialize)]
pub struct SharedEntry {
    pub meta: FileMeta,
    pub via: GrantVia,
}

/// How an owner's file is shared, in display form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShareSummary {
    /// User names. `-name` marks a recipient who dismissed the share;
    /// `*.<uid>` an account that no longer exists.
    pub users: Vec<String>,
    /// Group names, or `*.<gid>` for groups that no longer exist.
    pub groups: Vec<String>,
    pub local: bool,
    pub world: bool,
}

pub struct SharingEngine {
    store: Arc<dyn Store>,
    files: Arc<FileStore>,
    exusers_cannot_share: bool,
}

impl SharingEngine {
    pub fn new(store: Arc<dyn Store>, files: Arc<FileStore>, exusers_cannot_share: bool) -> Self {
        Self {
            store,
            files,
            exusers_cannot_share,
        }
    }

    pub fn viewer(&self, account: &Account) -> Result<Viewer> {
        let gids = self
            .store
            .list_account_groups(&account.login_name)?
            .into_iter()
            .map(|group| group.gid)
            .collect();
        Ok(Viewer::Account {
            uid: account.uid,
            gids,
        })
    }

    /// Resolves comma-separated user names for a uid share. Names are
    /// case-insensitive, the owner is skipped and `*.<uid>` keeps a raw id.
    pub fn parse_user_shares(
        &self,
        owner: &Account,
        text: &str,
        notes: &mut Vec<String>,
    ) -> Result<BTreeSet<Uid>> {
        let mut uids = BTreeSet::new();
        for name in share_names(text) {
            let name = name.to_lowercase();
            if name == owner.login_name {
                continue;
            }
            let uid = match raw_id(&name) {
                Some(id) => Some(id),
                None => self.store.get_account_by_name(&name)?.map(|a| a.uid),
            };
            match uid {
                Some(uid) if uid != owner.uid => {
                    uids.insert(uid);
                }
                Some(_) => {}
                None => notes.push(format!("Ignoring unknown account \"{name}\"")),
            }
        }
        Ok(uids)
    }

    /// Resolves comma-separated group names for a gid share. Group names
    /// are case-sensitive.
    pub fn parse_group_shares(&self, text: &str, notes: &mut Vec<String>) -> Result<BTreeSet<Gid>> {
        let mut gids = BTreeSet::new();
        for name in share_names(text) {
            let gid = match raw_id(name) {
                Some(id) => Some(id),
                None => self.store.get_group_by_name(name)?.map(|g| g.gid),
            };
            match gid {
                Some(gid) => {
                    gids.insert(gid);
                }
                None => notes.push(format!("Ignoring unknown group \"{name}\"")),
            }
        }
        Ok(gids)
    }

    /// Brings the grant index in line with a file's sharing fields.
    /// `previous_uids` is the uid share set before the edit.
    pub fn publish(&self, meta: &FileMeta, previous_uids: &BTreeSet<Uid>) -> Result<()> {
        let update = GrantUpdate {
            file_tag: meta.file_tag.clone(),
            owner_uid: meta.owner_uid,
            targets: ShareTarget::all_of(meta),
            reflect: meta.uid_shares.difference(previous_uids).copied().collect(),
            unreflect: previous_uids.difference(&meta.uid_shares).copied().collect(),
        };
        debug!(
            "Publishing {} share targets for {} ({} reflected, {} withdrawn)",
            update.targets.len(),
            meta.file_tag,
            update.reflect.len(),
            update.unreflect.len()
        );
        self.store.apply_grant_update(&update)
    }

    /// Drops every grant of a file its owner deleted. Reflections are
    /// collected by the recipients' next reconciliation.
    pub fn withdraw(&self, tag: &FileTag) -> Result<()> {
        self.store.delete_file_shares(tag)
    }

    /// Makes the viewer's reflections match current grants: stale ones are
    /// removed, pooled grants that are neither reflected nor hidden are
    /// added. Running it twice in a row changes nothing the second time.
    pub async fn reconcile(&self, viewer: &Viewer) -> Result<ReconcileReport> {
        let Viewer::Account { uid, gids } = viewer else {
            return Ok(ReconcileReport::default());
        };
        let mut report = ReconcileReport::default();

        let mut reflected = BTreeSet::new();
        for reflection in self.store.list_reflections(*uid)? {
            let granted = match self
                .files
                .read_meta(reflection.owner_uid, &reflection.file_tag)
                .await?
            {
                Some(meta) => {
                    reflection.via.still_granted(&meta, *uid)
                        && reflection.via.gid().is_none_or(|gid| gids.contains(&gid))
                }
                None => false,
            };
            if granted {
                reflected.insert(reflection.file_tag);
            } else if self.store.delete_reflection(*uid, &reflection.file_tag)? {
                debug!("Dropped stale reflection of {} for uid {uid}", reflection.file_tag);
                report.removed += 1;
            }
        }

        for grant in preferred_grants(self.store.list_pool_grants(*uid, gids)?) {
            if reflected.contains(&grant.file_tag) || self.store.is_hidden(*uid, &grant.file_tag)? {
                continue;
            }
            if self.files.read_meta(grant.owner_uid, &grant.file_tag).await?.is_none() {
                continue;
            }
            let reflection = Reflection {
                viewer_uid: *uid,
                file_tag: grant.file_tag,
                owner_uid: grant.owner_uid,
                via: grant.via,
                created_at: Utc::now(),
            };
            if self.store.add_reflection(&reflection)? {
                report.created += 1;
            }
        }

        if report != ReconcileReport::default() {
            info!(
                "Reconciled shares for uid {uid}: {} created, {} removed",
                report.created, report.removed
            );
        }
        Ok(report)
    }

    /// Files other accounts share with the viewer, after reconciliation.
    pub async fn shared_with(&self, viewer: &Viewer) -> Result<Vec<SharedEntry>> {
        let Viewer::Account { uid, .. } = viewer else {
            return Ok(Vec::new());
        };
        self.reconcile(viewer).await?;

        let mut entries = Vec::new();
        for reflection in self.store.list_reflections(*uid)? {
            let Some(meta) = self
                .files
                .read_meta(reflection.owner_uid, &reflection.file_tag)
                .await?
            else {
                continue;
            };
            if !self.owner_may_share(meta.owner_uid)? {
                continue;
            }
            entries.push(SharedEntry {
                meta,
                via: reflection.via,
            });
        }
        Ok(entries)
    }

    /// The metadata of a file the viewer may open, or `None` when it does
    /// not exist or is not theirs to see.
    pub async fn accessible(
        &self,
        viewer: &Viewer,
        owner_uid: Uid,
        tag: &FileTag,
    ) -> Result<Option<FileMeta>> {
        let Some(meta) = self.files.read_meta(owner_uid, tag).await? else {
            return Ok(None);
        };
        let visibility = effective_visibility(&meta, viewer);
        let allowed = match viewer {
            Viewer::Anonymous => visibility == Visibility::SharedWorld,
            Viewer::Account { uid, .. } if *uid == owner_uid => true,
            Viewer::Account { uid, .. } => {
                visibility.grants_member_access() && self.store.get_reflection(*uid, tag)?.is_some()
            }
        };
        if !allowed || (owner_uid != viewer_uid(viewer) && !self.owner_may_share(owner_uid)?) {
            debug!("Access to {tag} of uid {owner_uid} refused ({visibility:?})");
            return Ok(None);
        }
        Ok(Some(meta))
    }

    /// Owner of a file reflected into the viewer's listing.
    pub fn reflected_owner(&self, viewer_uid: Uid, tag: &FileTag) -> Result<Option<Uid>> {
        Ok(self
            .store
            .get_reflection(viewer_uid, tag)?
            .map(|reflection| reflection.owner_uid))
    }

    /// A world-shared file addressed by its owner's user name.
    pub async fn world_file(&self, user_name: &str, tag: &FileTag) -> Result<Option<FileMeta>> {
        let Some(owner) = self.store.get_account_by_name(&user_name.to_lowercase())? else {
            return Ok(None);
        };
        self.accessible(&Viewer::Anonymous, owner.uid, tag).await
    }

    /// Removes a file from a recipient's listing. A point share only loses
    /// its reflection; a pooled grant is hidden for good.
    pub async fn dismiss(&self, viewer_uid: Uid, tag: &FileTag) -> Result<bool> {
        let Some(reflection) = self.store.get_reflection(viewer_uid, tag)? else {
            return Ok(false);
        };
        if reflection.via.is_pooled() {
            self.store.dismiss_share(viewer_uid, tag)?;
            info!("uid {viewer_uid} dismissed {} share of {tag}", reflection.via);
        } else {
            self.store.delete_reflection(viewer_uid, tag)?;
            info!("uid {viewer_uid} removed point share of {tag}");
        }
        Ok(true)
    }

    pub fn share_summary(&self, meta: &FileMeta) -> Result<ShareSummary> {
        let mut users = Vec::with_capacity(meta.uid_shares.len());
        for &uid in &meta.uid_shares {
            let entry = match self.store.get_account(uid)? {
                None => format!("{RAW_ID_PREFIX}{uid}"),
                Some(account) => {
                    if self.store.get_reflection(uid, &meta.file_tag)?.is_some() {
                        account.user_name
                    } else {
                        format!("-{}", account.user_name)
                    }
                }
            };
            users.push(entry);
        }

        let mut groups = Vec::with_capacity(meta.gid_shares.len());
        for &gid in &meta.gid_shares {
            groups.push(match self.store.get_group(gid)? {
                Some(group) => group.group_name,
                None => format!("{RAW_ID_PREFIX}{gid}"),
            });
        }

        Ok(ShareSummary {
            users,
            groups,
            local: meta.local_share,
            world: meta.world_share,
        })
    }

    fn owner_may_share(&self, owner_uid: Uid) -> Result<bool> {
        if !self.exusers_cannot_share {
            return Ok(true);
        }
        let exists = self.store.get_account(owner_uid)?.is_some();
        if !exists {
            warn!("Hiding share of departed uid {owner_uid}");
        }
        Ok(exists)
    }
}

fn viewer_uid(viewer: &Viewer) -> Uid {
    match viewer {
        Viewer::Account { uid, .. } => *uid,
        // Never matches an owner.
        Viewer::Anonymous => Uid::MAX,
    }
}

fn share_names(text: &str) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    text.split(',')
        .map(|name| name.trim().trim_start_matches('-'))
        .filter(|name| !name.is_empty() && seen.insert(*name))
        .collect()
}

fn raw_id(name: &str) -> Option<u64> {
    name.strip_prefix(RAW_ID_PREFIX)?.parse().ok()
}

/// One grant per file; a group grant beats the local pool.
fn preferred_grants(grants: Vec<PoolGrant>) -> Vec<PoolGrant> {
    let mut chosen: BTreeMap<FileTag, PoolGrant> = BTreeMap::new();
    for grant in grants {
        match chosen.get(&grant.file_tag) {
            Some(existing) if existing.via != GrantVia::Local || grant.via == GrantVia::Local => {}
            _ => {
                chosen.insert(grant.file_tag.clone(), grant);
            }
        }
    }
    chosen.into_values().collect()
}
