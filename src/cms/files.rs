use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tracing::{debug, error, info, warn};

use super::Cms;
use crate::error::{Error, Result};
use crate::files::{ListingPrefs, PrefsPatch, Upload, prefs, quota};
use crate::sharing::{ShareSummary, Visibility, effective_visibility};
use crate::types::{Account, FileMeta, FileTag, GrantVia, Session, Uid, UploadFields};

/// One row of the file manager.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    #[serde(flatten)]
    pub meta: FileMeta,
    pub visibility: Visibility,
    /// User name of the owner, for files shared with the viewer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<GrantVia>,
    /// How the viewer shares their own file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shares: Option<ShareSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub files: Vec<FileEntry>,
    pub prefs: ListingPrefs,
    pub usage: u64,
    pub quota: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Uploaded {
    pub file: FileMeta,
    /// Set when the upload carried no content.
    pub empty: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkDelete {
    pub deleted: usize,
    pub failed: usize,
}

/// Metadata editor input. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetaEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub type_label: Option<String>,
    /// Only keys the file already carries can be edited.
    #[serde(default)]
    pub custom: BTreeMap<String, String>,
    /// Comma-separated user names.
    pub uid_shares: Option<String>,
    /// Comma-separated group names.
    pub gid_shares: Option<String>,
    pub local_share: Option<bool>,
    pub world_share: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Edited {
    pub file: FileMeta,
    pub shares: ShareSummary,
    pub notes: Vec<String>,
}

impl Cms {
    /// Starts an upload once the owner is below quota.
    pub async fn begin_upload(&self, session: &Session) -> Result<Upload> {
        let account = self.session_account(session)?;
        quota::check(&self.layout, account.uid, account.quota)?;
        self.files.begin_upload(account.uid).await
    }

    pub async fn finish_upload(
        &self,
        session: &Session,
        upload: Upload,
        fields: UploadFields,
    ) -> Result<Uploaded> {
        let account = self.session_account(session)?;
        let empty = upload.size() == 0;
        if empty {
            warn!("{} uploaded an empty file", account.login_name);
        }
        let file = self.files.finish_upload(upload, &account, fields).await?;
        info!(
            "{} uploaded {} ({} bytes)",
            account.login_name, file.file_tag, file.size
        );
        Ok(Uploaded { file, empty })
    }

    pub async fn abort_upload(&self, upload: Upload) {
        if let Err(e) = self.files.abort_upload(upload).await {
            error!("Unable to discard an interrupted upload: {e}");
        }
    }

    /// The viewer's own files plus those shared with them, filtered and
    /// ordered by their preferences.
    pub async fn list_files(&self, session: &Session) -> Result<Listing> {
        let account = self.session_account(session)?;
        let prefs = prefs::load(&self.layout, account.uid).await?;

        match self.files.collect_garbage(account.uid).await {
            Ok(0) => {}
            Ok(n) => debug!("Collected {n} abandoned files of uid {}", account.uid),
            Err(e) => warn!("Garbage collection for uid {} failed: {e}", account.uid),
        }

        let mut entries = Vec::new();
        for meta in self.files.list_owned(account.uid).await? {
            let shares = if meta.is_shared() {
                Some(self.sharing.share_summary(&meta)?)
            } else {
                None
            };
            entries.push(FileEntry {
                meta,
                visibility: Visibility::Owner,
                shared_by: None,
                via: None,
                shares,
            });
        }

        if !prefs.hide_shared {
            let viewer = self.sharing.viewer(&account)?;
            let mut owners: BTreeMap<Uid, String> = BTreeMap::new();
            for shared in self.sharing.shared_with(&viewer).await? {
                let owner_uid = shared.meta.owner_uid;
                if !owners.contains_key(&owner_uid) {
                    let name = self
                        .accounts
                        .lookup(owner_uid)?
                        .map_or_else(|| shared.meta.owner.clone(), |owner| owner.user_name);
                    owners.insert(owner_uid, name);
                }
                entries.push(FileEntry {
                    visibility: effective_visibility(&shared.meta, &viewer),
                    shared_by: owners.get(&owner_uid).cloned(),
                    via: Some(shared.via),
                    shares: None,
                    meta: shared.meta,
                });
            }
        }

        entries.retain(|entry| prefs.matches_keywords(&entry.meta));
        entries.sort_by(|a, b| prefs.order(&a.meta, &b.meta));

        Ok(Listing {
            files: entries,
            usage: quota::usage(&self.layout, account.uid)?,
            quota: account.quota,
            prefs,
        })
    }

    pub async fn update_prefs(&self, session: &Session, patch: PrefsPatch) -> Result<ListingPrefs> {
        let account = self.session_account(session)?;
        prefs::update(&self.layout, account.uid, self.files.lock_settings(), patch).await
    }

    /// A single file manager row.
    pub async fn file_entry(&self, session: &Session, tag: &FileTag) -> Result<FileEntry> {
        let account = self.session_account(session)?;
        let meta = self.resolve(&account, tag).await?.ok_or(Error::NotFound)?;
        if meta.owner_uid == account.uid {
            return Ok(FileEntry {
                shares: Some(self.sharing.share_summary(&meta)?),
                meta,
                visibility: Visibility::Owner,
                shared_by: None,
                via: None,
            });
        }

        let viewer = self.sharing.viewer(&account)?;
        let via = self
            .store
            .get_reflection(account.uid, tag)?
            .map(|reflection| reflection.via);
        let shared_by = self
            .accounts
            .lookup(meta.owner_uid)?
            .map_or_else(|| meta.owner.clone(), |owner| owner.user_name);
        Ok(FileEntry {
            visibility: effective_visibility(&meta, &viewer),
            shared_by: Some(shared_by),
            via,
            shares: None,
            meta,
        })
    }

    /// Metadata and an open handle for a file the viewer may read.
    pub async fn open_file(&self, session: &Session, tag: &FileTag) -> Result<(FileMeta, File)> {
        let account = self.session_account(session)?;
        let meta = self.resolve(&account, tag).await?.ok_or(Error::NotFound)?;
        let file = self.files.open(&meta).await?;
        debug!("{} opened {}", account.login_name, tag);
        Ok((meta, file))
    }

    /// A world-shared file, served without a session.
    pub async fn open_world_file(&self, user_name: &str, tag: &FileTag) -> Result<(FileMeta, File)> {
        let meta = self
            .sharing
            .world_file(user_name, tag)
            .await?
            .ok_or(Error::NotFound)?;
        let file = self.files.open(&meta).await?;
        Ok((meta, file))
    }

    /// Deletes an own file, or drops a shared one from the viewer's
    /// listing.
    pub async fn delete_file(&self, session: &Session, tag: &FileTag) -> Result<()> {
        let account = self.session_account(session)?;
        self.delete_for(&account, tag).await
    }

    /// Deletes each file independently; one failure does not stop the rest.
    pub async fn bulk_delete(&self, session: &Session, tags: &[String]) -> Result<BulkDelete> {
        let account = self.session_account(session)?;
        let mut result = BulkDelete::default();

        for raw in tags {
            let outcome = match FileTag::parse(raw) {
                Ok(tag) => self.delete_for(&account, &tag).await,
                Err(e) => {
                    error!("{} sent a malformed file tag: {raw:?}", account.login_name);
                    Err(e)
                }
            };
            match outcome {
                Ok(()) => result.deleted += 1,
                Err(e) => {
                    if e.is_storage() {
                        error!("Deleting {raw} for {} failed: {e}", account.login_name);
                    }
                    result.failed += 1;
                }
            }
        }

        info!(
            "{} bulk-deleted {} files ({} failed)",
            account.login_name, result.deleted, result.failed
        );
        Ok(result)
    }

    /// Copies a readable file into the viewer's storage as a private file.
    pub async fn copy_file(&self, session: &Session, tag: &FileTag) -> Result<FileMeta> {
        let account = self.session_account(session)?;
        let source = self.resolve(&account, tag).await?.ok_or(Error::NotFound)?;
        quota::check(&self.layout, account.uid, account.quota)?;
        self.files.copy(&source, &account).await
    }

    /// Edits an own file's metadata and sharing.
    pub async fn edit_file(&self, session: &Session, tag: &FileTag, edit: MetaEdit) -> Result<Edited> {
        let account = self.session_account(session)?;
        let mut notes = Vec::new();

        let uid_shares = edit
            .uid_shares
            .as_deref()
            .map(|text| self.sharing.parse_user_shares(&account, text, &mut notes))
            .transpose()?;
        let gid_shares = edit
            .gid_shares
            .as_deref()
            .map(|text| self.sharing.parse_group_shares(text, &mut notes))
            .transpose()?;
        let type_label = edit.type_label.map(|label| self.files.type_label(&label));

        let updated = self
            .files
            .update_meta(
                account.uid,
                tag,
                |meta| {
                    let previous = meta.uid_shares.clone();
                    let mut ignored = Vec::new();
                    if let Some(title) = edit.title {
                        meta.title = title;
                    }
                    if let Some(description) = edit.description {
                        meta.description = description;
                    }
                    if let Some(type_label) = type_label {
                        meta.type_label = type_label;
                    }
                    for (key, value) in edit.custom {
                        match meta.custom.get_mut(&key) {
                            Some(slot) => *slot = value,
                            None => ignored.push(format!("Ignoring unknown key: {key}")),
                        }
                    }
                    if let Some(uids) = uid_shares {
                        meta.uid_shares = uids;
                    }
                    if let Some(gids) = gid_shares {
                        meta.gid_shares = gids;
                    }
                    if let Some(local) = edit.local_share {
                        meta.local_share = local;
                    }
                    if let Some(world) = edit.world_share {
                        meta.world_share = world;
                    }
                    (previous, meta.clone(), ignored)
                },
                |(previous, file, _)| self.sharing.publish(file, previous),
            )
            .await?;

        let Some((_, file, ignored)) = updated else {
            return Err(Error::NotFound);
        };
        notes.extend(ignored);

        info!("{} edited {}", account.login_name, file.file_tag);
        Ok(Edited {
            shares: self.sharing.share_summary(&file)?,
            file,
            notes,
        })
    }

    /// Finds a file by tag among the viewer's own files and the files
    /// shared with them. Anything else is `None`, whether or not it exists.
    async fn resolve(&self, account: &Account, tag: &FileTag) -> Result<Option<FileMeta>> {
        if let Some(meta) = self.files.read_meta(account.uid, tag).await? {
            return Ok(Some(meta));
        }
        let viewer = self.sharing.viewer(account)?;
        self.sharing.reconcile(&viewer).await?;
        let Some(owner_uid) = self.sharing.reflected_owner(account.uid, tag)? else {
            return Ok(None);
        };
        self.sharing.accessible(&viewer, owner_uid, tag).await
    }

    async fn delete_for(&self, account: &Account, tag: &FileTag) -> Result<()> {
        if self.files.read_meta(account.uid, tag).await?.is_some() {
            if !self.files.remove(account.uid, tag).await? {
                return Err(Error::NotFound);
            }
            self.sharing.withdraw(tag)?;
            info!("{} deleted {tag}", account.login_name);
            return Ok(());
        }
        if self.sharing.dismiss(account.uid, tag).await? {
            return Ok(());
        }
        Err(Error::NotFound)
    }
}
