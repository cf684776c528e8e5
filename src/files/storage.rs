use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::FilesConfig;
use crate::error::Result;
use crate::store::lock::{modify_json, read_json, write_json};
use crate::store::{Layout, LockSettings};
use crate::types::{Account, FileMeta, FileTag, Uid, UploadFields};

const UNKNOWN_TYPE: &str = "Unknown";
const STAGING_SUFFIX: &str = ".part";

/// An upload in progress. Content is streamed into the owner's staging
/// directory and only becomes visible once [`FileStore::finish_upload`]
/// has written its metadata.
pub struct Upload {
    owner_uid: Uid,
    path: PathBuf,
    file: fs::File,
    hasher: Sha256,
    size: u64,
}

impl Upload {
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.hasher.update(chunk);
        self.file.write_all(chunk).await?;
        self.size += chunk.len() as u64;
        Ok(())
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Content files and their metadata sidecars.
pub struct FileStore {
    layout: Layout,
    config: FilesConfig,
    lock: LockSettings,
}

impl FileStore {
    pub fn new(layout: Layout, config: FilesConfig) -> Self {
        let lock = LockSettings::from(&config);
        Self {
            layout,
            config,
            lock,
        }
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    #[must_use]
    pub fn lock_settings(&self) -> LockSettings {
        self.lock
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    pub async fn begin_upload(&self, owner_uid: Uid) -> Result<Upload> {
        let staging = self.layout.staging_dir(owner_uid);
        fs::create_dir_all(&staging).await?;
        let path = staging.join(format!("{}{STAGING_SUFFIX}", Uuid::new_v4()));
        let file = fs::File::create(&path).await?;
        debug!("Receiving upload into {}", path.display());
        Ok(Upload {
            owner_uid,
            path,
            file,
            hasher: Sha256::new(),
            size: 0,
        })
    }

    /// Moves a completed upload into place and records its metadata.
    pub async fn finish_upload(
        &self,
        mut upload: Upload,
        owner: &Account,
        fields: UploadFields,
    ) -> Result<FileMeta> {
        upload.file.flush().await?;
        upload.file.sync_all().await?;
        drop(upload.file);

        let file_tag = FileTag::generate();
        let content_path = self.layout.content_path(owner.uid, &file_tag);
        fs::rename(&upload.path, &content_path).await?;
        restrict(&content_path).await?;

        let meta = FileMeta {
            file_tag,
            owner: owner.login_name.clone(),
            owner_uid: owner.uid,
            created_at: Utc::now(),
            title: fields.title,
            description: fields.description,
            type_label: self.type_label(&fields.type_label),
            file_name: fields.file_name,
            size: upload.size,
            checksum: hex::encode(upload.hasher.finalize()),
            uid_shares: Default::default(),
            gid_shares: Default::default(),
            local_share: false,
            world_share: false,
            custom: Default::default(),
        };

        if let Err(e) = self.write_meta(&meta).await {
            error!(
                "Unable to record metadata for {} ({}): {e}",
                meta.file_tag, owner.login_name
            );
            remove_if_present(&content_path).await?;
            return Err(e);
        }

        info!(
            "Stored {} ({} bytes) for {}",
            meta.file_tag, meta.size, owner.login_name
        );
        Ok(meta)
    }

    pub async fn abort_upload(&self, upload: Upload) -> Result<()> {
        drop(upload.file);
        warn!(
            "Discarding incomplete upload {} of uid {}",
            upload.path.display(),
            upload.owner_uid
        );
        remove_if_present(&upload.path).await
    }

    /// Metadata of a file, provided both the content and the sidecar exist.
    pub async fn read_meta(&self, owner_uid: Uid, tag: &FileTag) -> Result<Option<FileMeta>> {
        if !exists(&self.layout.content_path(owner_uid, tag)).await? {
            return Ok(None);
        }
        read_json(&self.layout.meta_path(owner_uid, tag)).await
    }

    pub async fn write_meta(&self, meta: &FileMeta) -> Result<()> {
        let path = self.layout.meta_path(meta.owner_uid, &meta.file_tag);
        write_json(&path, meta, self.lock).await?;
        restrict(&path).await
    }

    /// Edits a sidecar under its lock and runs `commit` on the outcome
    /// before releasing it. `None` when the file is gone.
    pub async fn update_meta<R, F, C>(
        &self,
        owner_uid: Uid,
        tag: &FileTag,
        apply: F,
        commit: C,
    ) -> Result<Option<R>>
    where
        F: FnOnce(&mut FileMeta) -> R,
        C: FnOnce(&R) -> Result<()>,
    {
        if !exists(&self.layout.content_path(owner_uid, tag)).await? {
            return Ok(None);
        }
        modify_json(&self.layout.meta_path(owner_uid, tag), self.lock, apply, commit).await
    }

    /// Every file a user owns. Sidecars whose content has vanished are
    /// collected once they are older than the orphan grace period.
    pub async fn list_owned(&self, uid: Uid) -> Result<Vec<FileMeta>> {
        let dir = self.layout.user_dir(uid);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(tag) = name.to_str().and_then(FileTag::from_meta_name) else {
                continue;
            };
            let content = self.layout.content_path(uid, &tag);
            if !exists(&content).await? {
                self.collect_orphan(&entry.path()).await?;
                continue;
            }
            match read_json::<FileMeta>(&entry.path()).await {
                Ok(Some(meta)) => files.push(meta),
                Ok(None) => {}
                Err(e) if e.is_storage() => {
                    error!("Unreadable metadata {}: {e}", entry.path().display());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(files)
    }

    /// Deletes a file as its owner: the content is unlinked and the sidecar
    /// is kept under a `-removed` name. Returns `false` if nothing was there.
    pub async fn remove(&self, owner_uid: Uid, tag: &FileTag) -> Result<bool> {
        let content = self.layout.content_path(owner_uid, tag);
        let meta = self.layout.meta_path(owner_uid, tag);
        if !exists(&content).await? || !exists(&meta).await? {
            warn!("File {tag} of uid {owner_uid} has vanished");
            return Ok(false);
        }

        fs::rename(&meta, self.layout.removed_meta_path(owner_uid, tag)).await?;
        remove_if_present(&content).await?;
        debug!("Removed {tag} of uid {owner_uid}");
        Ok(true)
    }

    /// Copies a file into `owner`'s storage as a fresh, unshared file.
    pub async fn copy(&self, source: &FileMeta, owner: &Account) -> Result<FileMeta> {
        let meta = source.copied_for(&owner.login_name, owner.uid);
        let src = self.layout.content_path(source.owner_uid, &source.file_tag);
        let dst = self.layout.content_path(owner.uid, &meta.file_tag);

        fs::create_dir_all(self.layout.user_dir(owner.uid)).await?;
        fs::copy(&src, &dst).await?;
        restrict(&dst).await?;
        if let Err(e) = self.write_meta(&meta).await {
            error!("Unable to record metadata for copy {}: {e}", meta.file_tag);
            remove_if_present(&dst).await?;
            return Err(e);
        }

        info!(
            "Copied {} of uid {} to {} for {}",
            source.file_tag, source.owner_uid, meta.file_tag, owner.login_name
        );
        Ok(meta)
    }

    pub async fn open(&self, meta: &FileMeta) -> Result<fs::File> {
        Ok(fs::File::open(self.layout.content_path(meta.owner_uid, &meta.file_tag)).await?)
    }

    /// Removes abandoned uploads and content files without metadata once
    /// they are older than the grace period. Returns how many were removed.
    pub async fn collect_garbage(&self, uid: Uid) -> Result<usize> {
        let mut removed = 0;

        let staging = self.layout.staging_dir(uid);
        if let Some(mut entries) = read_dir_if_present(&staging).await? {
            while let Some(entry) = entries.next_entry().await? {
                if self.is_past_grace(&entry.path()).await? {
                    remove_if_present(&entry.path()).await?;
                    info!("Removed abandoned upload {}", entry.path().display());
                    removed += 1;
                }
            }
        }

        let dir = self.layout.user_dir(uid);
        if let Some(mut entries) = read_dir_if_present(&dir).await? {
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                let Some(tag) = name.to_str().and_then(|n| FileTag::parse(n).ok()) else {
                    continue;
                };
                if !exists(&self.layout.meta_path(uid, &tag)).await?
                    && self.is_past_grace(&entry.path()).await?
                {
                    error!("Removing content without metadata {}", entry.path().display());
                    remove_if_present(&entry.path()).await?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    /// A configured type label, or "Unknown".
    #[must_use]
    pub fn type_label(&self, requested: &str) -> String {
        if self.config.file_types.iter().any(|t| t == requested) {
            requested.to_string()
        } else {
            UNKNOWN_TYPE.to_string()
        }
    }

    async fn collect_orphan(&self, meta_path: &Path) -> Result<()> {
        if self.is_past_grace(meta_path).await? {
            error!("Removing metadata without content {}", meta_path.display());
            remove_if_present(meta_path).await?;
        }
        Ok(())
    }

    async fn is_past_grace(&self, path: &Path) -> Result<bool> {
        let modified = match fs::symlink_metadata(path).await {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        Ok(SystemTime::now()
            .duration_since(modified)
            .is_ok_and(|age| age >= self.config.orphan_grace()))
    }
}

/// A download file name: alphanumerics and `.-_+=` are kept, anything else
/// (spaces included) becomes `_`.
#[must_use]
pub fn sanitize_download_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+' | '=') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "download".to_string()
    } else {
        sanitized
    }
}

async fn exists(path: &Path) -> Result<bool> {
    match fs::symlink_metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn read_dir_if_present(path: &Path) -> Result<Option<fs::ReadDir>> {
    match fs::read_dir(path).await {
        Ok(entries) => Ok(Some(entries)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn restrict(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AuthMethod;
    use tempfile::TempDir;

    fn owner(uid: Uid, name: &str) -> Account {
        let now = Utc::now();
        Account {
            uid,
            login_name: name.to_string(),
            user_name: name.to_string(),
            email: String::new(),
            password_hash: None,
            auth_method: AuthMethod::Internal,
            first_name: String::new(),
            last_name: String::new(),
            quota: 1 << 20,
            locked: false,
            expires: None,
            created_at: now,
            updated_at: now,
            last_login: None,
        }
    }

    fn setup(orphan_grace: u64) -> (TempDir, FileStore) {
        let temp = TempDir::new().unwrap();
        let config = FilesConfig {
            orphan_grace,
            lock_slice_ms: 10,
            lock_timeout_ms: 100,
            ..FilesConfig::default()
        };
        let store = FileStore::new(Layout::new(temp.path()), config);
        (temp, store)
    }

    async fn upload(store: &FileStore, owner: &Account, chunks: &[&[u8]]) -> FileMeta {
        let mut upload = store.begin_upload(owner.uid).await.unwrap();
        for chunk in chunks {
            upload.write_chunk(chunk).await.unwrap();
        }
        store
            .finish_upload(
                upload,
                owner,
                UploadFields {
                    title: "Notes".into(),
                    description: "meeting notes".into(),
                    type_label: "spreadsheet".into(),
                    file_name: "notes.txt".into(),
                },
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_streams_and_checksums() {
        let (_temp, store) = setup(3600);
        let alice = owner(0, "alice");

        let meta = upload(&store, &alice, &[b"hello ", b"world"]).await;
        assert_eq!(meta.size, 11);
        assert_eq!(
            meta.checksum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(meta.type_label, "Unknown");

        let read = store.read_meta(0, &meta.file_tag).await.unwrap().unwrap();
        assert_eq!(read, meta);
        assert_eq!(store.list_owned(0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_keeps_history() {
        let (_temp, store) = setup(3600);
        let alice = owner(0, "alice");
        let meta = upload(&store, &alice, &[b"data"]).await;

        assert!(store.remove(0, &meta.file_tag).await.unwrap());
        assert!(store.read_meta(0, &meta.file_tag).await.unwrap().is_none());
        assert!(store.layout.removed_meta_path(0, &meta.file_tag).exists());
        assert!(!store.remove(0, &meta.file_tag).await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_is_unshared_and_new() {
        let (_temp, store) = setup(3600);
        let alice = owner(0, "alice");
        let bob = owner(1, "bob");
        let original = upload(&store, &alice, &[b"data"]).await;
        store
            .update_meta(
                0,
                &original.file_tag,
                |meta| {
                    meta.uid_shares.insert(1);
                    meta.custom.insert("project".into(), "x".into());
                },
                |_| Ok(()),
            )
            .await
            .unwrap()
            .unwrap();
        let shared = store.read_meta(0, &original.file_tag).await.unwrap().unwrap();

        let copy = store.copy(&shared, &bob).await.unwrap();
        assert_ne!(copy.file_tag, original.file_tag);
        assert_eq!(copy.owner_uid, 1);
        assert!(copy.uid_shares.is_empty());
        assert!(copy.custom.is_empty());
        assert_eq!(copy.checksum, original.checksum);
        assert_eq!(store.list_owned(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_aborted_upload_leaves_nothing_visible() {
        let (_temp, store) = setup(3600);
        let mut upload = store.begin_upload(0).await.unwrap();
        upload.write_chunk(b"partial").await.unwrap();
        store.abort_upload(upload).await.unwrap();

        assert!(store.list_owned(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_garbage_collection_respects_grace() {
        let (_temp, store) = setup(0);
        let alice = owner(0, "alice");
        let meta = upload(&store, &alice, &[b"data"]).await;
        let staged = store.begin_upload(0).await.unwrap();
        drop(staged);

        std::fs::remove_file(store.layout.meta_path(0, &meta.file_tag)).unwrap();
        assert_eq!(store.collect_garbage(0).await.unwrap(), 2);
        assert!(!store.layout.content_path(0, &meta.file_tag).exists());

        let (_temp, patient) = setup(3600);
        let kept = upload(&patient, &alice, &[b"data"]).await;
        std::fs::remove_file(patient.layout.meta_path(0, &kept.file_tag)).unwrap();
        assert_eq!(patient.collect_garbage(0).await.unwrap(), 0);
    }

    #[test]
    fn test_sanitize_download_name() {
        assert_eq!(sanitize_download_name("my report (v2).pdf"), "my_report__v2_.pdf");
        assert_eq!(sanitize_download_name("a+b=c-d_e.tar.gz"), "a+b=c-d_e.tar.gz");
        assert_eq!(sanitize_download_name("naïve.txt"), "na_ve.txt");
        assert_eq!(sanitize_download_name(""), "download");
    }
}
