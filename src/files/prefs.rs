use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::lock::{read_json, update_json};
use crate::store::{Layout, LockSettings};
use crate::types::{FileMeta, Uid};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Timestamp,
    Title,
    Description,
    Type,
    Name,
    Size,
}

impl SortKey {
    #[must_use]
    pub fn compare(&self, a: &FileMeta, b: &FileMeta) -> Ordering {
        match self {
            SortKey::Timestamp => a.created_at.cmp(&b.created_at),
            SortKey::Title => a.title.cmp(&b.title),
            SortKey::Description => a.description.cmp(&b.description),
            SortKey::Type => a.type_label.cmp(&b.type_label),
            SortKey::Name => a.file_name.cmp(&b.file_name),
            SortKey::Size => a.size.cmp(&b.size),
        }
    }
}

/// Per-user file manager preferences, stored in `<uid>.prefs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingPrefs {
    pub sort: SortKey,
    pub reverse: bool,
    pub hide_shared: bool,
    /// Whitespace-separated; a file is listed only when every keyword is
    /// one of the words of its title or description.
    pub keywords: String,
}

impl ListingPrefs {
    #[must_use]
    pub fn matches_keywords(&self, meta: &FileMeta) -> bool {
        let keywords: BTreeSet<String> = self
            .keywords
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        if keywords.is_empty() {
            return true;
        }

        let words: BTreeSet<String> = meta
            .title
            .split_whitespace()
            .chain(meta.description.split_whitespace())
            .map(|word| {
                word.chars()
                    .filter(|c| c.is_alphanumeric() || *c == '_')
                    .flat_map(char::to_lowercase)
                    .collect()
            })
            .collect();
        keywords.is_subset(&words)
    }

    /// Listing order under these preferences. Ties fall back to the tag so
    /// the order is stable across requests.
    #[must_use]
    pub fn order(&self, a: &FileMeta, b: &FileMeta) -> Ordering {
        let ordering = self.sort.compare(a, b).then_with(|| a.file_tag.cmp(&b.file_tag));
        if self.reverse {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

/// Partial preference update; absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrefsPatch {
    pub sort: Option<SortKey>,
    pub reverse: Option<bool>,
    pub hide_shared: Option<bool>,
    pub keywords: Option<String>,
}

pub async fn load(layout: &Layout, uid: Uid) -> Result<ListingPrefs> {
    Ok(read_json(&layout.prefs_path(uid)).await?.unwrap_or_default())
}

pub async fn update(
    layout: &Layout,
    uid: Uid,
    settings: LockSettings,
    patch: PrefsPatch,
) -> Result<ListingPrefs> {
    update_json(&layout.prefs_path(uid), settings, |prefs: &mut ListingPrefs| {
        if let Some(sort) = patch.sort {
            prefs.sort = sort;
        }
        if let Some(reverse) = patch.reverse {
            prefs.reverse = reverse;
        }
        if let Some(hide_shared) = patch.hide_shared {
            prefs.hide_shared = hide_shared;
        }
        if let Some(keywords) = patch.keywords {
            prefs.keywords = keywords;
        }
        prefs.clone()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileTag;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn meta(title: &str, description: &str, size: u64) -> FileMeta {
        FileMeta {
            file_tag: FileTag::generate(),
            owner: "alice".into(),
            owner_uid: 0,
            created_at: Utc::now(),
            title: title.into(),
            description: description.into(),
            type_label: "document".into(),
            file_name: format!("{title}.txt"),
            size,
            checksum: String::new(),
            uid_shares: Default::default(),
            gid_shares: Default::default(),
            local_share: false,
            world_share: false,
            custom: Default::default(),
        }
    }

    #[test]
    fn test_keyword_filter_ignores_punctuation_and_case() {
        let prefs = ListingPrefs {
            keywords: "Report 2024".into(),
            ..ListingPrefs::default()
        };

        assert!(prefs.matches_keywords(&meta("Annual report,", "Figures for (2024).", 1)));
        assert!(!prefs.matches_keywords(&meta("Annual report", "Figures for 2023", 1)));
        assert!(ListingPrefs::default().matches_keywords(&meta("", "", 1)));
    }

    #[test]
    fn test_sort_by_size_reversed() {
        let prefs = ListingPrefs {
            sort: SortKey::Size,
            reverse: true,
            ..ListingPrefs::default()
        };
        let mut files = vec![meta("a", "", 5), meta("b", "", 50), meta("c", "", 1)];
        files.sort_by(|a, b| prefs.order(a, b));

        let sizes: Vec<u64> = files.iter().map(|f| f.size).collect();
        assert_eq!(sizes, vec![50, 5, 1]);
    }

    #[tokio::test]
    async fn test_prefs_persist() {
        let temp = TempDir::new().unwrap();
        let layout = Layout::new(temp.path());
        std::fs::create_dir_all(layout.user_dir(3)).unwrap();
        let settings = LockSettings {
            slice: Duration::from_millis(10),
            timeout: Duration::from_millis(100),
        };

        assert_eq!(load(&layout, 3).await.unwrap(), ListingPrefs::default());
        update(
            &layout,
            3,
            settings,
            PrefsPatch {
                hide_shared: Some(true),
                ..PrefsPatch::default()
            },
        )
        .await
        .unwrap();

        let prefs = load(&layout, 3).await.unwrap();
        assert!(prefs.hide_shared);
        assert_eq!(prefs.sort, SortKey::Timestamp);
    }
}
