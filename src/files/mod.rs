pub mod prefs;
pub mod quota;
mod storage;

pub use prefs::{ListingPrefs, PrefsPatch, SortKey};
pub use storage::{FileStore, Upload, sanitize_download_name};
