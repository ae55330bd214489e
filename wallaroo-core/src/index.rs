use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::jsonfile::{read_json_or_none, write_json_atomic};

/// Metadata recorded for one cached image, keyed in the index by filename.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subreddit: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub banned: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub favorite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Thumbnail path relative to the cache directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// RFC 3339 timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl IndexEntry {
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }

    /// Subreddit name, treating an empty string as unknown.
    pub fn subreddit_name(&self) -> Option<&str> {
        self.subreddit.as_deref().filter(|s| !s.is_empty())
    }

    pub fn downloaded_at(&self) -> Option<DateTime<Utc>> {
        self.downloaded_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn mark_downloaded(&mut self, when: DateTime<Utc>) {
        self.downloaded_at = Some(when.to_rfc3339());
    }
}

/// In-memory view of `index.json`.
#[derive(Debug, Clone, Default)]
pub struct ImageIndex {
    entries: BTreeMap<String, IndexEntry>,
    // Entries whose shape we don't understand are written back untouched.
    opaque: BTreeMap<String, Value>,
}

impl ImageIndex {
    pub fn load(path: &Path) -> Self {
        let Some(root) = read_json_or_none::<Map<String, Value>>(path) else {
            return ImageIndex::default();
        };

        let mut index = ImageIndex::default();
        for (key, value) in root {
            match serde_json::from_value::<IndexEntry>(value.clone()) {
                Ok(entry) => {
                    index.entries.insert(key, entry);
                }
                Err(e) => {
                    log::warn!("Keeping unreadable index entry {} as-is: {}", key, e);
                    index.opaque.insert(key, value);
                }
            }
        }
        index
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut root = Map::new();
        for (key, value) in &self.opaque {
            root.insert(key.clone(), value.clone());
        }
        for (key, entry) in &self.entries {
            root.insert(key.clone(), serde_json::to_value(entry)?);
        }
        write_json_atomic(path, &root)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&IndexEntry> {
        self.entries.get(key)
    }

    /// Returns the entry for `key`, creating an empty one if needed.
    pub fn entry_mut(&mut self, key: &str) -> &mut IndexEntry {
        if self.opaque.remove(key).is_some() {
            log::warn!("Replacing unreadable index entry {}", key);
        }
        self.entries.entry(key.to_string()).or_default()
    }

    pub fn remove(&mut self, key: &str) -> Option<IndexEntry> {
        self.opaque.remove(key);
        self.entries.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndexEntry)> {
        self.entries.iter()
    }

    pub fn find_by_sha256(&self, sha256: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, e)| e.sha256.as_deref() == Some(sha256))
            .map(|(k, _)| k.as_str())
    }

    pub fn find_by_source_url(&self, url: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, e)| e.source_url.as_deref() == Some(url))
            .map(|(k, _)| k.as_str())
    }

    /// Cached images from `subreddit`, compared case-insensitively.
    pub fn count_for_subreddit(&self, subreddit: &str) -> usize {
        self.entries
            .values()
            .filter_map(IndexEntry::subreddit_name)
            .filter(|sub| sub.eq_ignore_ascii_case(subreddit))
            .count()
    }

    pub fn toggle_favorite(&mut self, key: &str) -> bool {
        let entry = self.entry_mut(key);
        entry.favorite = !entry.favorite;
        entry.favorite
    }

    pub fn set_banned(&mut self, key: &str, banned: bool) {
        self.entry_mut(key).banned = banned;
    }

    /// Records the subreddit only when the entry has none yet.
    pub fn set_subreddit_if_missing(&mut self, key: &str, subreddit: &str) -> bool {
        if subreddit.is_empty() {
            return false;
        }
        let entry = self.entry_mut(key);
        if entry.subreddit_name().is_some() {
            return false;
        }
        entry.subreddit = Some(subreddit.to_string());
        true
    }
}

/// Serialises every read-modify-write of `index.json` within this process.
#[derive(Debug)]
pub struct IndexStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl IndexStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        IndexStore {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> ImageIndex {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        ImageIndex::load(&self.path)
    }

    /// Loads the index, applies `f` and writes the result back while holding
    /// the lock.
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut ImageIndex) -> T,
    {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut index = ImageIndex::load(&self.path);
        let result = f(&mut index);
        index.save(&self.path)?;
        Ok(result)
    }

    pub fn toggle_favorite(&self, key: &str) -> Result<bool> {
        let favorite = self.update(|index| index.toggle_favorite(key))?;
        log::debug!("Set favorite={} for {}", favorite, key);
        Ok(favorite)
    }

    pub fn set_banned(&self, key: &str, banned: bool) -> Result<()> {
        self.update(|index| index.set_banned(key, banned))?;
        log::debug!("Set banned={} for {}", banned, key);
        Ok(())
    }

    pub fn set_subreddit_if_missing(&self, key: &str, subreddit: &str) -> Result<bool> {
        self.update(|index| index.set_subreddit_if_missing(key, subreddit))
    }
}
