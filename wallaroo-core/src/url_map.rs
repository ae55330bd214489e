use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;

use crate::jsonfile::{read_json_or_none, write_json_atomic};

/// Drops the query string and fragment so resized variants of one image share
/// an entry.
pub fn normalize_url(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}

/// Which subreddits each image URL was seen in (`url_map.json`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UrlMap {
    urls: BTreeMap<String, Vec<String>>,
}

impl UrlMap {
    pub fn load(path: &Path) -> Self {
        UrlMap {
            urls: read_json_or_none(path).unwrap_or_default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, &self.urls)
    }

    /// Returns false when the pair was already known.
    pub fn record(&mut self, url: &str, subreddit: &str) -> bool {
        let subs = self.urls.entry(normalize_url(url).to_string()).or_default();
        if subs.iter().any(|s| s == subreddit) {
            return false;
        }
        subs.push(subreddit.to_string());
        true
    }

    pub fn subreddits_for(&self, url: &str) -> &[String] {
        self.urls
            .get(normalize_url(url))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn query_and_fragment_are_ignored() {
        assert_eq!(normalize_url("https://i.redd.it/a.jpg?width=640#top"), "https://i.redd.it/a.jpg");
        assert_eq!(normalize_url("https://i.redd.it/a.jpg"), "https://i.redd.it/a.jpg");
    }

    #[test]
    fn record_appends_each_subreddit_once() {
        let mut map = UrlMap::default();
        assert!(map.record("https://i.redd.it/a.jpg?s=1", "EarthPorn"));
        assert!(!map.record("https://i.redd.it/a.jpg", "EarthPorn"));
        assert!(map.record("https://i.redd.it/a.jpg#x", "wallpapers"));

        assert_eq!(map.len(), 1);
        assert_eq!(map.subreddits_for("https://i.redd.it/a.jpg"), ["EarthPorn", "wallpapers"]);
        assert!(map.subreddits_for("https://i.redd.it/b.jpg").is_empty());
    }

    #[test]
    fn persists_as_plain_object() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("url_map.json");
        let mut map = UrlMap::default();
        map.record("https://i.redd.it/a.jpg", "EarthPorn");
        map.save(&path).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["https://i.redd.it/a.jpg"][0], "EarthPorn");
        assert_eq!(UrlMap::load(&path), map);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("url_map.json");
        std::fs::write(&path, "[1, 2").unwrap();
        assert!(UrlMap::load(&path).is_empty());
    }
}
