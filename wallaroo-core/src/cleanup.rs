use anyhow::Result;
use std::collections::HashSet;

use crate::cache::{remove_quietly, CacheManager};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    pub kept: usize,
}

/// Deletes every cached image that came from a subreddit no longer in
/// `allowed`. Images with no recorded subreddit are kept.
pub fn cleanup_unlisted(cache: &CacheManager, allowed: &HashSet<String>) -> Result<CleanupReport> {
    let allowed: HashSet<String> = allowed.iter().map(|s| s.to_ascii_lowercase()).collect();
    let paths = cache.paths();

    let report = cache.index().update(|index| {
        let stale: Vec<String> = index
            .iter()
            .filter(|(_, entry)| {
                entry
                    .subreddit_name()
                    .map(|sub| !allowed.contains(&sub.to_ascii_lowercase()))
                    .unwrap_or(false)
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            if let Some(entry) = index.remove(key) {
                log::info!(
                    "Removing {} from r/{}",
                    key,
                    entry.subreddit_name().unwrap_or_default()
                );
                remove_quietly(&paths.image_path(key));
                if let Some(thumb) = entry.thumbnail {
                    remove_quietly(&paths.cache_dir.join(thumb));
                }
            }
        }

        CleanupReport {
            kept: index.len(),
            removed: stale,
        }
    })?;

    log::info!("Cleanup removed {} images, kept {}", report.removed.len(), report.kept);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::{manager, png_bytes, FakeFetcher};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn removes_images_from_unlisted_subreddits() {
        let root = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.serve("https://x.example/keep.png", png_bytes(20, 10, 1));
        fetcher.serve("https://x.example/drop.png", png_bytes(20, 10, 2));
        fetcher.serve("https://x.example/orphan.png", png_bytes(20, 10, 3));
        let cache = manager(&root, fetcher);

        let keep = cache.download_and_cache("https://x.example/keep.png", Some("EarthPorn")).unwrap();
        let dropped = cache.download_and_cache("https://x.example/drop.png", Some("pics")).unwrap();
        let orphan = cache.download_and_cache("https://x.example/orphan.png", None).unwrap();
        let drop_thumb = cache.index().read().get(&dropped.key).unwrap().thumbnail.clone().unwrap();

        let allowed: HashSet<String> = ["earthporn".to_string()].into_iter().collect();
        let report = cleanup_unlisted(&cache, &allowed).unwrap();

        assert_eq!(report.removed, vec![dropped.key.clone()]);
        assert_eq!(report.kept, 2);
        assert!(keep.path.exists());
        assert!(orphan.path.exists());
        assert!(!dropped.path.exists());
        assert!(!cache.cache_dir().join(drop_thumb).exists());
        assert!(cache.index().read().get(&dropped.key).is_none());
    }

    #[test]
    fn nothing_to_do_on_an_empty_cache() {
        let root = TempDir::new().unwrap();
        let cache = manager(&root, Arc::new(FakeFetcher::default()));
        let report = cleanup_unlisted(&cache, &HashSet::new()).unwrap();
        assert_eq!(report, CleanupReport::default());
    }
}
