use anyhow::Result;
use rand::seq::SliceRandom;
use std::path::PathBuf;
use std::time::Instant;

use crate::cache::CacheManager;
use crate::filter::ImageFilter;
use crate::index::ImageIndex;
use crate::paths::Paths;
use crate::thumbnail;

/// Cached images that pass `filter`, newest first.
pub fn collect_candidates(cache: &CacheManager, index: &ImageIndex, filter: &ImageFilter) -> Result<Vec<PathBuf>> {
    let started = Instant::now();
    let files = cache.list_images()?;
    let scanned = files.len();

    let candidates: Vec<PathBuf> = files
        .into_iter()
        .filter(|path| {
            let entry = Paths::key_for(path).and_then(|key| index.get(&key));
            // Files nobody has indexed yet still get a header probe
            let dims = match entry.and_then(|e| e.dimensions()) {
                Some(dims) => Some(dims),
                None => thumbnail::image_dimensions(path).ok(),
            };
            filter.accepts(entry, dims)
        })
        .collect();

    log::debug!(
        "collect_candidates: scanned={} candidates={} ms={}",
        scanned,
        candidates.len(),
        started.elapsed().as_millis()
    );
    Ok(candidates)
}

/// Uniformly random eligible image.
pub fn pick_random(cache: &CacheManager, filter: &ImageFilter) -> Result<Option<PathBuf>> {
    let index = cache.index().read();
    let candidates = collect_candidates(cache, &index, filter)?;
    if candidates.is_empty() {
        log::warn!("No candidate wallpapers found in cache (after filters)");
    }
    Ok(candidates.choose(&mut rand::thread_rng()).cloned())
}

/// Random favorite that passes `filter`, or any eligible image when there is
/// no such favorite.
pub fn pick_random_favorite(cache: &CacheManager, filter: &ImageFilter) -> Result<Option<PathBuf>> {
    let favorites = ImageFilter {
        favorites_only: true,
        ..filter.clone()
    };
    let index = cache.index().read();
    let candidates = collect_candidates(cache, &index, &favorites)?;
    if let Some(chosen) = candidates.choose(&mut rand::thread_rng()) {
        return Ok(Some(chosen.clone()));
    }

    log::warn!("No favorited wallpapers found (after filters). Falling back to random.");
    pick_random(cache, filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::{manager, png_bytes, FakeFetcher};
    use crate::filter::AspectFilterMode;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn seeded(root: &TempDir) -> (CacheManager, Vec<String>) {
        let fetcher = Arc::new(FakeFetcher::default());
        let sizes = [(64, 36), (40, 40), (36, 64)];
        for (i, (w, h)) in sizes.iter().enumerate() {
            fetcher.serve(&format!("https://x.example/{}.png", i), png_bytes(*w, *h, i as u8));
        }
        let cache = manager(root, fetcher);
        let keys = (0..sizes.len())
            .map(|i| {
                cache
                    .download_and_cache(&format!("https://x.example/{}.png", i), Some("sub"))
                    .unwrap()
                    .key
            })
            .collect();
        (cache, keys)
    }

    #[test]
    fn banned_images_are_never_candidates() {
        let root = TempDir::new().unwrap();
        let (cache, keys) = seeded(&root);
        cache.index().set_banned(&keys[0], true).unwrap();
        cache.index().set_banned(&keys[1], true).unwrap();

        for _ in 0..10 {
            let chosen = pick_random(&cache, &ImageFilter::default()).unwrap().unwrap();
            assert_eq!(Paths::key_for(&chosen).unwrap(), keys[2]);
        }
    }

    #[test]
    fn aspect_filter_narrows_candidates() {
        let root = TempDir::new().unwrap();
        let (cache, keys) = seeded(&root);
        let filter = ImageFilter {
            mode: AspectFilterMode::Rough,
            ..Default::default()
        };

        let index = cache.index().read();
        let candidates = collect_candidates(&cache, &index, &filter).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(Paths::key_for(&candidates[0]).unwrap(), keys[0]);
    }

    #[test]
    fn favorite_pick_prefers_favorites_then_falls_back() {
        let root = TempDir::new().unwrap();
        let (cache, keys) = seeded(&root);

        let fallback = pick_random_favorite(&cache, &ImageFilter::default()).unwrap();
        assert!(fallback.is_some());

        cache.index().toggle_favorite(&keys[1]).unwrap();
        for _ in 0..10 {
            let chosen = pick_random_favorite(&cache, &ImageFilter::default()).unwrap().unwrap();
            assert_eq!(Paths::key_for(&chosen).unwrap(), keys[1]);
        }
    }

    #[test]
    fn empty_cache_picks_nothing() {
        let root = TempDir::new().unwrap();
        let cache = manager(&root, Arc::new(FakeFetcher::default()));
        assert!(pick_random(&cache, &ImageFilter::default()).unwrap().is_none());
        assert!(pick_random_favorite(&cache, &ImageFilter::default()).unwrap().is_none());
    }
}
