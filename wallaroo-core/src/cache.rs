use anyhow::{bail, Context, Result};
use chrono::Utc;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};

use crate::fetch::Fetcher;
use crate::index::IndexStore;
use crate::jsonfile::write_bytes_atomic;
use crate::paths::Paths;
use crate::thumbnail::{self, THUMBNAIL_SIZE};

pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_EXTENSION: &str = "jpg";

fn image_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Names may carry a query string after the extension ("a.jpg?width=640").
    RE.get_or_init(|| Regex::new(r"(?i)\.(?:png|jpe?g|bmp|webp|gif)(?:$|\?)").expect("image name pattern is valid"))
}

pub fn is_image_name(name: &str) -> bool {
    image_name_regex().is_match(name)
}

/// Extension of the last path segment of `url`, ignoring query and fragment.
pub fn extension_from_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let name = without_query.rsplit('/').next().unwrap_or("");

    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn sha256_of_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedImage {
    pub path: PathBuf,
    pub key: String,
    /// True when no new file was written (known URL or duplicate content).
    pub reused: bool,
}

pub struct CacheManager {
    paths: Paths,
    index: Arc<IndexStore>,
    fetcher: Arc<dyn Fetcher>,
    thumb_size: u32,
}

impl CacheManager {
    pub fn new(paths: Paths, fetcher: Arc<dyn Fetcher>) -> Self {
        let index = Arc::new(IndexStore::new(paths.index_file.clone()));
        CacheManager {
            paths,
            index,
            fetcher,
            thumb_size: THUMBNAIL_SIZE,
        }
    }

    pub fn with_thumb_size(mut self, size: u32) -> Self {
        self.thumb_size = size.max(1);
        self
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn cache_dir(&self) -> &Path {
        &self.paths.cache_dir
    }

    pub fn index(&self) -> &Arc<IndexStore> {
        &self.index
    }

    /// Downloads `url` into the cache unless it is already there and returns
    /// the local file.
    pub fn download_and_cache(&self, url: &str, subreddit: Option<&str>) -> Result<CachedImage> {
        // Known URL with the file still on disk: nothing to download
        if let Some(key) = self.index.read().find_by_source_url(url).map(str::to_string) {
            let path = self.paths.image_path(&key);
            if path.exists() {
                log::debug!("URL already downloaded, reusing {}", path.display());
                if let Some(sub) = subreddit {
                    self.index.set_subreddit_if_missing(&key, sub)?;
                }
                return Ok(CachedImage { path, key, reused: true });
            }
        }

        log::debug!("Downloading: {}", url);
        let bytes = self.fetcher.get_bytes(url, DOWNLOAD_TIMEOUT)?;
        if bytes.is_empty() {
            bail!("Empty response for {}", url);
        }

        let sha256 = sha256_hex(&bytes);
        let mut key = format!("{}.{}", sha256, extension_from_url(url));
        let mut path = self.paths.image_path(&key);
        let mut reused = path.exists();

        if !reused {
            // Same content cached earlier under another extension
            let index = self.index.read();
            if let Some(existing) = index.find_by_sha256(&sha256) {
                let existing_path = self.paths.image_path(existing);
                if existing_path.exists() {
                    key = existing.to_string();
                    path = existing_path;
                    reused = true;
                }
            }
        }

        if reused {
            log::debug!("File already exists (by hash): {}", path.display());
        } else {
            write_bytes_atomic(&path, &bytes)?;
            log::debug!("Saved to: {}", path.display());
        }

        self.enrich(&key, Some(&sha256), Some(url), subreddit)?;
        Ok(CachedImage { path, key, reused })
    }

    /// Fills in missing metadata for `key`. Decoding failures only cost the
    /// dimensions and thumbnail; the entry is still recorded.
    fn enrich(&self, key: &str, sha256: Option<&str>, url: Option<&str>, subreddit: Option<&str>) -> Result<()> {
        let path = self.paths.image_path(key);
        let current = self.index.read().get(key).cloned().unwrap_or_default();

        let dims = match current.dimensions() {
            Some(dims) => Some(dims),
            None => match thumbnail::image_dimensions(&path) {
                Ok(dims) => Some(dims),
                Err(e) => {
                    log::warn!("Could not read dimensions of {}: {:#}", path.display(), e);
                    None
                }
            },
        };

        let thumb_exists = current
            .thumbnail
            .as_deref()
            .map(|t| self.paths.cache_dir.join(t).exists())
            .unwrap_or(false);
        let thumbnail = if thumb_exists || dims.is_none() {
            None
        } else {
            match thumbnail::generate_thumbnail(&path, &self.paths.thumbs_dir, self.thumb_size) {
                Ok(thumb) => thumb
                    .strip_prefix(&self.paths.cache_dir)
                    .ok()
                    .map(|rel| rel.to_string_lossy().replace('\\', "/")),
                Err(e) => {
                    log::warn!("Failed to generate thumbnail for {}: {:#}", path.display(), e);
                    None
                }
            }
        };

        let sha256 = match (sha256, &current.sha256) {
            (Some(sha), _) => Some(sha.to_string()),
            (None, Some(_)) => None,
            (None, None) => sha256_of_file(&path).ok(),
        };

        self.index.update(|index| {
            let entry = index.entry_mut(key);
            if let Some(sha) = sha256 {
                entry.sha256.get_or_insert(sha);
            }
            if entry.source_url.is_none() {
                entry.source_url = url.map(str::to_string);
            }
            if let Some((w, h)) = dims {
                entry.width = Some(w);
                entry.height = Some(h);
            }
            if let Some(thumb) = thumbnail {
                entry.thumbnail = Some(thumb);
            }
            if entry.downloaded_at.is_none() {
                entry.mark_downloaded(Utc::now());
            }
            if let Some(sub) = subreddit {
                index.set_subreddit_if_missing(key, sub);
            }
        })
    }

    /// Backfills metadata for images that are on disk but not (fully) indexed.
    pub fn enrich_existing(&self) -> Result<usize> {
        let index = self.index.read();
        let mut enriched = 0;
        for path in self.list_images()? {
            let Some(key) = Paths::key_for(&path) else { continue };
            let complete = index
                .get(&key)
                .map(|e| e.dimensions().is_some() && e.thumbnail.is_some() && e.sha256.is_some())
                .unwrap_or(false);
            if complete {
                continue;
            }
            match self.enrich(&key, None, None, None) {
                Ok(()) => enriched += 1,
                Err(e) => log::warn!("Failed to index {}: {:#}", path.display(), e),
            }
        }
        Ok(enriched)
    }

    /// Cached image files, newest first.
    pub fn list_images(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.paths.cache_dir)
            .with_context(|| format!("Failed to read {}", self.paths.cache_dir.display()))?;

        let mut images: Vec<(SystemTime, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|entry| entry.file_name().to_str().map(is_image_name).unwrap_or(false))
            .map(|entry| {
                let modified = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, entry.path())
            })
            .collect();

        images.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        Ok(images.into_iter().map(|(_, path)| path).collect())
    }

    /// Deletes the image, its thumbnail and its index entry.
    pub fn remove_image(&self, key: &str) -> Result<()> {
        let removed = self.index.update(|index| index.remove(key))?;
        remove_quietly(&self.paths.image_path(key));
        if let Some(thumb) = removed.and_then(|e| e.thumbnail) {
            remove_quietly(&self.paths.cache_dir.join(thumb));
        }
        Ok(())
    }
}

pub(crate) fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serves canned bodies and counts requests.
    #[derive(Default)]
    pub struct FakeFetcher {
        pub bodies: Mutex<HashMap<String, Vec<u8>>>,
        pub hits: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        pub fn serve(&self, url: &str, body: Vec<u8>) {
            self.bodies.lock().unwrap().insert(url.to_string(), body);
        }

        pub fn hit_count(&self) -> usize {
            self.hits.lock().unwrap().len()
        }
    }

    impl Fetcher for FakeFetcher {
        fn get_bytes(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>> {
            self.hits.lock().unwrap().push(url.to_string());
            self.bodies
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404 for {}", url))
        }
    }

    pub fn png_bytes(width: u32, height: u32, shade: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([shade, shade, shade]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    pub fn manager(root: &TempDir, fetcher: Arc<FakeFetcher>) -> CacheManager {
        let paths = Paths::with_dirs(root.path().join("config"), root.path().join("cache")).unwrap();
        CacheManager::new(paths, fetcher).with_thumb_size(16)
    }

    #[test]
    fn extension_is_taken_from_the_path_only() {
        assert_eq!(extension_from_url("https://i.redd.it/abc.PNG"), "png");
        assert_eq!(extension_from_url("https://x.io/a/b.jpeg?width=640&v=2"), "jpeg");
        assert_eq!(extension_from_url("https://x.io/a/b"), "jpg");
        assert_eq!(extension_from_url("https://x.io/v1.2/img"), "jpg");
        assert_eq!(extension_from_url("https://x.io/"), "jpg");
    }

    #[test]
    fn image_names_may_carry_a_query_string() {
        assert!(is_image_name("a.JPG"));
        assert!(is_image_name("a.webp?width=640"));
        assert!(!is_image_name("index.json"));
        assert!(!is_image_name("a.jpg.part"));
    }

    #[test]
    fn download_stores_by_hash_and_enriches_the_index() {
        let root = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeFetcher::default());
        let body = png_bytes(64, 36, 1);
        fetcher.serve("https://i.redd.it/one.png", body.clone());
        let cache = manager(&root, fetcher.clone());

        let cached = cache
            .download_and_cache("https://i.redd.it/one.png", Some("WidescreenWallpaper"))
            .unwrap();

        assert!(!cached.reused);
        assert_eq!(cached.key, format!("{}.png", sha256_hex(&body)));
        assert!(cached.path.exists());

        let index = cache.index().read();
        let entry = index.get(&cached.key).unwrap();
        assert_eq!(entry.dimensions(), Some((64, 36)));
        assert_eq!(entry.subreddit_name(), Some("WidescreenWallpaper"));
        assert_eq!(entry.source_url.as_deref(), Some("https://i.redd.it/one.png"));
        assert!(entry.downloaded_at().is_some());
        let thumb = entry.thumbnail.as_deref().unwrap();
        assert!(thumb.starts_with("thumbs/"));
        assert!(cache.cache_dir().join(thumb).exists());
    }

    #[test]
    fn known_url_is_not_downloaded_twice() {
        let root = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.serve("https://i.redd.it/one.png", png_bytes(8, 8, 2));
        let cache = manager(&root, fetcher.clone());

        cache.download_and_cache("https://i.redd.it/one.png", None).unwrap();
        let again = cache.download_and_cache("https://i.redd.it/one.png", Some("late")).unwrap();

        assert!(again.reused);
        assert_eq!(fetcher.hit_count(), 1);
        assert_eq!(cache.index().read().get(&again.key).unwrap().subreddit_name(), Some("late"));
    }

    #[test]
    fn identical_content_from_another_url_is_deduplicated() {
        let root = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeFetcher::default());
        let body = png_bytes(8, 8, 3);
        fetcher.serve("https://a.example/x.png", body.clone());
        fetcher.serve("https://b.example/y.png?raw=1", body);
        let cache = manager(&root, fetcher.clone());

        let first = cache.download_and_cache("https://a.example/x.png", Some("a")).unwrap();
        let second = cache.download_and_cache("https://b.example/y.png?raw=1", Some("b")).unwrap();

        assert_eq!(first.key, second.key);
        assert!(second.reused);
        assert_eq!(cache.list_images().unwrap().len(), 1);
        let index = cache.index().read();
        let entry = index.get(&first.key).unwrap();
        assert_eq!(entry.subreddit_name(), Some("a"));
        assert_eq!(entry.source_url.as_deref(), Some("https://a.example/x.png"));
    }

    #[test]
    fn undecodable_payload_is_still_cached() {
        let root = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.serve("https://x.example/broken.jpg", b"not really a jpeg".to_vec());
        let cache = manager(&root, fetcher);

        let cached = cache.download_and_cache("https://x.example/broken.jpg", None).unwrap();

        let index = cache.index().read();
        let entry = index.get(&cached.key).unwrap();
        assert!(entry.dimensions().is_none());
        assert!(entry.thumbnail.is_none());
        assert!(entry.sha256.is_some());
    }

    #[test]
    fn failed_download_leaves_nothing_behind() {
        let root = TempDir::new().unwrap();
        let cache = manager(&root, Arc::new(FakeFetcher::default()));

        assert!(cache.download_and_cache("https://x.example/missing.jpg", None).is_err());
        assert!(cache.list_images().unwrap().is_empty());
        assert!(cache.index().read().is_empty());
    }

    #[test]
    fn hand_placed_images_get_indexed() {
        let root = TempDir::new().unwrap();
        let cache = manager(&root, Arc::new(FakeFetcher::default()));
        fs::write(cache.cache_dir().join("manual.png"), png_bytes(30, 10, 4)).unwrap();
        fs::write(cache.cache_dir().join("notes.txt"), "skip me").unwrap();

        assert_eq!(cache.enrich_existing().unwrap(), 1);
        assert_eq!(cache.enrich_existing().unwrap(), 0);

        let index = cache.index().read();
        let entry = index.get("manual.png").unwrap();
        assert_eq!(entry.dimensions(), Some((30, 10)));
        assert!(entry.sha256.is_some());
    }

    #[test]
    fn remove_image_drops_file_thumbnail_and_entry() {
        let root = TempDir::new().unwrap();
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.serve("https://x.example/a.png", png_bytes(8, 8, 5));
        let cache = manager(&root, fetcher);
        let cached = cache.download_and_cache("https://x.example/a.png", None).unwrap();
        let thumb = cache.index().read().get(&cached.key).unwrap().thumbnail.clone().unwrap();

        cache.remove_image(&cached.key).unwrap();

        assert!(!cached.path.exists());
        assert!(!cache.cache_dir().join(thumb).exists());
        assert!(cache.index().read().get(&cached.key).is_none());
    }
}
