use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::cache::CacheManager;
use crate::listing::ListingSource;
use crate::url_map::UrlMap;

/// Pause between downloads so the image hosts are not hammered.
pub const DEFAULT_THROTTLE: Duration = Duration::from_millis(150);

pub const DEFAULT_PER_SUBREDDIT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateEvent {
    Started(String),
    ImageCached {
        path: PathBuf,
        subreddit: String,
        source_url: String,
    },
    FinishedSubreddit {
        subreddit: String,
        cached: usize,
    },
    Error(String),
    Finished,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    /// Subreddits whose listing was fetched, with the number of images cached.
    pub refreshed: Vec<(String, usize)>,
    pub failed: Vec<String>,
}

impl UpdateReport {
    pub fn total_cached(&self) -> usize {
        self.refreshed.iter().map(|(_, n)| n).sum()
    }
}

pub struct UpdateWorker {
    listing: Arc<dyn ListingSource>,
    cache: Arc<CacheManager>,
    url_map_path: PathBuf,
    subreddits: Vec<String>,
    per_sub_limit: usize,
    throttle: Duration,
}

impl UpdateWorker {
    pub fn new(listing: Arc<dyn ListingSource>, cache: Arc<CacheManager>, subreddits: Vec<String>) -> Self {
        let url_map_path = cache.paths().url_map_file.clone();
        UpdateWorker {
            listing,
            cache,
            url_map_path,
            subreddits,
            per_sub_limit: DEFAULT_PER_SUBREDDIT_LIMIT,
            throttle: DEFAULT_THROTTLE,
        }
    }

    pub fn with_limit(mut self, per_sub_limit: usize) -> Self {
        self.per_sub_limit = per_sub_limit.max(1);
        self
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// Refreshes every subreddit in turn. Failures are reported through
    /// `sink` and never abort the remaining work.
    pub fn run(&self, sink: &Sender<UpdateEvent>) -> UpdateReport {
        // The receiver may have gone away; the work still gets done
        let emit = |event: UpdateEvent| {
            let _ = sink.send(event);
        };

        let mut url_map = UrlMap::load(&self.url_map_path);
        let mut report = UpdateReport::default();

        for subreddit in &self.subreddits {
            log::info!("Updating r/{}", subreddit);
            emit(UpdateEvent::Started(subreddit.clone()));

            let urls = match self.listing.fetch_recent_image_urls(subreddit, self.per_sub_limit) {
                Ok(urls) => urls,
                Err(e) => {
                    log::error!("Failed to fetch r/{}: {:#}", subreddit, e);
                    emit(UpdateEvent::Error(format!("r/{}: {:#}", subreddit, e)));
                    report.failed.push(subreddit.clone());
                    continue;
                }
            };
            log::debug!("r/{}: {} image links", subreddit, urls.len());

            let mut cached = 0;
            for url in urls.iter().take(self.per_sub_limit) {
                match self.cache.download_and_cache(url, Some(subreddit.as_str())) {
                    Ok(image) => {
                        url_map.record(url, subreddit);
                        cached += 1;
                        emit(UpdateEvent::ImageCached {
                            path: image.path,
                            subreddit: subreddit.clone(),
                            source_url: url.clone(),
                        });
                    }
                    Err(e) => log::warn!("Skipping {}: {:#}", url, e),
                }
                if !self.throttle.is_zero() {
                    thread::sleep(self.throttle);
                }
            }

            if let Err(e) = url_map.save(&self.url_map_path) {
                log::warn!("Failed to save URL map: {:#}", e);
            }
            emit(UpdateEvent::FinishedSubreddit {
                subreddit: subreddit.clone(),
                cached,
            });
            report.refreshed.push((subreddit.clone(), cached));
        }

        log::info!(
            "Update finished: {} images from {} subreddits ({} failed)",
            report.total_cached(),
            report.refreshed.len(),
            report.failed.len()
        );
        emit(UpdateEvent::Finished);
        report
    }

    /// Runs the update on a background thread.
    pub fn spawn(self) -> (JoinHandle<UpdateReport>, Receiver<UpdateEvent>) {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || self.run(&tx));
        (handle, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::{manager, png_bytes, FakeFetcher};
    use anyhow::{anyhow, Result};
    use std::collections::HashMap;
    use tempfile::TempDir;

    struct FakeListing(HashMap<String, Vec<String>>);

    impl ListingSource for FakeListing {
        fn fetch_recent_image_urls(&self, subreddit: &str, limit: usize) -> Result<Vec<String>> {
            self.0
                .get(subreddit)
                .map(|urls| urls.iter().take(limit).cloned().collect())
                .ok_or_else(|| anyhow!("403 Forbidden"))
        }
    }

    fn worker(root: &TempDir, subreddits: &[&str]) -> UpdateWorker {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.serve("https://i.redd.it/a.png", png_bytes(32, 18, 1));
        fetcher.serve("https://i.redd.it/b.png?width=640", png_bytes(18, 32, 2));

        let mut listings = HashMap::new();
        listings.insert(
            "EarthPorn".to_string(),
            vec![
                "https://i.redd.it/a.png".to_string(),
                "https://i.redd.it/missing.png".to_string(),
                "https://i.redd.it/b.png?width=640".to_string(),
            ],
        );

        let cache = Arc::new(manager(root, fetcher));
        UpdateWorker::new(
            Arc::new(FakeListing(listings)),
            cache,
            subreddits.iter().map(|s| s.to_string()).collect(),
        )
        .with_throttle(Duration::ZERO)
    }

    #[test]
    fn caches_images_and_reports_events_in_order() {
        let root = TempDir::new().unwrap();
        let worker = worker(&root, &["EarthPorn"]);
        let url_map_path = worker.url_map_path.clone();
        let (tx, rx) = mpsc::channel();

        let report = worker.run(&tx);
        drop(tx);
        let events: Vec<UpdateEvent> = rx.iter().collect();

        assert_eq!(report.refreshed, vec![("EarthPorn".to_string(), 2)]);
        assert!(report.failed.is_empty());
        assert_eq!(events.first(), Some(&UpdateEvent::Started("EarthPorn".into())));
        assert_eq!(events.last(), Some(&UpdateEvent::Finished));
        let cached: Vec<&UpdateEvent> = events
            .iter()
            .filter(|e| matches!(e, UpdateEvent::ImageCached { .. }))
            .collect();
        assert_eq!(cached.len(), 2);
        assert!(events.contains(&UpdateEvent::FinishedSubreddit {
            subreddit: "EarthPorn".into(),
            cached: 2
        }));

        let url_map = UrlMap::load(&url_map_path);
        assert_eq!(url_map.subreddits_for("https://i.redd.it/b.png"), ["EarthPorn"]);
    }

    #[test]
    fn listing_failure_does_not_stop_other_subreddits() {
        let root = TempDir::new().unwrap();
        let worker = worker(&root, &["private", "EarthPorn"]);

        let (handle, rx) = worker.spawn();
        let report = handle.join().unwrap();
        let events: Vec<UpdateEvent> = rx.iter().collect();

        assert_eq!(report.failed, vec!["private".to_string()]);
        assert_eq!(report.total_cached(), 2);
        assert!(events.iter().any(|e| matches!(e, UpdateEvent::Error(msg) if msg.contains("r/private"))));
        assert!(!events.contains(&UpdateEvent::FinishedSubreddit {
            subreddit: "private".into(),
            cached: 0
        }));
    }

    #[test]
    fn limit_caps_downloads_per_subreddit() {
        let root = TempDir::new().unwrap();
        let worker = worker(&root, &["EarthPorn"]).with_limit(1);
        let (tx, _rx) = mpsc::channel();

        let report = worker.run(&tx);

        assert_eq!(report.total_cached(), 1);
        assert_eq!(worker.cache.list_images().unwrap().len(), 1);
    }
}
