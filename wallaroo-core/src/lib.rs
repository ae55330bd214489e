//! Core of the wallaroo wallpaper rotator: the on-disk image cache and its
//! index, subreddit sources, filtering and the background update worker.

pub mod cache;
pub mod cleanup;
pub mod fetch;
pub mod filter;
pub mod index;
pub mod jsonfile;
pub mod listing;
pub mod paths;
pub mod select;
pub mod settings;
pub mod sources;
pub mod thumbnail;
pub mod update;
pub mod url_map;
pub mod wallpaper;

pub use cache::{CacheManager, CachedImage};
pub use cleanup::{cleanup_unlisted, CleanupReport};
pub use fetch::{Fetcher, HttpFetcher};
pub use filter::{available_resolutions, parse_aspect, AspectBucket, AspectFilterMode, ImageFilter, Resolution};
pub use index::{ImageIndex, IndexEntry, IndexStore};
pub use listing::{ListingSource, RedditListingSource};
pub use paths::Paths;
pub use select::{pick_random, pick_random_favorite};
pub use settings::{IntervalUnit, Settings};
pub use sources::{Source, SourceList, DEFAULT_SUBREDDIT};
pub use update::{UpdateEvent, UpdateReport, UpdateWorker};
pub use url_map::UrlMap;
pub use wallpaper::{detect_desktop_environment, SystemWallpaper, WallpaperSetter};
