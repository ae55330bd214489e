use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use wallaroo_core::thumbnail::image_dimensions;
use wallaroo_core::update::DEFAULT_THROTTLE;
use wallaroo_core::*;

/// What the CLI shows about one cached image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageDetails {
    pub path: PathBuf,
    pub key: String,
    pub subreddit: Option<String>,
    pub resolution: Option<Resolution>,
    pub favorite: bool,
    pub banned: bool,
    pub source_url: Option<String>,
    pub downloaded_at: Option<DateTime<Utc>>,
}

impl ImageDetails {
    fn new(path: PathBuf, key: String, entry: Option<&IndexEntry>) -> Self {
        ImageDetails {
            path,
            key,
            subreddit: entry.and_then(|e| e.subreddit_name()).map(str::to_string),
            resolution: entry
                .and_then(IndexEntry::dimensions)
                .map(|(w, h)| Resolution::new(w, h)),
            favorite: entry.map(|e| e.favorite).unwrap_or(false),
            banned: entry.map(|e| e.banned).unwrap_or(false),
            source_url: entry.and_then(|e| e.source_url.clone()),
            downloaded_at: entry.and_then(IndexEntry::downloaded_at),
        }
    }

    pub fn bucket(&self) -> Option<AspectBucket> {
        self.resolution
            .and_then(|r| AspectBucket::of_size(r.width, r.height))
    }

    /// One line for `list`.
    pub fn summary(&self) -> String {
        let flags = match (self.favorite, self.banned) {
            (true, true) => "*x",
            (true, false) => "* ",
            (false, true) => " x",
            (false, false) => "  ",
        };
        let resolution = self
            .resolution
            .map(|r| r.to_string())
            .unwrap_or_else(|| "?".to_string());
        let subreddit = self.subreddit.as_deref().unwrap_or("?");
        format!("{} {:>10}  r/{:<24} {}", flags, resolution, subreddit, self.key)
    }
}

impl fmt::Display for ImageDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "File:       {}", self.path.display())?;
        writeln!(f, "Subreddit:  {}", self.subreddit.as_deref().unwrap_or("unknown"))?;
        match (self.resolution, self.bucket()) {
            (Some(res), Some(bucket)) => writeln!(f, "Resolution: {} ({:?})", res, bucket)?,
            _ => writeln!(f, "Resolution: unknown")?,
        }
        writeln!(f, "Favorite:   {}", if self.favorite { "yes" } else { "no" })?;
        writeln!(f, "Banned:     {}", if self.banned { "yes" } else { "no" })?;
        if let Some(url) = &self.source_url {
            writeln!(f, "Source:     {}", url)?;
        }
        if let Some(when) = self.downloaded_at {
            writeln!(f, "Downloaded: {}", when.format("%Y-%m-%d %H:%M UTC"))?;
        }
        Ok(())
    }
}

/// Human-readable progress line for an update event.
pub fn describe_event(event: &UpdateEvent) -> String {
    match event {
        UpdateEvent::Started(sub) => format!("Fetching r/{}...", sub),
        UpdateEvent::ImageCached { path, subreddit, .. } => {
            let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            format!("  r/{}: {}", subreddit, name)
        }
        UpdateEvent::FinishedSubreddit { subreddit, cached } => {
            format!("r/{}: {} images cached", subreddit, cached)
        }
        UpdateEvent::Error(message) => format!("Error: {}", message),
        UpdateEvent::Finished => "Update finished".to_string(),
    }
}

pub struct WallarooCliApp {
    paths: Paths,
    cache: Arc<CacheManager>,
    listing: Arc<dyn ListingSource>,
    setter: Arc<dyn WallpaperSetter>,
    settings: Settings,
    sources: SourceList,
    dry_run: bool,
    throttle: Duration,
}

impl WallarooCliApp {
    pub fn new(config_dir: Option<PathBuf>, cache_dir: Option<PathBuf>, dry_run: bool) -> Result<Self> {
        let paths = Paths::resolve(config_dir, cache_dir)?;
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher);
        let listing = Arc::new(RedditListingSource::new(fetcher.clone()));

        Ok(Self::with_services(
            paths,
            fetcher,
            listing,
            Arc::new(SystemWallpaper),
            dry_run,
        ))
    }

    pub fn with_services(
        paths: Paths,
        fetcher: Arc<dyn Fetcher>,
        listing: Arc<dyn ListingSource>,
        setter: Arc<dyn WallpaperSetter>,
        dry_run: bool,
    ) -> Self {
        let settings = Settings::load(&paths.settings_file);
        let sources = SourceList::load(&paths.sources_file);
        let cache = Arc::new(CacheManager::new(paths.clone(), fetcher));

        Self {
            paths,
            cache,
            listing,
            setter,
            settings,
            sources,
            dry_run,
            throttle: DEFAULT_THROTTLE,
        }
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn sources(&self) -> &SourceList {
        &self.sources
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn current_wallpaper(&self) -> Option<&Path> {
        self.settings.current_wallpaper.as_deref()
    }

    fn current_key(&self) -> Option<String> {
        self.current_wallpaper().and_then(Paths::key_for)
    }

    // An empty source list restricts nothing; disabled sources are hidden
    fn allowed_subreddits(&self) -> Option<HashSet<String>> {
        if self.sources.is_empty() {
            None
        } else {
            Some(self.sources.enabled_names().into_iter().collect())
        }
    }

    pub fn image_filter(&self) -> ImageFilter {
        self.settings.image_filter(self.allowed_subreddits())
    }

    /// Refreshes one listed subreddit, or every enabled one, reporting progress
    /// through `on_event`.
    pub fn update<F>(&mut self, subreddit: Option<&str>, mut on_event: F) -> Result<UpdateReport>
    where
        F: FnMut(&UpdateEvent),
    {
        let subreddits = match subreddit {
            Some(name) => vec![self.sources.require(name)?.name.clone()],
            None => self.sources.enabled_names(),
        };
        if subreddits.is_empty() {
            bail!("No enabled sources to update");
        }

        let worker = UpdateWorker::new(self.listing.clone(), self.cache.clone(), subreddits)
            .with_limit(self.settings.per_subreddit_limit)
            .with_throttle(self.throttle);
        let (handle, events) = worker.spawn();
        for event in events.iter() {
            on_event(&event);
        }
        let report = handle
            .join()
            .map_err(|_| anyhow!("Update worker panicked"))?;

        let now = Utc::now();
        for (name, _) in &report.refreshed {
            self.sources.set_last_updated(name, now);
        }
        self.sources.save(&self.paths.sources_file)?;
        Ok(report)
    }

    pub fn reindex(&self) -> Result<usize> {
        self.cache.enrich_existing()
    }

    pub fn set_random(&mut self) -> Result<Option<PathBuf>> {
        let picked = pick_random(&self.cache, &self.image_filter())?;
        self.apply_choice(picked)
    }

    pub fn set_random_favorite(&mut self) -> Result<Option<PathBuf>> {
        let picked = pick_random_favorite(&self.cache, &self.image_filter())?;
        self.apply_choice(picked)
    }

    fn apply_choice(&mut self, picked: Option<PathBuf>) -> Result<Option<PathBuf>> {
        match picked {
            Some(path) => {
                self.set_wallpaper(&path)?;
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }

    /// Puts `path` on the desktop and remembers it as the current wallpaper.
    /// A dry run only updates the in-memory state.
    pub fn set_wallpaper(&mut self, path: &Path) -> Result<()> {
        if self.dry_run {
            log::info!("Dry run: would set wallpaper to {}", path.display());
            self.settings.current_wallpaper = Some(path.to_path_buf());
            return Ok(());
        }

        self.setter.set_wallpaper(path)?;
        self.settings.current_wallpaper = Some(path.to_path_buf());
        self.save_settings()
    }

    pub fn set_specific(&mut self, target: &Path) -> Result<PathBuf> {
        let (path, _) = self.resolve_target(Some(target))?;
        self.set_wallpaper(&path)?;
        Ok(path)
    }

    /// Maps an optional user-supplied file to a cached image; no target means
    /// the current wallpaper.
    fn resolve_target(&self, target: Option<&Path>) -> Result<(PathBuf, String)> {
        let path = match target {
            Some(p) if p.is_file() => p.to_path_buf(),
            Some(p) => {
                let in_cache = self.paths.cache_dir.join(p);
                if !in_cache.is_file() {
                    bail!("No such image: {}", p.display());
                }
                in_cache
            }
            None => self
                .current_wallpaper()
                .map(Path::to_path_buf)
                .context("No wallpaper has been set yet")?,
        };
        let key = Paths::key_for(&path).with_context(|| format!("Not an image file: {}", path.display()))?;
        Ok((path, key))
    }

    pub fn toggle_favorite(&mut self, target: Option<&Path>) -> Result<bool> {
        let (_, key) = self.resolve_target(target)?;
        self.cache.index().toggle_favorite(&key)
    }

    /// Bans an image for good. When it is the current wallpaper a random
    /// favorite replaces it and is returned.
    pub fn ban(&mut self, target: Option<&Path>) -> Result<Option<PathBuf>> {
        let (_, key) = self.resolve_target(target)?;
        self.cache.index().set_banned(&key, true)?;
        log::info!("Banned {}", key);

        if self.current_key().as_deref() == Some(key.as_str()) {
            self.set_random_favorite()
        } else {
            Ok(None)
        }
    }

    pub fn cleanup(&self) -> Result<CleanupReport> {
        if self.sources.is_empty() {
            bail!("The source list is empty; refusing to remove every image");
        }
        let allowed: HashSet<String> = self.sources.names().into_iter().collect();
        cleanup_unlisted(&self.cache, &allowed)
    }

    pub fn details(&self, target: Option<&Path>) -> Result<ImageDetails> {
        let (path, key) = self.resolve_target(target)?;
        let index = self.cache.index().read();
        let entry = index.get(&key);
        let mut details = ImageDetails::new(path, key, entry);

        if details.resolution.is_none() {
            details.resolution = image_dimensions(&details.path)
                .ok()
                .map(|(w, h)| Resolution::new(w, h));
        }
        Ok(details)
    }

    /// Every cached image, newest first.
    pub fn list(&self) -> Result<Vec<ImageDetails>> {
        let index = self.cache.index().read();
        let images = self
            .cache
            .list_images()?
            .into_iter()
            .filter_map(|path| {
                let key = Paths::key_for(&path)?;
                let entry = index.get(&key);
                Some(ImageDetails::new(path, key, entry))
            })
            .collect();
        Ok(images)
    }

    /// Resolutions on offer under the current aspect filter.
    pub fn resolutions(&self) -> Vec<(Resolution, usize)> {
        available_resolutions(&self.cache.index().read(), &self.image_filter())
    }

    pub fn add_source(&mut self, name: &str) -> Result<bool> {
        let added = self.sources.add(name);
        if added {
            self.sources.save(&self.paths.sources_file)?;
        }
        Ok(added)
    }

    pub fn remove_source(&mut self, name: &str) -> Result<bool> {
        let removed = self.sources.remove(name);
        if removed {
            self.sources.save(&self.paths.sources_file)?;
        }
        Ok(removed)
    }

    pub fn set_source_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        if !self.sources.set_enabled(name, enabled) {
            bail!("r/{} is not in the source list", name);
        }
        self.sources.save(&self.paths.sources_file)
    }

    pub fn set_filter_mode(&mut self, mode: AspectFilterMode) -> Result<()> {
        self.settings.filter_mode = mode;
        self.save_settings()
    }

    pub fn set_favorites_only(&mut self, favorites_only: bool) -> Result<()> {
        self.settings.favorites_only = favorites_only;
        self.save_settings()
    }

    pub fn set_interval(&mut self, value: u64, unit: IntervalUnit) -> Result<()> {
        self.settings.auto_interval = value;
        self.settings.auto_unit = unit;
        self.save_settings()
    }

    pub fn set_resolutions(&mut self, mut resolutions: Vec<Resolution>) -> Result<()> {
        resolutions.sort();
        resolutions.dedup();
        self.settings.resolutions = resolutions;
        self.save_settings()
    }

    pub fn set_target_aspect(&mut self, aspect: f64) -> Result<()> {
        if !aspect.is_finite() || aspect <= 0.0 {
            bail!("Aspect ratio must be positive");
        }
        self.settings.target_aspect = aspect;
        self.save_settings()
    }

    fn save_settings(&self) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        self.settings.save(&self.paths.settings_file)
    }

    fn reload_settings(&mut self) {
        let mut fresh = Settings::load(&self.paths.settings_file);
        if self.dry_run {
            fresh.current_wallpaper = self.settings.current_wallpaper.take();
        }
        self.settings = fresh;
    }

    pub fn run_daemon(&mut self) -> Result<()> {
        self.run_daemon_for(None)
    }

    /// Sets a wallpaper now and then keeps rotating on the configured
    /// interval. `rotations` bounds the number of changes after the first.
    pub fn run_daemon_for(&mut self, rotations: Option<usize>) -> Result<()> {
        match self.reindex() {
            Ok(0) => {}
            Ok(n) => log::info!("Indexed {} existing images", n),
            Err(e) => log::warn!("Failed to index existing images: {:#}", e),
        }

        if self.cache.list_images()?.is_empty() {
            log::info!("Cache is empty, fetching images first");
            if let Err(e) = self.update(None, |event| log::info!("{}", describe_event(event))) {
                log::error!("Initial update failed: {:#}", e);
            }
        }

        self.rotate_once();
        let mut done = 0;
        loop {
            if rotations.is_some_and(|max| done >= max) {
                break;
            }
            self.reload_settings();
            let Some(interval) = self.settings.rotation_interval() else {
                log::info!("Automatic rotation is off ({} {})", self.settings.auto_interval, self.settings.auto_unit);
                break;
            };
            log::debug!("Next wallpaper in {:?}", interval);
            thread::sleep(interval);
            self.rotate_once();
            done += 1;
        }
        Ok(())
    }

    fn rotate_once(&mut self) {
        match self.set_random() {
            Ok(Some(path)) => log::info!("Wallpaper: {}", path.display()),
            Ok(None) => log::warn!("No wallpaper to rotate to"),
            Err(e) => log::error!("Failed to rotate wallpaper: {:#}", e),
        }
    }

    /// Key/value lines describing the environment and the cache.
    pub fn diagnose(&self) -> Vec<(&'static str, String)> {
        let index = self.cache.index().read();
        let favorites = index.iter().filter(|(_, e)| e.favorite).count();
        let banned = index.iter().filter(|(_, e)| e.banned).count();
        let cached = self.cache.list_images().map(|v| v.len()).unwrap_or(0);
        let session = std::env::var("XDG_SESSION_TYPE").unwrap_or_else(|_| "unknown".to_string());
        let rotation = match self.settings.rotation_interval() {
            Some(interval) => format!("every {}s", interval.as_secs()),
            None => "off".to_string(),
        };

        vec![
            ("desktop", detect_desktop_environment()),
            ("session", session),
            ("config dir", self.paths.config_dir.display().to_string()),
            ("cache dir", self.paths.cache_dir.display().to_string()),
            ("cached images", cached.to_string()),
            ("index entries", index.len().to_string()),
            ("favorites", favorites.to_string()),
            ("banned", banned.to_string()),
            (
                "sources",
                format!("{} enabled of {}", self.sources.enabled_names().len(), self.sources.names().len()),
            ),
            ("filter", self.settings.filter_mode.to_string()),
            ("rotation", rotation),
            (
                "current",
                self.current_wallpaper()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(none)".to_string()),
            ),
        ]
    }

    pub fn get_current_image_title(&self) -> String {
        match self.current_key() {
            Some(name) if name.chars().count() > 30 => {
                format!("{}...", name.chars().take(30).collect::<String>())
            }
            Some(name) => name,
            None => "(no image)".to_string(),
        }
    }

    fn show_menu<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let title = self.get_current_image_title();
        let favorite = self
            .current_key()
            .and_then(|key| self.cache.index().read().get(&key).map(|e| e.favorite))
            .unwrap_or(false);
        let cached = self.cache.list_images().map(|v| v.len()).unwrap_or(0);

        writeln!(out, "\n=== Wallaroo - Subreddit Wallpaper Rotator ===")?;
        writeln!(out, "Current wallpaper: {}", title)?;
        writeln!(
            out,
            "Sources: {} enabled of {} | Cached images: {}",
            self.sources.enabled_names().len(),
            self.sources.names().len(),
            cached
        )?;
        writeln!(out)?;
        writeln!(out, "1. Update from sources")?;
        writeln!(out, "2. Random wallpaper")?;
        writeln!(out, "3. Random favorite")?;
        if favorite {
            writeln!(out, "4. Unfavorite \"{}\"", title)?;
        } else {
            writeln!(out, "4. Favorite \"{}\"", title)?;
        }
        writeln!(out, "5. Ban \"{}\"", title)?;
        writeln!(out, "6. Details")?;
        writeln!(out, "7. Remove images from unlisted subreddits")?;
        writeln!(out, "8. Exit")?;
        write!(out, "\nSelect an option (1-8): ")?;
        out.flush()
    }

    /// Interactive numbered menu on stdin/stdout.
    pub fn run(&mut self) -> Result<()> {
        let stdin = io::stdin();
        let stdout = io::stdout();
        self.run_with(stdin.lock(), stdout.lock())
    }

    pub fn run_with<R: BufRead, W: Write>(&mut self, mut input: R, mut out: W) -> Result<()> {
        loop {
            self.show_menu(&mut out)?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                writeln!(out)?;
                break;
            }

            match line.trim() {
                "1" => {
                    let result = self.update(None, |event| {
                        let _ = writeln!(out, "{}", describe_event(event));
                    });
                    if let Err(e) = result {
                        writeln!(out, "Failed to update: {:#}", e)?;
                    }
                }
                "2" => match self.set_random() {
                    Ok(Some(path)) => writeln!(out, "Set wallpaper: {}", path.display())?,
                    Ok(None) => writeln!(out, "No cached image matches the current filters")?,
                    Err(e) => writeln!(out, "Failed to set wallpaper: {:#}", e)?,
                },
                "3" => match self.set_random_favorite() {
                    Ok(Some(path)) => writeln!(out, "Set wallpaper: {}", path.display())?,
                    Ok(None) => writeln!(out, "No cached image matches the current filters")?,
                    Err(e) => writeln!(out, "Failed to set wallpaper: {:#}", e)?,
                },
                "4" => match self.toggle_favorite(None) {
                    Ok(true) => writeln!(out, "Added to favorites")?,
                    Ok(false) => writeln!(out, "Removed from favorites")?,
                    Err(e) => writeln!(out, "Failed to toggle favorite: {:#}", e)?,
                },
                "5" => match self.ban(None) {
                    Ok(Some(path)) => writeln!(out, "Banned. New wallpaper: {}", path.display())?,
                    Ok(None) => writeln!(out, "Banned")?,
                    Err(e) => writeln!(out, "Failed to ban image: {:#}", e)?,
                },
                "6" => match self.details(None) {
                    Ok(details) => write!(out, "{}", details)?,
                    Err(e) => writeln!(out, "{:#}", e)?,
                },
                "7" => match self.cleanup() {
                    Ok(report) => writeln!(
                        out,
                        "Removed {} images, {} remain",
                        report.removed.len(),
                        report.kept
                    )?,
                    Err(e) => writeln!(out, "Failed to clean up: {:#}", e)?,
                },
                "8" => {
                    writeln!(out, "Exiting Wallaroo...")?;
                    break;
                }
                _ => writeln!(out, "Invalid option. Please select 1-8.")?,
            }
        }

        Ok(())
    }
}
