use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

pub const CACHE_DIR_ENV: &str = "WALLAROO_CACHE_DIR";
pub const CONFIG_DIR_ENV: &str = "WALLAROO_CONFIG_DIR";

#[derive(Debug, Clone)]
pub struct Paths {
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub thumbs_dir: PathBuf,
    pub index_file: PathBuf,
    pub settings_file: PathBuf,
    pub sources_file: PathBuf,
    pub url_map_file: PathBuf,
}

impl Paths {
    /// Resolves the platform directories, honouring the environment overrides.
    pub fn new() -> Result<Self> {
        Self::resolve(None, None)
    }

    /// Like [`Paths::new`] but explicit directories win over everything else.
    pub fn resolve(config_dir: Option<PathBuf>, cache_dir: Option<PathBuf>) -> Result<Self> {
        let config_dir = config_dir.or_else(|| std::env::var_os(CONFIG_DIR_ENV).map(PathBuf::from));
        let cache_dir = cache_dir.or_else(|| std::env::var_os(CACHE_DIR_ENV).map(PathBuf::from));

        let (config_dir, cache_dir) = match (config_dir, cache_dir) {
            (Some(config), Some(cache)) => (config, cache),
            (config, cache) => {
                let proj_dirs = ProjectDirs::from("com", "wallaroo", "wallaroo")
                    .context("Failed to get project directories")?;
                (
                    config.unwrap_or_else(|| proj_dirs.config_dir().to_path_buf()),
                    cache.unwrap_or_else(|| proj_dirs.cache_dir().to_path_buf()),
                )
            }
        };

        Self::with_dirs(config_dir, cache_dir)
    }

    pub fn with_dirs(config_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let config_dir = config_dir.into();
        let cache_dir = cache_dir.into();
        let thumbs_dir = cache_dir.join("thumbs");

        // Create directories if they don't exist
        for dir in [&config_dir, &cache_dir, &thumbs_dir] {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        Ok(Paths {
            index_file: cache_dir.join("index.json"),
            settings_file: config_dir.join("config.json"),
            sources_file: config_dir.join("sources.json"),
            url_map_file: config_dir.join("url_map.json"),
            config_dir,
            cache_dir,
            thumbs_dir,
        })
    }

    /// Index key for a cached image: its bare filename.
    pub fn key_for(path: &Path) -> Option<String> {
        path.file_name().and_then(|n| n.to_str()).map(str::to_string)
    }

    pub fn image_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn with_dirs_creates_layout() {
        let root = TempDir::new().unwrap();
        let paths = Paths::with_dirs(root.path().join("cfg"), root.path().join("cache")).unwrap();

        assert!(paths.config_dir.is_dir());
        assert!(paths.thumbs_dir.is_dir());
        assert_eq!(paths.index_file, root.path().join("cache").join("index.json"));
        assert_eq!(paths.settings_file, root.path().join("cfg").join("config.json"));
    }

    #[test]
    fn key_is_the_file_name() {
        assert_eq!(Paths::key_for(Path::new("/tmp/x/abc.jpg")).as_deref(), Some("abc.jpg"));
        assert_eq!(Paths::key_for(Path::new("/")), None);
    }
}
