// Wallpaper setter seam and desktop detection
use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};

/// Anything that can put an image on the desktop.
pub trait WallpaperSetter: Send + Sync {
    fn set_wallpaper(&self, file_path: &Path) -> Result<()>;
}

/// Sets the wallpaper through the platform's native mechanism.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemWallpaper;

impl SystemWallpaper {
    /// The wallpaper the desktop currently reports, if it can tell.
    pub fn current(&self) -> Option<String> {
        wallpaper::get().ok().filter(|s| !s.trim().is_empty())
    }
}

impl WallpaperSetter for SystemWallpaper {
    fn set_wallpaper(&self, file_path: &Path) -> Result<()> {
        let absolute = absolute_existing(file_path)?;
        let file_loc = absolute.to_string_lossy();
        wallpaper::set_from_path(&file_loc).map_err(|e| anyhow!("Failed to set wallpaper: {}", e))?;
        log::info!("Wallpaper set successfully to: {}", file_loc);
        Ok(())
    }
}

fn absolute_existing(file_path: &Path) -> Result<PathBuf> {
    if !file_path.is_file() {
        bail!("Wallpaper file does not exist: {}", file_path.display());
    }
    file_path
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", file_path.display()))
}

/// Best guess at the running desktop, for diagnostics.
pub fn detect_desktop_environment() -> String {
    desktop_from_env(|name| std::env::var(name).ok())
}

fn desktop_from_env<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let var = |name: &str| lookup(name).unwrap_or_default().to_lowercase();

    let current = var("XDG_CURRENT_DESKTOP");
    let session = var("DESKTOP_SESSION");
    let gdm = var("GDMSESSION");
    let probe = format!("{}:{}:{}", current, session, gdm);

    if probe.contains("gnome") || probe.contains("unity") || session.starts_with("ubuntu") {
        return "gnome".to_string();
    }
    if probe.contains("kde") || probe.contains("plasma") || lookup("KDE_FULL_SESSION").is_some() {
        return "kde".to_string();
    }
    for name in ["cinnamon", "mate", "xfce", "lxde", "lxqt"] {
        if probe.contains(name) {
            return name.to_string();
        }
    }

    match var("XDG_SESSION_TYPE").as_str() {
        "wayland" => "wayland".to_string(),
        "x11" => "x11".to_string(),
        _ => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_rejected_before_touching_the_desktop() {
        let dir = TempDir::new().unwrap();
        let err = SystemWallpaper
            .set_wallpaper(&dir.path().join("gone.jpg"))
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn directories_are_not_wallpapers() {
        let dir = TempDir::new().unwrap();
        assert!(absolute_existing(dir.path()).is_err());
    }

    #[test]
    fn existing_file_resolves_to_an_absolute_path() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.jpg");
        std::fs::write(&file, b"x").unwrap();
        assert!(absolute_existing(&file).unwrap().is_absolute());
    }

    fn detect(vars: &[(&str, &str)]) -> String {
        let vars: std::collections::HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        desktop_from_env(|name| vars.get(name).cloned())
    }

    #[test]
    fn desktop_is_detected_from_session_variables() {
        assert_eq!(detect(&[("XDG_CURRENT_DESKTOP", "GNOME")]), "gnome");
        assert_eq!(detect(&[("XDG_CURRENT_DESKTOP", "ubuntu:GNOME")]), "gnome");
        assert_eq!(detect(&[("DESKTOP_SESSION", "ubuntu")]), "gnome");
        assert_eq!(detect(&[("XDG_CURRENT_DESKTOP", "KDE")]), "kde");
        assert_eq!(detect(&[("KDE_FULL_SESSION", "true")]), "kde");
        assert_eq!(detect(&[("XDG_CURRENT_DESKTOP", "XFCE")]), "xfce");
        assert_eq!(detect(&[("GDMSESSION", "cinnamon")]), "cinnamon");
    }

    #[test]
    fn session_type_is_the_fallback() {
        assert_eq!(detect(&[("XDG_SESSION_TYPE", "wayland")]), "wayland");
        assert_eq!(detect(&[("XDG_CURRENT_DESKTOP", "sway"), ("XDG_SESSION_TYPE", "x11")]), "x11");
        assert_eq!(detect(&[]), "unknown");
    }
}
