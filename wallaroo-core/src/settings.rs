use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::filter::{AspectFilterMode, ImageFilter, Resolution, DEFAULT_TARGET_ASPECT};
use crate::jsonfile::{read_json_or_none, write_json_atomic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IntervalUnit {
    #[serde(rename = "seconds")]
    Seconds,
    #[default]
    #[serde(rename = "minutes")]
    Minutes,
    #[serde(rename = "hours")]
    Hours,
    #[serde(rename = "on restart")]
    OnRestart,
}

impl FromStr for IntervalUnit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "secs" | "second" | "seconds" => Ok(IntervalUnit::Seconds),
            "m" | "min" | "mins" | "minute" | "minutes" => Ok(IntervalUnit::Minutes),
            "h" | "hour" | "hours" => Ok(IntervalUnit::Hours),
            "restart" | "on restart" | "on-restart" => Ok(IntervalUnit::OnRestart),
            other => Err(anyhow!("Unknown interval unit '{}'", other)),
        }
    }
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntervalUnit::Seconds => "seconds",
            IntervalUnit::Minutes => "minutes",
            IntervalUnit::Hours => "hours",
            IntervalUnit::OnRestart => "on restart",
        };
        f.write_str(name)
    }
}

const MAX_INTERVAL_MS: u64 = i32::MAX as u64;

fn default_auto_interval() -> u64 {
    15
}

fn default_target_aspect() -> f64 {
    DEFAULT_TARGET_ASPECT
}

fn default_per_subreddit_limit() -> usize {
    10
}

/// Persistent user preferences stored in `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub filter_mode: AspectFilterMode,
    #[serde(default)]
    pub favorites_only: bool,
    #[serde(default = "default_auto_interval")]
    pub auto_interval: u64,
    #[serde(default)]
    pub auto_unit: IntervalUnit,
    #[serde(default)]
    pub resolutions: Vec<Resolution>,
    #[serde(default = "default_target_aspect")]
    pub target_aspect: f64,
    #[serde(default = "default_per_subreddit_limit")]
    pub per_subreddit_limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_wallpaper: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            filter_mode: AspectFilterMode::default(),
            favorites_only: false,
            auto_interval: default_auto_interval(),
            auto_unit: IntervalUnit::default(),
            resolutions: Vec::new(),
            target_aspect: default_target_aspect(),
            per_subreddit_limit: default_per_subreddit_limit(),
            current_wallpaper: None,
            extra: Map::new(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Self {
        read_json_or_none(path).unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    /// How often the daemon picks a new wallpaper; `None` disables rotation.
    pub fn rotation_interval(&self) -> Option<Duration> {
        if self.auto_interval == 0 {
            return None;
        }
        let unit_ms: u64 = match self.auto_unit {
            IntervalUnit::Seconds => 1_000,
            IntervalUnit::Minutes => 60 * 1_000,
            IntervalUnit::Hours => 60 * 60 * 1_000,
            IntervalUnit::OnRestart => return None,
        };
        let ms = self.auto_interval.saturating_mul(unit_ms).min(MAX_INTERVAL_MS);
        Some(Duration::from_millis(ms))
    }

    pub fn image_filter(&self, allowed_subreddits: Option<HashSet<String>>) -> ImageFilter {
        let target_aspect = if self.target_aspect.is_finite() && self.target_aspect > 0.0 {
            self.target_aspect
        } else {
            DEFAULT_TARGET_ASPECT
        };
        ImageFilter {
            mode: self.filter_mode,
            target_aspect,
            favorites_only: self.favorites_only,
            resolutions: self.resolutions.iter().copied().collect(),
            allowed_subreddits,
        }
    }
}
