use anyhow::{anyhow, Result};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::index::{ImageIndex, IndexEntry};

/// Aspect ratios closer than this count as an exact match.
pub const EXACT_TOLERANCE: f64 = 0.01;

pub const DEFAULT_TARGET_ASPECT: f64 = 16.0 / 9.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectFilterMode {
    #[default]
    All,
    Exact,
    Rough,
}

impl FromStr for AspectFilterMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "0" => Ok(AspectFilterMode::All),
            "exact" | "1" => Ok(AspectFilterMode::Exact),
            "rough" | "2" => Ok(AspectFilterMode::Rough),
            other => Err(anyhow!("Unknown aspect filter '{}' (expected all, exact or rough)", other)),
        }
    }
}

// Older config files store the mode as its combo-box index.
impl<'de> Deserialize<'de> for AspectFilterMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Index(u64),
            Name(String),
        }

        let parsed = match Raw::deserialize(deserializer)? {
            Raw::Index(i) => i.to_string().parse(),
            Raw::Name(name) => name.parse(),
        };
        parsed.map_err(de::Error::custom)
    }
}

impl fmt::Display for AspectFilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AspectFilterMode::All => "all",
            AspectFilterMode::Exact => "exact",
            AspectFilterMode::Rough => "rough",
        };
        f.write_str(name)
    }
}

/// Coarse aspect-ratio classes used by the rough filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AspectBucket {
    Portrait,
    Square,
    Standard,
    Wide,
    UltraWide,
}

impl AspectBucket {
    pub fn of_ratio(ratio: f64) -> Self {
        if ratio < 0.9 {
            AspectBucket::Portrait
        } else if ratio < 1.1 {
            AspectBucket::Square
        } else if ratio < 1.5 {
            AspectBucket::Standard
        } else if ratio < 2.0 {
            AspectBucket::Wide
        } else {
            AspectBucket::UltraWide
        }
    }

    pub fn of_size(width: u32, height: u32) -> Option<Self> {
        aspect_ratio(width, height).map(Self::of_ratio)
    }
}

pub fn aspect_ratio(width: u32, height: u32) -> Option<f64> {
    if width == 0 || height == 0 {
        None
    } else {
        Some(f64::from(width) / f64::from(height))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Resolution { width, height }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| anyhow!("Resolution '{}' is not in WIDTHxHEIGHT form", s))?;
        let width: u32 = w.trim().parse().map_err(|_| anyhow!("Bad width in '{}'", s))?;
        let height: u32 = h.trim().parse().map_err(|_| anyhow!("Bad height in '{}'", s))?;
        if width == 0 || height == 0 {
            return Err(anyhow!("Resolution '{}' has a zero side", s));
        }
        Ok(Resolution { width, height })
    }
}

/// Parses "16:9", "16/9" or a plain ratio such as "1.78".
pub fn parse_aspect(s: &str) -> Result<f64> {
    let s = s.trim();
    let ratio = match s.split_once([':', '/']) {
        Some((w, h)) => {
            let w: f64 = w.trim().parse().map_err(|_| anyhow!("Bad aspect ratio '{}'", s))?;
            let h: f64 = h.trim().parse().map_err(|_| anyhow!("Bad aspect ratio '{}'", s))?;
            w / h
        }
        None => s.parse().map_err(|_| anyhow!("Bad aspect ratio '{}'", s))?,
    };
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(anyhow!("Aspect ratio '{}' must be positive", s));
    }
    Ok(ratio)
}

/// Everything that decides whether a cached image is eligible as wallpaper.
#[derive(Debug, Clone)]
pub struct ImageFilter {
    pub mode: AspectFilterMode,
    pub target_aspect: f64,
    pub favorites_only: bool,
    /// Empty means every resolution is allowed.
    pub resolutions: HashSet<Resolution>,
    /// `None` means every subreddit is allowed.
    pub allowed_subreddits: Option<HashSet<String>>,
}

impl Default for ImageFilter {
    fn default() -> Self {
        ImageFilter {
            mode: AspectFilterMode::All,
            target_aspect: DEFAULT_TARGET_ASPECT,
            favorites_only: false,
            resolutions: HashSet::new(),
            allowed_subreddits: None,
        }
    }
}

impl ImageFilter {
    pub fn accepts_aspect(&self, width: u32, height: u32) -> bool {
        let Some(ratio) = aspect_ratio(width, height) else {
            return self.mode == AspectFilterMode::All;
        };
        match self.mode {
            AspectFilterMode::All => true,
            AspectFilterMode::Exact => (ratio - self.target_aspect).abs() <= EXACT_TOLERANCE,
            AspectFilterMode::Rough => AspectBucket::of_ratio(ratio) == AspectBucket::of_ratio(self.target_aspect),
        }
    }

    /// `dims` overrides the entry's recorded size when the caller probed the
    /// file itself.
    pub fn accepts(&self, entry: Option<&IndexEntry>, dims: Option<(u32, u32)>) -> bool {
        if let Some(entry) = entry {
            if entry.banned {
                return false;
            }
            if let (Some(allowed), Some(sub)) = (&self.allowed_subreddits, entry.subreddit_name()) {
                if !allowed.iter().any(|a| a.eq_ignore_ascii_case(sub)) {
                    return false;
                }
            }
        }

        if self.favorites_only && !entry.map(|e| e.favorite).unwrap_or(false) {
            return false;
        }

        let dims = dims.or_else(|| entry.and_then(IndexEntry::dimensions));
        match dims {
            Some((w, h)) => {
                if !self.resolutions.is_empty() && !self.resolutions.contains(&Resolution::new(w, h)) {
                    return false;
                }
                self.accepts_aspect(w, h)
            }
            None => self.resolutions.is_empty() && self.mode == AspectFilterMode::All,
        }
    }
}

/// Distinct resolutions among non-banned images that pass the aspect filter,
/// largest first, with how many images have each.
pub fn available_resolutions(index: &ImageIndex, filter: &ImageFilter) -> Vec<(Resolution, usize)> {
    let mut counts: BTreeMap<Resolution, usize> = BTreeMap::new();
    for (_, entry) in index.iter() {
        if entry.banned {
            continue;
        }
        if let Some((w, h)) = entry.dimensions() {
            if filter.accepts_aspect(w, h) {
                *counts.entry(Resolution::new(w, h)).or_insert(0) += 1;
            }
        }
    }

    let mut out: Vec<_> = counts.into_iter().collect();
    out.sort_by(|a, b| b.0.area().cmp(&a.0.area()).then_with(|| a.0.cmp(&b.0)));
    out
}
