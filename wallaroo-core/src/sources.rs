use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

use crate::jsonfile::{read_json_or_none, write_json_atomic};

pub const DEFAULT_SUBREDDIT: &str = "WidescreenWallpaper";

#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub name: String,
    pub enabled: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Source {
    pub fn new(name: impl Into<String>) -> Self {
        Source {
            name: name.into(),
            enabled: true,
            last_updated: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SourcesFile {
    Names(Vec<String>),
    Map(Map<String, Value>),
}

#[derive(Serialize, Deserialize)]
struct SourceRecord {
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    last_updated: String,
}

fn default_enabled() -> bool {
    true
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // ISO timestamps written without an offset are taken as UTC
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Strips whitespace and a leading `r/`.
pub fn normalize_subreddit(name: &str) -> String {
    let trimmed = name.trim();
    let trimmed = trimmed
        .strip_prefix("/r/")
        .or_else(|| trimmed.strip_prefix("r/"))
        .unwrap_or(trimmed);
    trimmed.trim_matches('/').trim().to_string()
}

/// The subreddits images are fetched from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceList {
    sources: Vec<Source>,
}

impl SourceList {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = SourceList::default();
        for name in names {
            list.add(name.as_ref());
        }
        list
    }

    /// Loads `sources.json`; a missing or unreadable file yields the default
    /// subreddit.
    pub fn load(path: &Path) -> Self {
        match read_json_or_none::<SourcesFile>(path) {
            Some(SourcesFile::Names(names)) => Self::from_names(names),
            Some(SourcesFile::Map(map)) => {
                let mut list = SourceList::default();
                for (name, value) in map {
                    if !list.add(&name) {
                        continue;
                    }
                    let name = normalize_subreddit(&name);
                    match value {
                        Value::String(ts) => list.set_last_updated_opt(&name, parse_timestamp(&ts)),
                        Value::Object(_) => match serde_json::from_value::<SourceRecord>(value) {
                            Ok(record) => {
                                list.set_enabled(&name, record.enabled);
                                list.set_last_updated_opt(&name, parse_timestamp(&record.last_updated));
                            }
                            Err(e) => log::warn!("Ignoring settings for source {}: {}", name, e),
                        },
                        _ => {}
                    }
                }
                list
            }
            None => Self::from_names([DEFAULT_SUBREDDIT]),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut root = Map::new();
        for source in &self.sources {
            let record = SourceRecord {
                enabled: source.enabled,
                last_updated: source.last_updated.map(|dt| dt.to_rfc3339()).unwrap_or_default(),
            };
            root.insert(source.name.clone(), serde_json::to_value(record)?);
        }
        write_json_atomic(path, &root)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Source> {
        let name = normalize_subreddit(name);
        self.sources.iter().find(|s| s.name.eq_ignore_ascii_case(&name))
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Source> {
        let name = normalize_subreddit(name);
        self.sources.iter_mut().find(|s| s.name.eq_ignore_ascii_case(&name))
    }

    /// Adds a subreddit unless it is empty or already listed (ignoring case).
    pub fn add(&mut self, name: &str) -> bool {
        let name = normalize_subreddit(name);
        if name.is_empty() || self.get(&name).is_some() {
            return false;
        }
        self.sources.push(Source::new(name));
        true
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let name = normalize_subreddit(name);
        let before = self.sources.len();
        self.sources.retain(|s| !s.name.eq_ignore_ascii_case(&name));
        self.sources.len() != before
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> bool {
        match self.get_mut(name) {
            Some(source) => {
                source.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn set_last_updated(&mut self, name: &str, when: DateTime<Utc>) {
        self.set_last_updated_opt(name, Some(when));
    }

    fn set_last_updated_opt(&mut self, name: &str, when: Option<DateTime<Utc>>) {
        if name.is_empty() {
            return;
        }
        if let Some(source) = self.get_mut(name) {
            source.last_updated = when;
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name.clone()).collect()
    }

    pub fn enabled_names(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.name.clone())
            .collect()
    }

    /// Resolves a user-supplied name to the listed spelling.
    pub fn require(&self, name: &str) -> Result<&Source> {
        match self.get(name) {
            Some(source) => Ok(source),
            None => bail!("r/{} is not in the source list", normalize_subreddit(name)),
        }
    }
}
