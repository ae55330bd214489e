use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::fetch::Fetcher;

pub const LISTING_TIMEOUT: Duration = Duration::from_secs(15);

const IMAGE_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".gif", ".webp"];

#[derive(Debug, Default, Deserialize)]
pub struct RedditListing {
    #[serde(default)]
    pub data: ListingData,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListingData {
    #[serde(default)]
    pub children: Vec<ListingChild>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListingChild {
    #[serde(default)]
    pub data: Post,
}

#[derive(Debug, Default, Deserialize)]
pub struct Post {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub url_overridden_by_dest: Option<String>,
}

impl Post {
    fn link(&self) -> Option<&str> {
        self.url_overridden_by_dest
            .as_deref()
            .filter(|u| !u.is_empty())
            .or_else(|| self.url.as_deref().filter(|u| !u.is_empty()))
    }
}

fn is_direct_image_link(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) || path.contains("://i.redd.it/")
}

/// Direct image links from a listing, in listing order.
pub fn extract_image_urls(listing: &RedditListing) -> Vec<String> {
    listing
        .data
        .children
        .iter()
        .filter_map(|child| child.data.link())
        .filter(|url| is_direct_image_link(url))
        .map(str::to_string)
        .collect()
}

pub fn listing_url(subreddit: &str, limit: usize) -> String {
    format!("https://www.reddit.com/r/{}/new.json?limit={}", subreddit, limit)
}

pub trait ListingSource: Send + Sync {
    fn fetch_recent_image_urls(&self, subreddit: &str, limit: usize) -> Result<Vec<String>>;
}

pub struct RedditListingSource {
    fetcher: Arc<dyn Fetcher>,
}

impl RedditListingSource {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        RedditListingSource { fetcher }
    }
}

impl ListingSource for RedditListingSource {
    fn fetch_recent_image_urls(&self, subreddit: &str, limit: usize) -> Result<Vec<String>> {
        let url = listing_url(subreddit, limit);
        let text = self.fetcher.get_text(&url, LISTING_TIMEOUT)?;
        let listing: RedditListing = serde_json::from_str(&text)
            .with_context(|| format!("Unexpected listing format from r/{}", subreddit))?;
        Ok(extract_image_urls(&listing))
    }
}
