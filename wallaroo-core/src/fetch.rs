use anyhow::{bail, Context, Result};
use std::time::Duration;

pub const USER_AGENT: &str = "wallaroo/0.1";

/// Blocking HTTP GET abstraction so the cache and listing code can be driven
/// without network access.
pub trait Fetcher: Send + Sync {
    fn get_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>>;

    fn get_text(&self, url: &str, timeout: Duration) -> Result<String> {
        let bytes = self.get_bytes(url, timeout)?;
        String::from_utf8(bytes).with_context(|| format!("Response from {} is not valid UTF-8", url))
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpFetcher;

impl Fetcher for HttpFetcher {
    fn get_bytes(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        log::debug!("GET {}", url);
        let response = attohttpc::get(url)
            .header("User-Agent", USER_AGENT)
            .timeout(timeout)
            .send()
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("Request to {} returned HTTP {}", url, status);
        }

        let bytes = response.bytes()?;
        log::debug!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(bytes)
    }
}
