//! Embed extractor seam.
//!
//! An [`EmbedExtractor`] turns one embed-host URL into playable streams.
//! Host-specific extractors live outside this crate; the ones here cover
//! direct media links and a passthrough fallback.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::model::{ContainerType, StreamDescriptor};

/// Trait for embed-host extractors.
#[async_trait]
pub trait EmbedExtractor: Send + Sync {
    /// Short lowercase name (e.g., `"direct"`, `"voe"`).
    fn name(&self) -> &'static str;

    /// Returns `true` if this extractor can handle the given URL.
    fn matches(&self, url: &str) -> bool;

    /// Resolve `url` to streams. `referer` is the page that embedded it.
    async fn resolve_embed(&self, url: &str, referer: Option<&str>) -> Result<Vec<StreamDescriptor>>;
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "embed".to_string())
}

/// URLs that already point at an HLS playlist or MP4 file.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectMediaExtractor;

#[async_trait]
impl EmbedExtractor for DirectMediaExtractor {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn matches(&self, url: &str) -> bool {
        ContainerType::from_url(url) != ContainerType::Other
    }

    async fn resolve_embed(&self, url: &str, referer: Option<&str>) -> Result<Vec<StreamDescriptor>> {
        Ok(vec![
            StreamDescriptor::new(host_of(url), url).with_referer(referer.map(str::to_string)),
        ])
    }
}

/// Hands the embed URL itself to the player.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbedPassthrough;

#[async_trait]
impl EmbedExtractor for EmbedPassthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn matches(&self, url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }

    async fn resolve_embed(&self, url: &str, referer: Option<&str>) -> Result<Vec<StreamDescriptor>> {
        Ok(vec![
            StreamDescriptor::new(host_of(url), url).with_referer(referer.map(str::to_string)),
        ])
    }
}

/// First matching extractor wins.
#[derive(Clone, Default)]
pub struct ExtractorChain {
    extractors: Vec<Arc<dyn EmbedExtractor>>,
}

impl ExtractorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct media first, passthrough last.
    pub fn standard() -> Self {
        Self::new()
            .with(Arc::new(DirectMediaExtractor))
            .with(Arc::new(EmbedPassthrough))
    }

    #[must_use]
    pub fn with(mut self, extractor: Arc<dyn EmbedExtractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }
}

impl std::fmt::Debug for ExtractorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorChain").field("extractors", &self.names()).finish()
    }
}

#[async_trait]
impl EmbedExtractor for ExtractorChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn matches(&self, url: &str) -> bool {
        self.extractors.iter().any(|e| e.matches(url))
    }

    async fn resolve_embed(&self, url: &str, referer: Option<&str>) -> Result<Vec<StreamDescriptor>> {
        let extractor = self
            .extractors
            .iter()
            .find(|e| e.matches(url))
            .ok_or_else(|| anyhow!("no extractor for {url}"))?;
        extractor.resolve_embed(url, referer).await
    }
}
