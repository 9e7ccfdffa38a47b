//! Content sources.
//!
//! A site is described by data, not code: a [`SiteConfig`] names the
//! selectors, templates and decoders, and one generic [`Pipeline`] runs every
//! descriptor.
//!
//! # Architecture
//!
//! - [`ContentSource`]: async trait a host calls into
//! - [`Pipeline`]: descriptor-driven implementation
//! - [`SourceRegistry`]: looks sources up by name
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cinescrape::config::load_config;
//! use cinescrape::links::ExtractorChain;
//! use cinescrape::site::SourceRegistry;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = load_config(None)?;
//! let registry = SourceRegistry::from_config(&config, Arc::new(ExtractorChain::standard()))?;
//!
//! if let Some(source) = registry.get("animeflv") {
//!     for hit in source.search("naruto").await? {
//!         println!("{} {}", hit.title, hit.url);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod pipeline;
mod registry;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

pub use pipeline::Pipeline;
pub use registry::SourceRegistry;

use crate::detail::{DetailSelectors, EpisodeSource};
use crate::document::Sel;
use crate::error::{ConfigError, ResolveError, Result};
use crate::fetch::{HttpMethod, SessionTokenSource};
use crate::links::LinkConfig;
use crate::listing::ListingSelectors;
use crate::model::{HomeSection, MediaDetail, MediaKind, MediaSummary, StreamSet};

/// What a source can do, as reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default = "yes")]
    pub search: bool,
    #[serde(default)]
    pub quick_search: bool,
    #[serde(default)]
    pub download: bool,
    #[serde(default)]
    pub live: bool,
}

fn yes() -> bool {
    true
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            search: true,
            quick_search: false,
            download: false,
            live: false,
        }
    }
}

/// One strip of the home page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionConfig {
    pub key: String,
    pub title: String,
    /// `{base}` and `{page}` are available. Without `{page}` the section
    /// only has a first page.
    pub path: String,
    /// Restrict extraction to the first node matching this selector.
    #[serde(default)]
    pub scope: Option<Sel>,
    /// Section-specific selectors; the site listing otherwise.
    #[serde(default)]
    pub listing: Option<ListingSelectors>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// `{base}` and `{query}` (URL-encoded) are available.
    pub path: String,
    #[serde(default)]
    pub method: HttpMethod,
    /// Form fields; `{query}` is the raw query.
    #[serde(default)]
    pub form: BTreeMap<String, String>,
    /// JSON body sent instead of `form` on POST. String leaves are
    /// templates like the form values.
    #[serde(default)]
    pub json: Option<Value>,
    /// Extra request headers; `{token}` is the session token once read.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Token the site wants echoed back. Read from `token.page`, or from a
    /// first identical request when no page is given.
    #[serde(default)]
    pub token: Option<SessionTokenSource>,
    #[serde(default)]
    pub listing: Option<ListingSelectors>,
}

fn default_query_field() -> String {
    "value".to_string()
}

fn default_title_field() -> String {
    "/title".to_string()
}

fn default_slug_field() -> String {
    "/slug".to_string()
}

fn default_id_field() -> String {
    "/id".to_string()
}

/// JSON suggestion endpoint answering a single form field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickSearchConfig {
    pub path: String,
    #[serde(default = "default_query_field")]
    pub field: String,
    #[serde(default)]
    pub items_pointer: String,
    #[serde(default = "default_title_field")]
    pub title_field: String,
    #[serde(default = "default_slug_field")]
    pub slug_field: String,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Matched against the listing kind markers.
    #[serde(default)]
    pub kind_field: Option<String>,
    /// `{base}`, `{slug}` and `{id}` are available.
    pub url_template: String,
    #[serde(default)]
    pub poster_template: Option<String>,
}

fn default_lang() -> String {
    "es".to_string()
}

fn default_kinds() -> Vec<MediaKind> {
    vec![MediaKind::Series, MediaKind::Movie]
}

/// Full description of one site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default = "default_kinds")]
    pub kinds: Vec<MediaKind>,
    /// Try to clear anti-bot interstitials. When off, one is an error.
    #[serde(default = "yes")]
    pub challenge: bool,
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub sections: Vec<SectionConfig>,
    #[serde(default)]
    pub search: Option<SearchConfig>,
    #[serde(default)]
    pub quick_search: Option<QuickSearchConfig>,
    pub listing: ListingSelectors,
    pub detail: DetailSelectors,
    #[serde(default)]
    pub links: LinkConfig,
}

impl SiteConfig {
    fn invalid(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::Invalid {
            site: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Check what deserialization cannot and return the base URL, with a
    /// trailing slash so relative joins land under it.
    pub fn validate(&self) -> std::result::Result<Url, ConfigError> {
        if self.name.trim().is_empty() || self.name.contains(char::is_whitespace) {
            return Err(self.invalid("name must be a single non-empty word"));
        }

        let mut base = Url::parse(&self.base_url)
            .map_err(|e| self.invalid(format!("base_url `{}`: {e}", self.base_url)))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(self.invalid("base_url must be http(s)"));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let mut keys = BTreeSet::new();
        for section in &self.sections {
            if section.path.trim().is_empty() {
                return Err(self.invalid(format!("section `{}` has no path", section.key)));
            }
            if !keys.insert(section.key.as_str()) {
                return Err(self.invalid(format!("duplicate section `{}`", section.key)));
            }
        }

        if self.capabilities.search && self.search.is_none() {
            return Err(self.invalid("search capability without [search]"));
        }
        if self.capabilities.quick_search && self.quick_search.is_none() {
            return Err(self.invalid("quick_search capability without [quick_search]"));
        }
        if let EpisodeSource::Paginated(p) = &self.detail.episodes {
            if p.max_pages == 0 {
                return Err(self.invalid("max_pages must be at least 1"));
            }
        }
        if self.links.candidates.is_empty() {
            return Err(self.invalid("links need at least one candidate source"));
        }
        if self.links.candidate_timeout_secs == 0 {
            return Err(self.invalid("candidate_timeout_secs must be at least 1"));
        }
        Ok(base)
    }
}

/// Operations a host drives a source with.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Registry name (e.g., `"animeflv"`).
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Home strips for `page`; all of them, or only `section`.
    async fn list_home(&self, page: u32, section: Option<&str>) -> Result<Vec<HomeSection>>;

    async fn search(&self, query: &str) -> Result<Vec<MediaSummary>>;

    /// Suggestions while typing. Unsupported by default.
    async fn quick_search(&self, query: &str) -> Result<Vec<MediaSummary>> {
        let _ = query;
        Err(ResolveError::Unsupported {
            site: self.name().to_string(),
            operation: "quick_search",
        })
    }

    async fn get_detail(&self, url: &str) -> Result<MediaDetail>;

    /// Streams for an episode token taken from [`MediaDetail::episodes`].
    async fn get_streams(&self, token: &str) -> Result<StreamSet>;
}
