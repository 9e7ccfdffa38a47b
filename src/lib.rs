//! `cinescrape` - descriptor-driven scrape-and-resolve pipeline
//!
//! Turns streaming portals (anime, drama, movie and live-TV sites) into a
//! normalized catalog: listings, title details with ordered episodes, and
//! playable stream descriptors.
//!
//! # Features
//!
//! - **Fetcher**: retries with backoff, shared cookie jar, anti-bot
//!   interstitial handshake, session tokens for AJAX endpoints
//! - **Descriptors**: one TOML table per site instead of one type per site
//! - **Loose JSON**: script literals repaired by small, named rules
//! - **Link resolution**: candidate location, decode plugins, mirror-domain
//!   aliases and ordered concurrent extractor delegation
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cinescrape::{load_config, ExtractorChain, SourceRegistry};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(None)?;
//!     let registry = SourceRegistry::from_config(&config, Arc::new(ExtractorChain::standard()))?;
//!     let source = registry.require("animeflv")?;
//!     let detail = source.get_detail("https://www3.animeflv.net/anime/naruto").await?;
//!     println!("{} episodes", detail.episodes.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod detail;
pub mod document;
pub mod error;
pub mod fetch;
pub mod fingerprint;
pub mod links;
pub mod listing;
pub mod model;
pub mod site;
pub mod template;

pub use config::{load_config, Config};
pub use detail::{resolve_detail, DetailSelectors, EpisodeSource};
pub use document::{parse_loose_json, repair_loose_json, Document};
pub use error::{ConfigError, DecodeError, FetchError, ParseError, ResolveError, Result};
pub use fetch::{FetchRequest, FetchSettings, Fetcher, RequestBody};
pub use fingerprint::{random_profile, BrowserProfile};
pub use links::{resolve_links, DecoderKind, EmbedExtractor, ExtractorChain, LinkConfig};
pub use listing::{classify_dub, extract_listing, normalize_url, ListingSelectors};
pub use model::{
    ContainerType, DubStatus, EpisodeRef, HomeSection, MediaDetail, MediaKind, MediaSummary, Quality, ShowStatus,
    StreamDescriptor, StreamSet, SubtitleTrack,
};
pub use site::{Capabilities, ContentSource, Pipeline, SiteConfig, SourceRegistry};

/// Version of cinescrape
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
