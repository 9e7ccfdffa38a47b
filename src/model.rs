//! Normalized content model shared by every site descriptor.
//!
//! All values are request-scoped: built fresh by one pipeline call, handed to
//! the caller, never cached.

use std::collections::BTreeMap;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// What kind of title a listing entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    #[default]
    Series,
    Live,
}

/// Audio track language status derived from the title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DubStatus {
    Subbed,
    Dubbed,
    None,
}

/// Airing status of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShowStatus {
    Ongoing,
    Completed,
    #[default]
    Unknown,
}

/// One entry of a listing, search result or recommendation strip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSummary {
    /// Absolute URL of the detail page; doubles as the id.
    pub url: String,
    pub title: String,
    pub poster_url: Option<String>,
    pub kind: MediaKind,
    pub year: Option<i32>,
    pub dub_status: DubStatus,
    /// Latest episode number, for "recently updated" strips.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_episode: Option<u32>,
}

/// A reference to one playable unit, produced by the detail resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeRef {
    pub display_name: String,
    pub episode_number: Option<u32>,
    pub season_number: Option<u32>,
    pub poster_url: Option<String>,
    /// Whatever the link resolver needs. Never interpreted in between.
    pub load_token: String,
}

/// Full description of a title and its ordered episodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDetail {
    pub url: String,
    pub title: String,
    pub kind: MediaKind,
    pub poster_url: Option<String>,
    pub background_url: Option<String>,
    pub plot: Option<String>,
    pub tags: Vec<String>,
    pub year: Option<i32>,
    pub status: ShowStatus,
    pub episodes: Vec<EpisodeRef>,
    pub recommendations: Vec<MediaSummary>,
    /// Set when episode pagination stopped early because a page failed.
    pub partial: bool,
}

/// Vertical resolution of a stream, when known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Unknown,
    Height(u32),
}

static HEIGHT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d{3,4})\s*p\b|\bhd\s*(\d{3,4})\b").expect("static regex"));

/// Named tiers, best first. Tokens must stand alone so words like `hdfull`
/// or `shdw` don't match.
static NAMED_TIERS: Lazy<[(Regex, u32); 4]> = Lazy::new(|| {
    let tier = |pattern: &str| Regex::new(pattern).expect("static regex");
    [
        (tier(r"(?i)\b(?:4k|uhd|2160)\b"), 2160),
        (tier(r"(?i)\b(?:full\s*hd|fhd)\b"), 1080),
        (tier(r"(?i)\bhd(?:rip|tv)?\b"), 720),
        (tier(r"(?i)\b(?:sd|dvd(?:\s*rip)?)\b"), 480),
    ]
});

impl Quality {
    /// Best-effort quality from a server or file label such as `"1080p"`,
    /// `"hd720"`, `"FullHD"` or `"dvdrip"`.
    pub fn from_name(name: &str) -> Self {
        if let Some(caps) = HEIGHT_RE.captures(name) {
            let height = caps
                .get(1)
                .or_else(|| caps.get(2))
                .and_then(|m| m.as_str().parse().ok());
            if let Some(h) = height {
                return Self::Height(h);
            }
        }

        NAMED_TIERS
            .iter()
            .find(|(re, _)| re.is_match(name))
            .map_or(Self::Unknown, |(_, height)| Self::Height(*height))
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::Height(h) => write!(f, "{h}p"),
        }
    }
}

/// Container of a playable stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    Hls,
    Mp4,
    #[default]
    Other,
}

impl ContainerType {
    /// Infer the container from the URL path extension.
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
        if path.ends_with(".m3u8") {
            Self::Hls
        } else if path.ends_with(".mp4") {
            Self::Mp4
        } else {
            Self::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub label: String,
    pub url: String,
}

/// Terminal output of the link resolver, handed to the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub source_label: String,
    pub url: String,
    pub quality: Quality,
    pub container: ContainerType,
    pub referer: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtitles: Vec<SubtitleTrack>,
}

impl StreamDescriptor {
    pub fn new(source_label: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            source_label: source_label.into(),
            container: ContainerType::from_url(&url),
            url,
            quality: Quality::Unknown,
            referer: None,
            extra_headers: BTreeMap::new(),
            subtitles: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    #[must_use]
    pub fn with_referer(mut self, referer: Option<String>) -> Self {
        self.referer = referer;
        self
    }
}

/// One titled strip of the home page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomeSection {
    pub key: String,
    pub title: String,
    pub items: Vec<MediaSummary>,
}

/// Everything `get_streams` found: the streams plus subtitle tracks
/// discovered along the way.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSet {
    pub streams: Vec<StreamDescriptor>,
    pub subtitles: Vec<SubtitleTrack>,
}

impl StreamSet {
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Add a subtitle track unless one with the same URL is already present.
    pub fn push_subtitle(&mut self, track: SubtitleTrack) {
        if !self.subtitles.iter().any(|t| t.url == track.url) {
            self.subtitles.push(track);
        }
    }
}
