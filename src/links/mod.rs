//! Link resolver: episode page to playable streams.
//!
//! Fetch the page, locate embed candidates, decode each one, follow player
//! pages, rewrite mirror domains, then hand every embed to an
//! [`EmbedExtractor`]. Embeds resolve concurrently and independently; the
//! result keeps input order and simply lacks whatever failed or is about to
//! expire.

pub mod candidates;
pub mod decode;
pub mod extractor;
pub mod rewrite;

use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use url::Url;

pub use candidates::{locate, Candidate, CandidateKind, CandidateSource};
pub use decode::{
    decode_base64, unshift, Base64Decoder, DecodedEmbed, DecoderKind, PayloadDecoder, PlainDecoder,
    ProviderCodesDecoder, ShiftCipherDecoder,
};
pub use extractor::{DirectMediaExtractor, EmbedExtractor, EmbedPassthrough, ExtractorChain};
pub use rewrite::DomainAliases;

use crate::document::{Pattern, Sel};
use crate::fetch::{FetchRequest, Fetcher};
use crate::listing::normalize_url;
use crate::model::{ContainerType, Quality, StreamDescriptor, StreamSet};
use crate::template::Vars;

fn default_candidates() -> Vec<CandidateSource> {
    vec![CandidateSource::default()]
}

fn default_hop_selector() -> Sel {
    Sel::parse("iframe").expect("static selector")
}

fn default_hop_attr() -> String {
    "src".to_string()
}

fn default_candidate_timeout() -> u64 {
    30
}

fn default_max_hops() -> u32 {
    1
}

fn default_expiry_margin() -> u64 {
    300
}

static EXPIRES: Lazy<Regex> = Lazy::new(|| Regex::new(r"[?&]expires=(\d+)").expect("static regex"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    #[serde(default = "default_candidates")]
    pub candidates: Vec<CandidateSource>,
    /// Applied to candidates whose source names no decoder.
    #[serde(default)]
    pub decoder: DecoderKind,
    /// Extra `scheme://host` aliases, merged over the built-in table.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    /// Referer handed to extractors; `{base}` and `{url}` are available.
    /// Defaults to the episode page.
    #[serde(default)]
    pub referer: Option<String>,
    /// Where a hop page keeps the real embed.
    #[serde(default = "default_hop_selector")]
    pub hop_selector: Sel,
    #[serde(default = "default_hop_attr")]
    pub hop_attr: String,
    /// Tried on a hop page before `hop_selector`, first match wins. Capture
    /// group 1, or the whole match, is the next URL; `\/` is unescaped.
    #[serde(default)]
    pub hop_patterns: Vec<Pattern>,
    /// Pages followed from one hop candidate. Following stops early at a
    /// direct media URL.
    #[serde(default = "default_max_hops")]
    pub max_hops: u32,
    /// Streams whose `expires=` timestamp falls within this many seconds
    /// are dropped.
    #[serde(default = "default_expiry_margin")]
    pub expiry_margin_secs: u64,
    /// Headers the player must send with every stream. `{referer}` is the
    /// page that embedded the stream, `{origin}` its origin; `{embed}`,
    /// `{url}`, `{base}` and `{user_agent}` are also available.
    #[serde(default)]
    pub stream_headers: BTreeMap<String, String>,
    /// Upper bound for one embed, hop and extractor included.
    #[serde(default = "default_candidate_timeout")]
    pub candidate_timeout_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            candidates: default_candidates(),
            decoder: DecoderKind::default(),
            aliases: BTreeMap::new(),
            referer: None,
            hop_selector: default_hop_selector(),
            hop_attr: default_hop_attr(),
            hop_patterns: Vec::new(),
            max_hops: default_max_hops(),
            expiry_margin_secs: default_expiry_margin(),
            stream_headers: BTreeMap::new(),
            candidate_timeout_secs: default_candidate_timeout(),
        }
    }
}

/// Where a decoded embed points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedTarget {
    Url(String),
    /// Player page whose iframe is the embed.
    Hop(String),
}

/// A decoded candidate, ready for delegation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Embed {
    pub label: String,
    pub target: EmbedTarget,
    pub quality: Quality,
}

/// Decode every candidate. Failures drop only the candidate concerned.
pub fn decode_candidates(candidates: &[Candidate], default: &DecoderKind) -> Vec<Embed> {
    let mut embeds = Vec::new();
    for candidate in candidates {
        if let Some(hop) = &candidate.hop {
            embeds.push(Embed {
                label: candidate.label.clone(),
                target: EmbedTarget::Hop(hop.clone()),
                quality: Quality::from_name(&candidate.label),
            });
            continue;
        }

        let decoder = candidate.decoder.as_ref().unwrap_or(default).build();
        match decoder.decode(&candidate.payload) {
            Ok(decoded) => embeds.extend(decoded.into_iter().map(|d| {
                let label = match &d.label {
                    Some(extra) => format!("{} {extra}", candidate.label),
                    None => candidate.label.clone(),
                };
                let quality = match d.quality {
                    Quality::Unknown => Quality::from_name(&candidate.label),
                    known => known,
                };
                Embed {
                    label,
                    target: EmbedTarget::Url(scheme_relative(d.url)),
                    quality,
                }
            })),
            Err(err) => warn!(
                label = %candidate.label,
                decoder = decoder.name(),
                version = decoder.version(),
                error = %err,
                "Dropping undecodable candidate"
            ),
        }
    }
    embeds
}

fn scheme_relative(url: String) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url
    }
}

/// Run `resolve` over `items` with at most `limit` in flight, each bounded by
/// `per_item`. Results keep input order; failures and timeouts are logged
/// and left out. Subtitle tracks are collected into the set, once per URL.
pub async fn aggregate_ordered<I, F, Fut>(items: Vec<I>, limit: usize, per_item: Duration, resolve: F) -> StreamSet
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = anyhow::Result<Vec<StreamDescriptor>>>,
{
    let results: Vec<_> = stream::iter(items.into_iter().enumerate())
        .map(|(index, item)| {
            let fut = resolve(item);
            async move { (index, tokio::time::timeout(per_item, fut).await) }
        })
        .buffered(limit.max(1))
        .collect()
        .await;

    let mut set = StreamSet::default();
    for (index, outcome) in results {
        match outcome {
            Ok(Ok(streams)) => {
                for stream in streams {
                    for track in &stream.subtitles {
                        set.push_subtitle(track.clone());
                    }
                    set.streams.push(stream);
                }
            }
            Ok(Err(err)) => warn!(index, error = %err, "Embed failed"),
            Err(_) => warn!(index, ?per_item, "Embed timed out"),
        }
    }
    set
}

/// `true` when `url` carries an `expires=` timestamp earlier than
/// `now + margin` (both in Unix seconds).
fn expires_within(url: &str, now: u64, margin: u64) -> bool {
    EXPIRES
        .captures(url)
        .and_then(|c| c[1].parse::<u64>().ok())
        .is_some_and(|expires| expires < now.saturating_add(margin))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

fn origin_of(url: &str) -> String {
    Url::parse(url).map_or_else(|_| url.to_string(), |u| u.origin().ascii_serialization())
}

/// Where a hop chain ended.
struct HopEnd {
    url: String,
    /// The page that embedded `url`.
    page: String,
}

struct EmbedContext<'a> {
    fetcher: &'a Fetcher,
    config: &'a LinkConfig,
    aliases: DomainAliases,
    extractor: &'a dyn EmbedExtractor,
    page_url: &'a str,
    referer: String,
    vars: Vars,
}

impl EmbedContext<'_> {
    fn next_hop(&self, body: &str) -> Option<String> {
        let by_pattern = self.config.hop_patterns.iter().find_map(|p| {
            let caps = p.regex().captures(body)?;
            caps.get(1)
                .or_else(|| caps.get(0))
                .map(|m| m.as_str().replace("\\/", "/"))
        });
        by_pattern.or_else(|| {
            let doc = crate::document::Document::from_html(body);
            doc.select_first(&self.config.hop_selector)
                .and_then(|n| n.attr(&self.config.hop_attr))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
    }

    /// Follow player pages from `page` until a media URL or `max_hops`.
    async fn hop(&self, page: &str) -> anyhow::Result<HopEnd> {
        let max_hops = self.config.max_hops.max(1);
        let mut current = Url::parse(self.page_url)
            .and_then(|base| base.join(page))
            .with_context(|| format!("hop page {page}"))?
            .to_string();
        let mut referer = self.page_url.to_string();
        let mut depth = 0;

        loop {
            depth += 1;
            let response = self
                .fetcher
                .fetch(&FetchRequest::get(current.as_str()).referer(referer.clone()))
                .await?;
            let base = Url::parse(&response.url).with_context(|| format!("hop page url {}", response.url))?;
            let next = self
                .next_hop(&response.body)
                .and_then(|s| normalize_url(&s, &base))
                .ok_or_else(|| anyhow!("no embed on hop page {current}"))?;
            debug!(depth, page = %current, %next, "Hop followed");

            if depth >= max_hops || ContainerType::from_url(&next) != ContainerType::Other {
                return Ok(HopEnd { url: next, page: current });
            }
            referer = std::mem::replace(&mut current, next);
        }
    }

    async fn resolve(&self, embed: Embed) -> anyhow::Result<Vec<StreamDescriptor>> {
        let (url, referer) = match embed.target {
            EmbedTarget::Url(url) => (url, self.referer.clone()),
            EmbedTarget::Hop(page) => {
                let end = self.hop(&page).await?;
                let referer = if self.config.referer.is_some() {
                    self.referer.clone()
                } else {
                    end.page
                };
                (end.url, referer)
            }
        };
        let url = self.aliases.rewrite(&url);
        debug!(label = %embed.label, %url, "Delegating embed");

        let mut streams = self.extractor.resolve_embed(&url, Some(&referer)).await?;

        let now = unix_now();
        streams.retain(|s| {
            let stale = expires_within(&s.url, now, self.config.expiry_margin_secs);
            if stale {
                debug!(url = %s.url, "Dropping stream about to expire");
            }
            !stale
        });

        let vars = self
            .vars
            .clone()
            .with("embed", url.as_str())
            .with("origin", origin_of(&referer))
            .with("referer", referer.as_str());
        for stream in &mut streams {
            if stream.source_label.is_empty() {
                stream.source_label.clone_from(&embed.label);
            }
            if stream.quality == Quality::Unknown {
                stream.quality = embed.quality;
            }
            for (name, template) in &self.config.stream_headers {
                stream
                    .extra_headers
                    .entry(name.clone())
                    .or_insert_with(|| vars.fill(template));
            }
        }
        Ok(streams)
    }
}

/// Resolve an episode `token` to streams. Never fails: a missing page, no
/// candidates or all candidates failing all give an empty set.
#[instrument(skip(fetcher, config, base, extractor), fields(token = %token))]
pub async fn resolve_links(
    fetcher: &Fetcher,
    config: &LinkConfig,
    base: &Url,
    token: &str,
    extractor: &dyn EmbedExtractor,
) -> StreamSet {
    let page = match fetcher.get(token).await {
        Ok(page) => page,
        Err(err) => {
            warn!(error = %err, "Episode page unavailable");
            return StreamSet::default();
        }
    };

    let vars = Vars::new().with("base", base.as_str()).with("url", token);
    let candidates = {
        let doc = page.document();
        locate(&doc, &config.candidates, &vars)
    };
    let embeds = decode_candidates(&candidates, &config.decoder);
    if embeds.is_empty() {
        debug!("No playable candidates");
        return StreamSet::default();
    }

    let ctx = EmbedContext {
        fetcher,
        config,
        aliases: DomainAliases::with_extra(&config.aliases),
        extractor,
        page_url: token,
        referer: config
            .referer
            .as_ref()
            .map_or_else(|| token.to_string(), |t| vars.fill(t)),
        vars: vars.clone().with("user_agent", fetcher.user_agent()),
    };
    let ctx = &ctx;
    let set = aggregate_ordered(
        embeds,
        fetcher.settings().max_concurrency,
        Duration::from_secs(config.candidate_timeout_secs),
        move |embed| ctx.resolve(embed),
    )
    .await;

    debug!(streams = set.streams.len(), subtitles = set.subtitles.len(), "Links resolved");
    set
}
