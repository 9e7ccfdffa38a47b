//! Detail resolution: one title page (plus any episode AJAX calls) into a
//! [`MediaDetail`] with episodes in ascending order.

pub mod episodes;
pub mod pagination;
pub mod seasons;

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::document::{find_year, Document, Sel};
use crate::error::{ParseError, Result};
use crate::fetch::{FetchRequest, Fetcher, SessionGate};
use crate::listing::{extract_listing, infer_kind, normalize_url, poster_of, KindMarkers, ListingSelectors};
use crate::model::{EpisodeRef, MediaDetail, MediaKind, ShowStatus};

pub use episodes::{EpisodePlan, EpisodeSource, InlineEpisodes, ScriptArrayEpisodes};
pub use pagination::{paginate, PageOutcome, Paginated, PaginatedEpisodes, PaginationState};
pub use seasons::SeasonPostEpisodes;

/// Natural order of a site's episode list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeOrder {
    #[default]
    Ascending,
    Descending,
}

fn default_poster_attrs() -> Vec<String> {
    vec!["data-src".to_string(), "src".to_string()]
}

fn default_background_attrs() -> Vec<String> {
    vec!["data-src".to_string(), "src".to_string(), "style".to_string()]
}

fn default_status_map() -> BTreeMap<String, ShowStatus> {
    [
        ("en emision", ShowStatus::Ongoing),
        ("en emisión", ShowStatus::Ongoing),
        ("estreno", ShowStatus::Ongoing),
        ("finalizado", ShowStatus::Completed),
        ("concluido", ShowStatus::Completed),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Where the fields of a title page live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailSelectors {
    pub title: Sel,
    #[serde(default)]
    pub title_attr: Option<String>,
    #[serde(default)]
    pub poster: Option<Sel>,
    #[serde(default = "default_poster_attrs")]
    pub poster_attrs: Vec<String>,
    #[serde(default)]
    pub background: Option<Sel>,
    /// `style` is understood as a CSS `url(...)`.
    #[serde(default = "default_background_attrs")]
    pub background_attrs: Vec<String>,
    #[serde(default)]
    pub plot: Option<Sel>,
    #[serde(default)]
    pub tags: Option<Sel>,
    #[serde(default)]
    pub year: Option<Sel>,
    #[serde(default)]
    pub status: Option<Sel>,
    /// Lowercase substrings of the status text.
    #[serde(default = "default_status_map")]
    pub status_map: BTreeMap<String, ShowStatus>,
    /// Type badge, matched against `kinds`.
    #[serde(default)]
    pub kind: Option<Sel>,
    #[serde(flatten)]
    pub kinds: KindMarkers,
    #[serde(default)]
    pub recommendations: Option<ListingSelectors>,
    #[serde(default)]
    pub episodes: EpisodeSource,
    #[serde(default)]
    pub order: EpisodeOrder,
}

static CSS_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"url\(\s*['"]?([^'")]+)['"]?\s*\)"#).expect("static regex"));

fn background_of(doc: &Document, sel: &DetailSelectors, base: &Url) -> Option<String> {
    let node = doc.select_first(sel.background.as_ref()?)?;
    sel.background_attrs.iter().find_map(|attr| {
        let value = node.attr(attr)?;
        let raw = if attr == "style" {
            CSS_URL.captures(value)?.get(1)?.as_str()
        } else {
            value
        };
        normalize_url(raw, base)
    })
}

fn status_of(text: &str, map: &BTreeMap<String, ShowStatus>) -> ShowStatus {
    let lower = text.to_lowercase();
    map.iter()
        .find(|(needle, _)| lower.contains(needle.as_str()))
        .map_or(ShowStatus::Unknown, |(_, status)| *status)
}

/// Everything on the title page except the episodes.
pub fn extract_metadata(
    doc: &Document,
    sel: &DetailSelectors,
    url: &str,
    base: &Url,
) -> std::result::Result<MediaDetail, ParseError> {
    let title = doc
        .select_first(&sel.title)
        .and_then(|n| n.value_of(sel.title_attr.as_deref()))
        .ok_or_else(|| ParseError::MissingField("title".into()))?;

    let poster_url = sel.poster.as_ref().and_then(|p| {
        let node = doc.select_first(p)?;
        poster_of(&node, None, &sel.poster_attrs, base)
    });
    let text_of = |s: &Option<Sel>| {
        s.as_ref()
            .and_then(|s| doc.select_first(s))
            .map(|n| n.text())
            .filter(|t| !t.is_empty())
    };
    let tags: Vec<String> = sel
        .tags
        .as_ref()
        .map(|t| {
            doc.select(t)
                .iter()
                .map(|n| n.text())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let badge = text_of(&sel.kind);
    let recommendations = sel
        .recommendations
        .as_ref()
        .map(|r| extract_listing(doc, r, base).items)
        .unwrap_or_default();

    Ok(MediaDetail {
        url: url.to_string(),
        kind: infer_kind(url, badge.as_deref(), &sel.kinds),
        poster_url,
        background_url: background_of(doc, sel, base),
        plot: text_of(&sel.plot),
        tags,
        year: text_of(&sel.year).and_then(|y| find_year(&y)),
        status: text_of(&sel.status).map_or(ShowStatus::Unknown, |s| status_of(&s, &sel.status_map)),
        title,
        episodes: Vec::new(),
        recommendations,
        partial: false,
    })
}

/// Sort by (season, episode) when every episode is numbered; otherwise undo a
/// descending natural order.
pub fn normalize_order(mut episodes: Vec<EpisodeRef>, order: EpisodeOrder) -> Vec<EpisodeRef> {
    if !episodes.is_empty() && episodes.iter().all(|e| e.episode_number.is_some()) {
        episodes.sort_by_key(|e| (e.season_number.unwrap_or(0), e.episode_number.unwrap_or(0)));
    } else if order == EpisodeOrder::Descending {
        episodes.reverse();
    }
    episodes
}

/// Fetch `url` and resolve it to a full detail.
///
/// Episode failures after the title page degrade to `partial = true`; only a
/// failed title page or a page without a title is an error.
#[instrument(skip(fetcher, selectors, base), fields(url = %url))]
pub async fn resolve_detail(
    fetcher: &Fetcher,
    selectors: &DetailSelectors,
    base: &Url,
    url: &str,
) -> Result<MediaDetail> {
    let page = fetcher.fetch(&FetchRequest::get(url)).await?;

    let (mut detail, plan) = {
        let doc = page.document();
        let detail = extract_metadata(&doc, selectors, url, base)?;
        let plan = selectors.episodes.plan(&doc, url, base);
        (detail, plan)
    };

    let (episodes, partial) = match plan {
        EpisodePlan::Ready(episodes) => (episodes, false),
        EpisodePlan::Unavailable(reason) => {
            warn!(%reason, "Episode list unavailable");
            (Vec::new(), true)
        }
        EpisodePlan::Paginated { config, plan } => {
            let gate = match plan.seed_token.clone() {
                Some(token) => SessionGate::with_token(plan.token_ttl, token),
                None => SessionGate::new(plan.token_ttl),
            };
            let result = pagination::run(fetcher, config, &plan, &gate).await;
            (result.episodes, result.truncated)
        }
        EpisodePlan::Seasons { config, plan } => {
            let result = seasons::run(fetcher, config, &plan).await;
            (result.episodes, result.truncated)
        }
    };

    let episodes = if episodes.is_empty() && detail.kind == MediaKind::Movie {
        vec![EpisodeRef {
            display_name: detail.title.clone(),
            episode_number: None,
            season_number: None,
            poster_url: detail.poster_url.clone(),
            load_token: url.to_string(),
        }]
    } else {
        episodes
    };

    detail.episodes = normalize_order(episodes, selectors.order);
    detail.partial = partial;

    if partial {
        info!(episodes = detail.episodes.len(), "Returning partial episode list");
    } else {
        debug!(episodes = detail.episodes.len(), "Detail resolved");
    }
    Ok(detail)
}
