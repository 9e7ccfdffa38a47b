//! Series whose episodes come from one POST per season (HDFull-style).
//!
//! The title page carries a show id inside a script (`var sid = '...'`) and
//! one element per season. Season requests fan out concurrently, bounded by
//! `max_concurrency`, and are joined back in season order.

use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::episodes::{number_of, page_vars};
use super::pagination::Paginated;
use crate::document::{between, first_number, Document, Pattern, Sel};
use crate::error::ResolveError;
use crate::fetch::{FetchRequest, Fetcher};
use crate::model::EpisodeRef;
use crate::template::Vars;

fn default_number_field() -> String {
    "/episode".to_string()
}

fn default_name_template() -> String {
    "Episodio {n}".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonPostEpisodes {
    /// One node per season.
    pub season_selector: Sel,
    /// Attribute holding the season label; node text when absent.
    #[serde(default)]
    pub season_attr: Option<String>,
    /// First capture group is the season number; defaults to the first
    /// number in the label.
    #[serde(default)]
    pub season_regex: Option<Pattern>,
    pub sid_start: String,
    pub sid_end: String,
    /// `{base}`, `{url}`, `{slug}`, `{sid}` and `{season}` are available.
    pub endpoint: String,
    #[serde(default)]
    pub form: BTreeMap<String, String>,
    #[serde(default)]
    pub items_pointer: String,
    #[serde(default = "default_number_field")]
    pub number_field: String,
    #[serde(default)]
    pub title_field: Option<String>,
    #[serde(default = "default_name_template")]
    pub name_template: String,
    /// `{n}` is the episode number, `{season}` the season.
    pub link_template: String,
}

#[derive(Debug, Clone)]
pub struct SeasonPlan {
    pub seasons: Vec<u32>,
    pub vars: Vars,
    pub page_url: String,
}

impl SeasonPostEpisodes {
    pub(crate) fn plan(&self, doc: &Document, url: &str, base: &Url) -> Result<SeasonPlan, String> {
        let sid = between(doc.raw(), &self.sid_start, &self.sid_end)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| format!("show id marker `{}` not found", self.sid_start))?;

        let mut seasons: Vec<u32> = Vec::new();
        for node in doc.select(&self.season_selector) {
            let Some(label) = node.value_of(self.season_attr.as_deref()) else {
                continue;
            };
            let number = match &self.season_regex {
                Some(re) => re
                    .regex()
                    .captures(&label)
                    .and_then(|c| c.get(1))
                    .and_then(|m| m.as_str().trim().parse().ok()),
                None => first_number(&label),
            };
            if let Some(n) = number {
                if !seasons.contains(&n) {
                    seasons.push(n);
                }
            }
        }

        Ok(SeasonPlan {
            seasons,
            vars: page_vars(url, base).with("sid", sid),
            page_url: url.to_string(),
        })
    }

    /// Map one season response to episodes.
    pub fn parse_season(&self, value: &Value, season: u32, vars: &Vars) -> Vec<EpisodeRef> {
        let items = if self.items_pointer.is_empty() {
            Some(value)
        } else {
            value.pointer(&self.items_pointer)
        };
        let Some(items) = items.and_then(Value::as_array) else {
            return Vec::new();
        };

        items
            .iter()
            .map(|item| {
                let n = item.pointer(&self.number_field).and_then(number_of);
                let mut vars = vars.clone();
                if let Some(n) = n {
                    vars.set("n", n.to_string());
                }
                let display_name = self
                    .title_field
                    .as_ref()
                    .and_then(|f| item.pointer(f))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map_or_else(|| vars.fill(&self.name_template), str::to_string);
                EpisodeRef {
                    display_name,
                    episode_number: n,
                    season_number: Some(season),
                    poster_url: None,
                    load_token: vars.fill(&self.link_template),
                }
            })
            .collect()
    }
}

async fn fetch_season(
    fetcher: &Fetcher,
    cfg: &SeasonPostEpisodes,
    plan: &SeasonPlan,
    season: u32,
) -> Result<Vec<EpisodeRef>, ResolveError> {
    let vars = plan.vars.clone().with("season", season.to_string());
    let request = FetchRequest::post(vars.fill(&cfg.endpoint))
        .form(vars.fill_form(&cfg.form))
        .referer(plan.page_url.clone())
        .xhr()
        .idempotent(true);
    let response = fetcher.fetch(&request).await?;
    let value = response.document().json()?;
    Ok(cfg.parse_season(&value, season, &vars))
}

/// Fetch every season concurrently and join in season order.
pub(crate) async fn run(fetcher: &Fetcher, cfg: &SeasonPostEpisodes, plan: &SeasonPlan) -> Paginated {
    let limit = fetcher.settings().max_concurrency.max(1);
    let results: Vec<(u32, Result<Vec<EpisodeRef>, ResolveError>)> = stream::iter(plan.seasons.iter().copied())
        .map(|season| async move { (season, fetch_season(fetcher, cfg, plan, season).await) })
        .buffered(limit)
        .collect()
        .await;

    let mut out = Paginated::default();
    for (season, result) in results {
        match result {
            Ok(episodes) => {
                debug!(season, episodes = episodes.len(), "Season fetched");
                out.pages += 1;
                out.episodes.extend(episodes);
            }
            Err(err) => {
                warn!(season, error = %err, "Season request failed");
                out.truncated = true;
            }
        }
    }
    out
}
