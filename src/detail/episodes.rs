//! Episode sources: where a title page keeps its episode list.
//!
//! Planning runs against the parsed title page and produces an owned
//! [`EpisodePlan`]: either the finished list or what the async stages need
//! for their follow-up requests. The document never crosses an `.await`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::pagination::{PaginatedEpisodes, PaginationPlan};
use super::seasons::{SeasonPlan, SeasonPostEpisodes};
use crate::document::{between, first_number, parse_loose_json, Document, Sel};
use crate::listing::{normalize_url, poster_of};
use crate::model::EpisodeRef;
use crate::template::{slug_of, Vars};

fn default_link_attr() -> String {
    "href".to_string()
}

fn default_poster_attrs() -> Vec<String> {
    vec!["data-src".to_string(), "src".to_string()]
}

fn default_name_template() -> String {
    "Episodio {n}".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EpisodeSource {
    /// Titles without episodes: movies, live channels.
    #[default]
    None,
    Inline(InlineEpisodes),
    ScriptArray(ScriptArrayEpisodes),
    Paginated(PaginatedEpisodes),
    SeasonPosts(SeasonPostEpisodes),
}

/// Episodes listed as links in the title page itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineEpisodes {
    pub item: Sel,
    /// Defaults to the item node.
    #[serde(default)]
    pub link: Option<Sel>,
    #[serde(default = "default_link_attr")]
    pub link_attr: String,
    #[serde(default)]
    pub name: Option<Sel>,
    /// Text holding the episode number. Falls back to the name, then the link.
    #[serde(default)]
    pub number: Option<Sel>,
    #[serde(default)]
    pub season: Option<Sel>,
    #[serde(default)]
    pub poster: Option<Sel>,
    #[serde(default = "default_poster_attrs")]
    pub poster_attrs: Vec<String>,
}

/// Episode numbers from a JS array literal between two markers, e.g.
/// `var episodes = [[12,3456],[11,3455]];`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptArrayEpisodes {
    pub start: String,
    pub end: String,
    /// `{base}`, `{url}`, `{slug}` and `{n}` are available.
    pub url_template: String,
    #[serde(default)]
    pub image_template: Option<String>,
    #[serde(default = "default_name_template")]
    pub name_template: String,
    /// Position of the number inside each inner array.
    #[serde(default)]
    pub number_index: usize,
}

/// Result of planning against the title page.
#[derive(Debug)]
pub enum EpisodePlan<'a> {
    Ready(Vec<EpisodeRef>),
    /// The source is configured but the page lacks what it needs.
    Unavailable(String),
    Paginated {
        config: &'a PaginatedEpisodes,
        plan: PaginationPlan,
    },
    Seasons {
        config: &'a SeasonPostEpisodes,
        plan: SeasonPlan,
    },
}

/// Template variables every episode source shares.
pub(crate) fn page_vars(url: &str, base: &Url) -> Vars {
    Vars::new()
        .with("base", base.as_str())
        .with("url", url.trim_end_matches('/'))
        .with("slug", slug_of(url))
}

impl EpisodeSource {
    pub fn plan(&self, doc: &Document, url: &str, base: &Url) -> EpisodePlan<'_> {
        match self {
            Self::None => EpisodePlan::Ready(Vec::new()),
            Self::Inline(cfg) => EpisodePlan::Ready(cfg.extract(doc, base)),
            Self::ScriptArray(cfg) => EpisodePlan::Ready(cfg.extract(doc, url, base)),
            Self::Paginated(cfg) => match cfg.plan(doc, url, base) {
                Ok(plan) => EpisodePlan::Paginated { config: cfg, plan },
                Err(reason) => EpisodePlan::Unavailable(reason),
            },
            Self::SeasonPosts(cfg) => match cfg.plan(doc, url, base) {
                Ok(plan) => EpisodePlan::Seasons { config: cfg, plan },
                Err(reason) => EpisodePlan::Unavailable(reason),
            },
        }
    }
}

impl InlineEpisodes {
    pub fn extract(&self, doc: &Document, base: &Url) -> Vec<EpisodeRef> {
        let mut skipped = 0usize;
        let episodes: Vec<EpisodeRef> = doc
            .select(&self.item)
            .into_iter()
            .filter_map(|node| {
                let link_node = match &self.link {
                    Some(sel) => node.select_first(sel),
                    None => Some(node),
                };
                let url = link_node
                    .and_then(|n| n.attr(&self.link_attr))
                    .and_then(|href| normalize_url(href, base));
                let Some(url) = url else {
                    skipped += 1;
                    return None;
                };

                let name = self
                    .name
                    .as_ref()
                    .and_then(|s| node.select_first(s))
                    .map(|n| n.text())
                    .filter(|t| !t.is_empty());
                let number = self
                    .number
                    .as_ref()
                    .and_then(|s| node.select_first(s))
                    .and_then(|n| first_number(&n.text()))
                    .or_else(|| name.as_deref().and_then(first_number))
                    .or_else(|| trailing_number(&url));
                let season = self
                    .season
                    .as_ref()
                    .and_then(|s| node.select_first(s))
                    .and_then(|n| first_number(&n.text()));

                Some(EpisodeRef {
                    display_name: name.unwrap_or_else(|| match number {
                        Some(n) => format!("Episodio {n}"),
                        None => url.clone(),
                    }),
                    episode_number: number,
                    season_number: season,
                    poster_url: poster_of(&node, self.poster.as_ref(), &self.poster_attrs, base),
                    load_token: url,
                })
            })
            .collect();

        if skipped > 0 {
            debug!(skipped, "Skipped episode nodes without link");
        }
        episodes
    }
}

/// `https://x.com/ver/naruto-220` -> 220.
fn trailing_number(url: &str) -> Option<u32> {
    let tail = slug_of(url);
    let digits: String = tail
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// JSON value as an episode number: `12`, `"12"`, `12.0`.
pub(crate) fn number_of(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok().or_else(|| first_number(s)),
        _ => None,
    }
}

impl ScriptArrayEpisodes {
    pub fn extract(&self, doc: &Document, url: &str, base: &Url) -> Vec<EpisodeRef> {
        let Some(inner) = between(doc.raw(), &self.start, &self.end) else {
            debug!(marker = %self.start, "Episode array marker not found");
            return Vec::new();
        };
        // A start marker that swallowed the opening bracket needs it back.
        let text = if self.start.trim_end().ends_with('[') {
            format!("[{inner}]")
        } else {
            inner.to_string()
        };
        let items: Vec<Value> = match parse_loose_json(&text) {
            Ok(items) => items,
            Err(e) => {
                debug!(error = %e, "Episode array is not parseable");
                return Vec::new();
            }
        };

        let vars = page_vars(url, base);
        items
            .iter()
            .filter_map(|item| match item {
                Value::Array(parts) => parts.get(self.number_index).and_then(number_of),
                other => number_of(other),
            })
            .map(|n| {
                let vars = vars.clone().with("n", n.to_string());
                EpisodeRef {
                    display_name: vars.fill(&self.name_template),
                    episode_number: Some(n),
                    season_number: None,
                    poster_url: self.image_template.as_ref().map(|t| vars.fill(t)),
                    load_token: vars.fill(&self.url_template),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://x.com/").unwrap()
    }

    #[test]
    fn script_array_builds_links_from_numbers() {
        let doc = Document::from_html(
            r#"<script>var anime_info = ["1","Naruto","naruto"];
               var episodes = [[3,101],[2,100],[1,99]];</script>"#,
        );
        let cfg: ScriptArrayEpisodes = toml::from_str(
            r#"
            start = "var episodes = ["
            end = "];"
            url_template = "{base}ver/{slug}-{n}"
            "#,
        )
        .unwrap();
        let eps = cfg.extract(&doc, "https://x.com/anime/naruto", &base());
        assert_eq!(eps.len(), 3);
        assert_eq!(eps[0].load_token, "https://x.com/ver/naruto-3");
        assert_eq!(eps[0].display_name, "Episodio 3");
        assert_eq!(eps[2].episode_number, Some(1));
    }

    #[test]
    fn script_array_without_marker_is_empty() {
        let doc = Document::from_html("<script>var x = 1;</script>");
        let cfg = ScriptArrayEpisodes {
            start: "var episodes = [".into(),
            end: "];".into(),
            url_template: "{url}/{n}".into(),
            image_template: None,
            name_template: default_name_template(),
            number_index: 0,
        };
        assert!(cfg.extract(&doc, "https://x.com/a", &base()).is_empty());
    }

    #[test]
    fn inline_episodes_with_number_fallbacks() {
        let doc = Document::from_html(
            r#"<ul id="episodes">
                 <li><a href="/ver/naruto-1"><h3>Capítulo 1</h3></a></li>
                 <li><a href="/ver/naruto-2"><h3>El regreso</h3></a></li>
                 <li><a><h3>Roto</h3></a></li>
               </ul>"#,
        );
        let cfg: InlineEpisodes = toml::from_str(
            r#"
            item = "ul#episodes li"
            link = "a"
            name = "h3"
            "#,
        )
        .unwrap();
        let eps = cfg.extract(&doc, &base());
        assert_eq!(eps.len(), 2);
        assert_eq!(eps[0].episode_number, Some(1));
        assert_eq!(eps[1].display_name, "El regreso");
        assert_eq!(eps[1].episode_number, Some(2));
        assert_eq!(eps[1].load_token, "https://x.com/ver/naruto-2");
    }

    #[test]
    fn numbers_from_json_values() {
        assert_eq!(number_of(&serde_json::json!(12)), Some(12));
        assert_eq!(number_of(&serde_json::json!("7")), Some(7));
        assert_eq!(number_of(&serde_json::json!("Episodio 9")), Some(9));
        assert_eq!(number_of(&serde_json::json!(null)), None);
    }

    #[test]
    fn source_deserializes_from_tagged_table() {
        let source: EpisodeSource = toml::from_str(
            r#"
            type = "inline"
            item = "li a"
            "#,
        )
        .unwrap();
        assert!(matches!(source, EpisodeSource::Inline(_)));
    }
}
