//! Paginated episode lists.
//!
//! [`PaginationState`] is the state machine; [`paginate`] drives it with any
//! page-fetching closure. [`PaginatedEpisodes`] is the descriptor for AJAX
//! endpoints (Jkanime-style `ajax/episodes/{id}/{page}`, DoramasYT-style
//! token-guarded POSTs) built on top of it.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::episodes::{number_of, page_vars};
use crate::document::{Document, Pattern, Sel};
use crate::error::{FetchError, ParseError, ResolveError};
use crate::fetch::{FetchRequest, Fetcher, HttpMethod, SessionGate, SessionTokenSource};
use crate::listing::normalize_url;
use crate::model::EpisodeRef;
use crate::template::Vars;

/// Safety bound against endpoints that never stop.
pub const DEFAULT_MAX_PAGES: u32 = 200;

/// What one page contributed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageOutcome {
    pub episodes: Vec<EpisodeRef>,
    /// `Some(false)` when the response says there is no next page.
    pub has_next: Option<bool>,
}

/// Final result of a pagination run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paginated {
    pub episodes: Vec<EpisodeRef>,
    /// Pages that returned episodes.
    pub pages: u32,
    /// A page failed; `episodes` holds everything before it.
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationState {
    pub page: u32,
    pub accumulated: Vec<EpisodeRef>,
    pub done: bool,
    pub truncated: bool,
    /// Pages that contributed episodes.
    pub pages: u32,
    max_pages: u32,
}

impl PaginationState {
    pub fn new(max_pages: u32) -> Self {
        Self {
            page: 1,
            accumulated: Vec::new(),
            done: false,
            truncated: false,
            pages: 0,
            max_pages: max_pages.max(1),
        }
    }

    /// Apply a fetched page.
    pub fn advance(&mut self, outcome: PageOutcome) {
        if outcome.episodes.is_empty() {
            self.done = true;
            return;
        }
        self.accumulated.extend(outcome.episodes);
        self.pages += 1;
        if outcome.has_next == Some(false) {
            self.done = true;
        } else if self.page >= self.max_pages {
            warn!(max_pages = self.max_pages, "Pagination hit the page bound");
            self.done = true;
        } else {
            self.page += 1;
        }
    }

    /// Stop after a failed page, keeping pages `1..page`.
    pub fn fail(&mut self) {
        self.truncated = true;
        self.done = true;
    }

    pub fn finish(self) -> Paginated {
        Paginated {
            episodes: self.accumulated,
            pages: self.pages,
            truncated: self.truncated,
        }
    }
}

/// Drive [`PaginationState`] with `fetch_page(page)` until done.
///
/// Never fails: an error on page N keeps pages 1..N-1 and sets `truncated`.
pub async fn paginate<F, Fut>(max_pages: u32, mut fetch_page: F) -> Paginated
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PageOutcome, ResolveError>>,
{
    let mut state = PaginationState::new(max_pages);
    while !state.done {
        match fetch_page(state.page).await {
            Ok(outcome) => {
                debug!(page = state.page, episodes = outcome.episodes.len(), "Episode page fetched");
                state.advance(outcome);
            }
            Err(err) => {
                warn!(page = state.page, error = %err, "Episode page failed, truncating");
                state.fail();
            }
        }
    }
    state.finish()
}

fn default_max_pages() -> u32 {
    DEFAULT_MAX_PAGES
}

fn default_name_template() -> String {
    "Episodio {n}".to_string()
}

fn default_number_field() -> String {
    "/number".to_string()
}

/// Episode list served by an AJAX endpoint, one request per page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedEpisodes {
    /// Endpoint with `{base}`, `{url}`, `{slug}`, `{id}` and `{page}`.
    /// Without `{page}` the endpoint is fetched once.
    #[serde(default)]
    pub url_template: Option<String>,
    /// Read the endpoint from an attribute instead, e.g. `data-ajax`.
    #[serde(default)]
    pub url_selector: Option<Sel>,
    #[serde(default)]
    pub url_attr: Option<String>,
    /// Where the title id lives: an attribute, or a regex over the raw page.
    #[serde(default)]
    pub id_selector: Option<Sel>,
    #[serde(default)]
    pub id_attr: Option<String>,
    #[serde(default)]
    pub id_regex: Option<Pattern>,
    #[serde(default)]
    pub method: HttpMethod,
    /// Form fields; values are templates like the URL.
    #[serde(default)]
    pub form: BTreeMap<String, String>,
    /// JSON body sent instead of the form. String leaves are templates;
    /// `{token}` is the session token, which also lands under its field.
    #[serde(default)]
    pub json: Option<Value>,
    #[serde(default)]
    pub token: Option<SessionTokenSource>,
    /// JSON pointer to the item array; empty means the body is the array.
    #[serde(default)]
    pub items_pointer: String,
    #[serde(default = "default_number_field")]
    pub number_field: String,
    #[serde(default)]
    pub name_field: Option<String>,
    #[serde(default = "default_name_template")]
    pub name_template: String,
    #[serde(default)]
    pub image_field: Option<String>,
    /// `{value}` is the image field, plus the page variables and `{n}`.
    #[serde(default)]
    pub image_template: Option<String>,
    /// Pointer to the "next page" marker; absent, null, false or `""` ends.
    #[serde(default)]
    pub next_pointer: Option<String>,
    /// Episode link template; `{n}` is the episode number.
    pub link_template: String,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

/// Owned inputs for a pagination run, taken from the title page.
#[derive(Debug, Clone)]
pub struct PaginationPlan {
    pub endpoint: String,
    pub vars: Vars,
    pub page_url: String,
    pub seed_token: Option<String>,
    pub token_ttl: Duration,
}

impl PaginatedEpisodes {
    pub(crate) fn plan(&self, doc: &Document, url: &str, base: &Url) -> Result<PaginationPlan, String> {
        let mut vars = page_vars(url, base);

        if let Some(id) = self.find_id(doc) {
            vars.set("id", id);
        } else if self.id_selector.is_some() || self.id_regex.is_some() {
            return Err("title id not found".into());
        }

        let endpoint = match (&self.url_selector, &self.url_template) {
            (Some(sel), _) => {
                let attr = self.url_attr.as_deref().unwrap_or("data-ajax");
                doc.select_first(sel)
                    .and_then(|n| n.attr(attr))
                    .and_then(|href| normalize_url(href, base))
                    .ok_or_else(|| format!("endpoint attribute `{attr}` not found"))?
            }
            (None, Some(template)) => vars.fill(template),
            (None, None) => return Err("no endpoint configured".into()),
        };

        let seed_token = match &self.token {
            Some(src) if src.page.is_none() => src.read(doc),
            _ => None,
        };

        Ok(PaginationPlan {
            endpoint,
            vars,
            page_url: url.to_string(),
            seed_token,
            token_ttl: self.token.as_ref().map_or(Duration::from_secs(300), SessionTokenSource::ttl),
        })
    }

    fn find_id(&self, doc: &Document) -> Option<String> {
        if let Some(sel) = &self.id_selector {
            let node = doc.select_first(sel)?;
            return node.value_of(self.id_attr.as_deref());
        }
        let re = self.id_regex.as_ref()?;
        let caps = re.regex().captures(doc.raw())?;
        caps.get(1)
            .or_else(|| caps.get(0))
            .map(|m| m.as_str().to_string())
    }

    /// Map one JSON page to episodes.
    pub fn parse_page(&self, value: &Value, plan: &PaginationPlan) -> PageOutcome {
        let items = if self.items_pointer.is_empty() {
            Some(value)
        } else {
            value.pointer(&self.items_pointer)
        };
        let items = items.and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();

        let episodes = items
            .iter()
            .map(|item| {
                let n = item.pointer(&self.number_field).and_then(number_of);
                let mut vars = plan.vars.clone();
                if let Some(n) = n {
                    vars.set("n", n.to_string());
                }
                let display_name = self
                    .name_field
                    .as_ref()
                    .and_then(|f| item.pointer(f))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map_or_else(|| vars.fill(&self.name_template), str::to_string);
                let image = self.image_field.as_ref().and_then(|f| item.pointer(f)).map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
                let poster_url = match (&self.image_template, image) {
                    (Some(t), Some(value)) => Some(vars.clone().with("value", value).fill(t)),
                    (Some(t), None) if n.is_some() => Some(vars.fill(t)),
                    (None, image) => image,
                    _ => None,
                };

                EpisodeRef {
                    display_name,
                    episode_number: n,
                    season_number: None,
                    poster_url,
                    load_token: vars.fill(&self.link_template),
                }
            })
            .collect();

        let has_next = if !self.paged(plan) {
            Some(false)
        } else {
            self.next_pointer.as_ref().map(|p| {
                value.pointer(p).is_some_and(|v| match v {
                    Value::Null => false,
                    Value::Bool(b) => *b,
                    Value::String(s) => !s.is_empty(),
                    _ => true,
                })
            })
        };

        PageOutcome { episodes, has_next }
    }

    fn paged(&self, plan: &PaginationPlan) -> bool {
        plan.endpoint.contains("{page}")
            || self.form.values().any(|v| v.contains("{page}"))
            || self.json.as_ref().is_some_and(|j| j.to_string().contains("{page}"))
    }

    fn request(&self, plan: &PaginationPlan, page: u32, token: Option<&(String, String)>) -> FetchRequest {
        let mut vars = plan.vars.clone().with("page", page.to_string());
        if let Some((_, value)) = token {
            vars.set("token", value.clone());
        }
        let url = vars.fill(&plan.endpoint);

        let request = FetchRequest::new(self.method, url)
            .referer(plan.page_url.clone())
            .xhr()
            // Page reads are safe to repeat even when sent as POST.
            .idempotent(true);

        if let Some(template) = &self.json {
            let mut body = vars.fill_json(template);
            if let (Some((field, value)), Value::Object(map)) = (token, &mut body) {
                map.entry(field.clone()).or_insert_with(|| Value::String(value.clone()));
            }
            return request.json(body);
        }

        let mut form = vars.fill_form(&self.form);
        if let Some((field, value)) = token {
            form.push((field.clone(), value.clone()));
        }
        if form.is_empty() {
            request
        } else {
            request.form(form)
        }
    }
}

async fn refresh_token(fetcher: &Fetcher, source: &SessionTokenSource, page_url: &str) -> Result<String, ResolveError> {
    let url = source.page.as_deref().unwrap_or(page_url);
    let response = fetcher.get(url).await?;
    let token = source.read(&response.document());
    token.ok_or_else(|| ParseError::MissingField(source.field.clone()).into())
}

async fn fetch_page(
    fetcher: &Fetcher,
    cfg: &PaginatedEpisodes,
    plan: &PaginationPlan,
    gate: &SessionGate,
    page: u32,
) -> Result<PageOutcome, ResolveError> {
    let mut retried_token = false;
    loop {
        let token = match &cfg.token {
            Some(src) => {
                let value = gate
                    .get_or_refresh(|| refresh_token(fetcher, src, &plan.page_url))
                    .await?;
                Some((src.field.clone(), value))
            }
            None => None,
        };

        match fetcher.fetch(&cfg.request(plan, page, token.as_ref())).await {
            Ok(response) => {
                let value = response.document().json()?;
                return Ok(cfg.parse_page(&value, plan));
            }
            // Laravel answers 419 once the CSRF token has expired.
            Err(FetchError::Status { status: 419, .. }) if token.is_some() && !retried_token => {
                debug!(page, "Session token rejected, refreshing");
                gate.invalidate().await;
                retried_token = true;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Run the pagination plan against the live endpoint.
pub(crate) async fn run(
    fetcher: &Fetcher,
    cfg: &PaginatedEpisodes,
    plan: &PaginationPlan,
    gate: &SessionGate,
) -> Paginated {
    paginate(cfg.max_pages, move |page| fetch_page(fetcher, cfg, plan, gate, page)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ep(n: u32) -> EpisodeRef {
        EpisodeRef {
            display_name: format!("Episodio {n}"),
            episode_number: Some(n),
            season_number: None,
            poster_url: None,
            load_token: format!("https://x.com/ep/{n}"),
        }
    }

    fn page_of(range: std::ops::RangeInclusive<u32>, has_next: Option<bool>) -> PageOutcome {
        PageOutcome {
            episodes: range.map(ep).collect(),
            has_next,
        }
    }

    #[tokio::test]
    async fn stops_on_next_page_signal() {
        let result = paginate(200, |page| async move {
            Ok(match page {
                1 => page_of(1..=20, Some(true)),
                2 => page_of(21..=25, Some(false)),
                _ => panic!("page {page} must not be requested"),
            })
        })
        .await;
        assert_eq!(result.episodes.len(), 25);
        assert_eq!(result.pages, 2);
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn stops_on_empty_page() {
        let result = paginate(200, |page| async move {
            Ok(if page <= 2 { page_of(1..=3, None) } else { PageOutcome::default() })
        })
        .await;
        assert_eq!(result.episodes.len(), 6);
        assert_eq!(result.pages, 2);
    }

    #[tokio::test]
    async fn failure_keeps_earlier_pages() {
        let result = paginate(200, |page| async move {
            match page {
                1 => Ok(page_of(1..=20, None)),
                2 => Ok(page_of(21..=40, None)),
                _ => Err(ResolveError::Fetch(FetchError::Timeout {
                    url: "https://x.com/ajax".into(),
                    elapsed: Duration::from_secs(15),
                })),
            }
        })
        .await;
        assert_eq!(result.episodes.len(), 40);
        assert_eq!(result.pages, 2);
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn page_bound_stops_endless_endpoints() {
        let result = paginate(5, |page| async move { Ok(page_of(page..=page, Some(true))) }).await;
        assert_eq!(result.episodes.len(), 5);
        assert_eq!(result.pages, 5);
        assert!(!result.truncated);
    }

    fn cfg(toml_src: &str) -> PaginatedEpisodes {
        toml::from_str(toml_src).unwrap()
    }

    fn plan(endpoint: &str) -> PaginationPlan {
        PaginationPlan {
            endpoint: endpoint.to_string(),
            vars: Vars::new()
                .with("base", "https://x.com/")
                .with("url", "https://x.com/naruto")
                .with("id", "42"),
            page_url: "https://x.com/naruto".into(),
            seed_token: None,
            token_ttl: Duration::from_secs(300),
        }
    }

    #[test]
    fn parses_laravel_style_page() {
        let cfg = cfg(
            r#"
            url_template = "{base}ajax/episodes/{id}/{page}/"
            items_pointer = "/data"
            number_field = "/number"
            image_field = "/image"
            image_template = "https://cdn.x.com/assets/images/animes/video/image_thumb/{value}"
            next_pointer = "/next_page_url"
            link_template = "{url}/{n}"
            "#,
        );
        let plan = plan("https://x.com/ajax/episodes/42/{page}/");
        let body = json!({
            "data": [{"number": 1, "image": "a.jpg"}, {"number": "2", "image": "b.jpg"}],
            "next_page_url": "https://x.com/ajax/episodes/42/2"
        });
        let outcome = cfg.parse_page(&body, &plan);
        assert_eq!(outcome.episodes.len(), 2);
        assert_eq!(outcome.episodes[1].load_token, "https://x.com/naruto/2");
        assert_eq!(
            outcome.episodes[0].poster_url.as_deref(),
            Some("https://cdn.x.com/assets/images/animes/video/image_thumb/a.jpg")
        );
        assert_eq!(outcome.has_next, Some(true));

        let last = json!({"data": [{"number": 3}], "next_page_url": null});
        assert_eq!(cfg.parse_page(&last, &plan).has_next, Some(false));
    }

    #[test]
    fn unpaged_endpoint_is_single_page() {
        let cfg = cfg(
            r#"
            url_selector = ".caplist"
            method = "POST"
            number_field = "/num"
            link_template = "{base}{slug}-episodio-{n}"
            "#,
        );
        let plan = plan("https://x.com/ajax/caplist");
        let outcome = cfg.parse_page(&json!([{"num": 1}, {"num": 2}]), &plan);
        assert_eq!(outcome.episodes.len(), 2);
        assert_eq!(outcome.has_next, Some(false));
    }

    #[test]
    fn request_carries_token_and_page() {
        let cfg = cfg(
            r#"
            url_template = "{base}ajax/episodes/{id}/{page}/"
            method = "POST"
            link_template = "{url}/{n}"
            [form]
            page = "{page}"
            "#,
        );
        let plan = plan("https://x.com/ajax/episodes/42/{page}/");
        let token = ("_token".to_string(), "abc".to_string());
        let req = cfg.request(&plan, 3, Some(&token));
        assert_eq!(req.url, "https://x.com/ajax/episodes/42/3/");
        assert_eq!(req.method, HttpMethod::Post);
        assert!(req.idempotent);
        let form = req.form_fields().unwrap();
        assert!(form.contains(&("page".to_string(), "3".to_string())));
        assert!(form.contains(&token));
    }

    #[test]
    fn json_body_carries_page_and_token() {
        let cfg = cfg(
            r#"
            url_template = "{base}livewire/update"
            method = "POST"
            link_template = "{url}/{n}"
            [json]
            page = "{page}"
            anime = "{id}"
            "#,
        );
        let plan = plan("https://x.com/livewire/update");
        let token = ("_token".to_string(), "abc".to_string());
        let req = cfg.request(&plan, 2, Some(&token));
        assert!(req.form_fields().is_none());
        assert_eq!(
            req.body,
            Some(crate::fetch::RequestBody::Json(json!({"page": "2", "anime": "42", "_token": "abc"})))
        );
        assert!(cfg.paged(&plan));
    }

    #[test]
    fn plan_reads_id_and_seed_token() {
        let doc = Document::from_html(
            r#"<head><meta name="csrf-token" content="tok"></head>
               <div id="guardar-anime" data-anime="1234"></div>"#,
        );
        let cfg = cfg(
            r##"
            url_template = "{base}ajax/episodes/{id}/{page}/"
            id_selector = "#guardar-anime"
            id_attr = "data-anime"
            link_template = "{url}/{n}"
            [token]
            "##,
        );
        let base = Url::parse("https://x.com/").unwrap();
        let plan = cfg.plan(&doc, "https://x.com/naruto/", &base).unwrap();
        assert_eq!(plan.endpoint, "https://x.com/ajax/episodes/1234/{page}/");
        assert_eq!(plan.seed_token.as_deref(), Some("tok"));
    }

    #[test]
    fn plan_without_id_is_unavailable() {
        let doc = Document::from_html("<p></p>");
        let cfg = cfg(
            r#"
            url_template = "{base}ajax/episodes/{id}/{page}/"
            id_regex = "anime_id\\s*=\\s*(\\d+)"
            link_template = "{url}/{n}"
            "#,
        );
        let base = Url::parse("https://x.com/").unwrap();
        assert!(cfg.plan(&doc, "https://x.com/naruto", &base).is_err());
    }
}
