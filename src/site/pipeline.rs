//! The descriptor-driven [`ContentSource`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{Capabilities, ContentSource, QuickSearchConfig, SearchConfig, SectionConfig, SiteConfig};
use crate::detail::resolve_detail;
use crate::error::{ConfigError, FetchError, ParseError, ResolveError, Result};
use crate::fetch::{FetchRequest, FetchSettings, Fetcher, HttpMethod};
use crate::links::{resolve_links, EmbedExtractor};
use crate::listing::{classify_dub, extract_listing, extract_listing_in, infer_kind, normalize_url};
use crate::model::{HomeSection, MediaDetail, MediaSummary, StreamSet};
use crate::template::Vars;

/// Runs one [`SiteConfig`] against the network.
///
/// The pipeline's own [`Fetcher`] is only a template: every operation runs
/// on a fresh [`Fetcher::session`], so cookies, tokens and clearances live
/// for one resolution chain.
pub struct Pipeline {
    config: SiteConfig,
    base: Url,
    fetcher: Fetcher,
    extractor: Arc<dyn EmbedExtractor>,
}

impl Pipeline {
    /// Validate `config` and build a fetcher for it.
    pub fn new(config: SiteConfig, settings: &FetchSettings, extractor: Arc<dyn EmbedExtractor>) -> Result<Self> {
        let mut settings = settings.clone();
        if !config.challenge {
            settings.challenge_rounds = 0;
        }
        let fetcher = Fetcher::new(settings)?.with_site_headers(&config.default_headers);
        Self::with_fetcher(config, fetcher, extractor)
    }

    /// Same as [`Pipeline::new`] with a caller-built fetcher.
    pub fn with_fetcher(config: SiteConfig, fetcher: Fetcher, extractor: Arc<dyn EmbedExtractor>) -> Result<Self> {
        let base = config.validate()?;
        Ok(Self {
            config,
            base,
            fetcher,
            extractor,
        })
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn vars(&self) -> Vars {
        Vars::new().with("base", self.base.as_str())
    }

    async fn fetch_section(&self, fetcher: &Fetcher, section: &SectionConfig, page: u32) -> Result<Vec<MediaSummary>> {
        let url = self.vars().with("page", page.to_string()).fill(&section.path);
        let response = fetcher.get(&url).await?;
        let selectors = section.listing.as_ref().unwrap_or(&self.config.listing);
        let listing = {
            let doc = response.document();
            match &section.scope {
                Some(scope) => extract_listing_in(&doc, scope, selectors, &self.base),
                None => extract_listing(&doc, selectors, &self.base),
            }
        };
        Ok(listing.items)
    }

    /// Read the search token, from `token.page` or from a first copy of the
    /// search request itself.
    async fn search_token(
        &self,
        fetcher: &Fetcher,
        cfg: &SearchConfig,
        first: &FetchRequest,
    ) -> Result<Option<(String, String)>> {
        let Some(source) = &cfg.token else {
            return Ok(None);
        };
        let request = match &source.page {
            Some(page) => FetchRequest::get(self.vars().fill(page)),
            None => first.clone(),
        };
        let response = fetcher.fetch(&request).await?;
        let token = {
            let doc = response.document();
            source.read(&doc)
        };
        match token {
            Some(value) => Ok(Some((source.field.clone(), value))),
            None => {
                warn!(site = %self.config.name, "Search token not found");
                Err(ParseError::MissingField(source.field.clone()).into())
            }
        }
    }

    fn search_request(&self, cfg: &SearchConfig, query: &str, token: Option<(String, String)>) -> FetchRequest {
        let path = self
            .vars()
            .with("query", urlencoding::encode(query).into_owned())
            .fill(&cfg.path);
        let mut vars = self.vars().with("query", query);
        if let Some((_, value)) = &token {
            vars.set("token", value.clone());
        }

        let mut request = match (cfg.method, &cfg.json) {
            // Searches are reads.
            (HttpMethod::Post, Some(template)) => {
                let mut body = vars.fill_json(template);
                if let (Some((field, value)), Value::Object(map)) = (token, &mut body) {
                    map.entry(field).or_insert(Value::String(value));
                }
                FetchRequest::post(path).json(body).idempotent(true)
            }
            (HttpMethod::Post, None) => {
                let mut form = vars.fill_form(&cfg.form);
                form.extend(token);
                FetchRequest::post(path).form(form).idempotent(true)
            }
            (HttpMethod::Get, _) => {
                let mut form = vars.fill_form(&cfg.form);
                form.extend(token);
                let url = match Url::parse(&path) {
                    Ok(mut url) if !form.is_empty() => {
                        url.query_pairs_mut().extend_pairs(&form);
                        url.to_string()
                    }
                    _ => path,
                };
                FetchRequest::get(url)
            }
        };
        for (name, value) in &cfg.headers {
            request = request.header(name.clone(), vars.fill(value));
        }
        request.referer(self.base.as_str())
    }

    fn quick_results(&self, cfg: &QuickSearchConfig, value: &Value) -> Vec<MediaSummary> {
        let items = if cfg.items_pointer.is_empty() {
            Some(value)
        } else {
            value.pointer(&cfg.items_pointer)
        };
        let Some(items) = items.and_then(Value::as_array) else {
            return Vec::new();
        };

        let field = |item: &Value, pointer: &str| -> Option<String> {
            match item.pointer(pointer)? {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        };

        items
            .iter()
            .filter_map(|item| {
                let title = field(item, &cfg.title_field)?;
                let mut vars = self.vars();
                if let Some(slug) = field(item, &cfg.slug_field) {
                    vars.set("slug", slug);
                }
                if let Some(id) = field(item, &cfg.id_field) {
                    vars.set("id", id);
                }
                let url = normalize_url(&vars.fill(&cfg.url_template), &self.base)?;
                let badge = cfg.kind_field.as_deref().and_then(|f| field(item, f));
                Some(MediaSummary {
                    kind: infer_kind(&url, badge.as_deref(), &self.config.listing.kinds),
                    dub_status: classify_dub(&title),
                    poster_url: cfg
                        .poster_template
                        .as_ref()
                        .and_then(|t| normalize_url(&vars.fill(t), &self.base)),
                    url,
                    title,
                    year: None,
                    latest_episode: None,
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.config.name)
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ContentSource for Pipeline {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn capabilities(&self) -> Capabilities {
        self.config.capabilities
    }

    /// Sections load concurrently and come back in descriptor order. A
    /// failed section is left out; only an unknown `section` key is an error.
    #[instrument(skip(self), fields(site = %self.config.name))]
    async fn list_home(&self, page: u32, section: Option<&str>) -> Result<Vec<HomeSection>> {
        let page = page.max(1);
        let sections: Vec<SectionConfig> = match section {
            Some(key) => {
                let found = self.config.sections.iter().find(|s| s.key == key).cloned();
                let found = found.ok_or_else(|| ConfigError::Invalid {
                    site: self.config.name.clone(),
                    reason: format!("unknown section `{key}`"),
                })?;
                vec![found]
            }
            None => self.config.sections.clone(),
        };
        // Sections without a page placeholder end after page 1.
        let sections: Vec<SectionConfig> = sections
            .into_iter()
            .filter(|s| page == 1 || s.path.contains("{page}"))
            .collect();

        let fetcher = self.fetcher.session()?;
        let fetcher = &fetcher;
        let limit = fetcher.settings().max_concurrency.max(1);
        let results: Vec<(SectionConfig, Result<Vec<MediaSummary>>)> = stream::iter(sections)
            .map(|s| async move {
                let result = self.fetch_section(fetcher, &s, page).await;
                (s, result)
            })
            .buffered(limit)
            .collect()
            .await;

        let mut out = Vec::with_capacity(results.len());
        for (section, result) in results {
            match result {
                Ok(items) => {
                    debug!(section = %section.key, items = items.len(), "Section loaded");
                    out.push(HomeSection {
                        key: section.key,
                        title: section.title,
                        items,
                    });
                }
                Err(err) => warn!(section = %section.key, error = %err, "Section failed"),
            }
        }
        Ok(out)
    }

    #[instrument(skip(self), fields(site = %self.config.name))]
    async fn search(&self, query: &str) -> Result<Vec<MediaSummary>> {
        let Some(cfg) = &self.config.search else {
            return Err(ResolveError::Unsupported {
                site: self.config.name.clone(),
                operation: "search",
            });
        };
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let fetcher = self.fetcher.session()?;
        let first = self.search_request(cfg, query, None);
        let request = match self.search_token(&fetcher, cfg, &first).await {
            Ok(None) => first,
            Ok(Some(token)) => self.search_request(cfg, query, Some(token)),
            Err(err) => {
                warn!(error = %err, "Search handshake failed");
                return Ok(Vec::new());
            }
        };

        let response = match fetcher.fetch(&request).await {
            Ok(r) => r,
            Err(err) => {
                warn!(error = %err, "Search request failed");
                return Ok(Vec::new());
            }
        };
        let selectors = cfg.listing.as_ref().unwrap_or(&self.config.listing);
        let listing = {
            let doc = response.document();
            extract_listing(&doc, selectors, &self.base)
        };
        info!(results = listing.items.len(), "Search done");
        Ok(listing.items)
    }

    #[instrument(skip(self), fields(site = %self.config.name))]
    async fn quick_search(&self, query: &str) -> Result<Vec<MediaSummary>> {
        let Some(cfg) = &self.config.quick_search else {
            return Err(ResolveError::Unsupported {
                site: self.config.name.clone(),
                operation: "quick_search",
            });
        };
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let request = FetchRequest::post(self.vars().fill(&cfg.path))
            .form(vec![(cfg.field.clone(), query.to_string())])
            .referer(self.base.as_str())
            .xhr()
            .idempotent(true);
        let fetcher = self.fetcher.session()?;
        let value = match fetcher.fetch(&request).await {
            Ok(response) => response.document().json(),
            Err(err) => {
                warn!(error = %err, "Quick search request failed");
                return Ok(Vec::new());
            }
        };
        match value {
            Ok(value) => Ok(self.quick_results(cfg, &value)),
            Err(err) => {
                warn!(error = %err, "Quick search answer is not JSON");
                Ok(Vec::new())
            }
        }
    }

    async fn get_detail(&self, url: &str) -> Result<MediaDetail> {
        let url = normalize_url(url, &self.base)
            .ok_or_else(|| FetchError::InvalidRequest(format!("not a web URL: {url}")))?;
        resolve_detail(&self.fetcher.session()?, &self.config.detail, &self.base, &url).await
    }

    async fn get_streams(&self, token: &str) -> Result<StreamSet> {
        let Some(url) = normalize_url(token, &self.base) else {
            warn!(%token, "Episode token is not a web URL");
            return Ok(StreamSet::default());
        };
        let fetcher = self.fetcher.session()?;
        Ok(resolve_links(&fetcher, &self.config.links, &self.base, &url, self.extractor.as_ref()).await)
    }
}
