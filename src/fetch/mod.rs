//! HTTP fetcher shared by every pipeline stage.
//!
//! Features:
//! - Browser fingerprint default headers (see [`crate::fingerprint`])
//! - Cookie jar shared by every request made through one [`Fetcher`];
//!   [`Fetcher::session`] starts a fresh one per resolution chain
//! - Form, JSON or raw request bodies
//! - Bounded retries with backoff, for idempotent requests only
//! - Per-request timeout overrides
//! - Anti-bot interstitial handshake (see [`challenge`])

pub mod challenge;
pub mod session;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE, REFERER};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::document::Document;
use crate::error::FetchError;
use crate::fingerprint::{random_profile, BrowserProfile};

pub use challenge::{ChallengeKind, ChallengePage, ChallengeSolver, Clearance, InterstitialSolver};
pub use session::{SessionGate, SessionToken, SessionTokenSource};

/// Longest pause between two attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// How retry delays grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    Fixed,
    #[default]
    Exponential,
}

/// `[fetch]` table of the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Extra attempts after the first, for idempotent requests.
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub backoff: Backoff,
    /// Handshake rounds before giving up on an interstitial.
    pub challenge_rounds: u32,
    pub max_redirects: usize,
    /// Pin a user agent instead of a random browser profile.
    pub user_agent: Option<String>,
    /// Upper bound on concurrent requests in fan-out stages.
    pub max_concurrency: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            connect_timeout_secs: 10,
            max_retries: 2,
            backoff_ms: 500,
            backoff: Backoff::Exponential,
            challenge_rounds: 3,
            max_redirects: 10,
            user_agent: None,
            max_concurrency: 8,
        }
    }
}

impl FetchSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Delay before retry number `attempt` (1-based), at most [`MAX_BACKOFF`].
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.backoff_ms);
        let delay = match self.backoff {
            Backoff::Fixed => Some(base),
            Backoff::Exponential => base.checked_mul(2u32.pow(attempt.saturating_sub(1).min(6))),
        };
        delay.map_or(MAX_BACKOFF, |d| d.min(MAX_BACKOFF))
    }
}

/// HTTP method of a [`FetchRequest`]. Descriptors spell it `"GET"`/`"POST"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// Payload of a [`FetchRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Sent as `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
    /// Sent as `application/json`.
    Json(Value),
    Raw { content_type: String, text: String },
}

/// One request, built with the chained setters below.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub referer: Option<String>,
    pub timeout: Option<Duration>,
    /// Only idempotent requests are retried.
    pub idempotent: bool,
}

impl FetchRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            cookies: Vec::new(),
            body: None,
            referer: None,
            timeout: None,
            idempotent: method == HttpMethod::Get,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = Some(RequestBody::Form(fields));
        self
    }

    #[must_use]
    pub fn json(mut self, value: Value) -> Self {
        self.body = Some(RequestBody::Json(value));
        self
    }

    #[must_use]
    pub fn raw(mut self, content_type: impl Into<String>, text: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Raw {
            content_type: content_type.into(),
            text: text.into(),
        });
        self
    }

    /// Form fields, when the body is a form.
    pub fn form_fields(&self) -> Option<&[(String, String)]> {
        match &self.body {
            Some(RequestBody::Form(fields)) => Some(fields.as_slice()),
            _ => None,
        }
    }

    #[must_use]
    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Mark a POST as a read so it gets retried like a GET.
    #[must_use]
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    /// AJAX endpoints check this header before answering.
    #[must_use]
    pub fn xhr(self) -> Self {
        self.header("X-Requested-With", "XMLHttpRequest")
    }
}

/// Response with the body already read.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> &str {
        self.header(CONTENT_TYPE.as_str()).unwrap_or_default()
    }

    /// Parse the body. The returned document is not `Send`.
    pub fn document(&self) -> Document {
        Document::parse(self.body.as_bytes(), self.content_type())
    }
}

fn status_checked(response: RawResponse) -> Result<RawResponse, FetchError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(FetchError::Status {
            url: response.url,
            status: response.status,
        })
    }
}

fn build_client(settings: &FetchSettings, profile: &BrowserProfile, jar: &Arc<Jar>) -> Result<Client, FetchError> {
    Client::builder()
        .use_rustls_tls()
        .brotli(true)
        .gzip(true)
        .deflate(true)
        .default_headers(profile.to_headers())
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .timeout(settings.timeout())
        .redirect(reqwest::redirect::Policy::limited(settings.max_redirects))
        .cookie_provider(Arc::clone(jar))
        .pool_max_idle_per_host(4)
        .build()
        .map_err(|e| FetchError::InvalidRequest(format!("client construction: {e}")))
}

/// HTTP client with retries, a shared cookie jar and challenge handling.
pub struct Fetcher {
    client: Client,
    jar: Arc<Jar>,
    profile: BrowserProfile,
    settings: FetchSettings,
    solver: Arc<dyn ChallengeSolver>,
    site_headers: Vec<(String, String)>,
}

impl Fetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let profile = match &settings.user_agent {
            Some(ua) => BrowserProfile::with_user_agent(ua),
            None => random_profile(),
        };
        Self::with_profile(settings, &profile)
    }

    pub fn with_profile(settings: FetchSettings, profile: &BrowserProfile) -> Result<Self, FetchError> {
        let jar = Arc::new(Jar::default());
        let client = build_client(&settings, profile, &jar)?;

        Ok(Self {
            client,
            jar,
            profile: profile.clone(),
            settings,
            solver: Arc::new(InterstitialSolver),
            site_headers: Vec::new(),
        })
    }

    /// Same settings, profile, solver and site headers over an empty cookie
    /// jar. Each resolution chain runs on its own session so cookies and
    /// clearances never leak between unrelated calls.
    pub fn session(&self) -> Result<Self, FetchError> {
        let jar = Arc::new(Jar::default());
        let client = build_client(&self.settings, &self.profile, &jar)?;
        Ok(Self {
            client,
            jar,
            profile: self.profile.clone(),
            settings: self.settings.clone(),
            solver: Arc::clone(&self.solver),
            site_headers: self.site_headers.clone(),
        })
    }

    /// Replace the interstitial solver, e.g. with a headless-browser bridge.
    #[must_use]
    pub fn with_solver(mut self, solver: Arc<dyn ChallengeSolver>) -> Self {
        self.solver = solver;
        self
    }

    /// Headers sent on every request of one site, before per-request ones.
    #[must_use]
    pub fn with_site_headers(mut self, headers: &BTreeMap<String, String>) -> Self {
        self.site_headers = headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// User agent sent on every request.
    pub fn user_agent(&self) -> &str {
        &self.profile.user_agent
    }

    /// `Cookie` header the jar would send to `url`.
    pub fn cookie_header(&self, url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        self.jar
            .cookies(&url)
            .and_then(|v| v.to_str().ok().map(str::to_string))
    }

    pub fn add_cookie(&self, url: &str, name: &str, value: &str) {
        if let Ok(url) = Url::parse(url) {
            self.jar.add_cookie_str(&format!("{name}={value}; Path=/"), &url);
        }
    }

    /// GET with default options.
    pub async fn get(&self, url: &str) -> Result<RawResponse, FetchError> {
        self.fetch(&FetchRequest::get(url)).await
    }

    /// Perform `request`, retrying transient failures of idempotent requests
    /// and clearing anti-bot interstitials. Non-2xx final statuses are errors.
    #[instrument(skip(self, request), fields(method = ?request.method, url = %request.url))]
    pub async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse, FetchError> {
        let attempts = if request.idempotent {
            self.settings.max_retries + 1
        } else {
            1
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch_once(request).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_transient() && attempt < attempts => {
                    let delay = self.settings.backoff_delay(attempt);
                    warn!(attempt, ?delay, error = %err, "Transient fetch failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_once(&self, request: &FetchRequest) -> Result<RawResponse, FetchError> {
        let response = self.send(request).await?;
        match challenge::detect(&response) {
            None => status_checked(response),
            Some(kind) => {
                debug!(?kind, "Interstitial detected");
                self.clear_challenge(request, response).await
            }
        }
    }

    /// One round trip with no status interpretation.
    async fn send(&self, request: &FetchRequest) -> Result<RawResponse, FetchError> {
        let url = Url::parse(&request.url)
            .map_err(|e| FetchError::InvalidRequest(format!("{}: {e}", request.url)))?;

        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };
        let mut builder = self.client.request(method, url.clone());

        for (name, value) in self.site_headers.iter().chain(&request.headers) {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FetchError::InvalidRequest(format!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FetchError::InvalidRequest(format!("header value: {e}")))?;
            builder = builder.header(name, value);
        }
        if let Some(referer) = &request.referer {
            builder = builder.header(REFERER, referer.as_str());
        }
        // An explicit Cookie header stops reqwest from adding the jar's, so
        // merge both here.
        if !request.cookies.is_empty() {
            let mut parts: Vec<String> = self.cookie_header(url.as_str()).into_iter().collect();
            parts.extend(request.cookies.iter().map(|(k, v)| format!("{k}={v}")));
            builder = builder.header(COOKIE, parts.join("; "));
        }
        match &request.body {
            Some(RequestBody::Form(fields)) => builder = builder.form(fields),
            Some(RequestBody::Json(value)) => builder = builder.json(value),
            Some(RequestBody::Raw { content_type, text }) => {
                builder = builder.header(CONTENT_TYPE, content_type.as_str()).body(text.clone());
            }
            None => {}
        }
        let timeout = request.timeout.unwrap_or_else(|| self.settings.timeout());
        builder = builder.timeout(timeout);

        let started = Instant::now();
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: request.url.clone(),
                    elapsed: started.elapsed(),
                }
            } else if e.is_builder() {
                FetchError::InvalidRequest(e.to_string())
            } else {
                FetchError::Network {
                    url: request.url.clone(),
                    source: e,
                }
            }
        };

        let response = builder.send().await.map_err(map_err)?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(map_err)?;

        debug!(
            status,
            final_url = %final_url,
            bytes = body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Response received"
        );

        Ok(RawResponse {
            status,
            url: final_url,
            headers,
            body,
        })
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("settings", &self.settings)
            .field("solver", &self.solver.name())
            .finish_non_exhaustive()
    }
}
