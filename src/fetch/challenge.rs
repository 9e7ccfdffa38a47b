//! Anti-bot interstitials.
//!
//! Some portals answer the first request with a "checking your browser" page
//! that sets a clearance cookie and redirects. The fetcher recognizes these
//! pages, asks a [`ChallengeSolver`] how to get past them, applies the
//! clearance and replays the original request. The handshake is bounded by
//! `challenge_rounds`; past that the fetch fails with
//! [`FetchError::ChallengeUnresolved`].

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use super::{status_checked, FetchRequest, Fetcher, RawResponse};
use crate::error::FetchError;

/// Longest wait an interstitial can ask for before we consider it hostile.
const MAX_WAIT: Duration = Duration::from_secs(6);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    /// Cloudflare "Just a moment..." style page.
    Cloudflare,
    /// Plain page that redirects through a meta refresh or `location=`.
    Redirect,
}

static META_REFRESH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)<meta[^>]+http-equiv\s*=\s*["']?refresh["']?[^>]*content\s*=\s*["']?\s*(\d+)\s*;?\s*(?:url\s*=\s*)?([^"'>\s]*)"#,
    )
    .expect("static regex")
});

static JS_LOCATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:window|document)\.location(?:\.href)?\s*=\s*["']([^"']+)["']"#)
        .expect("static regex")
});

/// Classify `response` as an interstitial, if it is one.
pub fn detect(response: &RawResponse) -> Option<ChallengeKind> {
    let cf_header = response
        .header("cf-mitigated")
        .is_some_and(|v| v.eq_ignore_ascii_case("challenge"));
    let blocked = matches!(response.status, 403 | 429 | 503);
    let body = &response.body;

    if cf_header
        || (blocked
            && (body.contains("Just a moment...")
                || body.contains("cf-browser-verification")
                || body.contains("/cdn-cgi/challenge-platform")))
    {
        return Some(ChallengeKind::Cloudflare);
    }

    // Short pages whose only job is to bounce the browser elsewhere.
    let refresh_target = META_REFRESH
        .captures(body)
        .and_then(|c| c.get(2))
        .is_some_and(|m| !m.as_str().is_empty());
    if body.len() < 4096 && (refresh_target || (blocked && JS_LOCATION.is_match(body))) {
        return Some(ChallengeKind::Redirect);
    }

    None
}

/// What the solver sees.
#[derive(Debug)]
pub struct ChallengePage<'a> {
    pub url: &'a str,
    pub status: u16,
    pub body: &'a str,
    pub kind: ChallengeKind,
}

/// What to do before replaying the original request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clearance {
    /// Cookies to add to the jar for the challenged origin.
    pub cookies: Vec<(String, String)>,
    /// URL to visit first, relative to the challenged page.
    pub follow: Option<String>,
    pub wait: Option<Duration>,
}

/// Strategy for getting past an interstitial.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    fn name(&self) -> &'static str;

    /// `None` means this solver cannot help; the fetch then fails.
    async fn solve(&self, page: &ChallengePage<'_>) -> Option<Clearance>;
}

/// Follows meta-refresh and `location=` hops, honoring short waits.
///
/// Cookies set by the interstitial land in the jar on their own; this solver
/// only has to reproduce the navigation. Pages that need script execution
/// are out of its reach.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterstitialSolver;

#[async_trait]
impl ChallengeSolver for InterstitialSolver {
    fn name(&self) -> &'static str {
        "interstitial"
    }

    async fn solve(&self, page: &ChallengePage<'_>) -> Option<Clearance> {
        if let Some(caps) = META_REFRESH.captures(page.body) {
            let secs: u64 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            let target = caps.get(2).map(|m| m.as_str()).filter(|s| !s.is_empty());
            return Some(Clearance {
                cookies: Vec::new(),
                follow: target.map(str::to_string),
                wait: Some(Duration::from_secs(secs).min(MAX_WAIT)),
            });
        }
        if let Some(caps) = JS_LOCATION.captures(page.body) {
            return Some(Clearance {
                follow: caps.get(1).map(|m| m.as_str().to_string()),
                ..Clearance::default()
            });
        }
        None
    }
}

impl Fetcher {
    /// Run the bounded handshake starting from the interstitial `page`.
    pub(super) async fn clear_challenge(
        &self,
        request: &FetchRequest,
        mut page: RawResponse,
    ) -> Result<RawResponse, FetchError> {
        let rounds = self.settings.challenge_rounds;

        for round in 1..=rounds {
            let Some(kind) = detect(&page) else {
                return status_checked(page);
            };

            let clearance = {
                let view = ChallengePage {
                    url: &page.url,
                    status: page.status,
                    body: &page.body,
                    kind,
                };
                self.solver.solve(&view).await
            };
            let Some(clearance) = clearance else {
                warn!(round, solver = self.solver.name(), "Solver gave up on interstitial");
                break;
            };

            debug!(round, solver = self.solver.name(), ?clearance, "Applying clearance");
            for (name, value) in &clearance.cookies {
                self.add_cookie(&page.url, name, value);
            }
            if let Some(wait) = clearance.wait {
                tokio::time::sleep(wait).await;
            }
            if let Some(target) = clearance.follow.as_deref() {
                let next = Url::parse(&page.url)
                    .and_then(|base| base.join(target))
                    .map_err(|e| FetchError::InvalidRequest(format!("{target}: {e}")))?;
                let hop = FetchRequest::get(next.as_str()).referer(page.url.clone());
                // Only the cookies of the hop matter.
                self.send(&hop).await?;
            }

            page = self.send(request).await?;
        }

        match detect(&page) {
            None => status_checked(page),
            Some(_) => Err(FetchError::ChallengeUnresolved {
                url: request.url.clone(),
                rounds,
            }),
        }
    }
}
