//! Session tokens (CSRF values and the like) some AJAX endpoints require.
//!
//! A [`SessionGate`] holds at most one token. Concurrent callers that find it
//! empty or stale queue on the gate while a single caller refreshes it, so
//! one expiry never triggers a burst of token fetches.

use std::future::Future;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::document::{Document, Sel};

fn default_token_selector() -> Sel {
    Sel::parse("meta[name=csrf-token]").expect("static selector")
}

fn default_token_attr() -> String {
    "content".to_string()
}

fn default_token_field() -> String {
    "_token".to_string()
}

fn default_ttl_secs() -> u64 {
    300
}

/// Where a site keeps its session token and which form field carries it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTokenSource {
    #[serde(default = "default_token_selector")]
    pub selector: Sel,
    #[serde(default = "default_token_attr")]
    pub attr: String,
    #[serde(default = "default_token_field")]
    pub field: String,
    /// Page to read the token from. Defaults to the page being resolved.
    #[serde(default)]
    pub page: Option<String>,
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl SessionTokenSource {
    pub fn read(&self, doc: &Document) -> Option<String> {
        doc.select_first(&self.selector)
            .and_then(|n| n.attr(&self.attr))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone)]
pub struct SessionToken {
    pub value: String,
    pub fetched_at: Instant,
}

#[derive(Debug)]
pub struct SessionGate {
    ttl: Duration,
    slot: Mutex<Option<SessionToken>>,
}

impl SessionGate {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Gate that starts out holding `value`, fetched just now.
    pub fn with_token(ttl: Duration, value: String) -> Self {
        Self {
            ttl,
            slot: Mutex::new(Some(SessionToken {
                value,
                fetched_at: Instant::now(),
            })),
        }
    }

    /// Current token, running `refresh` first when there is none or it is
    /// older than the TTL. The gate stays locked while `refresh` runs.
    pub async fn get_or_refresh<F, Fut, E>(&self, refresh: F) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(token) = slot.as_ref() {
            if token.fetched_at.elapsed() < self.ttl {
                return Ok(token.value.clone());
            }
        }

        debug!("Refreshing session token");
        let value = refresh().await?;
        *slot = Some(SessionToken {
            value: value.clone(),
            fetched_at: Instant::now(),
        });
        Ok(value)
    }

    /// Drop the token so the next caller refreshes it.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}
