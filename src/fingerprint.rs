//! Browser header profiles.
//!
//! Portals behind anti-bot walls reject obvious HTTP-library requests. The
//! fetcher sends one of these profiles as its default header set, picked
//! once per [`crate::fetch::Fetcher`].

use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};

/// Headers a real browser sends on a top-level navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserProfile {
    pub user_agent: String,
    pub accept: String,
    pub accept_language: String,
    /// Client hints, only sent by Chromium browsers.
    pub sec_ch_ua: Option<String>,
    pub platform: Platform,
}

const CHROME_VERSIONS: &[&str] = &["131", "130", "129", "128"];

const FIREFOX_VERSIONS: &[&str] = &["133.0", "132.0", "131.0"];

/// Most configured portals serve Spanish-speaking audiences.
const LANGUAGES: &[&str] = &[
    "es-ES,es;q=0.9,en;q=0.8",
    "es-MX,es;q=0.9,en;q=0.8",
    "es-419,es;q=0.9",
    "en-US,en;q=0.9,es;q=0.8",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOS,
    Linux,
}

impl Platform {
    fn random() -> Self {
        let roll: f32 = rand::thread_rng().gen();
        if roll < 0.7 {
            Self::Windows
        } else if roll < 0.9 {
            Self::MacOS
        } else {
            Self::Linux
        }
    }

    fn os_string(self) -> &'static str {
        match self {
            Self::Windows => "Windows NT 10.0; Win64; x64",
            Self::MacOS => "Macintosh; Intel Mac OS X 10_15_7",
            Self::Linux => "X11; Linux x86_64",
        }
    }

    fn client_hint(self) -> &'static str {
        match self {
            Self::Windows => "\"Windows\"",
            Self::MacOS => "\"macOS\"",
            Self::Linux => "\"Linux\"",
        }
    }
}

fn pick<'a>(items: &'a [&'a str]) -> &'a str {
    items.choose(&mut rand::thread_rng()).copied().unwrap_or(items[0])
}

#[must_use]
pub fn chrome_profile() -> BrowserProfile {
    let platform = Platform::random();
    let major = pick(CHROME_VERSIONS);

    BrowserProfile {
        user_agent: format!(
            "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{major}.0.0.0 Safari/537.36",
            platform.os_string()
        ),
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8".to_string(),
        accept_language: pick(LANGUAGES).to_string(),
        sec_ch_ua: Some(format!(
            "\"Google Chrome\";v=\"{major}\", \"Chromium\";v=\"{major}\", \"Not_A Brand\";v=\"24\""
        )),
        platform,
    }
}

#[must_use]
pub fn firefox_profile() -> BrowserProfile {
    let platform = Platform::random();
    let version = pick(FIREFOX_VERSIONS);

    BrowserProfile {
        user_agent: format!(
            "Mozilla/5.0 ({}; rv:{version}) Gecko/20100101 Firefox/{version}",
            platform.os_string()
        ),
        accept: "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
        accept_language: pick(LANGUAGES).to_string(),
        sec_ch_ua: None,
        platform,
    }
}

/// Chrome three times out of four, Firefox otherwise.
#[must_use]
pub fn random_profile() -> BrowserProfile {
    if rand::thread_rng().gen_bool(0.75) {
        chrome_profile()
    } else {
        firefox_profile()
    }
}

impl BrowserProfile {
    /// Profile with a fixed user agent, for configs that pin one.
    #[must_use]
    pub fn with_user_agent(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            ..chrome_profile()
        }
    }

    /// Convert the profile into default request headers.
    ///
    /// Values that are not valid header text are skipped rather than
    /// failing client construction.
    pub fn to_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let mut put = |name: HeaderName, value: &str| {
            if let Ok(v) = HeaderValue::from_str(value) {
                headers.insert(name, v);
            }
        };

        put(USER_AGENT, &self.user_agent);
        put(ACCEPT, &self.accept);
        put(ACCEPT_LANGUAGE, &self.accept_language);

        if let Some(brands) = &self.sec_ch_ua {
            put(HeaderName::from_static("sec-ch-ua"), brands);
            put(HeaderName::from_static("sec-ch-ua-mobile"), "?0");
            put(
                HeaderName::from_static("sec-ch-ua-platform"),
                self.platform.client_hint(),
            );
        }

        put(HeaderName::from_static("upgrade-insecure-requests"), "1");

        headers
    }
}
