//! Error taxonomy for the scrape-and-resolve pipeline.
//!
//! Lower layers report expected absence (missing optional field, empty
//! list) as `None`/empty values, never as errors. The enums below cover the
//! genuinely failed cases, and only [`ResolveError::Config`] is meant to reach
//! a user as a hard failure.

use std::time::Duration;

use thiserror::Error;

/// Network-level failure for a single request, after local retries.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out after {elapsed:?}")]
    Timeout { url: String, elapsed: Duration },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("anti-bot challenge at {url} not resolved after {rounds} rounds")]
    ChallengeUnresolved { url: String, rounds: u32 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    /// Whether a retry of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::ChallengeUnresolved { .. } | Self::InvalidRequest(_) => false,
        }
    }
}

/// A page or payload could not be turned into structured data.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },

    #[error("invalid regex `{pattern}`: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("marker `{0}` not found")]
    MissingMarker(String),

    #[error("missing field `{0}`")]
    MissingField(String),
}

/// An obfuscated embed payload could not be decoded.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decoded payload is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("unknown provider id `{0}`")]
    UnknownProvider(String),
}

/// Configuration file or descriptor problems.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML in {path}: {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid site `{site}`: {reason}")]
    Invalid { site: String, reason: String },
}

/// Failure of a top-level pipeline operation.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unknown source `{0}`")]
    UnknownSource(String),

    #[error("operation not supported by `{site}`: {operation}")]
    Unsupported { site: String, operation: &'static str },
}

pub type Result<T, E = ResolveError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = FetchError::Status {
            url: "https://x.test".into(),
            status: 503,
        };
        assert!(err.is_transient());

        let err = FetchError::Status {
            url: "https://x.test".into(),
            status: 404,
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn challenge_is_not_transient() {
        let err = FetchError::ChallengeUnresolved {
            url: "https://x.test".into(),
            rounds: 3,
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("3 rounds"));
    }
}
