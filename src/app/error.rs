use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid Location header {location:?}: {source}")]
    InvalidLocation {
        location: String,
        source: url::ParseError,
    },
    #[error("stopped after {0} redirects")]
    TooManyRedirects(usize),
    #[error("probe exceeded {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum WebDriverError {
    #[error("{op} request failed: {source}")]
    Transport {
        op: &'static str,
        source: reqwest::Error,
    },
    #[error("{op} HTTP {status}: {body}")]
    Status {
        op: &'static str,
        status: u16,
        body: String,
    },
    #[error("{error}: {message}")]
    Protocol { error: String, message: String },
    #[error("{op} response parse failed: {source}")]
    Parse {
        op: &'static str,
        source: serde_json::Error,
    },
    #[error("script returned {0} instead of a URL")]
    ScriptResult(String),
    #[error("session id missing in response: {0}")]
    MissingSessionId(String),
    #[error("browser session exceeded {0:?}")]
    Deadline(Duration),
    #[error("webdriver backend unavailable: {0}")]
    Backend(String),
}

impl WebDriverError {
    pub fn is_unexpected_alert(&self) -> bool {
        matches!(self, WebDriverError::Protocol { error, .. } if error == "unexpected alert open")
    }
}
