//! Fetch strategies
//!
//! This module defines the outcome types shared by both strategies, the
//! `PageRenderer` seam the rendered strategy is driven through, and the
//! direct (single proxied GET) strategy.

use crate::config::Config;
use crate::proxy::build_client;
use crate::HarvestError;
use async_trait::async_trait;
use regex::Regex;
use reqwest::{redirect::Policy, Client};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

const TITLE_LIMIT: usize = 300;
pub const NO_TITLE: &str = "(no title)";

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title pattern"));

/// Why a fetch produced no content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Navigation or request exceeded its deadline
    Timeout,

    /// Connection, proxy or protocol failure
    Transport,

    /// The server answered with a non-success status
    Http(u16),

    /// Retrying cannot help (bad address, browser gone)
    Fatal,
}

impl FetchErrorKind {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal)
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Transport => write!(f, "transport"),
            Self::Http(status) => write!(f, "http {}", status),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Transport, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Fatal, message)
    }

    /// Classifies a reqwest failure
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout("Request timeout")
        } else if let Some(status) = err.status() {
            Self::new(FetchErrorKind::Http(status.as_u16()), err.to_string())
        } else if err.is_builder() {
            Self::fatal(err.to_string())
        } else {
            Self::transport(err.to_string())
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of a single fetch attempt; never classifies protection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Fetched { content: String, title: String },
    Failed(FetchError),
}

/// Renders a page in an isolated browser context
///
/// Implementations own page lifetime: the page opened for a call must be
/// closed before the call returns, whatever the outcome.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Brings the backend up before any fetch is scheduled
    ///
    /// Failure here aborts the run before the registry is touched.
    async fn prepare(&self) -> Result<(), HarvestError> {
        Ok(())
    }

    /// Navigates to `url`, interacts like a human, waits `settle`, and
    /// captures the DOM and title
    async fn render(&self, url: &str, settle: Duration) -> FetchResult;

    /// Releases the underlying browser
    async fn shutdown(&self) {}
}

/// Single proxied GET with browser-like headers
#[derive(Debug, Clone)]
pub struct DirectFetcher {
    client: Client,
}

impl DirectFetcher {
    /// Builds the fetcher from the proxy and harvest settings
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = build_client(
            &config.proxy,
            &config.harvest.user_agent,
            config.harvest.direct_timeout(),
            Policy::limited(10),
        )?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Fetches `url`; any non-2xx status is a failure
    pub async fn fetch(&self, url: &str) -> FetchResult {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return FetchResult::Failed(FetchError::from_reqwest(&e)),
        };

        let response = match response.error_for_status() {
            Ok(response) => response,
            Err(e) => return FetchResult::Failed(FetchError::from_reqwest(&e)),
        };

        match response.text().await {
            Ok(content) => {
                let title = extract_title(&content);
                FetchResult::Fetched { content, title }
            }
            Err(e) => FetchResult::Failed(FetchError::from_reqwest(&e)),
        }
    }
}

/// Pulls the `<title>` text out of raw HTML
///
/// Whitespace runs collapse to one space and the result is capped at 300
/// characters. Pages without a usable title yield `(no title)`.
pub fn extract_title(html: &str) -> String {
    let Some(captures) = TITLE_RE.captures(html) else {
        return NO_TITLE.to_string();
    };

    let raw = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty() {
        NO_TITLE.to_string()
    } else {
        collapsed.chars().take(TITLE_LIMIT).collect()
    }
}
