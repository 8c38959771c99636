//! Typed registry records
//!
//! Fields the harvester does not own are kept in `extra` so a load/save cycle
//! never drops data written by the extraction or API layers.

use crate::registry::timestamp;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// How a target's endpoints are fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStrategy {
    /// Headless browser with human-like interaction and protection retries
    #[default]
    Rendered,

    /// Single proxied HTTP GET
    Direct,
}

impl FetchStrategy {
    pub fn is_rendered(&self) -> bool {
        matches!(self, Self::Rendered)
    }
}

impl fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rendered => write!(f, "rendered"),
            Self::Direct => write!(f, "direct"),
        }
    }
}

/// A tracked leak site and its mirrors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,

    #[serde(default, skip_serializing_if = "FetchStrategy::is_rendered")]
    pub fetch: FetchStrategy,

    #[serde(default)]
    pub locations: Vec<Endpoint>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Target {
    pub fn new(name: impl Into<String>, locations: Vec<Endpoint>) -> Self {
        Self {
            name: name.into(),
            fetch: FetchStrategy::default(),
            locations,
            extra: Map::new(),
        }
    }

    /// True when at least one endpoint is both reachable and enabled
    pub fn is_active(&self) -> bool {
        self.locations.iter().any(Endpoint::is_active)
    }
}

/// One address of a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub slug: String,

    pub enabled: bool,

    pub available: bool,

    /// Last successful fetch
    #[serde(default, with = "timestamp::optional", skip_serializing_if = "Option::is_none")]
    pub updated: Option<NaiveDateTime>,

    /// Last fetch attempt of any outcome
    #[serde(default, with = "timestamp::optional", skip_serializing_if = "Option::is_none")]
    pub lastscrape: Option<NaiveDateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpRecord>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Endpoint {
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            enabled: true,
            available: false,
            updated: None,
            lastscrape: None,
            title: None,
            http: None,
            extra: Map::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.available && self.enabled
    }

    /// Genuine content was fetched
    pub fn record_success(&mut self, title: &str, now: NaiveDateTime) {
        self.available = true;
        self.updated = Some(now);
        self.lastscrape = Some(now);
        self.title = Some(title.to_string());
    }

    /// Every attempt ended on a challenge page; `updated` is left alone
    pub fn record_protection(&mut self, title: &str, now: NaiveDateTime) {
        self.available = false;
        self.lastscrape = Some(now);
        self.title = Some(title.to_string());
    }

    /// The fetch failed outright
    ///
    /// Applies the offline-disable policy: an endpoint whose last success is
    /// older than `offline_after` is disabled. Returns true only on the call
    /// that performs the transition, so repeated failures are idempotent.
    pub fn record_failure(&mut self, now: NaiveDateTime, offline_after: Duration) -> bool {
        self.available = false;
        self.lastscrape = Some(now);

        match self.updated {
            Some(updated) if self.enabled && now - updated > offline_after => {
                self.enabled = false;
                true
            }
            _ => false,
        }
    }
}

/// Stable per-endpoint file stem: `{target}-{md5(slug)}`
pub fn endpoint_key(target: &str, slug: &str) -> String {
    format!("{}-{:x}", target, md5::compute(slug.as_bytes()))
}

/// HTTP-level fingerprint of an endpoint, recomputed every run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpRecord {
    pub fetched_at: Option<String>,
    pub start_url: String,
    pub final_url: Option<String>,
    pub status: Option<u16>,
    pub http_version: Option<String>,
    pub redirect_chain: Vec<RedirectHop>,
    pub fingerprint: Fingerprint,
    pub headers: BTreeMap<String, String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedirectHop {
    pub status: u16,
    pub location: String,
}

/// Server-identifying subset of the final response headers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fingerprint {
    pub server: Option<String>,
    pub x_powered_by: Option<String>,
    pub via: Option<String>,
    pub cdn: Option<String>,
    pub content_type: Option<String>,
    pub content_length: Option<String>,
    pub set_cookie_present: bool,
    pub security_headers: BTreeMap<String, String>,
}
