//! HTTP fingerprint collection
//!
//! Issues a lightweight probe (HEAD, or a one-byte ranged GET when HEAD is
//! refused) and follows redirects by hand so every hop is recorded. The
//! final response's headers are normalized and reduced to a fingerprint of
//! server-identifying fields.

use crate::config::Config;
use crate::proxy::build_client;
use crate::registry::{timestamp, Fingerprint, HttpRecord, RedirectHop};
use reqwest::header::{HeaderMap, LOCATION, RANGE};
use reqwest::{redirect::Policy, Client, Response, StatusCode, Version};
use std::collections::BTreeMap;
use url::Url;

/// Headers copied into the fingerprint's security section
pub const SECURITY_HEADERS: &[&str] = &[
    "content-security-policy",
    "strict-transport-security",
    "x-frame-options",
    "x-content-type-options",
    "referrer-policy",
    "permissions-policy",
    "cross-origin-opener-policy",
    "cross-origin-resource-policy",
    "x-xss-protection",
];

const REDIRECT_STATUSES: &[u16] = &[301, 302, 303, 307, 308];

/// Collects HTTP fingerprints through the proxy
#[derive(Debug, Clone)]
pub struct FingerprintCollector {
    client: Client,
    max_redirects: usize,
}

impl FingerprintCollector {
    /// Builds a collector whose client never follows redirects on its own
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = build_client(
            &config.proxy,
            &config.harvest.user_agent,
            config.harvest.direct_timeout(),
            Policy::none(),
        )?;
        Ok(Self::with_client(client, config.harvest.max_redirects))
    }

    /// `client` must be built with `Policy::none()`
    pub fn with_client(client: Client, max_redirects: usize) -> Self {
        Self {
            client,
            max_redirects,
        }
    }

    /// Collects the fingerprint record for `start_url`
    ///
    /// Never fails: a request error ends collection and is stored in the
    /// record's `error` field.
    pub async fn collect(&self, start_url: &str) -> HttpRecord {
        let mut record = HttpRecord {
            fetched_at: Some(timestamp::format(&timestamp::now())),
            start_url: start_url.to_string(),
            ..HttpRecord::default()
        };

        let mut current = start_url.to_string();

        loop {
            let response = match self.probe(&current).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::debug!("Fingerprint probe of {} failed: {}", current, e);
                    record.final_url = Some(current);
                    record.error = Some(e.to_string());
                    return record;
                }
            };

            let status = response.status().as_u16();

            if REDIRECT_STATUSES.contains(&status)
                && record.redirect_chain.len() < self.max_redirects
            {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());

                if let Some(location) = location {
                    current = resolve_location(&current, &location);
                    record.redirect_chain.push(RedirectHop { status, location });
                    continue;
                }
            }

            let headers = normalize_headers(response.headers());
            record.final_url = Some(response.url().to_string());
            record.status = Some(status);
            record.http_version = Some(version_label(response.version()).to_string());
            record.fingerprint = fingerprint(&headers);
            record.headers = headers;
            return record;
        }
    }

    async fn probe(&self, url: &str) -> Result<Response, reqwest::Error> {
        match self.client.head(url).send().await {
            Ok(response)
                if response.status() != StatusCode::METHOD_NOT_ALLOWED
                    && response.status() != StatusCode::NOT_IMPLEMENTED =>
            {
                Ok(response)
            }
            Ok(response) => {
                tracing::trace!("HEAD {} refused with {}, trying ranged GET", url, response.status());
                self.ranged_get(url).await
            }
            Err(e) => {
                tracing::trace!("HEAD {} failed ({}), trying ranged GET", url, e);
                self.ranged_get(url).await
            }
        }
    }

    async fn ranged_get(&self, url: &str) -> Result<Response, reqwest::Error> {
        self.client.get(url).header(RANGE, "bytes=0-0").send().await
    }
}

/// Resolves a `Location` value against the URL that produced it
fn resolve_location(base: &str, location: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(location))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| location.to_string())
}

/// Lower-cases names and joins repeated headers with `, `
pub fn normalize_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut normalized: BTreeMap<String, String> = BTreeMap::new();

    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        normalized
            .entry(name.as_str().to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    normalized
}

/// Extracts the server-identifying subset of normalized headers
pub fn fingerprint(headers: &BTreeMap<String, String>) -> Fingerprint {
    let get = |name: &str| headers.get(name).cloned();

    Fingerprint {
        server: get("server"),
        x_powered_by: get("x-powered-by"),
        via: get("via"),
        cdn: get("cf-ray")
            .or_else(|| get("x-amz-cf-id"))
            .or_else(|| get("x-akamai-transformed")),
        content_type: get("content-type"),
        content_length: get("content-length"),
        set_cookie_present: headers.contains_key("set-cookie"),
        security_headers: SECURITY_HEADERS
            .iter()
            .filter_map(|h| headers.get(*h).map(|v| (h.to_string(), v.clone())))
            .collect(),
    }
}

fn version_label(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/?",
    }
}
