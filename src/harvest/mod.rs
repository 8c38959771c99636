//! Harvest module: fetching leak-site snapshots
//!
//! This module contains the per-endpoint pipeline:
//! - Freshness gating on artifact age
//! - Rendered (headless browser) and direct (proxied GET) fetch strategies
//! - Challenge-page detection and the rendered retry loop
//! - HTTP fingerprint collection
//! - The harvest session that applies outcomes to the registry

#[cfg(feature = "browser")]
mod browser;
mod capture;
mod fetcher;
mod fingerprint;
pub mod freshness;
mod harvester;
pub mod protection;
mod retry;
mod stats;

#[cfg(feature = "browser")]
pub use browser::ChromiumRenderer;
pub use capture::{capture_path, favicon_path, SideChannels};
pub use fetcher::{
    extract_title, DirectFetcher, FetchError, FetchErrorKind, FetchResult, PageRenderer, NO_TITLE,
};
pub use fingerprint::{fingerprint, normalize_headers, FingerprintCollector, SECURITY_HEADERS};
pub use freshness::{artifact_path, needs_fetch, Freshness};
pub use harvester::{HarvestOptions, Harvester};
pub use protection::{classify, Classification, ProtectionKind};
pub use retry::{fetch_with_retry, AttemptOutcome, RetryOutcome, RetryPolicy};
pub use stats::{print_summary, EndpointStatus, HarvestStats};
