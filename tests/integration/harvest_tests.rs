//! Integration tests for the harvest session
//!
//! These tests use wiremock for direct fetches and fingerprinting, and a
//! scripted renderer in place of Chromium for rendered fetches.

use async_trait::async_trait;
use leakwatch::config::Config;
use leakwatch::harvest::{
    artifact_path, FetchResult, FingerprintCollector, PageRenderer, ProtectionKind, RetryPolicy,
};
use leakwatch::registry::timestamp;
use leakwatch::{Endpoint, FetchStrategy, HarvestError, HarvestOptions, Harvester, Registry, Target};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const LEAK_PAGE: &str = "<html><head><title>LockBit 3.0 Leaked Data</title></head>\
    <body><h1>Published companies</h1><ul><li>acme-corp</li><li>globex</li></ul></body></html>";

const CLOUDFLARE_PAGE: &str = "<html><head><title>Just a moment...</title></head>\
    <body>Checking your browser before accessing lockbit. Ray ID: 8a1b2c3d</body></html>";

/// Serves the same page for every render and counts calls
struct FixedRenderer {
    content: String,
    title: String,
    renders: AtomicUsize,
    prepared: AtomicUsize,
}

impl FixedRenderer {
    fn new(content: &str, title: &str) -> Arc<Self> {
        Arc::new(Self {
            content: content.to_string(),
            title: title.to_string(),
            renders: AtomicUsize::new(0),
            prepared: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl PageRenderer for FixedRenderer {
    async fn prepare(&self) -> Result<(), HarvestError> {
        self.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn render(&self, _url: &str, _settle: Duration) -> FetchResult {
        self.renders.fetch_add(1, Ordering::SeqCst);
        FetchResult::Fetched {
            content: self.content.clone(),
            title: self.title.clone(),
        }
    }
}

/// Holds each render open briefly and records the peak number in flight
struct PacedRenderer {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    renders: AtomicUsize,
}

#[async_trait]
impl PageRenderer for PacedRenderer {
    async fn render(&self, _url: &str, _settle: Duration) -> FetchResult {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.renders.fetch_add(1, Ordering::SeqCst);
        FetchResult::Fetched {
            content: LEAK_PAGE.to_string(),
            title: "LockBit 3.0 Leaked Data".to_string(),
        }
    }
}

/// Zero-delay retry timing so tests do not sleep
fn instant_retries() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        settle_base: Duration::ZERO,
        settle_step: Duration::ZERO,
        protection_backoff_base: Duration::ZERO,
        protection_backoff_step: Duration::ZERO,
        error_backoff: Duration::ZERO,
    }
}

/// Creates a proxy-less configuration rooted in a temp directory
fn create_test_config(home: &Path, fingerprints: bool) -> Config {
    let mut config = Config::default();
    config.paths.home = home.to_path_buf();
    config.proxy.address = None;
    config.proxy.control_password = None;
    config.harvest.collect_fingerprints = fingerprints;
    config.harvest.direct_timeout_secs = 5;
    config
}

fn write_registry(config: &Config, targets: Vec<Target>) {
    Registry::new(targets)
        .unwrap()
        .save(&config.paths.registry_file())
        .unwrap();
}

fn load_endpoint(config: &Config, target: &str) -> Endpoint {
    let registry = Registry::load(&config.paths.registry_file()).unwrap();
    registry.target(target).unwrap().locations[0].clone()
}

#[tokio::test]
async fn test_direct_fetch_marks_endpoint_available() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LEAK_PAGE))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Server", "nginx")
                .insert_header("X-Frame-Options", "DENY"),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), true);
    let slug = format!("{}/", server.uri());

    let mut target = Target::new("lockbit", vec![Endpoint::new(slug.clone())]);
    target.fetch = FetchStrategy::Direct;
    write_registry(&config, vec![target]);

    let stats = Harvester::new(config.clone())
        .unwrap()
        .run(&HarvestOptions::default())
        .await
        .unwrap();

    assert_eq!(stats.success, 1);
    assert_eq!(stats.skipped, 0);

    let endpoint = load_endpoint(&config, "lockbit");
    assert!(endpoint.available);
    assert!(endpoint.enabled);
    assert_eq!(endpoint.title.as_deref(), Some("LockBit 3.0 Leaked Data"));
    assert!(endpoint.updated.is_some());
    assert!(endpoint.lastscrape.is_some());

    let http = endpoint.http.expect("fingerprint recorded");
    assert_eq!(http.status, Some(200));
    assert!(http.redirect_chain.is_empty());
    assert_eq!(http.fingerprint.server.as_deref(), Some("nginx"));
    assert_eq!(
        http.fingerprint.security_headers.get("x-frame-options").map(String::as_str),
        Some("DENY")
    );

    let artifact = artifact_path(&config.paths.tmp_dir(), "lockbit", &slug);
    assert_eq!(std::fs::read_to_string(artifact).unwrap(), LEAK_PAGE);

    // Lock released at the end of the run
    assert!(!config.paths.lock_file().exists());
}

#[tokio::test]
async fn test_rendered_cloudflare_exhausts_attempts() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), false);
    let slug = "http://lockbit3xyz.onion/".to_string();
    write_registry(
        &config,
        vec![Target::new("lockbit", vec![Endpoint::new(slug.clone())])],
    );

    let renderer = FixedRenderer::new(CLOUDFLARE_PAGE, "Just a moment...");
    let stats = Harvester::new(config.clone())
        .unwrap()
        .with_renderer(renderer.clone())
        .with_retry_policy(instant_retries())
        .run(&HarvestOptions::default())
        .await
        .unwrap();

    assert_eq!(renderer.prepared.load(Ordering::SeqCst), 1);
    assert_eq!(renderer.renders.load(Ordering::SeqCst), 3);
    assert_eq!(stats.protection, 1);
    assert_eq!(stats.protection_by_kind[&ProtectionKind::Cloudflare], 1);

    let endpoint = load_endpoint(&config, "lockbit");
    assert!(!endpoint.available);
    assert!(endpoint.enabled);
    assert_eq!(endpoint.title.as_deref(), Some("Just a moment..."));
    assert!(endpoint.lastscrape.is_some());
    assert!(endpoint.updated.is_none());

    // The challenge page is still kept for inspection
    let artifact = artifact_path(&config.paths.tmp_dir(), "lockbit", &slug);
    assert!(artifact.exists());
}

#[tokio::test]
async fn test_rendered_success_on_first_attempt() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), false);
    write_registry(
        &config,
        vec![Target::new(
            "lockbit",
            vec![Endpoint::new("http://lockbit3xyz.onion/")],
        )],
    );

    let renderer = FixedRenderer::new(LEAK_PAGE, "LockBit 3.0 Leaked Data");
    let stats = Harvester::new(config.clone())
        .unwrap()
        .with_renderer(renderer.clone())
        .with_retry_policy(instant_retries())
        .run(&HarvestOptions::default())
        .await
        .unwrap();

    assert_eq!(renderer.renders.load(Ordering::SeqCst), 1);
    assert_eq!(stats.success, 1);

    let endpoint = load_endpoint(&config, "lockbit");
    assert!(endpoint.available);
    assert_eq!(endpoint.title.as_deref(), Some("LockBit 3.0 Leaked Data"));
}

#[tokio::test]
async fn test_concurrent_fetches_are_bounded() {
    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(dir.path(), false);
    config.harvest.max_concurrent_fetches = 2;

    let endpoints = (0..8)
        .map(|i| Endpoint::new(format!("http://mirror{}.onion/", i)))
        .collect();
    write_registry(&config, vec![Target::new("lockbit", endpoints)]);

    let renderer = Arc::new(PacedRenderer {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        renders: AtomicUsize::new(0),
    });
    let stats = Harvester::new(config.clone())
        .unwrap()
        .with_renderer(renderer.clone())
        .with_retry_policy(instant_retries())
        .run(&HarvestOptions::default())
        .await
        .unwrap();

    assert_eq!(stats.success, 8);
    assert_eq!(renderer.renders.load(Ordering::SeqCst), 8);
    let peak = renderer.peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 2, "peak in-flight renders was {}", peak);
}

#[tokio::test]
async fn test_fresh_endpoint_is_not_fetched() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), false);
    let slug = "http://akira.onion/".to_string();
    write_registry(
        &config,
        vec![Target::new("akira", vec![Endpoint::new(slug.clone())])],
    );

    let tmp = config.paths.tmp_dir();
    std::fs::create_dir_all(&tmp).unwrap();
    std::fs::write(artifact_path(&tmp, "akira", &slug), "<html>cached</html>").unwrap();

    let renderer = FixedRenderer::new(LEAK_PAGE, "unused");
    let stats = Harvester::new(config.clone())
        .unwrap()
        .with_renderer(renderer.clone())
        .with_retry_policy(instant_retries())
        .run(&HarvestOptions::default())
        .await
        .unwrap();

    assert_eq!(stats.skipped, 1);
    assert_eq!(stats.fetched(), 0);
    assert_eq!(renderer.renders.load(Ordering::SeqCst), 0);
    // No rendered work, so the browser is never brought up
    assert_eq!(renderer.prepared.load(Ordering::SeqCst), 0);

    let endpoint = load_endpoint(&config, "akira");
    assert!(endpoint.lastscrape.is_none());
}

#[cfg(unix)]
#[tokio::test]
async fn test_live_lock_refuses_run_without_touching_registry() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), false);
    write_registry(
        &config,
        vec![Target::new("akira", vec![Endpoint::new("http://akira.onion/")])],
    );
    let before = std::fs::read(config.paths.registry_file()).unwrap();

    let lock = config.paths.lock_file();
    std::fs::create_dir_all(lock.parent().unwrap()).unwrap();
    std::fs::write(&lock, "PID: 1\n").unwrap();

    let renderer = FixedRenderer::new(LEAK_PAGE, "unused");
    let result = Harvester::new(config.clone())
        .unwrap()
        .with_renderer(renderer.clone())
        .run(&HarvestOptions::default())
        .await;

    assert!(matches!(
        result,
        Err(HarvestError::LockContention { pid: Some(1) })
    ));
    assert_eq!(renderer.renders.load(Ordering::SeqCst), 0);
    assert_eq!(std::fs::read(config.paths.registry_file()).unwrap(), before);
    assert_eq!(std::fs::read_to_string(&lock).unwrap(), "PID: 1\n");
}

#[cfg(unix)]
#[tokio::test]
async fn test_single_target_run_ignores_lock() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), false);
    write_registry(
        &config,
        vec![Target::new("akira", vec![Endpoint::new("http://akira.onion/")])],
    );

    let lock = config.paths.lock_file();
    std::fs::create_dir_all(lock.parent().unwrap()).unwrap();
    std::fs::write(&lock, "PID: 1\n").unwrap();

    let options = HarvestOptions {
        target: Some("akira".to_string()),
        ..HarvestOptions::default()
    };
    let stats = Harvester::new(config.clone())
        .unwrap()
        .with_renderer(FixedRenderer::new(LEAK_PAGE, "Akira"))
        .with_retry_policy(instant_retries())
        .run(&options)
        .await
        .unwrap();

    assert_eq!(stats.success, 1);
    assert!(lock.exists());
}

#[tokio::test]
async fn test_unknown_target_is_an_error() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), false);
    write_registry(
        &config,
        vec![Target::new("akira", vec![Endpoint::new("http://akira.onion/")])],
    );
    let before = std::fs::read(config.paths.registry_file()).unwrap();

    let options = HarvestOptions {
        target: Some("nosuchgroup".to_string()),
        ..HarvestOptions::default()
    };
    let result = Harvester::new(config.clone()).unwrap().run(&options).await;

    assert!(matches!(result, Err(HarvestError::TargetNotFound(name)) if name == "nosuchgroup"));
    assert_eq!(std::fs::read(config.paths.registry_file()).unwrap(), before);
}

#[tokio::test]
async fn test_long_offline_endpoint_is_disabled_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), false);

    let mut endpoint = Endpoint::new(format!("{}/", server.uri()));
    endpoint.available = true;
    endpoint.updated = Some(timestamp::now() - chrono::Duration::days(45));
    let mut target = Target::new("medusa", vec![endpoint]);
    target.fetch = FetchStrategy::Direct;
    write_registry(&config, vec![target]);

    let harvester = Harvester::new(config.clone()).unwrap();
    let stats = harvester.run(&HarvestOptions::default()).await.unwrap();
    assert_eq!(stats.error, 1);
    assert_eq!(stats.disabled, 1);

    let endpoint = load_endpoint(&config, "medusa");
    assert!(!endpoint.enabled);
    assert!(!endpoint.available);
    assert!(endpoint.lastscrape.is_some());

    // A disabled endpoint is no longer selected, so nothing changes
    let stats = harvester.run(&HarvestOptions::default()).await.unwrap();
    assert_eq!(stats.total, 0);
    assert_eq!(stats.disabled, 0);
    assert_eq!(load_endpoint(&config, "medusa"), endpoint);
}

#[tokio::test]
async fn test_recent_failure_keeps_endpoint_enabled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(dir.path(), false);

    let mut endpoint = Endpoint::new(format!("{}/", server.uri()));
    endpoint.available = true;
    endpoint.updated = Some(timestamp::now() - chrono::Duration::days(3));
    let mut target = Target::new("play", vec![endpoint]);
    target.fetch = FetchStrategy::Direct;
    write_registry(&config, vec![target]);

    Harvester::new(config.clone())
        .unwrap()
        .run(&HarvestOptions::default())
        .await
        .unwrap();

    let endpoint = load_endpoint(&config, "play");
    assert!(endpoint.enabled);
    assert!(!endpoint.available);
}

fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_fingerprint_follows_redirects_to_final_response() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/new"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Server", "Apache")
                .insert_header("CF-Ray", "8a1b2c3d-AMS"),
        )
        .mount(&server)
        .await;

    let collector = FingerprintCollector::with_client(no_redirect_client(), 5);
    let record = collector.collect(&format!("{}/old", server.uri())).await;

    assert_eq!(record.redirect_chain.len(), 1);
    assert_eq!(record.redirect_chain[0].status, 301);
    assert_eq!(record.redirect_chain[0].location, "/new");
    assert_eq!(record.status, Some(200));
    assert!(record.final_url.unwrap().ends_with("/new"));
    assert_eq!(record.fingerprint.server.as_deref(), Some("Apache"));
    assert_eq!(record.fingerprint.cdn.as_deref(), Some("8a1b2c3d-AMS"));
    assert!(record.error.is_none());
}

#[tokio::test]
async fn test_fingerprint_stops_after_five_hops() {
    let server = MockServer::start().await;
    for hop in 0..8 {
        Mock::given(method("HEAD"))
            .and(path(format!("/hop{}", hop)))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", format!("/hop{}", hop + 1).as_str()),
            )
            .mount(&server)
            .await;
    }

    let collector = FingerprintCollector::with_client(no_redirect_client(), 5);
    let record = collector.collect(&format!("{}/hop0", server.uri())).await;

    assert_eq!(record.redirect_chain.len(), 5);
    assert_eq!(record.redirect_chain[4].location, "/hop5");
    assert_eq!(record.status, Some(302));
    assert!(record.final_url.unwrap().ends_with("/hop5"));
}

#[tokio::test]
async fn test_fingerprint_falls_back_to_ranged_get() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(206).insert_header("Server", "openresty"))
        .mount(&server)
        .await;

    let collector = FingerprintCollector::with_client(no_redirect_client(), 5);
    let record = collector.collect(&format!("{}/", server.uri())).await;

    assert_eq!(record.status, Some(206));
    assert_eq!(record.fingerprint.server.as_deref(), Some("openresty"));
}
