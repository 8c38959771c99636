//! Harvest session
//!
//! One `Harvester::run` is one pass over the registry:
//! 1. Take the run lock (full runs only)
//! 2. Load the registry and select endpoints
//! 3. Skip endpoints whose artifact is still fresh
//! 4. Fetch the rest concurrently, bounded by `max-concurrent-fetches`
//! 5. Apply each outcome to its endpoint as it completes
//! 6. Write the registry once and release the lock

use crate::config::Config;
use crate::harvest::capture::SideChannels;
use crate::harvest::fetcher::{DirectFetcher, FetchError, FetchErrorKind, FetchResult, PageRenderer};
use crate::harvest::fingerprint::FingerprintCollector;
use crate::harvest::freshness::{self, artifact_path};
use crate::harvest::protection::{classify, ProtectionKind};
use crate::harvest::retry::{fetch_with_retry, RetryOutcome, RetryPolicy};
use crate::harvest::stats::{EndpointStatus, HarvestStats};
use crate::lock::RunLock;
use crate::proxy::signal_reload;
use crate::registry::{timestamp, FetchStrategy, HttpRecord, Registry};
use crate::{HarvestError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// What a harvest run covers
#[derive(Debug, Clone, Default)]
pub struct HarvestOptions {
    /// Restrict the run to one target; such runs skip the run lock
    pub target: Option<String>,

    /// Remove a previous run lock before starting
    pub force: bool,

    /// Also fetch endpoints whose `enabled` flag is off
    pub bypass_enabled: bool,
}

/// One endpoint scheduled for fetching
#[derive(Debug, Clone)]
struct Job {
    target_idx: usize,
    endpoint_idx: usize,
    target: String,
    slug: String,
    strategy: FetchStrategy,
    artifact: PathBuf,
}

/// Terminal outcome of one endpoint, before it is applied to the registry
#[derive(Debug, Clone, PartialEq, Eq)]
enum EndpointOutcome {
    /// Content fetched; a direct fetch may still carry a challenge page
    Fetched {
        title: String,
        challenge: Option<ProtectionKind>,
    },

    /// Every rendered attempt hit a challenge
    Blocked { title: String, kind: ProtectionKind },

    Failed(FetchError),
}

#[derive(Debug)]
struct EndpointReport {
    job: Job,
    outcome: EndpointOutcome,
    http: Option<HttpRecord>,
}

/// Per-run fetch machinery shared by every worker
struct FetchContext {
    direct: DirectFetcher,
    renderer: Option<Arc<dyn PageRenderer>>,
    fingerprints: Option<FingerprintCollector>,
    side_channels: SideChannels,
    retry: RetryPolicy,
}

/// Harvest session
pub struct Harvester {
    config: Arc<Config>,
    direct: DirectFetcher,
    fingerprints: Option<FingerprintCollector>,
    side_channels: SideChannels,
    renderer: Option<Arc<dyn PageRenderer>>,
    retry: RetryPolicy,
}

impl Harvester {
    /// Creates a harvester with proxied HTTP clients built from `config`
    ///
    /// The browser is not launched here; it starts on the first run that has
    /// a rendered endpoint to fetch.
    pub fn new(config: Config) -> Result<Self> {
        let direct = DirectFetcher::new(&config)?;
        let fingerprints = if config.harvest.collect_fingerprints {
            Some(FingerprintCollector::new(&config)?)
        } else {
            None
        };
        let side_channels = SideChannels::new(&config, direct.client().clone());

        Ok(Self {
            config: Arc::new(config),
            direct,
            fingerprints,
            side_channels,
            renderer: None,
            retry: RetryPolicy::default(),
        })
    }

    /// Uses `renderer` for rendered fetches instead of launching Chromium
    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Runs one harvest pass
    ///
    /// # Arguments
    ///
    /// * `options` - Target selection and lock handling
    ///
    /// # Returns
    ///
    /// * `Ok(HarvestStats)` - The registry was updated and saved
    /// * `Err(HarvestError::LockContention)` - Another full run is active; nothing was read or written
    /// * `Err(HarvestError)` - Registry unreadable, unknown target, or browser launch failure
    pub async fn run(&self, options: &HarvestOptions) -> Result<HarvestStats> {
        let paths = &self.config.paths;
        let lock_path = paths.lock_file();

        if options.force && RunLock::force_clear(&lock_path)? {
            tracing::info!("Removed previous lock {}", lock_path.display());
        }

        let lock = match &options.target {
            None => Some(RunLock::acquire(&lock_path)?),
            Some(_) => None,
        };

        let result = self.run_locked(options).await;

        if let Some(lock) = lock {
            lock.release();
        }

        result
    }

    async fn run_locked(&self, options: &HarvestOptions) -> Result<HarvestStats> {
        let paths = &self.config.paths;

        if self.config.proxy.reload_before_run {
            signal_reload(&self.config.proxy).await;
        }

        let registry_path = paths.registry_file();
        let mut registry = Registry::load(&registry_path)?;

        let tmp_dir = paths.tmp_dir();
        tokio::fs::create_dir_all(&tmp_dir).await?;

        let jobs = select_jobs(&registry, options, &tmp_dir)?;
        let mut stats = HarvestStats::default();

        let threshold = self.config.harvest.freshness_threshold();
        let (pending, fresh): (Vec<Job>, Vec<Job>) = jobs
            .into_iter()
            .partition(|job| freshness::needs_fetch(&job.artifact, threshold));

        for job in &fresh {
            tracing::debug!("[{}] {} is fresh, skipping", job.target, job.slug);
            stats.record(EndpointStatus::Skipped);
        }

        tracing::info!(
            "Harvesting {} endpoint(s), {} fresh",
            pending.len(),
            fresh.len()
        );

        let needs_browser = pending.iter().any(|j| j.strategy.is_rendered());
        let renderer = if needs_browser {
            let renderer = match &self.renderer {
                Some(renderer) => Arc::clone(renderer),
                None => default_renderer(&self.config)?,
            };
            renderer.prepare().await?;
            Some(renderer)
        } else {
            None
        };

        let ctx = Arc::new(FetchContext {
            direct: self.direct.clone(),
            renderer: renderer.clone(),
            fingerprints: self.fingerprints.clone(),
            side_channels: self.side_channels.clone(),
            retry: self.retry,
        });

        let semaphore = Arc::new(Semaphore::new(self.config.harvest.max_concurrent_fetches));
        let mut workers = JoinSet::new();

        for job in pending {
            let ctx = Arc::clone(&ctx);
            let semaphore = Arc::clone(&semaphore);
            workers.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                harvest_endpoint(&ctx, job).await
            });
        }

        let offline_after = chrono::Duration::days(self.config.harvest.offline_disable_days);

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(report) => apply_report(&mut registry, report, offline_after, &mut stats),
                Err(e) => tracing::error!("Endpoint worker failed: {}", e),
            }
        }

        if let Some(renderer) = renderer {
            renderer.shutdown().await;
        }

        registry.save(&registry_path)?;
        tracing::info!("Registry saved to {}", registry_path.display());

        Ok(stats)
    }
}

#[cfg(feature = "browser")]
fn default_renderer(config: &Config) -> Result<Arc<dyn PageRenderer>> {
    Ok(Arc::new(crate::harvest::browser::ChromiumRenderer::new(config)))
}

#[cfg(not(feature = "browser"))]
fn default_renderer(_config: &Config) -> Result<Arc<dyn PageRenderer>> {
    Err(HarvestError::Browser(
        "rendered fetches need the `browser` feature".to_string(),
    ))
}

/// Endpoints the run will consider, in registry order
fn select_jobs(registry: &Registry, options: &HarvestOptions, tmp_dir: &Path) -> Result<Vec<Job>> {
    if let Some(name) = &options.target {
        if registry.target(name).is_none() {
            return Err(HarvestError::TargetNotFound(name.clone()));
        }
    }

    let mut jobs = Vec::new();
    for (target_idx, target) in registry.targets().iter().enumerate() {
        if options.target.as_ref().is_some_and(|name| name != &target.name) {
            continue;
        }

        for (endpoint_idx, endpoint) in target.locations.iter().enumerate() {
            if !endpoint.enabled && !options.bypass_enabled {
                continue;
            }
            jobs.push(Job {
                target_idx,
                endpoint_idx,
                target: target.name.clone(),
                slug: endpoint.slug.clone(),
                strategy: target.fetch,
                artifact: artifact_path(tmp_dir, &target.name, &endpoint.slug),
            });
        }
    }

    Ok(jobs)
}

async fn harvest_endpoint(ctx: &FetchContext, job: Job) -> EndpointReport {
    let (outcome, content) = match job.strategy {
        FetchStrategy::Rendered => fetch_rendered(ctx, &job).await,
        FetchStrategy::Direct => fetch_direct(ctx, &job).await,
    };

    if let Some(content) = &content {
        if let Err(e) = tokio::fs::write(&job.artifact, content).await {
            tracing::warn!("Failed to write {}: {}", job.artifact.display(), e);
        }
    }

    if matches!(outcome, EndpointOutcome::Fetched { challenge: None, .. })
        && ctx.side_channels.is_enabled()
    {
        ctx.side_channels.refresh(&job.target, &job.slug).await;
    }

    let http = match &ctx.fingerprints {
        Some(collector) => Some(collector.collect(&job.slug).await),
        None => None,
    };

    EndpointReport { job, outcome, http }
}

async fn fetch_rendered(ctx: &FetchContext, job: &Job) -> (EndpointOutcome, Option<String>) {
    let Some(renderer) = &ctx.renderer else {
        return (
            EndpointOutcome::Failed(FetchError::fatal("no browser available")),
            None,
        );
    };

    match fetch_with_retry(renderer.as_ref(), &job.slug, &ctx.retry).await {
        RetryOutcome::Success { content, title, .. } => (
            EndpointOutcome::Fetched {
                title,
                challenge: None,
            },
            Some(content),
        ),
        RetryOutcome::ProtectionFailed {
            kind,
            content,
            title,
            ..
        } => (EndpointOutcome::Blocked { title, kind }, Some(content)),
        RetryOutcome::Error { error, .. } => (EndpointOutcome::Failed(error), None),
    }
}

async fn fetch_direct(ctx: &FetchContext, job: &Job) -> (EndpointOutcome, Option<String>) {
    match ctx.direct.fetch(&job.slug).await {
        FetchResult::Fetched { content, title } => {
            let challenge = classify(&content, &title).kind();
            (EndpointOutcome::Fetched { title, challenge }, Some(content))
        }
        FetchResult::Failed(error) => (EndpointOutcome::Failed(error), None),
    }
}

fn apply_report(
    registry: &mut Registry,
    report: EndpointReport,
    offline_after: chrono::Duration,
    stats: &mut HarvestStats,
) {
    let EndpointReport { job, outcome, http } = report;

    let Some(endpoint) = registry
        .targets_mut()
        .get_mut(job.target_idx)
        .and_then(|t| t.locations.get_mut(job.endpoint_idx))
    else {
        tracing::error!("[{}] endpoint {} vanished from registry", job.target, job.slug);
        return;
    };

    let now = timestamp::now();
    let status = match &outcome {
        EndpointOutcome::Fetched { title, challenge } => {
            endpoint.record_success(title, now);
            match challenge {
                Some(kind) => {
                    tracing::info!("[{}] {} fetched, looks like {} protection", job.target, job.slug, kind);
                    EndpointStatus::Protection(*kind)
                }
                None => {
                    tracing::info!("[{}] {} fetched: {}", job.target, job.slug, title);
                    EndpointStatus::Success
                }
            }
        }
        EndpointOutcome::Blocked { title, kind } => {
            endpoint.record_protection(title, now);
            tracing::warn!("[{}] {} blocked by {} protection", job.target, job.slug, kind);
            EndpointStatus::Protection(*kind)
        }
        EndpointOutcome::Failed(error) => {
            if endpoint.record_failure(now, offline_after) {
                tracing::warn!("[{}] {} offline too long, disabled", job.target, job.slug);
                stats.record_disabled();
            }
            tracing::warn!("[{}] {} failed: {}", job.target, job.slug, error);
            match error.kind {
                FetchErrorKind::Timeout => EndpointStatus::Timeout,
                _ => EndpointStatus::Error,
            }
        }
    };

    if let Some(http) = http {
        endpoint.http = Some(http);
    }

    stats.record(status);
}
