//! Best-effort visual side channels
//!
//! After a genuine fetch the harvester refreshes the endpoint's screenshot
//! (through an external capture command) and favicon when they are missing
//! or older than the refresh period. Nothing here can fail an endpoint.

use crate::config::Config;
use crate::harvest::freshness;
use crate::registry::endpoint_key;
use crate::supervise::{run_stage, StageCommand, StageOutput};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// `{images_dir}/groups/{target}-{md5(slug)}.png`
pub fn capture_path(images_dir: &Path, target: &str, slug: &str) -> PathBuf {
    images_dir
        .join("groups")
        .join(format!("{}.png", endpoint_key(target, slug)))
}

/// `{images_dir}/groups/favicons/{target}-{md5(slug)}.png`
pub fn favicon_path(images_dir: &Path, target: &str, slug: &str) -> PathBuf {
    images_dir
        .join("groups")
        .join("favicons")
        .join(format!("{}.png", endpoint_key(target, slug)))
}

/// Screenshot and favicon refresher
#[derive(Debug, Clone)]
pub struct SideChannels {
    images_dir: PathBuf,
    refresh: Duration,
    capture: Option<(StageCommand, Duration)>,
    favicon_client: Option<Client>,
}

impl SideChannels {
    /// Builds the side channels; `client` is the proxied direct-fetch client
    pub fn new(config: &Config, client: Client) -> Self {
        let capture = StageCommand::from_argv(&config.capture.command)
            .map(|command| (command, Duration::from_secs(config.capture.timeout_secs)));

        let favicon_client = (!config.harvest.skip_favicon_download).then_some(client);

        Self {
            images_dir: config.paths.images_dir(),
            refresh: config.harvest.capture_refresh(),
            capture,
            favicon_client,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.capture.is_some() || self.favicon_client.is_some()
    }

    /// Refreshes whatever is stale for one endpoint
    pub async fn refresh(&self, target: &str, slug: &str) {
        if let Some((command, timeout)) = &self.capture {
            let destination = capture_path(&self.images_dir, target, slug);
            if freshness::needs_fetch(&destination, self.refresh) {
                self.run_capture(command, *timeout, slug, &destination).await;
            }
        }

        if let Some(client) = &self.favicon_client {
            let destination = favicon_path(&self.images_dir, target, slug);
            if freshness::needs_fetch(&destination, self.refresh) {
                if let Err(e) = download_favicon(client, slug, &destination).await {
                    tracing::debug!("Favicon for {} not saved: {}", slug, e);
                }
            }
        }
    }

    async fn run_capture(&self, command: &StageCommand, timeout: Duration, slug: &str, destination: &Path) {
        if let Some(parent) = destination.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!("Cannot create {}: {}", parent.display(), e);
                return;
            }
        }

        let command = command.with_args([slug.to_string(), destination.display().to_string()]);
        let report = run_stage(&command, timeout, &StageOutput::Capture).await;

        if report.outcome.is_success() {
            tracing::debug!("Captured {}", slug);
        } else {
            tracing::warn!("Capture of {} {}: {}", slug, report.outcome, report.stderr_tail);
        }
    }
}

/// Fetches `{origin}/favicon.ico` and stores it at `destination`
async fn download_favicon(client: &Client, slug: &str, destination: &Path) -> Result<(), String> {
    let url = Url::parse(slug)
        .and_then(|u| u.join("/favicon.ico"))
        .map_err(|e| e.to_string())?;

    let bytes = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| e.to_string())?
        .bytes()
        .await
        .map_err(|e| e.to_string())?;

    if bytes.is_empty() {
        return Err("empty favicon".to_string());
    }

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| e.to_string())?;
    }

    tokio::fs::write(destination, &bytes)
        .await
        .map_err(|e| e.to_string())
}
