use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Browser-like user agent sent by both fetch strategies
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Main configuration structure for Leakwatch
///
/// Every section is optional; a missing file or section yields the defaults
/// the harvester was tuned with.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub proxy: ProxyConfig,
    pub browser: BrowserConfig,
    pub harvest: HarvestConfig,
    pub fleet: FleetConfig,
    pub scheduler: SchedulerConfig,
    pub extract: ExtractConfig,
    pub capture: CaptureConfig,

    /// File this configuration was loaded from, forwarded to child stages
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Install layout
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Base install directory; relative sub-directories resolve against it
    pub home: PathBuf,

    /// Registry and extracted records
    #[serde(rename = "db-dir")]
    pub db_dir: PathBuf,

    /// Artifacts, lock, checkpoint and status files
    #[serde(rename = "tmp-dir")]
    pub tmp_dir: PathBuf,

    /// Captures and favicons
    #[serde(rename = "images-dir")]
    pub images_dir: PathBuf,

    /// Per-cycle scheduler logs
    #[serde(rename = "logs-dir")]
    pub logs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            home: PathBuf::from("."),
            db_dir: PathBuf::from("db"),
            tmp_dir: PathBuf::from("tmp"),
            images_dir: PathBuf::from("images"),
            logs_dir: PathBuf::from("logs"),
        }
    }
}

impl PathsConfig {
    fn resolve(&self, sub: &Path) -> PathBuf {
        if sub.is_absolute() {
            sub.to_path_buf()
        } else {
            self.home.join(sub)
        }
    }

    pub fn db_dir(&self) -> PathBuf {
        self.resolve(&self.db_dir)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.resolve(&self.tmp_dir)
    }

    pub fn images_dir(&self) -> PathBuf {
        self.resolve(&self.images_dir)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.resolve(&self.logs_dir)
    }

    /// The shared target registry
    pub fn registry_file(&self) -> PathBuf {
        self.db_dir().join("groups.json")
    }

    /// Extraction output; its mtime is the daemon's fallback scrape marker
    pub fn victims_file(&self) -> PathBuf {
        self.db_dir().join("victims.json")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.tmp_dir().join("scrape.lock")
    }

    pub fn checkpoint_file(&self) -> PathBuf {
        self.tmp_dir().join("scrape_checkpoint.json")
    }

    pub fn progress_file(&self) -> PathBuf {
        self.tmp_dir().join("scrape_progress.json")
    }

    pub fn scheduler_status_file(&self) -> PathBuf {
        self.tmp_dir().join("scheduler_status.json")
    }
}

/// Anonymizing proxy settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// SOCKS address all target traffic goes through; `None` disables proxying
    pub address: Option<String>,

    /// Tor control port host
    #[serde(rename = "control-host")]
    pub control_host: String,

    #[serde(rename = "control-port")]
    pub control_port: u16,

    /// Control port password; without it no reload is attempted
    #[serde(rename = "control-password")]
    pub control_password: Option<String>,

    /// Ask Tor to reload before each harvest run
    #[serde(rename = "reload-before-run")]
    pub reload_before_run: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            address: Some("socks5h://127.0.0.1:9050".to_string()),
            control_host: "127.0.0.1".to_string(),
            control_port: 9051,
            control_password: None,
            reload_before_run: true,
        }
    }
}

/// Headless browser settings for rendered fetches
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Chromium binary; auto-detected when unset
    pub executable: Option<PathBuf>,

    pub headless: bool,

    #[serde(rename = "navigation-timeout-secs")]
    pub navigation_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            navigation_timeout_secs: 90,
        }
    }
}

impl BrowserConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }
}

/// Harvest run behavior
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Artifacts younger than this are not re-fetched
    #[serde(rename = "freshness-minutes")]
    pub freshness_minutes: u64,

    /// Upper bound on endpoint fetches in flight
    #[serde(rename = "max-concurrent-fetches")]
    pub max_concurrent_fetches: usize,

    /// Endpoints whose last success is older than this are disabled on failure
    #[serde(rename = "offline-disable-days")]
    pub offline_disable_days: i64,

    #[serde(rename = "direct-timeout-secs")]
    pub direct_timeout_secs: u64,

    #[serde(rename = "user-agent")]
    pub user_agent: String,

    #[serde(rename = "collect-fingerprints")]
    pub collect_fingerprints: bool,

    #[serde(rename = "max-redirects")]
    pub max_redirects: usize,

    #[serde(rename = "skip-favicon-download")]
    pub skip_favicon_download: bool,

    /// Captures and favicons older than this are refreshed
    #[serde(rename = "capture-refresh-minutes")]
    pub capture_refresh_minutes: u64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            freshness_minutes: 60,
            max_concurrent_fetches: 20,
            offline_disable_days: 30,
            direct_timeout_secs: 45,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            collect_fingerprints: true,
            max_redirects: 5,
            skip_favicon_download: true,
            capture_refresh_minutes: 10080,
        }
    }
}

impl HarvestConfig {
    pub fn freshness_threshold(&self) -> Duration {
        Duration::from_secs(self.freshness_minutes * 60)
    }

    pub fn capture_refresh(&self) -> Duration {
        Duration::from_secs(self.capture_refresh_minutes * 60)
    }

    pub fn direct_timeout(&self) -> Duration {
        Duration::from_secs(self.direct_timeout_secs)
    }
}

/// Fleet crawl stage limits
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    #[serde(rename = "harvest-timeout-secs")]
    pub harvest_timeout_secs: u64,

    #[serde(rename = "extract-timeout-secs")]
    pub extract_timeout_secs: u64,

    #[serde(rename = "inter-target-delay-secs")]
    pub inter_target_delay_secs: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            harvest_timeout_secs: 600,
            extract_timeout_secs: 300,
            inter_target_delay_secs: 2,
        }
    }
}

/// Update scheduler timing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Daemon cycle interval
    #[serde(rename = "interval-hours")]
    pub interval_hours: u64,

    /// In-process periodic trigger interval
    #[serde(rename = "periodic-interval-minutes")]
    pub periodic_interval_minutes: u64,

    #[serde(rename = "initial-delay-secs")]
    pub initial_delay_secs: u64,

    /// How often the daemon checks whether a cycle is due
    #[serde(rename = "poll-interval-secs")]
    pub poll_interval_secs: u64,

    #[serde(rename = "harvest-timeout-secs")]
    pub harvest_timeout_secs: u64,

    #[serde(rename = "extract-timeout-secs")]
    pub extract_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_hours: 6,
            periodic_interval_minutes: 30,
            initial_delay_secs: 10,
            poll_interval_secs: 300,
            harvest_timeout_secs: 1800,
            extract_timeout_secs: 600,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours * 3600)
    }

    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_interval_minutes * 60)
    }
}

/// External extraction stage
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Program followed by its fixed arguments
    pub command: Vec<String>,

    /// Flag placed before the target name for single-target extraction
    #[serde(rename = "target-flag")]
    pub target_flag: String,

    #[serde(rename = "working-dir")]
    pub working_dir: Option<PathBuf>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            command: vec!["python3".to_string(), "bin/parse.py".to_string()],
            target_flag: "-G".to_string(),
            working_dir: None,
        }
    }
}

/// Optional screenshot collaborator; empty command disables capture
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub command: Vec<String>,

    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 120,
        }
    }
}
