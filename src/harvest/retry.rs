//! Retry controller for rendered fetches
//!
//! Each attempt gets a longer settle period than the last so slow
//! JavaScript gates have time to clear. Challenge pages back off longer
//! than transport errors.

use crate::harvest::fetcher::{FetchError, FetchResult, PageRenderer};
use crate::harvest::protection::{classify, Classification, ProtectionKind};
use std::time::Duration;

/// Attempt budget and timing for rendered fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,

    /// Settle wait of attempt `n` is `settle_base + n * settle_step`
    pub settle_base: Duration,
    pub settle_step: Duration,

    /// Pause after a challenge page on attempt `n` is `base + n * step`
    pub protection_backoff_base: Duration,
    pub protection_backoff_step: Duration,

    /// Pause after a retryable error
    pub error_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            settle_base: Duration::from_secs(60),
            settle_step: Duration::from_secs(30),
            protection_backoff_base: Duration::from_secs(10),
            protection_backoff_step: Duration::from_secs(10),
            error_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn settle_timeout(&self, attempt: u32) -> Duration {
        self.settle_base + self.settle_step * attempt
    }

    pub fn protection_backoff(&self, attempt: u32) -> Duration {
        self.protection_backoff_base + self.protection_backoff_step * attempt
    }
}

/// Classified result of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success { content: String, title: String },
    Protection { kind: ProtectionKind, content: String, title: String },
    TransientError(FetchError),
    FatalError(FetchError),
}

impl AttemptOutcome {
    pub fn from_fetch(result: FetchResult) -> Self {
        match result {
            FetchResult::Fetched { content, title } => match classify(&content, &title) {
                Classification::Genuine => Self::Success { content, title },
                Classification::Protection(kind) => Self::Protection {
                    kind,
                    content,
                    title,
                },
            },
            FetchResult::Failed(error) if error.kind.is_retryable() => Self::TransientError(error),
            FetchResult::Failed(error) => Self::FatalError(error),
        }
    }
}

/// Terminal result of the retry loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Success {
        content: String,
        title: String,
        attempts: u32,
    },

    /// Every attempt hit a challenge; content is the last challenge page
    ProtectionFailed {
        kind: ProtectionKind,
        content: String,
        title: String,
        attempts: u32,
    },

    Error { error: FetchError, attempts: u32 },
}

impl RetryOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. }
            | Self::ProtectionFailed { attempts, .. }
            | Self::Error { attempts, .. } => *attempts,
        }
    }
}

/// Fetches `url` through `renderer`, retrying challenges and transient errors
///
/// # Arguments
///
/// * `renderer` - Browser backend
/// * `url` - Endpoint address
/// * `policy` - Attempt budget and timing
///
/// # Returns
///
/// The terminal outcome; never more than `policy.max_attempts` renders
pub async fn fetch_with_retry(
    renderer: &dyn PageRenderer,
    url: &str,
    policy: &RetryPolicy,
) -> RetryOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let settle = policy.settle_timeout(attempt);
        let last = attempt + 1 >= max_attempts;
        let attempts = attempt + 1;

        tracing::debug!(
            "Rendering {} (attempt {}/{}, settle {}s)",
            url,
            attempts,
            max_attempts,
            settle.as_secs()
        );

        match AttemptOutcome::from_fetch(renderer.render(url, settle).await) {
            AttemptOutcome::Success { content, title } => {
                return RetryOutcome::Success {
                    content,
                    title,
                    attempts,
                };
            }
            AttemptOutcome::Protection {
                kind,
                content,
                title,
            } => {
                if last {
                    return RetryOutcome::ProtectionFailed {
                        kind,
                        content,
                        title,
                        attempts,
                    };
                }
                let backoff = policy.protection_backoff(attempt);
                tracing::info!(
                    "{} protection at {}, retrying in {}s",
                    kind,
                    url,
                    backoff.as_secs()
                );
                tokio::time::sleep(backoff).await;
            }
            AttemptOutcome::TransientError(error) => {
                if last {
                    return RetryOutcome::Error { error, attempts };
                }
                tracing::debug!("Attempt {} for {} failed: {}", attempts, url, error);
                tokio::time::sleep(policy.error_backoff).await;
            }
            AttemptOutcome::FatalError(error) => {
                return RetryOutcome::Error { error, attempts };
            }
        }

        attempt += 1;
    }
}
