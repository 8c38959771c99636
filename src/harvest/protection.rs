//! Anti-bot challenge detection
//!
//! Leak sites sit behind CAPTCHA walls, Cloudflare interstitials and homegrown
//! DDoS gates. A fetched page is treated as a challenge when it matches any of
//! the keyword, size and title heuristics below.

use std::fmt;

/// Phrases that only show up on challenge pages
const PROTECTION_KEYWORDS: &[&str] = &[
    "ddos protection",
    "captcha",
    "please wait",
    "checking your browser",
    "cloudflare",
    "just a moment",
    "verify you are human",
    "enable javascript",
    "security check",
    "access denied",
    "blocked",
    "please enable cookies",
    "one more step",
    "ray id",
    "attention required",
    "are you a robot",
];

/// Title fragments that mark a small page as a gate
const PROTECTION_TITLE_FRAGMENTS: &[&str] =
    &["ddos", "captcha", "protection", "security", "verify", "wait"];

const SMALL_PAGE_BYTES: usize = 5_000;
const TITLE_GATE_BYTES: usize = 50_000;

/// Kind of challenge, first matching group wins
const KIND_GROUPS: &[(ProtectionKind, &[&str])] = &[
    (
        ProtectionKind::Captcha,
        &["captcha", "verify you are human", "are you a robot"],
    ),
    (
        ProtectionKind::Cloudflare,
        &[
            "cloudflare",
            "checking your browser",
            "just a moment",
            "ray id",
            "attention required",
        ],
    ),
    (ProtectionKind::DdosProtection, &["ddos"]),
    (
        ProtectionKind::JsChallenge,
        &["please wait", "checking", "enable javascript", "one more step"],
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtectionKind {
    Captcha,
    Cloudflare,
    DdosProtection,
    JsChallenge,
    Unknown,
}

impl fmt::Display for ProtectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Captcha => "CAPTCHA",
            Self::Cloudflare => "Cloudflare",
            Self::DdosProtection => "DDoS Protection",
            Self::JsChallenge => "JS Challenge",
            Self::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Genuine,
    Protection(ProtectionKind),
}

impl Classification {
    pub fn is_protection(&self) -> bool {
        matches!(self, Self::Protection(_))
    }

    pub fn kind(&self) -> Option<ProtectionKind> {
        match self {
            Self::Genuine => None,
            Self::Protection(kind) => Some(*kind),
        }
    }
}

/// Classifies a fetched page
///
/// # Arguments
///
/// * `content` - Page HTML
/// * `title` - Page title as reported by the fetch strategy
///
/// # Returns
///
/// `Classification::Protection` with the first matching kind, or `Genuine`
pub fn classify(content: &str, title: &str) -> Classification {
    let content_lower = content.to_lowercase();
    let title_lower = title.to_lowercase();

    if is_protection(&content_lower, &title_lower) {
        Classification::Protection(kind_of(&content_lower, &title_lower))
    } else {
        Classification::Genuine
    }
}

fn is_protection(content: &str, title: &str) -> bool {
    if content.is_empty() {
        return true;
    }

    if PROTECTION_KEYWORDS
        .iter()
        .any(|k| content.contains(k) || title.contains(k))
    {
        return true;
    }

    if content.len() < SMALL_PAGE_BYTES && (content.contains("captcha") || content.contains("ddos"))
    {
        return true;
    }

    content.len() < TITLE_GATE_BYTES
        && PROTECTION_TITLE_FRAGMENTS.iter().any(|f| title.contains(f))
}

fn kind_of(content: &str, title: &str) -> ProtectionKind {
    KIND_GROUPS
        .iter()
        .find(|(_, needles)| {
            needles
                .iter()
                .any(|n| content.contains(n) || title.contains(n))
        })
        .map(|(kind, _)| *kind)
        .unwrap_or(ProtectionKind::Unknown)
}
