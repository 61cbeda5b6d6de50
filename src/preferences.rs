use crate::types::SessionStartSource;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

pub const FILENAME: &str = "context-keeper.toml";

const DEFAULT_RESTORE_SOURCES: &[SessionStartSource] = &[
    SessionStartSource::Startup,
    SessionStartSource::Resume,
    SessionStartSource::Compact,
];

/// User-facing preferences stored in `.claude/context-keeper.toml`.
///
/// ```toml
/// freshness_hours = 24
/// request_sample = 5
/// keyword_count = 10
/// remote_timeout_secs = 90
/// remote_model = "claude-sonnet-4-20250514"
/// restore_sources = ["startup", "resume", "compact"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Preferences {
    /// Snapshots older than this are never restored automatically.
    #[serde(default = "default_freshness_hours")]
    pub freshness_hours: u64,

    /// How many of the earliest user requests a structured digest keeps.
    #[serde(default = "default_request_sample")]
    pub request_sample: usize,

    /// How many keywords a structured digest keeps.
    #[serde(default = "default_keyword_count")]
    pub keyword_count: usize,

    /// Upper bound on the remote summary request.
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,

    /// Model used for remote summaries. `CLAUDE_SUMMARY_MODEL` wins over this.
    #[serde(default = "default_remote_model")]
    pub remote_model: String,

    /// Session start sources that receive restored context.
    #[serde(default = "default_restore_sources")]
    pub restore_sources: Vec<SessionStartSource>,
}

fn default_freshness_hours() -> u64 {
    24
}

fn default_request_sample() -> usize {
    5
}

fn default_keyword_count() -> usize {
    10
}

fn default_remote_timeout_secs() -> u64 {
    90
}

fn default_remote_model() -> String {
    "claude-sonnet-4-20250514".into()
}

fn default_restore_sources() -> Vec<SessionStartSource> {
    DEFAULT_RESTORE_SOURCES.to_vec()
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            freshness_hours: default_freshness_hours(),
            request_sample: default_request_sample(),
            keyword_count: default_keyword_count(),
            remote_timeout_secs: default_remote_timeout_secs(),
            remote_model: default_remote_model(),
            restore_sources: default_restore_sources(),
        }
    }
}

impl Preferences {
    /// Load preferences from `<dir>/context-keeper.toml`.
    ///
    /// A missing file yields the defaults and is not created: the
    /// session-start path must stay read-only. Missing keys in an existing
    /// file are filled in with defaults via serde.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(FILENAME);
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let prefs: Preferences = toml::from_str(&contents)
                    .with_context(|| format!("parsing {}", path.display()))?;
                Ok(prefs)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Preferences::default()),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    /// Hours beyond what a `chrono::Duration` holds mean "never stale".
    pub fn freshness_window(&self) -> chrono::Duration {
        i64::try_from(self.freshness_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    pub fn restores_on(&self, source: SessionStartSource) -> bool {
        self.restore_sources.contains(&source)
    }
}
