use crate::digest::{Digest, DigestKind};
use crate::types::CompactTrigger;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// The machine-readable form of one snapshot.
/// Stored as `.claude/summaries/<session_id>/<timestamp>/metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub session_id: String,
    pub timestamp: String,
    /// RFC 3339 wall-clock time with offset.
    pub created_at: String,
    pub trigger: CompactTrigger,
    pub project_path: String,
    pub digest_kind: DigestKind,
    pub digest: Digest,
    #[serde(default)]
    pub files_modified: Vec<String>,
    pub message_count: usize,
    #[serde(default)]
    pub tool_call_count: usize,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
}

/// Lightweight catalog row for one snapshot, enough to list and search
/// without opening the snapshot itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub session_id: String,
    pub timestamp: String,
    pub created_at: String,
    pub trigger: CompactTrigger,
    pub project: String,
    #[serde(default)]
    pub files_modified: Vec<String>,
    pub message_count: usize,
    /// Relative to the summaries root.
    pub summary_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest_kind: Option<DigestKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl IndexEntry {
    /// `created_at` parsed, or `None` when it is missing or not RFC 3339.
    pub fn created_time(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(&self.created_at).ok()
    }
}

impl From<&SnapshotRecord> for IndexEntry {
    fn from(record: &SnapshotRecord) -> Self {
        Self {
            session_id: record.session_id.clone(),
            timestamp: record.timestamp.clone(),
            created_at: record.created_at.clone(),
            trigger: record.trigger,
            project: record.project_path.clone(),
            files_modified: record.files_modified.clone(),
            message_count: record.message_count,
            summary_path: format!("{}/{}/summary.md", record.session_id, record.timestamp),
            digest_kind: Some(record.digest_kind),
            tags: record.tags.clone(),
        }
    }
}

/// The per-project catalog of every snapshot.
/// Stored as `.claude/summaries/index.json`.
///
/// Entries are only ever appended; `last_session` is the one mutable field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Index {
    #[serde(default)]
    pub entries: Vec<IndexEntry>,
    #[serde(default)]
    pub last_session: Option<String>,
}

impl Index {
    /// Entries sorted newest first (by creation time, then timestamp).
    pub fn newest_first(&self) -> Vec<&IndexEntry> {
        let mut entries: Vec<&IndexEntry> = self.entries.iter().collect();
        entries.sort_by(|a, b| {
            b.created_time()
                .cmp(&a.created_time())
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        entries
    }

    /// The newest entry recorded for `session_id`.
    pub fn latest_for(&self, session_id: &str) -> Option<&IndexEntry> {
        self.entries
            .iter()
            .filter(|e| e.session_id == session_id)
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp))
    }

    /// The newest entry across all sessions.
    pub fn most_recent(&self) -> Option<&IndexEntry> {
        self.newest_first().into_iter().next()
    }
}
