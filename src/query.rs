use crate::decision::entry_time;
use crate::metadata::{Index, IndexEntry};
use crate::render;
use crate::store::SnapshotStore;
use anyhow::Result;
use chrono::Local;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

/// Snapshots listed when a load identifier matches nothing.
const SUGGESTIONS: usize = 5;
const TOP_TAGS: usize = 10;

/// `YYYY-MM-DD HH:MM` in local time, or the raw timestamp when undated.
pub fn human_time(entry: &IndexEntry) -> String {
    match entry_time(entry) {
        Some(t) => t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        None => entry.timestamp.clone(),
    }
}

fn short_id(session_id: &str) -> &str {
    session_id.get(..8).unwrap_or(session_id)
}

/// Read-only views over one project's snapshot store.
pub struct QueryService<'a> {
    store: &'a SnapshotStore,
    index: Index,
}

/// One row of the grouped listing.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionGroup {
    pub session_id: String,
    pub snapshots: usize,
    pub latest: IndexEntry,
    pub total_messages: usize,
}

#[derive(Debug)]
pub enum LoadOutcome {
    Found { entry: IndexEntry, content: String },
    NotFound { available: Vec<IndexEntry> },
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub entry: IndexEntry,
    pub occurrences: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Stats {
    pub total_sessions: usize,
    pub total_snapshots: usize,
    pub total_messages: usize,
    pub projects: usize,
    pub by_kind: BTreeMap<String, usize>,
    pub top_tags: Vec<(String, usize)>,
    pub first: Option<String>,
    pub last: Option<String>,
    pub storage_bytes: u64,
}

impl<'a> QueryService<'a> {
    pub fn new(store: &'a SnapshotStore) -> Self {
        Self {
            index: store.read_index(),
            store,
        }
    }

    /// Entries newest first, optionally only sessions starting with `prefix`.
    pub fn list(&self, prefix: Option<&str>) -> Vec<&IndexEntry> {
        self.index
            .newest_first()
            .into_iter()
            .filter(|e| prefix.is_none_or(|p| e.session_id.starts_with(p)))
            .collect()
    }

    /// One row per session, most recently active first.
    pub fn sessions(&self) -> Vec<SessionGroup> {
        let mut groups: Vec<SessionGroup> = Vec::new();
        for entry in self.index.newest_first() {
            match groups.iter_mut().find(|g| g.session_id == entry.session_id) {
                Some(group) => {
                    group.snapshots += 1;
                    group.total_messages += entry.message_count;
                }
                None => groups.push(SessionGroup {
                    session_id: entry.session_id.clone(),
                    snapshots: 1,
                    latest: entry.clone(),
                    total_messages: entry.message_count,
                }),
            }
        }
        groups
    }

    fn resolve(&self, id: Option<&str>) -> Option<&IndexEntry> {
        match id {
            Some(id) => self
                .index
                .newest_first()
                .into_iter()
                .find(|e| e.session_id.starts_with(id) || e.timestamp.starts_with(id)),
            None => self
                .index
                .last_session
                .as_deref()
                .and_then(|sid| self.index.latest_for(sid))
                .or_else(|| self.index.most_recent()),
        }
    }

    /// The restoration block for one snapshot, without any freshness check.
    pub fn load(&self, id: Option<&str>) -> Result<LoadOutcome> {
        if self.index.entries.is_empty() {
            return Ok(LoadOutcome::Empty);
        }
        let found = self
            .resolve(id)
            .and_then(|entry| self.store.read_summary(entry).map(|s| (entry, s)));
        match found {
            Some((entry, summary)) => Ok(LoadOutcome::Found {
                entry: entry.clone(),
                content: render::restored_context(entry, &summary, "manual load")?,
            }),
            None => Ok(LoadOutcome::NotFound {
                available: self
                    .index
                    .newest_first()
                    .into_iter()
                    .take(SUGGESTIONS)
                    .cloned()
                    .collect(),
            }),
        }
    }

    /// Snapshots whose summary mentions `keyword`, most mentions first.
    pub fn search(&self, keyword: &str) -> Vec<SearchHit> {
        let needle = keyword.to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        // newest_first plus a stable sort keeps recency as the tie-break.
        let mut hits: Vec<SearchHit> = self
            .index
            .newest_first()
            .into_iter()
            .filter_map(|entry| {
                let text = self.store.read_summary(entry)?.to_lowercase();
                let occurrences = text.matches(&needle).count();
                (occurrences > 0).then(|| SearchHit {
                    entry: entry.clone(),
                    occurrences,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
        hits
    }

    pub fn stats(&self) -> Stats {
        let entries = &self.index.entries;
        if entries.is_empty() {
            return Stats {
                storage_bytes: self.store.storage_bytes(),
                ..Stats::default()
            };
        }

        let mut sessions: Vec<&str> = entries.iter().map(|e| e.session_id.as_str()).collect();
        sessions.sort_unstable();
        sessions.dedup();
        let mut projects: Vec<&str> = entries.iter().map(|e| e.project.as_str()).collect();
        projects.sort_unstable();
        projects.dedup();

        let mut by_kind: BTreeMap<String, usize> = BTreeMap::new();
        let mut tag_counts: HashMap<&str, usize> = HashMap::new();
        for entry in entries {
            let kind = entry
                .digest_kind
                .map(|k| k.to_string())
                .unwrap_or_else(|| "unknown".into());
            *by_kind.entry(kind).or_insert(0) += 1;
            for tag in &entry.tags {
                *tag_counts.entry(tag.as_str()).or_insert(0) += 1;
            }
        }
        let mut top_tags: Vec<(String, usize)> = tag_counts
            .into_iter()
            .map(|(t, c)| (t.to_string(), c))
            .collect();
        top_tags.sort_by(|(a, ca), (b, cb)| cb.cmp(ca).then_with(|| a.cmp(b)));
        top_tags.truncate(TOP_TAGS);

        let ordered = self.index.newest_first();
        Stats {
            total_sessions: sessions.len(),
            total_snapshots: entries.len(),
            total_messages: entries.iter().map(|e| e.message_count).sum(),
            projects: projects.len(),
            by_kind,
            top_tags,
            first: ordered.last().map(|e| human_time(e)),
            last: ordered.first().map(|e| human_time(e)),
            storage_bytes: self.store.storage_bytes(),
        }
    }
}

// ===================================================================
// Markdown output
// ===================================================================

const NO_SNAPSHOTS: &str = "No session snapshots found for this project.\n";

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

pub fn format_list(entries: &[&IndexEntry]) -> String {
    if entries.is_empty() {
        return NO_SNAPSHOTS.to_string();
    }
    let mut out = format!("# Session Snapshots ({})\n\n", entries.len());
    out.push_str("| Time | Session | Trigger | Messages | Files | Snapshot |\n");
    out.push_str("|------|---------|---------|----------|-------|----------|\n");
    for e in entries {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} |",
            human_time(e),
            short_id(&e.session_id),
            e.trigger,
            e.message_count,
            e.files_modified.len(),
            e.timestamp
        );
    }
    out
}

pub fn format_sessions(groups: &[SessionGroup]) -> String {
    if groups.is_empty() {
        return NO_SNAPSHOTS.to_string();
    }
    let mut out = format!("# Sessions ({})\n\n", groups.len());
    out.push_str("| Session | Snapshots | Last Activity | Messages |\n");
    out.push_str("|---------|-----------|---------------|----------|\n");
    for g in groups {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            g.session_id,
            g.snapshots,
            human_time(&g.latest),
            g.total_messages
        );
    }
    out
}

pub fn format_load(outcome: &LoadOutcome, id: Option<&str>) -> String {
    match outcome {
        LoadOutcome::Found { content, .. } => format!("{content}\n"),
        LoadOutcome::Empty => NO_SNAPSHOTS.to_string(),
        LoadOutcome::NotFound { available } => {
            let mut out = match id {
                Some(id) => format!("No snapshot matches `{id}`.\n"),
                None => "The most recent snapshot is no longer on disk.\n".to_string(),
            };
            out.push_str("\nAvailable snapshots:\n");
            for e in available {
                let _ = writeln!(
                    out,
                    "- `{}` / `{}` ({})",
                    e.session_id,
                    e.timestamp,
                    human_time(e)
                );
            }
            out
        }
    }
}

pub fn format_search(keyword: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("No snapshots mention `{keyword}`.\n");
    }
    let mut out = format!("# Search: `{keyword}` ({} snapshots)\n\n", hits.len());
    for hit in hits {
        let e = &hit.entry;
        let _ = writeln!(
            out,
            "- **{}** `{}` / `{}`: {} {}",
            human_time(e),
            short_id(&e.session_id),
            e.timestamp,
            hit.occurrences,
            if hit.occurrences == 1 { "match" } else { "matches" }
        );
    }
    out
}

pub fn format_stats(stats: &Stats) -> String {
    let mut out = String::from("# Snapshot Statistics\n\n");
    let _ = writeln!(out, "- **Sessions:** {}", stats.total_sessions);
    let _ = writeln!(out, "- **Snapshots:** {}", stats.total_snapshots);
    let _ = writeln!(out, "- **Messages:** {}", stats.total_messages);
    let _ = writeln!(out, "- **Projects:** {}", stats.projects);
    let _ = writeln!(out, "- **Storage:** {}", format_bytes(stats.storage_bytes));
    if let (Some(first), Some(last)) = (&stats.first, &stats.last) {
        let _ = writeln!(out, "- **First snapshot:** {first}");
        let _ = writeln!(out, "- **Last snapshot:** {last}");
    }
    if !stats.by_kind.is_empty() {
        out.push_str("\n## Digest Kinds\n");
        for (kind, count) in &stats.by_kind {
            let _ = writeln!(out, "- {kind}: {count}");
        }
    }
    if !stats.top_tags.is_empty() {
        out.push_str("\n## Top Tags\n");
        for (tag, count) in &stats.top_tags {
            let _ = writeln!(out, "- {tag}: {count}");
        }
    }
    out
}
