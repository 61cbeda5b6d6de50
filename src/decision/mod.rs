use crate::metadata::{Index, IndexEntry};
use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDateTime, TimeZone};

// ===================================================================
// Input: all I/O-derived state, gathered by Session before calling decide_restore()
// ===================================================================

pub struct RestoreContext<'a> {
    pub index: &'a Index,
    /// Whether preferences allow restoring for this session start source.
    pub source_enabled: bool,
    pub now: DateTime<Local>,
    /// Snapshots older than this are left alone.
    pub freshness: Duration,
    /// Whether an entry's rendered summary is still on disk.
    pub snapshot_available: &'a dyn Fn(&IndexEntry) -> bool,
}

// ===================================================================
// Output: what handle_session_start() should do
// ===================================================================

#[derive(Debug, PartialEq)]
pub enum RestoreDecision<'a> {
    /// The session start source does not receive restored context.
    SourceDisabled,
    /// The project has no snapshots yet.
    EmptyIndex,
    /// Entries exist but none has a readable, dated snapshot.
    Unavailable,
    /// The best candidate is older than the freshness window.
    Stale { entry: &'a IndexEntry, age: Duration },
    /// Inject this snapshot.
    Restore { entry: &'a IndexEntry, age: Duration },
}

// ===================================================================
// Helpers
// ===================================================================

/// When an entry was created: `created_at` if it parses, otherwise the
/// local time encoded in the timestamp directory name.
pub fn entry_time(entry: &IndexEntry) -> Option<DateTime<FixedOffset>> {
    if let Some(t) = entry.created_time() {
        return Some(t);
    }
    let stamp = entry.timestamp.get(..15)?;
    let naive = NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S").ok()?;
    Local
        .from_local_datetime(&naive)
        .single()
        .map(|t| t.fixed_offset())
}

/// Entries worth trying, best first: the newest snapshot of `last_session`,
/// then the newest snapshot overall.
fn candidates(index: &Index) -> Vec<&IndexEntry> {
    let mut out: Vec<&IndexEntry> = Vec::new();
    if let Some(entry) = index
        .last_session
        .as_deref()
        .and_then(|sid| index.latest_for(sid))
    {
        out.push(entry);
    }
    for entry in index.newest_first() {
        if !out.iter().any(|e| std::ptr::eq(*e, entry)) {
            out.push(entry);
        }
    }
    out
}

// ===================================================================
// Decision
// ===================================================================

pub fn decide_restore<'a>(ctx: &RestoreContext<'a>) -> RestoreDecision<'a> {
    if !ctx.source_enabled {
        return RestoreDecision::SourceDisabled;
    }
    if ctx.index.entries.is_empty() {
        return RestoreDecision::EmptyIndex;
    }

    let usable = candidates(ctx.index).into_iter().find_map(|entry| {
        let created = entry_time(entry)?;
        (ctx.snapshot_available)(entry).then_some((entry, created))
    });
    let Some((entry, created)) = usable else {
        return RestoreDecision::Unavailable;
    };

    // A snapshot from the future (clock skew) counts as brand new.
    let age = (ctx.now.fixed_offset() - created).max(Duration::zero());
    if age > ctx.freshness {
        RestoreDecision::Stale { entry, age }
    } else {
        RestoreDecision::Restore { entry, age }
    }
}
