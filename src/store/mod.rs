use crate::digest::Digest;
use crate::error::KeeperError;
use crate::metadata::{Index, IndexEntry, SnapshotRecord};
use crate::render;
use crate::types::CompactTrigger;
use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Where snapshots live, relative to the project.
pub const SUMMARIES_DIR: &str = ".claude/summaries";
pub const INDEX_FILE: &str = "index.json";
pub const LATEST: &str = "latest";
pub const SUMMARY_FILE: &str = "summary.md";
pub const METADATA_FILE: &str = "metadata.json";
const LOCK_FILE: &str = ".index.lock";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
/// Highest same-second counter; a fifth digit would break lexical order.
const MAX_COUNTER: u32 = 9999;

/// Read and deserialize a JSON file, returning `None` if it doesn't exist.
fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(s) => {
            let val =
                serde_json::from_str(&s).with_context(|| format!("parsing {}", path.display()))?;
            Ok(Some(val))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

/// Write `bytes` to a hidden sibling, sync, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path.parent().context("path has no parent")?;
    let tmp = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|s| s.to_str()).unwrap_or("file"),
        process::id()
    ));

    {
        let mut file = File::create(&tmp).with_context(|| format!("create tmp {}", tmp.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("write tmp {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("sync tmp {}", tmp.display()))?;
    }

    fs::rename(&tmp, path)
        .with_context(|| format!("rename tmp {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("write {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("sync {}", path.display()))
}

// ===================================================================
// Index lock
// ===================================================================

/// Advisory exclusive lock held across one index read-modify-write.
struct IndexLock {
    file: File,
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

impl IndexLock {
    fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("open index lock {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("lock index {}", path.display()))?;
        Ok(Self { file })
    }
}

// ===================================================================
// Timestamps
// ===================================================================

/// The timestamp for a new snapshot.
///
/// `base` is the wall-clock timestamp. When it does not sort after the
/// session's newest existing timestamp, a counter is appended to the newest
/// one instead, so lexical order always matches creation order. The counter
/// is fixed-width and refuses to go past `_9999`.
pub fn next_timestamp(base: &str, newest: Option<&str>) -> Result<String> {
    let Some(newest) = newest else {
        return Ok(base.to_string());
    };
    if base > newest {
        return Ok(base.to_string());
    }
    // "YYYYMMDD_HHMMSS" is 15 chars; a disambiguated one carries "_NNNN".
    let counter = newest
        .get(15..)
        .and_then(|s| s.strip_prefix('_'))
        .and_then(|c| c.parse::<u32>().ok());
    match counter {
        Some(n) if n >= MAX_COUNTER => {
            bail!("timestamp counter exhausted after {newest}")
        }
        Some(n) => Ok(format!("{}_{:04}", &newest[..15], n + 1)),
        None => Ok(format!("{newest}_0001")),
    }
}

/// A session id must name exactly one directory directly under the root.
fn check_session_id(session_id: &str) -> Result<()> {
    let invalid = session_id.is_empty()
        || session_id.starts_with('.')
        || session_id.contains(['/', '\\'])
        || session_id.contains("..");
    if invalid {
        bail!("invalid session id {session_id:?}");
    }
    Ok(())
}

/// Staging names left behind by an interrupted writer.
fn is_staging_name(name: &str) -> bool {
    name.starts_with(".tmp-")
        || name.starts_with(&format!(".{INDEX_FILE}.tmp-"))
        || name.starts_with(&format!(".{LATEST}.tmp-"))
}

fn is_snapshot_dir_name(name: &str) -> bool {
    name != LATEST && !name.starts_with('.')
}

// ===================================================================
// Latest pointer
// ===================================================================

#[cfg(unix)]
fn point_latest(session_dir: &Path, timestamp: &str) -> Result<()> {
    let tmp = session_dir.join(format!(".{LATEST}.tmp-{}", process::id()));
    match fs::remove_file(&tmp) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("removing {}", tmp.display())),
    }
    std::os::unix::fs::symlink(timestamp, &tmp)
        .with_context(|| format!("linking {} -> {timestamp}", tmp.display()))?;
    let latest = session_dir.join(LATEST);
    fs::rename(&tmp, &latest)
        .with_context(|| format!("rename {} -> {}", tmp.display(), latest.display()))
}

#[cfg(not(unix))]
fn point_latest(session_dir: &Path, timestamp: &str) -> Result<()> {
    write_atomic(&session_dir.join(LATEST), timestamp.as_bytes())
}

// ===================================================================
// Snapshot store
// ===================================================================

/// Everything about a new snapshot except where and when it is stored.
#[derive(Debug, Clone)]
pub struct SnapshotDraft {
    pub session_id: String,
    pub trigger: CompactTrigger,
    pub project_path: String,
    pub digest: Digest,
    pub files_modified: Vec<String>,
    pub message_count: usize,
    pub tool_call_count: usize,
    pub custom_instructions: Option<String>,
}

/// The per-project snapshot tree under `.claude/summaries`.
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn for_project(project: &Path) -> Self {
        Self::at(project.join(SUMMARIES_DIR))
    }

    pub fn at(root: PathBuf) -> Self {
        Self { root }
    }

    // ---------------------------------------------------------------
    // Private path helpers
    // ---------------------------------------------------------------

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    pub fn summary_path(&self, entry: &IndexEntry) -> PathBuf {
        self.root.join(&entry.summary_path)
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// The index, or an empty one when it is missing or unreadable.
    pub fn read_index(&self) -> Index {
        match read_json_file::<Index>(&self.index_path()) {
            Ok(Some(index)) => index,
            Ok(None) => Index::default(),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "ignoring unreadable index");
                Index::default()
            }
        }
    }

    /// The rendered summary an entry points at, if it is still on disk.
    pub fn read_summary(&self, entry: &IndexEntry) -> Option<String> {
        let path = self.summary_path(entry);
        match fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(err) => {
                debug!(path = %path.display(), error = %err, "snapshot summary unavailable");
                None
            }
        }
    }

    /// Total bytes of every file under the store root.
    pub fn storage_bytes(&self) -> u64 {
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    fn newest_timestamp(&self, session_id: &str) -> Result<Option<String>> {
        let dir = self.session_dir(session_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
        };
        let mut newest: Option<String> = None;
        for entry in entries {
            let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            if !is_snapshot_dir_name(&name) {
                continue;
            }
            if newest.as_deref().is_none_or(|n| name.as_str() > n) {
                newest = Some(name);
            }
        }
        Ok(newest)
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    /// Persist a new snapshot created at `now`.
    ///
    /// The snapshot directory is complete before anything references it,
    /// and the index is only touched after the directory is in place.
    pub fn write_at(
        &self,
        draft: SnapshotDraft,
        now: DateTime<Local>,
    ) -> Result<SnapshotRecord, KeeperError> {
        self.write_inner(draft, now)
            .map_err(|err| KeeperError::store(&self.root, format!("{err:#}")))
    }

    fn write_inner(&self, draft: SnapshotDraft, now: DateTime<Local>) -> Result<SnapshotRecord> {
        check_session_id(&draft.session_id)?;
        fs::create_dir_all(&self.root)
            .with_context(|| format!("creating {}", self.root.display()))?;
        let _lock = IndexLock::acquire(&self.root.join(LOCK_FILE))?;
        self.sweep_staging();

        let base = now.format(TIMESTAMP_FORMAT).to_string();
        let newest = self.newest_timestamp(&draft.session_id)?;
        let timestamp = next_timestamp(&base, newest.as_deref())?;

        let record = SnapshotRecord {
            session_id: draft.session_id,
            timestamp,
            created_at: now.to_rfc3339(),
            trigger: draft.trigger,
            project_path: draft.project_path,
            digest_kind: draft.digest.kind(),
            tags: draft.digest.tags().to_vec(),
            digest: draft.digest,
            files_modified: draft.files_modified,
            message_count: draft.message_count,
            tool_call_count: draft.tool_call_count,
            custom_instructions: draft.custom_instructions,
        };

        self.write_snapshot_dir(&record)?;

        let session_dir = self.session_dir(&record.session_id);
        if let Err(err) = point_latest(&session_dir, &record.timestamp) {
            warn!(error = %format!("{err:#}"), "latest pointer not updated");
        }

        self.append_to_index(&record)?;
        info!(
            session = %record.session_id,
            timestamp = %record.timestamp,
            kind = %record.digest_kind,
            "snapshot written"
        );
        Ok(record)
    }

    /// Remove staging entries left by a writer that died mid-write. Every
    /// writer stages under the index lock, so while it is held nothing
    /// matching is live.
    fn sweep_staging(&self) {
        let stale: Vec<walkdir::DirEntry> = WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_str().is_some_and(is_staging_name))
            .collect();
        for entry in &stale {
            let path = entry.path();
            let removed = if entry.file_type().is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };
            match removed {
                Ok(()) => debug!(path = %path.display(), "removed stale staging entry"),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "stale staging entry left in place")
                }
            }
        }
    }

    /// Write both artifacts into a hidden directory, then rename it into
    /// `<session>/<timestamp>`.
    fn write_snapshot_dir(&self, record: &SnapshotRecord) -> Result<()> {
        let session_dir = self.session_dir(&record.session_id);
        fs::create_dir_all(&session_dir)
            .with_context(|| format!("creating {}", session_dir.display()))?;

        let tmp = session_dir.join(format!(".tmp-{}-{}", record.timestamp, process::id()));
        let staged = (|| -> Result<()> {
            fs::create_dir_all(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
            let summary = render::summary(record)?;
            write_synced(&tmp.join(SUMMARY_FILE), summary.as_bytes())?;
            let metadata = serde_json::to_vec_pretty(record).context("serialize metadata")?;
            write_synced(&tmp.join(METADATA_FILE), &metadata)?;
            let dest = session_dir.join(&record.timestamp);
            fs::rename(&tmp, &dest)
                .with_context(|| format!("rename {} -> {}", tmp.display(), dest.display()))
        })();

        if staged.is_err() {
            let _ = fs::remove_dir_all(&tmp);
        }
        staged
    }

    fn append_to_index(&self, record: &SnapshotRecord) -> Result<()> {
        let mut index = self.load_index_for_update()?;
        let entry = IndexEntry::from(record);
        let already = index
            .entries
            .iter()
            .any(|e| e.session_id == entry.session_id && e.timestamp == entry.timestamp);
        if !already {
            index.entries.push(entry);
        }
        index.last_session = Some(record.session_id.clone());

        let bytes = serde_json::to_vec_pretty(&index).context("serialize index")?;
        write_atomic(&self.index_path(), &bytes)
    }

    /// The index as it stands on disk. An unparseable index is moved aside
    /// and rebuilt from the snapshots themselves.
    fn load_index_for_update(&self) -> Result<Index> {
        let path = self.index_path();
        match read_json_file::<Index>(&path) {
            Ok(Some(index)) => Ok(index),
            Ok(None) => Ok(Index::default()),
            Err(err) if path.is_file() => {
                let aside = self.root.join(format!(
                    "{INDEX_FILE}.corrupt-{}",
                    Local::now().format(TIMESTAMP_FORMAT)
                ));
                warn!(
                    error = %format!("{err:#}"),
                    moved_to = %aside.display(),
                    "index unreadable, rebuilding from snapshots"
                );
                fs::rename(&path, &aside)
                    .with_context(|| format!("moving {} aside", path.display()))?;
                Ok(self.rebuild_index())
            }
            Err(err) => Err(err),
        }
    }

    /// Reconstruct the index by scanning every `metadata.json`.
    pub fn rebuild_index(&self) -> Index {
        let mut records: Vec<SnapshotRecord> = WalkDir::new(&self.root)
            .min_depth(3)
            .max_depth(3)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() == METADATA_FILE)
            .filter(|e| {
                // Skip half-staged `.tmp-*` directories.
                e.path()
                    .parent()
                    .and_then(Path::file_name)
                    .and_then(|n| n.to_str())
                    .is_some_and(is_snapshot_dir_name)
            })
            .filter_map(|e| match read_json_file::<SnapshotRecord>(e.path()) {
                Ok(record) => record,
                Err(err) => {
                    warn!(error = %format!("{err:#}"), "skipping unreadable snapshot metadata");
                    None
                }
            })
            .collect();
        let mut entries: Vec<IndexEntry> = records.iter().map(IndexEntry::from).collect();
        entries.sort_by(|a, b| {
            a.created_time()
                .cmp(&b.created_time())
                .then_with(|| a.timestamp.cmp(&b.timestamp))
        });
        let last_session = entries.last().map(|e| e.session_id.clone());
        Index {
            entries,
            last_session,
        }
    }
}
