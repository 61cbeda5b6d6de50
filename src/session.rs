use crate::decision::{RestoreContext, RestoreDecision, decide_restore};
use crate::digest::{self, DigestRequest, Summarizer};
use crate::metadata::IndexEntry;
use crate::preferences::Preferences;
use crate::remote::{AnthropicSummarizer, RemoteConfig};
use crate::render;
use crate::store::{SnapshotDraft, SnapshotStore};
use crate::transcript;
use crate::types::{PreCompactInput, SessionStartInput};
use anyhow::{Context, Result};
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory under the project holding preferences and snapshots.
const CLAUDE_DIR: &str = ".claude";

pub struct Session {
    project: PathBuf,
    session_id: String,
    store: SnapshotStore,
    pub prefs: Preferences,
}

impl Session {
    /// Resolve the project from `cwd` and load its preferences.
    ///
    /// Nothing is created here: restoring context must leave the project
    /// untouched.
    pub fn open(cwd: &str, session_id: &str) -> Result<Self> {
        let project = PathBuf::from(cwd);
        let prefs = Preferences::load(&project.join(CLAUDE_DIR))?;
        Ok(Self::with_prefs(project, session_id, prefs))
    }

    /// Like [`Session::open`], but broken preferences fall back to the
    /// defaults. A new session must start whether or not context is restored.
    pub fn open_for_restore(cwd: &str, session_id: &str) -> Self {
        let project = PathBuf::from(cwd);
        let prefs = Preferences::load(&project.join(CLAUDE_DIR)).unwrap_or_else(|err| {
            warn!(error = %format!("{err:#}"), "using default preferences");
            Preferences::default()
        });
        Self::with_prefs(project, session_id, prefs)
    }

    fn with_prefs(project: PathBuf, session_id: &str, prefs: Preferences) -> Self {
        Self {
            store: SnapshotStore::for_project(&project),
            project,
            session_id: session_id.to_string(),
            prefs,
        }
    }

    // ---------------------------------------------------------------
    // Hook handlers
    // ---------------------------------------------------------------

    /// Extract the transcript, digest it, and persist a snapshot.
    pub fn handle_pre_compact(&self, input: &PreCompactInput) -> Result<()> {
        let remote = RemoteConfig::from_env(&self.prefs).map(AnthropicSummarizer::new);
        self.pre_compact_with(input, remote.as_ref().map(|s| s as &dyn Summarizer))
    }

    pub(crate) fn pre_compact_with(
        &self,
        input: &PreCompactInput,
        summarizer: Option<&dyn Summarizer>,
    ) -> Result<()> {
        let transcript_path = input
            .common
            .transcript_path
            .as_deref()
            .context("PreCompact payload has no transcript_path")?;
        let record = transcript::extract(Path::new(transcript_path))?;

        let now = Local::now();
        let created_at = now.to_rfc3339();
        let project_path = self.project.to_string_lossy();
        let custom_instructions = Some(input.custom_instructions.trim()).filter(|s| !s.is_empty());

        let request = DigestRequest {
            session_id: &self.session_id,
            project_path: &project_path,
            trigger: input.trigger,
            created_at: &created_at,
            custom_instructions,
            record: &record,
        };
        let digest = digest::generate(&request, summarizer, &self.prefs);

        let snapshot = self.store.write_at(
            SnapshotDraft {
                session_id: self.session_id.clone(),
                trigger: input.trigger,
                project_path: project_path.into_owned(),
                digest,
                files_modified: record.files_touched,
                message_count: record.message_count,
                tool_call_count: record.tool_calls.len(),
                custom_instructions: custom_instructions.map(String::from),
            },
            now,
        )?;
        info!(
            session = %snapshot.session_id,
            trigger = %snapshot.trigger,
            messages = snapshot.message_count,
            "pre-compaction snapshot saved"
        );
        Ok(())
    }

    /// The context block to inject into the new session, if any.
    pub fn handle_session_start(&self, input: &SessionStartInput) -> Result<Option<String>> {
        let source = input.source();
        let index = self.store.read_index();
        let available = |entry: &IndexEntry| self.store.summary_path(entry).is_file();

        let decision = decide_restore(&RestoreContext {
            index: &index,
            source_enabled: self.prefs.restores_on(source),
            now: Local::now(),
            freshness: self.prefs.freshness_window(),
            snapshot_available: &available,
        });

        let entry = match decision {
            RestoreDecision::Restore { entry, age } => {
                debug!(age_minutes = age.num_minutes(), "snapshot is fresh");
                entry
            }
            RestoreDecision::SourceDisabled => {
                debug!(source = source.as_str(), "restoration disabled for this source");
                return Ok(None);
            }
            RestoreDecision::EmptyIndex => {
                debug!("no snapshots for this project");
                return Ok(None);
            }
            RestoreDecision::Unavailable => {
                info!("no readable snapshot to restore");
                return Ok(None);
            }
            RestoreDecision::Stale { entry, age } => {
                info!(
                    session = %entry.session_id,
                    age_hours = age.num_hours(),
                    "latest snapshot is too old to restore"
                );
                return Ok(None);
            }
        };

        // The file can vanish between the decision and the read.
        let Some(summary) = self.store.read_summary(entry) else {
            return Ok(None);
        };
        let block = render::restored_context(entry, &summary, source.as_str())?;
        info!(
            session = %entry.session_id,
            timestamp = %entry.timestamp,
            "restoring previous session context"
        );
        Ok(Some(block))
    }
}
