use crate::error::KeeperError;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Longest user or assistant text kept per message.
const MAX_MESSAGE_CHARS: usize = 2000;

/// Tool arguments that name a file the tool touched.
const PATH_ARGUMENTS: &[&str] = &["file_path", "notebook_path"];

// ===================================================================
// Top-level transcript entry, one per JSONL line
// ===================================================================

/// A single line in a Claude Code `.jsonl` transcript file.
///
/// Only conversation turns are typed; every other line type (progress,
/// system, summary, file-history-snapshot, ...) collapses into `Other`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum TranscriptEntry {
    #[serde(rename = "user")]
    User(ConversationEntry),
    #[serde(rename = "assistant")]
    Assistant(ConversationEntry),
    /// Older transcripts wrote tool calls as their own top-level lines.
    #[serde(rename = "tool_use")]
    ToolUse(ToolUseBlock),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub is_meta: Option<bool>,
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub role: Option<String>,
    pub content: MessageContent,
}

/// `message.content` can be a plain string (user text) or an array of
/// content blocks (assistant responses, tool results).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

// ===================================================================
// Content blocks inside message.content[]
// ===================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text(TextBlock),
    #[serde(rename = "tool_use")]
    ToolUse(ToolUseBlock),
    #[serde(rename = "tool_result")]
    ToolResult,
    /// thinking, image, redacted_thinking, ...
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ToolUseBlock {
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

// ===================================================================
// Normalized record
// ===================================================================

/// One tool call found in the transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub input: serde_json::Value,
    /// File the call touched, when its arguments name one.
    pub path: Option<String>,
}

/// Everything later stages need from a transcript, with the raw entries
/// dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationRecord {
    /// User plus assistant turns.
    pub message_count: usize,
    pub user_messages: Vec<String>,
    pub assistant_messages: Vec<String>,
    pub tool_calls: Vec<ToolInvocation>,
    /// Distinct touched paths in first-seen order.
    pub files_touched: Vec<String>,
    /// Lines that failed to parse and were skipped.
    pub skipped_lines: usize,
}

impl ConversationRecord {
    /// The earliest `n` user requests, in conversation order.
    pub fn early_requests(&self, n: usize) -> &[String] {
        &self.user_messages[..n.min(self.user_messages.len())]
    }

    /// Invocation count per tool name.
    pub fn tool_histogram(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for call in &self.tool_calls {
            *counts.entry(call.name.clone()).or_insert(0) += 1;
        }
        counts
    }
}

// ===================================================================
// Transcript: parsed JSONL with typed entries
// ===================================================================

/// A parsed Claude Code JSONL transcript.
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

/// Truncate a string to `max` chars on a char boundary.
pub(crate) fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        None => s,
        Some((byte_idx, _)) => &s[..byte_idx],
    }
}

fn touched_path(input: &serde_json::Value) -> Option<String> {
    PATH_ARGUMENTS
        .iter()
        .find_map(|key| input.get(*key).and_then(|v| v.as_str()))
        .filter(|p| !p.is_empty())
        .map(String::from)
}

/// Host-injected text that says nothing about what the user asked for.
fn is_injected(text: &str) -> bool {
    text.contains("<system-reminder>")
}

impl Transcript {
    /// Parse a JSONL transcript string. Returns the transcript and any
    /// lines that failed to parse (with 1-based line number and error).
    pub fn parse(contents: &str) -> (Self, Vec<(usize, String)>) {
        let mut entries = Vec::new();
        let mut errors = Vec::new();

        for (i, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<TranscriptEntry>(line) {
                Ok(TranscriptEntry::Other) => {}
                Ok(entry) => entries.push(entry),
                Err(e) => errors.push((i + 1, format!("{e}"))),
            }
        }

        (Self { entries }, errors)
    }

    /// Walk the entries once and build the normalized record.
    pub fn record(&self) -> ConversationRecord {
        let mut record = ConversationRecord::default();
        let mut seen_paths: HashSet<String> = HashSet::new();

        let mut push_tool = |record: &mut ConversationRecord, tu: &ToolUseBlock| {
            let path = touched_path(&tu.input);
            if let Some(p) = &path {
                if seen_paths.insert(p.clone()) {
                    record.files_touched.push(p.clone());
                }
            }
            record.tool_calls.push(ToolInvocation {
                name: tu.name.clone(),
                input: tu.input.clone(),
                path,
            });
        };

        for entry in &self.entries {
            match entry {
                TranscriptEntry::User(conv) => {
                    record.message_count += 1;
                    if conv.is_meta == Some(true) {
                        continue;
                    }
                    for text in conv.texts() {
                        if !is_injected(text) {
                            record
                                .user_messages
                                .push(truncate(text, MAX_MESSAGE_CHARS).to_string());
                        }
                    }
                }
                TranscriptEntry::Assistant(conv) => {
                    record.message_count += 1;
                    for text in conv.texts() {
                        record
                            .assistant_messages
                            .push(truncate(text, MAX_MESSAGE_CHARS).to_string());
                    }
                    if let MessageContent::Blocks(blocks) = &conv.message.content {
                        for block in blocks {
                            if let ContentBlock::ToolUse(tu) = block {
                                push_tool(&mut record, tu);
                            }
                        }
                    }
                }
                TranscriptEntry::ToolUse(tu) => push_tool(&mut record, tu),
                TranscriptEntry::Other => {}
            }
        }

        record
    }

    /// Number of entries that count as turns (messages or tool calls).
    pub fn turn_count(&self) -> usize {
        self.entries.len()
    }
}

impl ConversationEntry {
    /// Non-blank text parts of this message, trimmed.
    fn texts(&self) -> Vec<&str> {
        match &self.message.content {
            MessageContent::Text(t) => {
                let t = t.trim();
                if t.is_empty() { Vec::new() } else { vec![t] }
            }
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text(t) if !t.text.trim().is_empty() => Some(t.text.trim()),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// Read the transcript at `path` and extract its normalized record.
///
/// Malformed lines are skipped; the call only fails when the file cannot
/// be read or not a single turn survives parsing.
pub fn extract(path: &Path) -> Result<ConversationRecord, KeeperError> {
    let contents = fs::read_to_string(path).map_err(|source| KeeperError::TranscriptUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let (transcript, errors) = Transcript::parse(&contents);
    for (line, err) in &errors {
        warn!(line, error = %err, "skipping malformed transcript line");
    }
    if transcript.turn_count() == 0 {
        return Err(KeeperError::TranscriptEmpty {
            path: path.to_path_buf(),
            skipped: errors.len(),
        });
    }

    let mut record = transcript.record();
    record.skipped_lines = errors.len();
    debug!(
        messages = record.message_count,
        tool_calls = record.tool_calls.len(),
        files = record.files_touched.len(),
        skipped = record.skipped_lines,
        "extracted transcript"
    );
    Ok(record)
}

#[cfg(test)]
mod tests;
