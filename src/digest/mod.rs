use crate::error::KeeperError;
use crate::preferences::Preferences;
use crate::transcript::{ConversationRecord, truncate};
use crate::types::CompactTrigger;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::OnceLock;
use tracing::{info, warn};

mod stopwords;

/// Most tags kept from a narrative response.
const MAX_TAGS: usize = 10;

// Prompt budget. Each section is capped, then the whole prompt is.
const PROMPT_MESSAGE_SAMPLE: usize = 10;
const PROMPT_TOOL_SAMPLE: usize = 30;
const PROMPT_USER_CHARS: usize = 3000;
const PROMPT_ASSISTANT_CHARS: usize = 3000;
const PROMPT_TOOL_CHARS: usize = 2000;
const PROMPT_BUDGET_CHARS: usize = 16_000;

// ===================================================================
// Digest: exactly one variant per compaction
// ===================================================================

/// Which shape of digest a snapshot carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestKind {
    Narrative,
    Structured,
}

impl fmt::Display for DigestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Narrative => "narrative",
            Self::Structured => "structured",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Digest {
    /// Produced by the remote summarizer.
    Narrative(NarrativeDigest),
    /// Produced locally when the remote summarizer is missing or failed.
    Structured(StructuredDigest),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NarrativeDigest {
    pub topics: Vec<String>,
    pub code_changes: Vec<CodeChange>,
    pub decisions: Vec<String>,
    pub outcomes: Vec<String>,
    pub continuation: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChange {
    pub file: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredDigest {
    pub session_id: String,
    pub project_path: String,
    pub trigger: CompactTrigger,
    pub message_count: usize,
    pub files_modified: Vec<String>,
    pub tool_usage: BTreeMap<String, usize>,
    pub early_requests: Vec<String>,
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
}

impl Digest {
    pub fn kind(&self) -> DigestKind {
        match self {
            Self::Narrative(_) => DigestKind::Narrative,
            Self::Structured(_) => DigestKind::Structured,
        }
    }

    /// Short labels for the index: hashtags for narratives, keywords for
    /// structured digests.
    pub fn tags(&self) -> &[String] {
        match self {
            Self::Narrative(n) => &n.tags,
            Self::Structured(s) => &s.keywords,
        }
    }
}

// ===================================================================
// Remote capability
// ===================================================================

/// A remote text generator: prompt in, text out.
pub trait Summarizer {
    fn summarize(&self, prompt: &str) -> Result<String, KeeperError>;
}

/// Everything the generator needs about one compaction.
pub struct DigestRequest<'a> {
    pub session_id: &'a str,
    pub project_path: &'a str,
    pub trigger: CompactTrigger,
    pub created_at: &'a str,
    pub custom_instructions: Option<&'a str>,
    pub record: &'a ConversationRecord,
}

/// Produce the digest for one compaction.
///
/// Tries the remote summarizer when one is configured and falls back to
/// structured extraction on any failure. Never fails.
pub fn generate(
    request: &DigestRequest<'_>,
    summarizer: Option<&dyn Summarizer>,
    prefs: &Preferences,
) -> Digest {
    match summarizer {
        Some(remote) => match narrative(request, remote) {
            Ok(digest) => return Digest::Narrative(digest),
            Err(err) => warn!(error = %err, "falling back to structured extraction"),
        },
        None => info!("no remote summarizer configured, using structured extraction"),
    }
    Digest::Structured(structured(request, prefs))
}

fn narrative(
    request: &DigestRequest<'_>,
    remote: &dyn Summarizer,
) -> Result<NarrativeDigest, KeeperError> {
    let prompt = build_prompt(request)
        .map_err(|e| KeeperError::RemoteGenerationFailed(format!("building prompt: {e:#}")))?;
    let text = remote.summarize(&prompt)?;
    parse_narrative(&text)
}

// ===================================================================
// Structured fallback
// ===================================================================

/// Deterministic digest built from the record alone.
pub fn structured(request: &DigestRequest<'_>, prefs: &Preferences) -> StructuredDigest {
    let record = request.record;
    StructuredDigest {
        session_id: request.session_id.to_string(),
        project_path: request.project_path.to_string(),
        trigger: request.trigger,
        message_count: record.message_count,
        files_modified: record.files_touched.clone(),
        tool_usage: record.tool_histogram(),
        early_requests: record.early_requests(prefs.request_sample).to_vec(),
        keywords: extract_keywords(
            record.user_messages.iter().map(String::as_str),
            prefs.keyword_count,
        ),
        custom_instructions: request.custom_instructions.map(String::from),
    }
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-z][a-z0-9_]{3,}").expect("static regex"))
}

/// The `k` most frequent non-stop-word tokens across `texts`.
///
/// Ties are broken alphabetically so the same input always yields the same
/// keywords.
pub fn extract_keywords<'a>(texts: impl IntoIterator<Item = &'a str>, k: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for text in texts {
        let lowered = text.to_lowercase();
        for token in token_regex().find_iter(&lowered) {
            let token = token.as_str();
            if stopwords::is_stop_word(token) {
                continue;
            }
            *counts.entry(token.to_string()).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|(a, ca), (b, cb)| cb.cmp(ca).then_with(|| a.cmp(b)));
    ranked.into_iter().take(k).map(|(token, _)| token).collect()
}

// ===================================================================
// Remote prompt
// ===================================================================

fn capped_json<T: Serialize>(value: &T, max: usize) -> anyhow::Result<String> {
    let json = serde_json::to_string_pretty(value)?;
    Ok(truncate(&json, max).to_string())
}

/// Build the bounded prompt sent to the remote summarizer.
pub fn build_prompt(request: &DigestRequest<'_>) -> anyhow::Result<String> {
    let record = request.record;
    let user: Vec<&String> = record.user_messages.iter().take(PROMPT_MESSAGE_SAMPLE).collect();
    let assistant: Vec<&String> = record
        .assistant_messages
        .iter()
        .take(PROMPT_MESSAGE_SAMPLE)
        .collect();
    let tools: Vec<serde_json::Value> = record
        .tool_calls
        .iter()
        .take(PROMPT_TOOL_SAMPLE)
        .map(|c| serde_json::json!({ "tool": c.name, "input": c.input }))
        .collect();

    let prompt = crate::render::prompt(&crate::render::PromptSections {
        session_id: request.session_id,
        project_path: request.project_path,
        trigger: request.trigger,
        created_at: request.created_at,
        message_count: record.message_count,
        custom_instructions: request.custom_instructions,
        user_messages: capped_json(&user, PROMPT_USER_CHARS)?,
        assistant_messages: capped_json(&assistant, PROMPT_ASSISTANT_CHARS)?,
        tool_calls: capped_json(&tools, PROMPT_TOOL_CHARS)?,
        files_modified: serde_json::to_string_pretty(&record.files_touched)?,
    })?;
    Ok(truncate(&prompt, PROMPT_BUDGET_CHARS).to_string())
}

// ===================================================================
// Narrative response parsing
// ===================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Topics,
    CodeChanges,
    Decisions,
    Outcomes,
    Continuation,
    Tags,
}

fn classify_heading(title: &str) -> Option<Section> {
    let title = title.to_lowercase();
    if title.contains("topic") {
        Some(Section::Topics)
    } else if title.contains("code change") || title.contains("changes") {
        Some(Section::CodeChanges)
    } else if title.contains("decision") {
        Some(Section::Decisions)
    } else if title.contains("outcome") || title.contains("accomplish") {
        Some(Section::Outcomes)
    } else if title.contains("continu") || title.contains("next step") {
        Some(Section::Continuation)
    } else if title.contains("tag") {
        Some(Section::Tags)
    } else {
        None
    }
}

fn strip_bullet(line: &str) -> &str {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return rest.trim();
    }
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix(". ") {
            return rest.trim();
        }
    }
    line
}

/// Split "`src/a.rs`: what changed" (or a dash separator) into file and
/// description.
fn parse_code_change(item: &str) -> CodeChange {
    let split = [": ", " — ", " - "]
        .iter()
        .filter_map(|sep| item.find(sep).map(|at| (at, sep.len())))
        .min_by_key(|(at, _)| *at);
    let (file, description) = match split {
        Some((at, len)) => (&item[..at], item[at + len..].trim()),
        None => (item, ""),
    };
    let file = file.trim().trim_matches('`').trim_matches('*').trim();
    CodeChange {
        file: file.to_string(),
        description: description.to_string(),
    }
}

fn hashtag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?:^|\s)#([A-Za-z][\w-]*)").expect("static regex"))
}

/// Hashtags in `text`, lowercased and deduplicated in order of appearance.
pub fn extract_hashtags(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    hashtag_regex()
        .captures_iter(text)
        .map(|c| c[1].to_lowercase())
        .filter(|tag| seen.insert(tag.clone()))
        .take(MAX_TAGS)
        .collect()
}

/// Parse the remote response into sections.
///
/// A response with no recognisable section heading is treated as malformed.
pub fn parse_narrative(text: &str) -> Result<NarrativeDigest, KeeperError> {
    let mut digest = NarrativeDigest::default();
    let mut current: Option<Section> = None;
    let mut recognised = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed == "---" {
            continue;
        }
        if trimmed.starts_with('#') && trimmed.trim_start_matches('#').starts_with(' ') {
            current = classify_heading(trimmed.trim_start_matches('#'));
            recognised |= current.is_some();
            continue;
        }
        let item = strip_bullet(trimmed).to_string();
        if item.is_empty() {
            continue;
        }
        match current {
            Some(Section::Topics) => digest.topics.push(item),
            Some(Section::CodeChanges) => digest.code_changes.push(parse_code_change(&item)),
            Some(Section::Decisions) => digest.decisions.push(item),
            Some(Section::Outcomes) => digest.outcomes.push(item),
            Some(Section::Continuation) => digest.continuation.push(item),
            Some(Section::Tags) | None => {}
        }
    }

    if !recognised {
        return Err(KeeperError::RemoteGenerationFailed(
            "response has no recognisable summary sections".into(),
        ));
    }
    digest.tags = extract_hashtags(text);
    Ok(digest)
}
