use crate::digest::{Digest, NarrativeDigest, StructuredDigest};
use crate::metadata::{IndexEntry, SnapshotRecord};
use crate::transcript::truncate;
use crate::types::CompactTrigger;
use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

/// Opening delimiter of the block injected into a new session.
pub const CONTEXT_OPEN: &str = "<previous-session-context>";
/// Closing delimiter of the block injected into a new session.
pub const CONTEXT_CLOSE: &str = "</previous-session-context>";

/// Longest sample request shown in a structured summary.
const REQUEST_PREVIEW_CHARS: usize = 200;
/// Tools listed in a structured summary.
const TOOL_ROWS: usize = 10;

const STRUCTURED_SUMMARY: &str = r#"# Session Summary (Structured Extraction)

## Metadata
- **Session ID:** {{ session_id }}
- **Project:** {{ project_path }}
- **Trigger:** {{ trigger }}
- **Created:** {{ created_at }}
- **Total Messages:** {{ message_count }}
{% if digest.custom_instructions %}

## Custom Instructions
{{ digest.custom_instructions }}
{% endif %}

## Files Modified
{% for file in digest.files_modified %}
- `{{ file }}`
{% else %}
- None tracked
{% endfor %}

## Tool Usage
{% for name, count in tools %}
- {{ name }}: {{ count }} {{ "call" if count == 1 else "calls" }}
{% else %}
- None tracked
{% endfor %}

## Sample User Requests
{% for request in requests %}
- {{ request }}
{% else %}
- None captured
{% endfor %}

## Keywords
{{ digest.keywords|join(", ") if digest.keywords else "None extracted" }}

---
*Structured extraction: no remote summary was available for this session.*
"#;

const NARRATIVE_SUMMARY: &str = r#"# Session Summary

## Metadata
- **Session ID:** {{ session_id }}
- **Project:** {{ project_path }}
- **Trigger:** {{ trigger }}
- **Created:** {{ created_at }}
- **Total Messages:** {{ message_count }}

## Topics Discussed
{% for topic in digest.topics %}
- {{ topic }}
{% else %}
- None recorded
{% endfor %}

## Code Changes
{% for change in digest.code_changes %}
- `{{ change.file }}`{{ ": " ~ change.description if change.description else "" }}
{% else %}
- None recorded
{% endfor %}

## Decisions Made
{% for decision in digest.decisions %}
- {{ decision }}
{% else %}
- None recorded
{% endfor %}

## Key Outcomes
{% for outcome in digest.outcomes %}
- {{ outcome }}
{% else %}
- None recorded
{% endfor %}

## Context for Continuation
{% for note in digest.continuation %}
- {{ note }}
{% else %}
- None recorded
{% endfor %}

## Tags
{{ tags if tags else "None" }}
"#;

const RESTORED_CONTEXT: &str = r#"{{ open }}
## Session Continuity Notice

This context was automatically loaded from a previous session summary.
- **Previous Session ID:** {{ entry.session_id }}
- **Summary Created:** {{ entry.created_at }}
- **Compaction Trigger:** {{ entry.trigger }}
- **Files Modified:** {{ entry.files_modified|length }}
- **Reload Event:** {{ event }}

---

{{ summary }}

---

*Use this context to maintain continuity with the previous conversation. The summary above captures what was discussed and accomplished before context compaction.*
{{ close }}"#;

const SUMMARY_PROMPT: &str = r#"Analyze this Claude Code session and create a comprehensive summary for future context restoration.

## Session Information
- Session ID: {{ s.session_id }}
- Project: {{ s.project_path }}
- Trigger: {{ s.trigger }}
- Timestamp: {{ s.created_at }}
- Total Messages: {{ s.message_count }}
{% if s.custom_instructions %}

## User's Custom Instructions
The user provided these specific instructions for this compaction:
{{ s.custom_instructions }}

Incorporate the user's custom instructions into your summary.
{% endif %}

## User Messages (sample)
{{ s.user_messages }}

## Assistant Responses (sample)
{{ s.assistant_messages }}

## Tool Calls
{{ s.tool_calls }}

## Files Modified
{{ s.files_modified }}

---

Create a summary with exactly these sections, as Markdown `##` headings with `-` bullets:

## Topics Discussed
- Main themes and subjects covered

## Code Changes
- One bullet per file, formatted as `path`: description of the change

## Decisions Made
- Important decisions, each with its rationale

## Key Outcomes
- What was accomplished and which problems were solved

## Context for Continuation
- Current state of the work and next steps

## Tags
- Hashtags for categorization (e.g. #authentication #api #bugfix)

Be comprehensive but concise. Focus on what would help resume this work later."#;

fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env
}

fn render(template: &str, ctx: minijinja::Value, what: &str) -> Result<String> {
    let env = environment();
    let tmpl = env
        .template_from_str(template)
        .with_context(|| format!("parsing {what} template"))?;
    tmpl.render(ctx)
        .with_context(|| format!("rendering {what} template"))
}

fn preview(request: &str) -> String {
    let one_line = request.split_whitespace().collect::<Vec<_>>().join(" ");
    let cut = truncate(&one_line, REQUEST_PREVIEW_CHARS);
    if cut.len() < one_line.len() {
        format!("{cut}...")
    } else {
        one_line
    }
}

/// Tool histogram rows, busiest first.
fn tool_rows(digest: &StructuredDigest) -> Vec<(&str, usize)> {
    let mut rows: Vec<(&str, usize)> = digest
        .tool_usage
        .iter()
        .map(|(name, count)| (name.as_str(), *count))
        .collect();
    rows.sort_by(|(a, ca), (b, cb)| cb.cmp(ca).then_with(|| a.cmp(b)));
    rows.truncate(TOOL_ROWS);
    rows
}

fn structured_summary(record: &SnapshotRecord, digest: &StructuredDigest) -> Result<String> {
    let requests: Vec<String> = digest.early_requests.iter().map(|r| preview(r)).collect();
    render(
        STRUCTURED_SUMMARY,
        context! {
            session_id => &record.session_id,
            project_path => &record.project_path,
            trigger => record.trigger.to_string(),
            created_at => &record.created_at,
            message_count => record.message_count,
            digest => digest,
            tools => tool_rows(digest),
            requests => requests,
        },
        "structured summary",
    )
}

fn narrative_summary(record: &SnapshotRecord, digest: &NarrativeDigest) -> Result<String> {
    let tags: Vec<String> = digest.tags.iter().map(|t| format!("#{t}")).collect();
    render(
        NARRATIVE_SUMMARY,
        context! {
            session_id => &record.session_id,
            project_path => &record.project_path,
            trigger => record.trigger.to_string(),
            created_at => &record.created_at,
            message_count => record.message_count,
            digest => digest,
            tags => tags.join(" "),
        },
        "narrative summary",
    )
}

/// Render the human-readable `summary.md` for a snapshot.
pub fn summary(record: &SnapshotRecord) -> Result<String> {
    match &record.digest {
        Digest::Structured(d) => structured_summary(record, d),
        Digest::Narrative(d) => narrative_summary(record, d),
    }
}

/// Wrap a snapshot's summary in the delimited block a new session injects.
pub fn restored_context(entry: &IndexEntry, summary: &str, event: &str) -> Result<String> {
    render(
        RESTORED_CONTEXT,
        context! {
            open => CONTEXT_OPEN,
            close => CONTEXT_CLOSE,
            entry => entry,
            event => event,
            summary => summary.trim_end(),
        },
        "restored context",
    )
}

/// Pre-truncated sections of the remote summary prompt.
#[derive(Serialize)]
pub struct PromptSections<'a> {
    pub session_id: &'a str,
    pub project_path: &'a str,
    pub trigger: CompactTrigger,
    pub created_at: &'a str,
    pub message_count: usize,
    pub custom_instructions: Option<&'a str>,
    pub user_messages: String,
    pub assistant_messages: String,
    pub tool_calls: String,
    pub files_modified: String,
}

pub fn prompt(sections: &PromptSections<'_>) -> Result<String> {
    render(SUMMARY_PROMPT, context! { s => sections }, "summary prompt")
}
