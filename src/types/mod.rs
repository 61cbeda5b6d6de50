use serde::{Deserialize, Serialize};
use std::fmt;

// ===================================================================
// Shared Enums
// ===================================================================

/// How a session was started (used by SessionStart).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStartSource {
    Startup,
    Resume,
    Clear,
    Compact,
}

impl SessionStartSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Resume => "resume",
            Self::Clear => "clear",
            Self::Compact => "compact",
        }
    }
}

/// Compaction trigger (used by PreCompact).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompactTrigger {
    Manual,
    Auto,
}

impl fmt::Display for CompactTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
        })
    }
}

// ===================================================================
// Hook Input Types (received via stdin, snake_case JSON)
// ===================================================================

/// Fields shared by all hook event inputs.
#[derive(Debug, Clone, Deserialize)]
pub struct CommonInput {
    pub session_id: String,
    /// Absolute path of the working project.
    pub cwd: String,
    #[serde(default)]
    pub transcript_path: Option<String>,
    #[serde(default)]
    pub permission_mode: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionStartInput {
    #[serde(flatten)]
    pub common: CommonInput,
    /// Older hosts omit the source; treat that as a plain startup.
    #[serde(default)]
    pub source: Option<SessionStartSource>,
}

impl SessionStartInput {
    pub fn source(&self) -> SessionStartSource {
        self.source.unwrap_or(SessionStartSource::Startup)
    }
}

#[derive(Debug, Deserialize)]
pub struct PreCompactInput {
    #[serde(flatten)]
    pub common: CommonInput,
    pub trigger: CompactTrigger,
    #[serde(default)]
    pub custom_instructions: String,
}

/// Events we accept but have nothing to do for. Their payloads are not
/// inspected beyond the common fields.
#[derive(Debug, Deserialize)]
pub struct PassthroughInput {
    #[serde(flatten)]
    pub common: CommonInput,
}

/// Top-level hook input, deserialized from stdin JSON.
///
/// Tagged by the `hook_event_name` field to determine which event fired.
#[derive(Debug, Deserialize)]
#[serde(tag = "hook_event_name")]
pub enum HookInput {
    SessionStart(SessionStartInput),
    PreCompact(PreCompactInput),
    UserPromptSubmit(PassthroughInput),
    Stop(PassthroughInput),
    SessionEnd(PassthroughInput),
}

impl HookInput {
    /// Access the common fields shared by all hook events.
    pub fn common(&self) -> &CommonInput {
        match self {
            Self::SessionStart(e) => &e.common,
            Self::PreCompact(e) => &e.common,
            Self::UserPromptSubmit(e) | Self::Stop(e) | Self::SessionEnd(e) => &e.common,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::SessionStart(_) => "SessionStart",
            Self::PreCompact(_) => "PreCompact",
            Self::UserPromptSubmit(_) => "UserPromptSubmit",
            Self::Stop(_) => "Stop",
            Self::SessionEnd(_) => "SessionEnd",
        }
    }
}
