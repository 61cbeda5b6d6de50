#![allow(dead_code)]

use chrono::{Duration, Local};
use serde_json::{Value, json};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub const SUMMARIES: &str = ".claude/summaries";

fn command() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_context-keeper"));
    // Keep the remote summarizer out of tests so digests are deterministic.
    cmd.env_remove("ANTHROPIC_API_KEY")
        .env_remove("CLAUDE_SUMMARY_API_KEY")
        .env_remove("CLAUDE_SUMMARY_API_URL")
        .env_remove("CLAUDE_SUMMARY_MODEL")
        .env("CONTEXT_KEEPER_LOG", "warn");
    cmd
}

fn finish(output: std::process::Output) -> (i32, String, String) {
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

/// Run the binary as a hook with `stdin_json` on stdin.
pub fn run_cli(stdin_json: &str) -> (i32, String, String) {
    let mut child = command()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn binary");

    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(stdin_json.as_bytes())
        .unwrap();

    finish(child.wait_with_output().unwrap())
}

/// Run a query subcommand.
pub fn run_subcommand(args: &[&str]) -> (i32, String, String) {
    finish(command().args(args).stdin(Stdio::null()).output().unwrap())
}

/// Common hook fields for `project` as JSON object members.
pub fn common(project: &Path, session_id: &str, transcript_path: &Path) -> String {
    format!(
        r#"
    "session_id": "{session_id}",
    "transcript_path": "{}",
    "cwd": "{}",
    "permission_mode": "default"
"#,
        transcript_path.display(),
        project.display()
    )
}

pub fn pre_compact_input(project: &Path, session_id: &str, transcript: &Path) -> String {
    let common = common(project, session_id, transcript);
    format!(
        r#"{{ {common},
            "hook_event_name": "PreCompact",
            "trigger": "manual",
            "custom_instructions": ""
        }}"#
    )
}

pub fn session_start_input(project: &Path, source: &str) -> String {
    let common = common(project, "new-session", Path::new("/tmp/unused.jsonl"));
    format!(
        r#"{{ {common},
            "hook_event_name": "SessionStart",
            "source": "{source}"
        }}"#
    )
}

/// A five-message transcript: three user turns, two assistant turns, one
/// of which edits `src/a.ts`.
pub fn write_transcript(dir: &Path) -> PathBuf {
    let lines = [
        json!({"type": "user", "message": {"role": "user", "content": "Add input validation to the signup form"}}),
        json!({"type": "assistant", "message": {"role": "assistant", "content": [
            {"type": "text", "text": "I'll update the validator."},
            {"type": "tool_use", "id": "toolu_1", "name": "Edit",
             "input": {"file_path": "src/a.ts", "old_string": "a", "new_string": "b"}}
        ]}}),
        json!({"type": "user", "message": {"role": "user", "content": [
            {"type": "tool_result", "tool_use_id": "toolu_1", "content": "ok"}
        ]}}),
        json!({"type": "assistant", "message": {"role": "assistant", "content": "Validation added."}}),
        json!({"type": "user", "message": {"role": "user", "content": "Now write tests for the validation"}}),
    ];
    let path = dir.join("transcript.jsonl");
    let body: Vec<String> = lines.iter().map(Value::to_string).collect();
    fs::write(&path, body.join("\n")).unwrap();
    path
}

pub fn read_index(project: &Path) -> Value {
    let raw = fs::read_to_string(project.join(SUMMARIES).join("index.json")).unwrap();
    serde_json::from_str(&raw).unwrap()
}

/// Plant a snapshot created `hours_ago` directly on disk, bypassing the hook.
pub fn seed_snapshot(project: &Path, session_id: &str, hours_ago: i64, body: &str) {
    let created = Local::now() - Duration::hours(hours_ago);
    let timestamp = created.format("%Y%m%d_%H%M%S").to_string();
    let root = project.join(SUMMARIES);
    let dir = root.join(session_id).join(&timestamp);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("summary.md"), body).unwrap();

    let index_path = root.join("index.json");
    let mut index: Value = fs::read_to_string(&index_path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())
        .unwrap_or_else(|| json!({ "entries": [] }));
    index["entries"].as_array_mut().unwrap().push(json!({
        "session_id": session_id,
        "timestamp": timestamp,
        "created_at": created.to_rfc3339(),
        "trigger": "auto",
        "project": project.display().to_string(),
        "files_modified": ["src/main.rs"],
        "message_count": 12,
        "summary_path": format!("{session_id}/{timestamp}/summary.md"),
    }));
    index["last_session"] = json!(session_id);
    fs::write(&index_path, serde_json::to_string_pretty(&index).unwrap()).unwrap();
}
