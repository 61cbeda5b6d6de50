use super::*;
use serde_json::json;
use std::io::Write;

// ===================================================================
// Test helpers
// ===================================================================

fn to_jsonl(lines: &[serde_json::Value]) -> String {
    lines
        .iter()
        .map(|v| serde_json::to_string(v).unwrap())
        .collect::<Vec<_>>()
        .join("\n")
}

fn user_entry(uuid: &str, text: &str) -> serde_json::Value {
    json!({
        "type": "user",
        "uuid": uuid,
        "sessionId": "s",
        "timestamp": "2025-01-01T00:00:00Z",
        "message": { "role": "user", "content": text }
    })
}

fn asst_entry(uuid: &str, blocks: serde_json::Value) -> serde_json::Value {
    json!({
        "type": "assistant",
        "uuid": uuid,
        "sessionId": "s",
        "timestamp": "2025-01-01T00:00:01Z",
        "message": { "role": "assistant", "content": blocks }
    })
}

fn tool_use(name: &str, input: serde_json::Value) -> serde_json::Value {
    json!({ "type": "tool_use", "id": "toolu_1", "name": name, "input": input })
}

fn write_transcript(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

// ===================================================================
// Entry parsing
// ===================================================================

#[test]
fn parse_user_text_message() {
    let entry: TranscriptEntry = serde_json::from_value(user_entry("aaa", "hello world")).unwrap();
    match entry {
        TranscriptEntry::User(e) => {
            assert_eq!(e.uuid.as_deref(), Some("aaa"));
            match &e.message.content {
                MessageContent::Text(t) => assert_eq!(t, "hello world"),
                other => panic!("expected Text, got {:?}", other),
            }
        }
        other => panic!("expected User, got {:?}", other),
    }
}

#[test]
fn parse_assistant_with_thinking_text_and_tool_use() {
    let entry: TranscriptEntry = serde_json::from_value(asst_entry(
        "bbb",
        json!([
            { "type": "thinking", "thinking": "hmm", "signature": "sig" },
            { "type": "text", "text": "Let me read that file." },
            tool_use("Read", json!({ "file_path": "/tmp/f.txt" }))
        ]),
    ))
    .unwrap();
    let TranscriptEntry::Assistant(e) = entry else {
        panic!("expected Assistant");
    };
    let MessageContent::Blocks(blocks) = &e.message.content else {
        panic!("expected Blocks");
    };
    assert_eq!(blocks.len(), 3);
    assert!(matches!(blocks[0], ContentBlock::Other));
    assert!(matches!(&blocks[1], ContentBlock::Text(t) if t.text == "Let me read that file."));
    assert!(matches!(&blocks[2], ContentBlock::ToolUse(tu) if tu.name == "Read"));
}

#[test]
fn non_turn_lines_are_ignored_not_errors() {
    let contents = to_jsonl(&[
        json!({ "type": "progress", "uuid": "p1", "data": { "type": "hook_progress" } }),
        json!({ "type": "system", "uuid": "s1", "subtype": "turn_duration" }),
        json!({ "type": "file-history-snapshot", "messageId": "m", "snapshot": {} }),
        user_entry("u1", "hi"),
    ]);
    let (transcript, errors) = Transcript::parse(&contents);
    assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    assert_eq!(transcript.turn_count(), 1);
}

#[test]
fn malformed_lines_are_reported_with_line_numbers() {
    let contents = format!(
        "{}\nnot json at all\n{{\"type\":\"user\"}}\n\n{}",
        serde_json::to_string(&user_entry("u1", "first")).unwrap(),
        serde_json::to_string(&user_entry("u2", "second")).unwrap(),
    );
    let (transcript, errors) = Transcript::parse(&contents);
    assert_eq!(transcript.turn_count(), 2);
    let lines: Vec<usize> = errors.iter().map(|(l, _)| *l).collect();
    assert_eq!(lines, vec![2, 3]);
}

// ===================================================================
// Record extraction
// ===================================================================

#[test]
fn record_counts_turns_tools_and_files() {
    let contents = to_jsonl(&[
        user_entry("u1", "Please fix the parser"),
        asst_entry(
            "a1",
            json!([
                { "type": "text", "text": "Editing now." },
                tool_use("Edit", json!({ "file_path": "src/a.ts", "old_string": "a", "new_string": "b" }))
            ]),
        ),
        user_entry("u2", "Thanks, now the tests"),
        asst_entry("a2", json!([{ "type": "text", "text": "Done." }])),
        user_entry("u3", "Great"),
    ]);
    let (transcript, _) = Transcript::parse(&contents);
    let record = transcript.record();

    assert_eq!(record.message_count, 5);
    assert_eq!(record.files_touched, vec!["src/a.ts".to_string()]);
    assert_eq!(record.tool_calls.len(), 1);
    assert_eq!(record.tool_calls[0].path.as_deref(), Some("src/a.ts"));
    assert_eq!(
        record.tool_histogram(),
        BTreeMap::from([("Edit".to_string(), 1)])
    );
    assert_eq!(
        record.user_messages,
        vec!["Please fix the parser", "Thanks, now the tests", "Great"]
    );
    assert_eq!(record.assistant_messages, vec!["Editing now.", "Done."]);
}

#[test]
fn touched_files_are_deduplicated_in_first_seen_order() {
    let contents = to_jsonl(&[
        asst_entry(
            "a1",
            json!([
                tool_use("Read", json!({ "file_path": "b.rs" })),
                tool_use("Edit", json!({ "file_path": "a.rs" })),
                tool_use("Write", json!({ "file_path": "b.rs", "content": "" })),
                tool_use("NotebookEdit", json!({ "notebook_path": "n.ipynb" })),
                tool_use("Bash", json!({ "command": "ls" })),
            ]),
        ),
    ]);
    let (transcript, _) = Transcript::parse(&contents);
    let record = transcript.record();
    assert_eq!(record.files_touched, vec!["b.rs", "a.rs", "n.ipynb"]);
    assert_eq!(record.tool_calls.len(), 5);
    assert!(record.tool_calls[4].path.is_none());
}

#[test]
fn legacy_top_level_tool_use_lines_are_tool_calls() {
    let contents = to_jsonl(&[
        user_entry("u1", "go"),
        json!({ "type": "tool_use", "name": "Write", "input": { "file_path": "x.md" } }),
    ]);
    let (transcript, _) = Transcript::parse(&contents);
    let record = transcript.record();
    assert_eq!(record.message_count, 1);
    assert_eq!(record.tool_calls.len(), 1);
    assert_eq!(record.files_touched, vec!["x.md"]);
}

#[test]
fn system_reminders_and_meta_entries_are_not_sampled() {
    let mut meta = user_entry("u2", "Caveat: the messages below were generated locally");
    meta["isMeta"] = json!(true);
    let contents = to_jsonl(&[
        user_entry("u1", "<system-reminder>be nice</system-reminder>"),
        meta,
        user_entry("u3", "real request"),
    ]);
    let (transcript, _) = Transcript::parse(&contents);
    let record = transcript.record();
    assert_eq!(record.message_count, 3);
    assert_eq!(record.user_messages, vec!["real request"]);
}

#[test]
fn long_messages_are_truncated() {
    let long = "x".repeat(MAX_MESSAGE_CHARS + 50);
    let contents = to_jsonl(&[user_entry("u1", &long)]);
    let (transcript, _) = Transcript::parse(&contents);
    let record = transcript.record();
    assert_eq!(record.user_messages[0].chars().count(), MAX_MESSAGE_CHARS);
}

#[test]
fn truncate_respects_char_boundaries() {
    assert_eq!(truncate("héllo", 2), "hé");
    assert_eq!(truncate("abc", 10), "abc");
}

#[test]
fn early_requests_take_the_first_n() {
    let record = ConversationRecord {
        user_messages: vec!["a".into(), "b".into(), "c".into()],
        ..Default::default()
    };
    assert_eq!(record.early_requests(2), &["a".to_string(), "b".to_string()]);
    assert_eq!(record.early_requests(10).len(), 3);
}

// ===================================================================
// extract(): file-level behavior
// ===================================================================

#[test]
fn extract_skips_malformed_lines() {
    let contents = format!(
        "{}\n{{broken\n{}",
        serde_json::to_string(&user_entry("u1", "one")).unwrap(),
        serde_json::to_string(&asst_entry("a1", json!("plain reply"))).unwrap(),
    );
    let file = write_transcript(&contents);
    let record = extract(file.path()).unwrap();
    assert_eq!(record.message_count, 2);
    assert_eq!(record.skipped_lines, 1);
    assert_eq!(record.assistant_messages, vec!["plain reply"]);
}

#[test]
fn extract_missing_file_is_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let err = extract(&dir.path().join("nope.jsonl")).unwrap_err();
    assert!(matches!(err, KeeperError::TranscriptUnreadable { .. }), "{err}");
}

#[test]
fn extract_without_turns_is_empty() {
    let file = write_transcript("garbage\n{\"type\":\"system\",\"subtype\":\"x\"}\n");
    let err = extract(file.path()).unwrap_err();
    match err {
        KeeperError::TranscriptEmpty { skipped, .. } => assert_eq!(skipped, 1),
        other => panic!("expected TranscriptEmpty, got {other}"),
    }
}
