mod common;

use common::{pre_compact_input, run_cli, run_subcommand, seed_snapshot, write_transcript};

fn project_with_history() -> tempfile::TempDir {
    let project = tempfile::tempdir().unwrap();
    seed_snapshot(
        project.path(),
        "aaaa-first-session",
        40,
        "# Session Summary\n\nMigrated the database schema. database database\n",
    );
    seed_snapshot(
        project.path(),
        "bbbb-second-session",
        2,
        "# Session Summary\n\nTuned the database pool.\n",
    );
    project
}

#[test]
fn list_shows_newest_first() {
    let project = project_with_history();
    let dir = project.path().to_str().unwrap();
    let (code, stdout, stderr) = run_subcommand(&["list", "--project", dir]);
    assert_eq!(code, 0, "stderr: {stderr}");
    assert!(stdout.starts_with("# Session Snapshots (2)"));
    let newer = stdout.find("bbbb-sec").unwrap();
    let older = stdout.find("aaaa-fir").unwrap();
    assert!(newer < older, "expected newest first:\n{stdout}");
}

#[test]
fn list_filters_and_groups() {
    let project = project_with_history();
    let dir = project.path().to_str().unwrap();

    let (_, filtered, _) = run_subcommand(&["list", "--project", dir, "--session", "aaaa"]);
    assert!(filtered.starts_with("# Session Snapshots (1)"));
    assert!(!filtered.contains("bbbb"));

    let (_, grouped, _) = run_subcommand(&["list", "--project", dir, "--grouped"]);
    assert!(grouped.starts_with("# Sessions (2)"));
    assert!(grouped.contains("| bbbb-second-session | 1 |"));
}

#[test]
fn load_ignores_freshness() {
    let project = project_with_history();
    let dir = project.path().to_str().unwrap();

    let (code, stdout, _) = run_subcommand(&["load", "--project", dir, "aaaa"]);
    assert_eq!(code, 0);
    assert!(stdout.starts_with("<previous-session-context>"));
    assert!(stdout.contains("Migrated the database schema."));

    let (_, latest, _) = run_subcommand(&["load", "--project", dir]);
    assert!(latest.contains("Tuned the database pool."));
}

#[test]
fn load_unknown_id_lists_alternatives() {
    let project = project_with_history();
    let dir = project.path().to_str().unwrap();
    let (code, stdout, _) = run_subcommand(&["load", "--project", dir, "zzzz"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("No snapshot matches `zzzz`"));
    assert!(stdout.contains("`aaaa-first-session`"));
    assert!(stdout.contains("`bbbb-second-session`"));
}

#[test]
fn search_ranks_by_matches() {
    let project = project_with_history();
    let dir = project.path().to_str().unwrap();
    let (code, stdout, _) = run_subcommand(&["search", "--project", dir, "DATABASE"]);
    assert_eq!(code, 0);
    assert!(stdout.contains("(2 snapshots)"));
    let first = stdout.find("aaaa-fir").unwrap();
    let second = stdout.find("bbbb-sec").unwrap();
    assert!(first < second, "most matches should rank first:\n{stdout}");
    assert!(stdout.contains("3 matches"));

    let (_, none, _) = run_subcommand(&["search", "--project", dir, "kubernetes"]);
    assert!(none.contains("No snapshots mention `kubernetes`"));
}

#[test]
fn stats_summarise_the_project() {
    let project = project_with_history();
    let transcript = write_transcript(project.path());
    let (code, _, stderr) = run_cli(&pre_compact_input(project.path(), "cccc", &transcript));
    assert_eq!(code, 0, "stderr: {stderr}");

    let dir = project.path().to_str().unwrap();
    let (code, stdout, _) = run_subcommand(&["stats", "--project", dir]);
    assert_eq!(code, 0);
    assert!(stdout.contains("- **Sessions:** 3"));
    assert!(stdout.contains("- **Snapshots:** 3"));
    assert!(stdout.contains("- **Projects:** 1"));
    assert!(stdout.contains("- structured: 1"));
    assert!(stdout.contains("- unknown: 2"));
}

#[test]
fn queries_on_an_empty_project_are_graceful() {
    let project = tempfile::tempdir().unwrap();
    let dir = project.path().to_str().unwrap();
    for args in [
        vec!["list", "--project", dir],
        vec!["load", "--project", dir],
        vec!["search", "--project", dir, "x"],
        vec!["stats", "--project", dir],
    ] {
        let (code, _, stderr) = run_subcommand(&args);
        assert_eq!(code, 0, "{args:?} failed: {stderr}");
    }
    assert!(!project.path().join(".claude").exists());
}
