use assert_fs::TempDir;
use assert_fs::prelude::*;
use history_viewer::backend::{ClaudeSource, OpenCodeSource, SessionSource};
use history_viewer::cache;
use history_viewer::Library;
use history_viewer::indexer::{build_index, refresh_index};
use history_viewer::query::SessionFilter;
use history_viewer::session::Backend;
use serde_json::json;

fn claude_session(temp: &TempDir, id: &str, prompt: &str, ts: &str) -> color_eyre::Result<()> {
    let body = [
        json!({"type":"user","timestamp":ts,"message":{"role":"user","content":prompt}}),
        json!({"type":"assistant","timestamp":ts,"message":{"role":"assistant","content":[{"type":"text","text":"done"}]}}),
    ]
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join("\n");
    temp.child("projects/-tmp-p")
        .child(format!("{id}.jsonl"))
        .write_str(&body)?;
    Ok(())
}

#[test]
fn listing_excludes_empty_and_sorts_with_id_tiebreak() -> color_eyre::Result<()> {
    let temp = TempDir::new()?;
    claude_session(&temp, "b", "second", "2025-02-01T00:00:00Z")?;
    claude_session(&temp, "a", "first", "2025-02-01T00:00:00Z")?;
    claude_session(&temp, "c", "newest", "2025-03-01T00:00:00Z")?;
    temp.child("projects/-tmp-p/empty.jsonl")
        .write_str(&json!({"type":"summary","summary":"nothing"}).to_string())?;

    let source = ClaudeSource::new(temp.child("projects").path(), 200, None);
    let snapshot = build_index(&source);
    let ids: Vec<_> = snapshot.sessions().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, ["c", "a", "b"]);
    assert!(snapshot.sessions().all(|s| s.message_count >= 1));
    Ok(())
}

#[test]
fn refresh_on_unchanged_sources_matches_full_build() -> color_eyre::Result<()> {
    let temp = TempDir::new()?;
    claude_session(&temp, "a", "first", "2025-02-01T00:00:00Z")?;
    claude_session(&temp, "b", "second", "2025-02-02T00:00:00Z")?;

    let source = ClaudeSource::new(temp.child("projects").path(), 200, None);
    let built = build_index(&source);
    let (refreshed, report) = refresh_index(&built, &source);
    assert_eq!(refreshed, built);
    assert_eq!(report.scanned, 2);
    assert_eq!(report.reused, 2);
    assert_eq!(report.parsed, 0);
    assert_eq!(refreshed, build_index(&source));
    Ok(())
}

#[test]
fn refresh_picks_up_new_and_removed_sessions() -> color_eyre::Result<()> {
    let temp = TempDir::new()?;
    claude_session(&temp, "a", "first", "2025-02-01T00:00:00Z")?;
    let source = ClaudeSource::new(temp.child("projects").path(), 200, None);
    let built = build_index(&source);

    claude_session(&temp, "b", "second", "2025-02-02T00:00:00Z")?;
    std::fs::remove_file(temp.child("projects/-tmp-p/a.jsonl").path())?;

    let (refreshed, report) = refresh_index(&built, &source);
    let ids: Vec<_> = refreshed.sessions().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, ["b"]);
    assert_eq!(report.parsed, 1);
    assert_eq!(refreshed, build_index(&source));
    Ok(())
}

#[test]
fn cached_snapshot_seeds_a_later_refresh() -> color_eyre::Result<()> {
    let temp = TempDir::new()?;
    let storage = temp.child("storage");
    storage
        .child("message/ses_1/msg_1.json")
        .write_str(&json!({"id":"msg_1","role":"user","time":{"created":1_735_689_600_000_i64}}).to_string())?;
    storage
        .child("part/msg_1/prt_1.json")
        .write_str(&json!({"type":"text","text":"Add logging"}).to_string())?;

    let source = OpenCodeSource::new(storage.path(), 200);
    let built = build_index(&source);
    let fingerprint = source.fingerprint();
    cache::save_snapshot(temp.child("cache").path(), Backend::OpenCode, &fingerprint, &built)?;

    let cached = cache::load_snapshot(temp.child("cache").path(), Backend::OpenCode, &fingerprint);
    assert_eq!(cached, built);
    let (refreshed, report) = refresh_index(&cached, &source);
    assert_eq!(report.reused, 1);
    assert_eq!(refreshed, built);
    assert_eq!(source.backend(), Backend::OpenCode);
    Ok(())
}

#[test]
fn cache_written_under_other_settings_is_rebuilt() -> color_eyre::Result<()> {
    let temp = TempDir::new()?;
    claude_session(&temp, "a", "Fix the parser please", "2025-02-01T00:00:00Z")?;
    let projects = temp.child("projects");
    let cache_dir = temp.child("cache").path().to_path_buf();

    let wide = Library::new(temp.child("data").path(), Some(cache_dir.clone()))
        .with_source(Box::new(ClaudeSource::new(projects.path(), 200, None)));
    let listed = wide.list_sessions(Backend::Claude, &SessionFilter::default())?;
    assert_eq!(listed[0].session.preview, "Fix the parser please");

    let narrow_source = ClaudeSource::new(projects.path(), 3, None);
    let fresh = build_index(&narrow_source);
    let narrow = Library::new(temp.child("data").path(), Some(cache_dir))
        .with_source(Box::new(narrow_source));
    let listed = narrow.list_sessions(Backend::Claude, &SessionFilter::default())?;
    assert_eq!(listed[0].session.preview, "Fix");
    assert_eq!(listed[0].session, fresh.sessions().next().cloned().expect("one session"));

    let report = narrow.refresh_index(Backend::Claude)?;
    assert_eq!(report.reused, 1);
    Ok(())
}
