use assert_fs::TempDir;
use assert_fs::prelude::*;
use history_viewer::overlay::{NAMES_FILE, OverlayStore, TAGS_FILE};
use history_viewer::session::{Locator, Session};
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use time::macros::datetime;

fn session(id: &str, title: &str) -> Session {
    Session {
        id: id.into(),
        title: title.into(),
        project_path: "/tmp/p".into(),
        preview: title.into(),
        message_count: 1,
        first_timestamp: None,
        last_activity: datetime!(2025-01-01 00:00 UTC),
        locator: Locator::File {
            dir: "/tmp/p".into(),
            file: format!("{id}.jsonl"),
        },
    }
}

#[test]
fn custom_name_round_trips_through_disk() -> color_eyre::Result<()> {
    let temp = TempDir::new()?;
    let s1 = session("s1", "Derived title");

    OverlayStore::load(temp.path()).set_name("s1", "X")?;
    let reloaded = OverlayStore::load(temp.path());
    assert_eq!(reloaded.overlay().display_name(&s1), "X");

    OverlayStore::load(temp.path()).set_name("s1", "   ")?;
    let reloaded = OverlayStore::load(temp.path());
    assert_eq!(reloaded.overlay().display_name(&s1), "Derived title");
    Ok(())
}

#[test]
fn tags_are_idempotent() -> color_eyre::Result<()> {
    let temp = TempDir::new()?;
    let mut store = OverlayStore::load(temp.path());
    assert!(store.add_tag("s1", "bug")?);
    assert!(!store.add_tag("s1", " bug ")?);
    assert_eq!(store.overlay().tags("s1").count(), 1);

    assert!(!store.remove_tag("s1", "absent")?);
    assert_eq!(store.overlay().tags("s1").collect::<Vec<_>>(), ["bug"]);

    assert!(store.remove_tag("s1", "bug")?);
    temp.child(TAGS_FILE).assert(contains("s1").not());
    Ok(())
}

#[test]
fn non_ascii_is_written_verbatim() -> color_eyre::Result<()> {
    let temp = TempDir::new()?;
    let mut store = OverlayStore::load(temp.path());
    store.set_name("s1", "파서 수정")?;
    store.add_tag("s1", "버그")?;

    temp.child(NAMES_FILE).assert(contains("파서 수정"));
    temp.child(TAGS_FILE).assert(contains("버그"));

    let reloaded = OverlayStore::load(temp.path());
    assert_eq!(reloaded.overlay().custom_name("s1"), Some("파서 수정"));
    Ok(())
}

#[test]
fn files_written_by_other_tools_are_read() -> color_eyre::Result<()> {
    let temp = TempDir::new()?;
    temp.child(NAMES_FILE)
        .write_str("{\n  \"s1\": \"Imported\",\n  \"s2\": \"\"\n}")?;
    temp.child(TAGS_FILE)
        .write_str("{\"s1\": [\"review\", \"review\", \"later\"]}")?;

    let store = OverlayStore::load(temp.path());
    assert_eq!(store.overlay().custom_name("s1"), Some("Imported"));
    assert_eq!(store.overlay().custom_name("s2"), None);
    assert_eq!(
        store.overlay().tags("s1").collect::<Vec<_>>(),
        ["review", "later"]
    );
    assert_eq!(store.overlay().all_tags(), ["later", "named", "review"]);
    Ok(())
}
