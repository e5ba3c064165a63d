use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use serde_json::{Value, json};

#[allow(deprecated)]
fn base_command(temp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("hv").expect("hv binary available");
    cmd.env("HV_CONFIG_DIR", temp.child("config-root").path());
    cmd.env("HV_DATA_DIR", temp.child("data-root").path());
    cmd.env("HV_CACHE_DIR", temp.child("cache-root").path());
    cmd.env("HOME", temp.child("home").path());
    cmd.env_remove("RUST_LOG");
    cmd
}

fn toml_path(child: &assert_fs::fixture::ChildPath) -> String {
    toml::Value::String(child.path().display().to_string()).to_string()
}

fn write_config(temp: &TempDir) -> color_eyre::Result<()> {
    let config = format!(
        "home_prefix = {home}\n\n[backends.claude]\nroot = {claude}\n\n[backends.opencode]\nroot = {opencode}\n",
        home = toml_path(&temp.child("home")),
        claude = toml_path(&temp.child("claude-projects")),
        opencode = toml_path(&temp.child("opencode-storage")),
    );
    temp.child("config-root/config.toml").write_str(&config)?;
    Ok(())
}

fn write_claude_session(temp: &TempDir, id: &str, prompt: &str, ts: &str) -> color_eyre::Result<()> {
    let body = [
        json!({"type":"user","timestamp":ts,"cwd":"/work/app","message":{"role":"user","content":prompt}}),
        json!({"type":"assistant","timestamp":ts,"message":{"role":"assistant","content":[{"type":"text","text":"Sure thing"}]}}),
    ]
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join("\n");
    temp.child("claude-projects/-work-app")
        .child(format!("{id}.jsonl"))
        .write_str(&body)?;
    Ok(())
}

fn stdout_json(cmd: &mut Command) -> color_eyre::Result<Value> {
    let output = cmd.assert().success().get_output().stdout.clone();
    Ok(serde_json::from_slice(&output)?)
}

#[test]
fn list_json_is_sorted_newest_first() -> color_eyre::Result<()> {
    let temp = TempDir::new()?;
    write_config(&temp)?;
    write_claude_session(&temp, "s1", "Fix the parser", "2025-01-01T00:00:00Z")?;
    write_claude_session(&temp, "s2", "Add logging", "2025-01-02T00:00:00Z")?;

    let value = stdout_json(base_command(&temp).args(["--json", "list"]))?;
    let sessions = value.as_array().expect("array output");
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0]["id"], "s2");
    assert_eq!(sessions[0]["backend"], "claude");
    assert_eq!(sessions[0]["projectPath"], "/work/app");
    assert_eq!(sessions[0]["messageCount"], 2);
    assert_eq!(sessions[1]["preview"], "Fix the parser");

    temp.child("cache-root/index-claude.json")
        .assert(predicates::path::is_file());
    Ok(())
}

#[test]
fn rename_and_tags_flow_into_listings() -> color_eyre::Result<()> {
    let temp = TempDir::new()?;
    write_config(&temp)?;
    write_claude_session(&temp, "s1", "Fix the parser", "2025-01-01T00:00:00Z")?;
    write_claude_session(&temp, "s2", "Add logging", "2025-01-02T00:00:00Z")?;

    base_command(&temp)
        .args(["rename", "s1", "Parser work"])
        .assert()
        .success()
        .stdout(contains("Renamed s1 to \"Parser work\""));
    base_command(&temp)
        .args(["tag", "add", "s1", "bug, later,named"])
        .assert()
        .success()
        .stdout(contains("Tags for s1: bug, later"))
        .stdout(contains("Skipped: named"));

    base_command(&temp)
        .args(["tag", "list"])
        .assert()
        .success()
        .stdout(contains("bug\nlater\nnamed\n"));

    let value = stdout_json(base_command(&temp).args(["--json", "list", "--tag", "named"]))?;
    let sessions = value.as_array().expect("array output");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["id"], "s1");
    assert_eq!(sessions[0]["customName"], "Parser work");
    assert_eq!(sessions[0]["tags"], json!(["named", "bug", "later"]));

    base_command(&temp)
        .args(["list", "--text", "parser work"])
        .assert()
        .success()
        .stdout(contains("Parser work"))
        .stdout(contains("s2").not());

    temp.child("data-root/session-names.json")
        .assert(contains("Parser work"));
    Ok(())
}

#[test]
fn show_prints_transcript() -> color_eyre::Result<()> {
    let temp = TempDir::new()?;
    write_config(&temp)?;
    write_claude_session(&temp, "s1", "Fix the parser", "2025-01-01T00:00:00Z")?;

    base_command(&temp)
        .args(["show", "s1", "--markdown"])
        .assert()
        .success()
        .stdout(contains("# Fix the parser"))
        .stdout(contains("### user"))
        .stdout(contains("Sure thing"));

    let value = stdout_json(base_command(&temp).args(["--json", "show", "s1"]))?;
    assert_eq!(value["session"]["id"], "s1");
    assert_eq!(value["messages"][0]["role"], "user");
    assert_eq!(value["messages"][1]["content"], "Sure thing");
    Ok(())
}

#[test]
fn unknown_session_exits_with_two() -> color_eyre::Result<()> {
    let temp = TempDir::new()?;
    write_config(&temp)?;

    base_command(&temp)
        .args(["show", "missing"])
        .assert()
        .code(2)
        .stderr(contains("hv: no claude session with id 'missing'"));
    Ok(())
}

#[test]
fn delete_requires_confirmation() -> color_eyre::Result<()> {
    let temp = TempDir::new()?;
    write_config(&temp)?;
    write_claude_session(&temp, "s1", "Fix the parser", "2025-01-01T00:00:00Z")?;
    base_command(&temp)
        .args(["tag", "add", "s1", "bug"])
        .assert()
        .success();

    base_command(&temp)
        .args(["delete", "s1"])
        .assert()
        .code(1)
        .stderr(contains("without --yes"));
    temp.child("claude-projects/-work-app/s1.jsonl")
        .assert(predicates::path::is_file());

    base_command(&temp)
        .args(["delete", "s1", "--yes"])
        .assert()
        .success()
        .stdout(contains("Deleted claude session s1"));
    temp.child("claude-projects/-work-app/s1.jsonl")
        .assert(predicates::path::missing());

    base_command(&temp)
        .args(["tag", "list"])
        .assert()
        .success()
        .stdout(contains("No tags yet."));
    base_command(&temp)
        .args(["list"])
        .assert()
        .success()
        .stdout(contains("No sessions found."));
    Ok(())
}

#[test]
fn opencode_sessions_list_with_backend_flag() -> color_eyre::Result<()> {
    let temp = TempDir::new()?;
    write_config(&temp)?;
    let storage = temp.child("opencode-storage");
    storage.child("message/ses_1/msg_1.json").write_str(
        &json!({"id":"msg_1","role":"user","time":{"created":1_735_689_600_000_i64}}).to_string(),
    )?;
    storage
        .child("part/msg_1/prt_1.json")
        .write_str(&json!({"type":"text","text":"Add logging"}).to_string())?;

    let value = stdout_json(base_command(&temp).args(["--json", "list", "-b", "opencode"]))?;
    assert_eq!(value[0]["id"], "ses_1");
    assert_eq!(value[0]["backend"], "opencode");
    assert_eq!(value[0]["locator"]["kind"], "directory");
    Ok(())
}

#[test]
fn refresh_reports_each_backend() -> color_eyre::Result<()> {
    let temp = TempDir::new()?;
    write_config(&temp)?;
    write_claude_session(&temp, "s1", "Fix the parser", "2025-01-01T00:00:00Z")?;

    let value = stdout_json(base_command(&temp).args(["--json", "refresh"]))?;
    assert_eq!(value[0]["backend"], "claude");
    assert_eq!(value[0]["scanned"], 1);
    assert_eq!(value[1]["backend"], "opencode");
    assert_eq!(value[1]["scanned"], 0);
    Ok(())
}

#[test]
fn config_where_lists_directories_and_backends() -> color_eyre::Result<()> {
    let temp = TempDir::new()?;
    write_config(&temp)?;

    base_command(&temp)
        .args(["config", "where"])
        .assert()
        .success()
        .stdout(contains("Configuration directory:"))
        .stdout(contains("config.toml (main)"))
        .stdout(contains("  - claude "))
        .stdout(contains("  - opencode "));
    Ok(())
}
