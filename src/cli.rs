use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::session::Backend;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None, name = "hv", bin_name = "hv")]
pub struct Cli {
    /// Override the configuration directory.
    #[arg(long, value_name = "DIR", global = true)]
    pub config_dir: Option<PathBuf>,
    /// Emit machine-readable output when supported.
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    pub json: bool,
    /// Increase log verbosity (use -vv for trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Silence all log output.
    #[arg(short, long, action = ArgAction::SetTrue, global = true)]
    pub quiet: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List sessions, newest first.
    List(ListCommand),
    /// Print a full conversation.
    Show(ShowCommand),
    /// Give a session a custom name (omit the name to clear it).
    Rename(RenameCommand),
    /// Attach a description to a session (omit the text to clear it).
    Describe(DescribeCommand),
    /// Manage session tags.
    #[command(subcommand)]
    Tag(TagCommand),
    /// Rescan session storage and report what changed.
    Refresh(RefreshCommand),
    /// Delete a session's files and overlay entries.
    Delete(DeleteCommand),
    /// Inspect configuration files.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Args)]
pub struct BackendArg {
    /// Storage backend to read (defaults to `default_backend`).
    #[arg(long, short, value_parser = parse_backend)]
    pub backend: Option<Backend>,
}

#[derive(Debug, Args)]
pub struct ListCommand {
    #[command(flatten)]
    pub backend: BackendArg,
    /// Case-insensitive text to match against title, path, preview or name.
    #[arg(long, short)]
    pub text: Option<String>,
    /// Only sessions carrying this tag (`named` matches renamed sessions).
    #[arg(long)]
    pub tag: Option<String>,
    /// Only include sessions active since this duration ago (e.g. 7d, 12h).
    #[arg(long, value_parser = parse_since)]
    pub since: Option<Duration>,
    /// Maximum number of sessions to return.
    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct ShowCommand {
    /// Session identifier.
    pub session_id: String,
    #[command(flatten)]
    pub backend: BackendArg,
    /// Render as Markdown.
    #[arg(long, action = ArgAction::SetTrue)]
    pub markdown: bool,
}

#[derive(Debug, Args)]
pub struct RenameCommand {
    /// Session identifier.
    pub session_id: String,
    /// New display name.
    pub name: Option<String>,
}

#[derive(Debug, Args)]
pub struct DescribeCommand {
    /// Session identifier.
    pub session_id: String,
    /// Free-form description.
    pub text: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum TagCommand {
    /// Add comma-separated tags to a session.
    Add {
        session_id: String,
        tags: String,
    },
    /// Remove a tag from a session.
    #[command(alias = "remove")]
    Rm { session_id: String, tag: String },
    /// List every tag in use.
    List,
}

#[derive(Debug, Args)]
pub struct RefreshCommand {
    /// Refresh only this backend (defaults to all enabled backends).
    #[arg(long, short, value_parser = parse_backend)]
    pub backend: Option<Backend>,
}

#[derive(Debug, Args)]
pub struct DeleteCommand {
    /// Session identifier.
    pub session_id: String,
    #[command(flatten)]
    pub backend: BackendArg,
    /// Confirm the deletion.
    #[arg(long, action = ArgAction::SetTrue)]
    pub yes: bool,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Dump the merged configuration TOML.
    Dump,
    /// Show configuration search paths and resolved backend roots.
    Where,
    /// Validate configuration values.
    Lint,
}

fn parse_since(raw: &str) -> Result<Duration, String> {
    humantime::parse_duration(raw).map_err(|err| format!("invalid duration '{raw}': {err}"))
}

fn parse_backend(raw: &str) -> Result<Backend, String> {
    raw.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_flags_parse() {
        let cli = Cli::try_parse_from([
            "hv", "list", "--backend", "opencode", "--tag", "bug", "--since", "7d", "--limit",
            "5", "--json",
        ])
        .expect("parse");
        assert!(cli.json);
        let Command::List(cmd) = cli.command else {
            panic!("expected list");
        };
        assert_eq!(cmd.backend.backend, Some(Backend::OpenCode));
        assert_eq!(cmd.tag.as_deref(), Some("bug"));
        assert_eq!(cmd.since, Some(Duration::from_secs(7 * 24 * 60 * 60)));
        assert_eq!(cmd.limit, Some(5));
    }

    #[test]
    fn rejects_bad_backend_and_duration() {
        assert!(Cli::try_parse_from(["hv", "list", "--backend", "codex"]).is_err());
        assert!(Cli::try_parse_from(["hv", "list", "--since", "soon"]).is_err());
    }

    #[test]
    fn rename_name_is_optional() {
        let cli = Cli::try_parse_from(["hv", "rename", "s1"]).expect("parse");
        let Command::Rename(cmd) = cli.command else {
            panic!("expected rename");
        };
        assert_eq!(cmd.session_id, "s1");
        assert!(cmd.name.is_none());
    }
}
