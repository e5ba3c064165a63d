use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};
use serde_json::json;
use time::OffsetDateTime;
use tracing::info;

use crate::cli::{
    BackendArg, Cli, ConfigCommand, DeleteCommand, DescribeCommand, ListCommand, RefreshCommand,
    RenameCommand, ShowCommand, TagCommand,
};
use crate::config::model::tilde_path;
use crate::config::{ConfigSourceKind, DiagnosticLevel, LoadedConfig};
use crate::indexer::{IndexError, RefreshReport};
use crate::library::Library;
use crate::query::SessionFilter;
use crate::session::{Backend, Message, SessionView};
use crate::util::{self, truncate};

pub struct App<'cli> {
    pub cli: &'cli Cli,
    pub loaded: LoadedConfig,
    pub library: Library,
}

impl<'cli> App<'cli> {
    /// Load configuration and wire up the enabled backends. Indexes are built
    /// lazily by the first command that needs them.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed.
    pub fn bootstrap(cli: &'cli Cli) -> Result<Self> {
        let loaded = crate::config::load(cli.config_dir.as_deref())?;
        let library = Library::from_config(&loaded);
        Ok(Self {
            cli,
            loaded,
            library,
        })
    }

    fn backend(&self, arg: &BackendArg) -> Backend {
        arg.backend.unwrap_or(self.loaded.config.default_backend)
    }

    /// Print sessions matching the filters.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is not enabled or JSON serialization
    /// fails.
    pub fn list(&self, cmd: &ListCommand) -> Result<()> {
        let backend = self.backend(&cmd.backend);
        let mut filter = SessionFilter {
            text: cmd.text.clone(),
            tag: cmd.tag.clone(),
            since: None,
            limit: cmd.limit,
        };
        if let Some(window) = cmd.since {
            let since = time::Duration::try_from(window)
                .ok()
                .and_then(|window| OffsetDateTime::now_utc().checked_sub(window))
                .ok_or_else(|| eyre!("--since window {window:?} reaches too far back"))?;
            filter.since = Some(since);
        }

        let sessions = self
            .library
            .list_sessions(backend, &filter)
            .wrap_err_with(|| format!("failed to list {backend} sessions"))?;

        if self.cli.json {
            println!("{}", serde_json::to_string_pretty(&sessions)?);
            return Ok(());
        }

        if sessions.is_empty() {
            println!("No sessions found.");
            return Ok(());
        }

        print_sessions_table(&sessions, self.loaded.config.home_prefix.as_deref());
        Ok(())
    }

    /// Print a whole conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is unknown or its source can no longer
    /// be read.
    pub fn show(&self, cmd: &ShowCommand) -> Result<()> {
        let backend = self.backend(&cmd.backend);
        let view = self.library.find_session(backend, &cmd.session_id)?;
        let messages = self
            .library
            .get_messages(backend, &view.session.locator)
            .wrap_err_with(|| format!("failed to load session {}", view.session.id))?;

        if self.cli.json {
            let payload = json!({ "session": view, "messages": messages });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        } else if cmd.markdown {
            export_markdown(&view, &messages);
        } else {
            export_human(&view, &messages);
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the overlay cannot be written.
    pub fn rename(&self, cmd: &RenameCommand) -> Result<()> {
        let name = cmd.name.as_deref().unwrap_or_default();
        self.library
            .rename_session(&cmd.session_id, name)
            .wrap_err("failed to save session name")?;
        if name.trim().is_empty() {
            println!("Cleared custom name for {}", cmd.session_id);
        } else {
            println!("Renamed {} to \"{}\"", cmd.session_id, name.trim());
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the overlay cannot be written.
    pub fn describe(&self, cmd: &DescribeCommand) -> Result<()> {
        let text = cmd.text.as_deref().unwrap_or_default();
        self.library
            .set_description(&cmd.session_id, text)
            .wrap_err("failed to save session description")?;
        if text.trim().is_empty() {
            println!("Cleared description for {}", cmd.session_id);
        } else {
            println!("Updated description for {}", cmd.session_id);
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error for the reserved tag or if the overlay cannot be
    /// written.
    pub fn tag(&self, cmd: &TagCommand) -> Result<()> {
        match cmd {
            TagCommand::Add { session_id, tags } => {
                let change = self
                    .library
                    .add_tags(session_id, tags)
                    .wrap_err("failed to add tags")?;
                if self.cli.json {
                    println!("{}", serde_json::to_string_pretty(&change)?);
                } else {
                    println!("Tags for {session_id}: {}", join_or_dash(&change.tags));
                    if !change.skipped.is_empty() {
                        println!("Skipped: {}", change.skipped.join(", "));
                    }
                }
            }
            TagCommand::Rm { session_id, tag } => {
                let removed = self
                    .library
                    .remove_tag(session_id, tag)
                    .wrap_err_with(|| format!("failed to remove tag '{tag}'"))?;
                if removed {
                    println!("Removed '{}' from {session_id}", tag.trim());
                } else {
                    println!("{session_id} has no tag '{}'", tag.trim());
                }
            }
            TagCommand::List => {
                let tags = self.library.all_tags();
                if self.cli.json {
                    println!("{}", serde_json::to_string_pretty(&tags)?);
                } else if tags.is_empty() {
                    println!("No tags yet.");
                } else {
                    for tag in tags {
                        println!("{tag}");
                    }
                }
            }
        }
        Ok(())
    }

    /// Rescan one backend or all enabled ones and print what happened.
    ///
    /// # Errors
    ///
    /// Returns an error if the requested backend is not enabled.
    pub fn refresh(&self, cmd: &RefreshCommand) -> Result<()> {
        let backends: Vec<Backend> = match cmd.backend {
            Some(backend) => vec![backend],
            None => self.library.backends().collect(),
        };

        let mut rows = Vec::new();
        for backend in backends {
            let report = self
                .library
                .refresh_index(backend)
                .wrap_err_with(|| format!("failed to refresh {backend} index"))?;
            log_refresh_report(backend, &report);
            rows.push((backend, report));
        }

        if self.cli.json {
            let payload: Vec<_> = rows
                .iter()
                .map(|(backend, report)| report_to_json(*backend, report))
                .collect();
            println!("{}", serde_json::to_string_pretty(&payload)?);
            return Ok(());
        }

        println!(
            "{:<10} {:>8} {:>8} {:>8} {:>8} {:>8}",
            "Backend", "Scanned", "Reused", "Parsed", "Empty", "Failed"
        );
        println!("{}", "-".repeat(55));
        for (backend, report) in &rows {
            println!(
                "{:<10} {:>8} {:>8} {:>8} {:>8} {:>8}",
                backend.as_str(),
                report.scanned,
                report.reused,
                report.parsed,
                report.dropped_empty,
                report.errors.len(),
            );
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error without `--yes`, for unknown sessions, or when the
    /// session's files cannot be removed.
    pub fn delete(&self, cmd: &DeleteCommand) -> Result<()> {
        let backend = self.backend(&cmd.backend);
        let view = self.library.find_session(backend, &cmd.session_id)?;
        if !cmd.yes {
            return Err(eyre!(
                "refusing to delete {} ({}) without --yes",
                view.session.id,
                view.session.locator.path().display()
            ));
        }

        let removed = self
            .library
            .delete_session(backend, &view.session.locator)
            .wrap_err_with(|| format!("failed to delete session {}", view.session.id))?;
        println!("Deleted {} session {}", backend, removed.id);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the merged TOML cannot be rendered or lint finds
    /// errors.
    pub fn config(&self, cmd: &ConfigCommand) -> Result<()> {
        match cmd {
            ConfigCommand::Dump => self.config_dump(),
            ConfigCommand::Where => {
                self.config_where();
                Ok(())
            }
            ConfigCommand::Lint => self.config_lint(),
        }
    }

    fn config_dump(&self) -> Result<()> {
        let toml_text = toml::to_string_pretty(&self.loaded.merged)?;
        println!("{toml_text}");
        Ok(())
    }

    fn config_where(&self) {
        let home = self.loaded.config.home_prefix.as_deref();
        println!(
            "Configuration directory: {}",
            self.loaded.directories.config_dir.display()
        );
        println!(
            "Data directory: {}",
            self.loaded.directories.data_dir.display()
        );
        println!(
            "Cache directory: {}",
            self.loaded.directories.cache_dir.display()
        );
        println!("Overlay directory: {}", self.loaded.overlay_dir().display());
        println!("Sources (in load order):");
        for source in &self.loaded.sources {
            let kind = match source.kind {
                ConfigSourceKind::Main => "main",
                ConfigSourceKind::DropIn => "drop-in",
            };
            println!("  - {} ({})", source.path.display(), kind);
        }
        println!("Backends:");
        for backend in self.loaded.config.backends.values() {
            println!(
                "  - {} {}{}",
                backend.backend,
                tilde_path(&backend.root, home),
                if backend.enabled { "" } else { " (disabled)" }
            );
        }
    }

    fn config_lint(&self) -> Result<()> {
        if self.loaded.diagnostics.is_empty() {
            println!("Configuration looks good.");
            return Ok(());
        }

        let mut has_error = false;
        for diag in &self.loaded.diagnostics {
            match diag.level {
                DiagnosticLevel::Warning => println!("warning: {}", diag.message),
                DiagnosticLevel::Error => {
                    println!("error: {}", diag.message);
                    has_error = true;
                }
            }
        }

        if has_error {
            Err(eyre!("configuration contains errors"))
        } else {
            Ok(())
        }
    }
}

fn log_refresh_report(backend: Backend, report: &RefreshReport) {
    if report.errors.is_empty() {
        info!(
            backend = %backend,
            scanned = report.scanned,
            reused = report.reused,
            parsed = report.parsed,
            dropped_empty = report.dropped_empty,
            "session index refreshed"
        );
    } else {
        for IndexError { id, path, error } in &report.errors {
            tracing::warn!(backend = %backend, session = %id, path = %path.display(), error = %error, "session ingestion failure");
        }
    }
}

fn report_to_json(backend: Backend, report: &RefreshReport) -> serde_json::Value {
    let errors: Vec<_> = report
        .errors
        .iter()
        .map(|err| json!({ "id": err.id, "path": err.path, "error": err.error.to_string() }))
        .collect();
    json!({
        "backend": backend,
        "scanned": report.scanned,
        "reused": report.reused,
        "parsed": report.parsed,
        "droppedEmpty": report.dropped_empty,
        "errors": errors,
    })
}

fn print_sessions_table(sessions: &[SessionView], home: Option<&std::path::Path>) {
    println!(
        "{:<38} {:<32} {:<24} {:>5} {:<19} Tags",
        "Session ID", "Title", "Project", "Msgs", "Last Active"
    );
    println!("{}", "-".repeat(130));
    for view in sessions {
        let project = tilde_path(std::path::Path::new(&view.session.project_path), home);
        println!(
            "{:<38} {:<32} {:<24} {:>5} {:<19} {}",
            truncate(&view.session.id, 38),
            truncate(view.display_name(), 32),
            truncate(&project, 24),
            view.session.message_count,
            util::format_timestamp(Some(view.session.last_activity)),
            view.tags.join(","),
        );
    }
}

fn join_or_dash(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

fn export_markdown(view: &SessionView, messages: &[Message]) {
    println!("# {}", view.display_name());
    println!("- Session: {} ({})", view.session.id, view.backend);
    println!("- Project: {}", view.session.project_path);
    if let Some(description) = &view.description {
        println!("- Description: {description}");
    }
    if !view.tags.is_empty() {
        println!("- Tags: {}", view.tags.join(", "));
    }
    println!(
        "- Started: {}",
        util::format_timestamp(view.session.first_timestamp)
    );
    println!(
        "- Last active: {}",
        util::format_timestamp(Some(view.session.last_activity))
    );
    println!();
    println!("## Transcript");

    for message in messages {
        println!("\n### {}", message.role.as_str());
        println!();
        println!("{}", message.content);
        for tool in &message.tool_uses {
            println!("\n> tool: `{}`", tool.name);
        }
    }
}

fn export_human(view: &SessionView, messages: &[Message]) {
    println!("{} ({} {})", view.display_name(), view.backend, view.session.id);
    println!("Project: {}", view.session.project_path);
    if let Some(description) = &view.description {
        println!("Description: {description}");
    }
    println!(
        "Last active: {}",
        util::format_timestamp(Some(view.session.last_activity))
    );
    println!("{}", "-".repeat(48));
    for message in messages {
        println!(
            "{} [{}]:",
            message.role.as_str(),
            util::format_timestamp(message.timestamp)
        );
        println!("{}", message.content);
        for tool in &message.tool_uses {
            println!("  [tool] {}", tool.name);
        }
        println!("{}", "-".repeat(48));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SourceError;
    use std::path::PathBuf;

    #[test]
    fn report_json_lists_errors() {
        let report = RefreshReport {
            scanned: 3,
            reused: 1,
            parsed: 1,
            dropped_empty: 0,
            errors: vec![IndexError {
                id: "s3".into(),
                path: PathBuf::from("/tmp/s3.jsonl"),
                error: SourceError::NotFound(PathBuf::from("/tmp/s3.jsonl")),
            }],
        };
        let value = report_to_json(Backend::Claude, &report);
        assert_eq!(value["backend"], "claude");
        assert_eq!(value["scanned"], 3);
        assert_eq!(value["errors"][0]["id"], "s3");
        log_refresh_report(Backend::Claude, &report);
    }

    #[test]
    fn join_or_dash_handles_empty() {
        assert_eq!(join_or_dash(&[]), "-");
        assert_eq!(join_or_dash(&["a".into(), "b".into()]), "a, b");
    }
}
