pub mod backend;
pub mod cache;
pub mod config;
pub mod indexer;
pub mod library;
pub mod overlay;
pub mod query;
pub mod session;

mod app;
pub mod cli;
mod util;

use std::io::Write;

use clap::{CommandFactory, Parser};
use cli::Command;

pub use cli::Cli;
pub use library::{Library, LibraryError};

/// Run the hv CLI entrypoint.
///
/// # Errors
///
/// Returns an error when initialization or the chosen command fails to execute.
pub fn run(cli: &Cli) -> color_eyre::Result<()> {
    init_tracing(cli);

    let app = app::App::bootstrap(cli)?;

    match &cli.command {
        Command::List(cmd) => app.list(cmd),
        Command::Show(cmd) => app.show(cmd),
        Command::Rename(cmd) => app.rename(cmd),
        Command::Describe(cmd) => app.describe(cmd),
        Command::Tag(cmd) => app.tag(cmd),
        Command::Refresh(cmd) => app.refresh(cmd),
        Command::Delete(cmd) => app.delete(cmd),
        Command::Config(cmd) => app.config(cmd),
    }
}

fn init_tracing(cli: &Cli) {
    let level = desired_level(cli);
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn desired_level(cli: &Cli) -> tracing::level_filters::LevelFilter {
    if cli.quiet {
        return tracing::level_filters::LevelFilter::ERROR;
    }

    match cli.verbose {
        0 => tracing::level_filters::LevelFilter::INFO,
        1 => tracing::level_filters::LevelFilter::DEBUG,
        _ => tracing::level_filters::LevelFilter::TRACE,
    }
}

#[must_use]
pub fn command() -> clap::Command {
    Cli::command()
}

#[must_use]
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Render an error chain as `hv: top` followed by one `caused by:` line per
/// source.
///
/// # Errors
///
/// Returns the writer's error when output fails.
pub fn write_cli_error(err: &color_eyre::Report, mut out: impl Write) -> std::io::Result<()> {
    let mut chain = err.chain();
    if let Some(head) = chain.next() {
        writeln!(out, "hv: {head}")?;
    }
    for cause in chain {
        writeln!(out, "    caused by: {cause}")?;
    }
    Ok(())
}

/// Exit status for a failed run: 2 when a session lookup missed, 1 otherwise.
#[must_use]
pub fn exit_code_for_error(err: &color_eyre::Report) -> i32 {
    let unknown_session = err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<LibraryError>(),
            Some(LibraryError::UnknownSession { .. })
        )
    });
    if unknown_session { 2 } else { 1 }
}
