pub mod claude;
pub mod opencode;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::session::{Backend, Locator, Message, Role, Session};

pub use claude::ClaudeSource;
pub use opencode::OpenCodeSource;

/// Fallback display title when nothing in the source is usable.
pub const UNTITLED: &str = "(untitled)";

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("session source not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("locator does not belong to the {backend} backend: {}", locator.path().display())]
    ForeignLocator { backend: Backend, locator: Locator },
    #[error("refusing to touch {}: outside the backend root", .0.display())]
    OutsideRoot(PathBuf),
}

impl SourceError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return SourceError::NotFound(path.to_path_buf());
        }
        SourceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A session source found during enumeration, before it is parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: String,
    pub locator: Locator,
    /// Latest modification time across every file that feeds the session.
    pub modified: Option<OffsetDateTime>,
}

/// One on-disk storage convention turned into normalized sessions.
pub trait SessionSource: Send + Sync {
    fn backend(&self) -> Backend;

    fn root(&self) -> &Path;

    /// Settings that shape parsed sessions. Cached entries produced under a
    /// different fingerprint are never reused.
    fn fingerprint(&self) -> String;

    /// Enumerate session sources. A missing root yields nothing.
    fn candidates(&self) -> Vec<Candidate>;

    /// Parse one candidate into a session summary.
    ///
    /// # Errors
    ///
    /// Returns an error when the candidate cannot be opened at all; malformed
    /// records inside it are skipped instead.
    fn parse_candidate(&self, candidate: &Candidate) -> Result<Session, SourceError>;

    /// Re-read the full conversation behind `locator`, oldest message first.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NotFound`] when the locator no longer resolves.
    fn load_messages(&self, locator: &Locator) -> Result<Vec<Message>, SourceError>;

    /// Delete the files backing a session.
    ///
    /// # Errors
    ///
    /// Returns an error when the locator escapes the backend root or the
    /// files cannot be removed.
    fn remove_session(&self, locator: &Locator) -> Result<(), SourceError>;

    /// Parse every candidate, logging and skipping the ones that fail.
    fn discover_sessions(&self) -> Vec<Session> {
        self.candidates()
            .iter()
            .filter_map(|candidate| match self.parse_candidate(candidate) {
                Ok(session) => Some(session),
                Err(err) => {
                    tracing::warn!(
                        backend = %self.backend(),
                        session = %candidate.id,
                        error = %err,
                        "skipping unreadable session"
                    );
                    None
                }
            })
            .collect()
    }
}

/// Running summary accumulated while walking a session's records.
#[derive(Debug, Default)]
pub(crate) struct SessionTally {
    preview: Option<String>,
    first: Option<OffsetDateTime>,
    last: Option<OffsetDateTime>,
    message_count: usize,
}

impl SessionTally {
    pub(crate) fn observe_timestamp(&mut self, ts: Option<OffsetDateTime>) {
        let Some(ts) = ts else {
            return;
        };
        self.first = Some(self.first.map_or(ts, |current| current.min(ts)));
        self.last = Some(self.last.map_or(ts, |current| current.max(ts)));
    }

    pub(crate) fn observe_message(&mut self, role: Role, text: &str, preview_chars: usize) {
        self.message_count += 1;
        if role == Role::User && self.preview.is_none() && is_substantive(text) {
            self.preview = Some(truncate_chars(text.trim(), preview_chars));
        }
    }

    pub(crate) fn message_count(&self) -> usize {
        self.message_count
    }

    pub(crate) fn preview(&self) -> Option<&str> {
        self.preview.as_deref()
    }

    pub(crate) fn first_timestamp(&self) -> Option<OffsetDateTime> {
        self.first
    }

    /// Latest record timestamp, else the source modification time, else now.
    pub(crate) fn last_activity(&self, modified: Option<OffsetDateTime>) -> OffsetDateTime {
        self.last
            .or(modified)
            .unwrap_or_else(OffsetDateTime::now_utc)
    }
}

const META_PREFIXES: [&str; 2] = ["Caveat:", "<command-"];

/// Whether a user message is real input rather than harness chatter.
pub(crate) fn is_substantive(text: &str) -> bool {
    let trimmed = text.trim_start();
    !trimmed.is_empty() && !META_PREFIXES.iter().any(|prefix| trimmed.starts_with(prefix))
}

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

pub(crate) fn derive_title(preview: Option<&str>) -> String {
    preview
        .and_then(|text| text.lines().map(str::trim).find(|line| !line.is_empty()))
        .map_or_else(|| UNTITLED.to_string(), str::to_string)
}

pub(crate) fn parse_rfc3339(raw: Option<&str>) -> Option<OffsetDateTime> {
    raw.and_then(|value| OffsetDateTime::parse(value.trim(), &Rfc3339).ok())
}

pub(crate) fn from_unix_ms(ms: Option<i64>) -> Option<OffsetDateTime> {
    let nanos = i128::from(ms?).checked_mul(1_000_000)?;
    OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
}

pub(crate) fn modified_at(path: &Path) -> Option<OffsetDateTime> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .map(OffsetDateTime::from)
}

pub(crate) fn latest(
    current: Option<OffsetDateTime>,
    next: Option<OffsetDateTime>,
) -> Option<OffsetDateTime> {
    match (current, next) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Order messages chronologically. Untimestamped messages sort first and the
/// sort is stable, so natural enumeration order breaks ties.
pub(crate) fn sort_chronologically(messages: &mut [Message]) {
    messages.sort_by_key(|message| message.timestamp);
}

/// Canonicalize `path` and require it to live under `root`.
pub(crate) fn ensure_within(root: &Path, path: &Path) -> Result<PathBuf, SourceError> {
    let canonical_root = root
        .canonicalize()
        .map_err(|err| SourceError::io(root, err))?;
    let canonical = path
        .canonicalize()
        .map_err(|err| SourceError::io(path, err))?;
    if canonical == canonical_root || !canonical.starts_with(&canonical_root) {
        return Err(SourceError::OutsideRoot(path.to_path_buf()));
    }
    Ok(canonical)
}
