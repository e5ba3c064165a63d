//! Line-delimited session logs: `projects/<encoded-cwd>/<session-id>.jsonl`.

use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;
use walkdir::WalkDir;

use super::{
    Candidate, SessionSource, SessionTally, SourceError, derive_title, ensure_within, modified_at,
    parse_rfc3339, sort_chronologically,
};
use crate::session::{Backend, Locator, Message, Role, Session, ToolUse};

const SESSION_EXT: &str = "jsonl";
const SUBAGENT_PREFIX: &str = "agent-";

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]").expect("valid regex"));

#[derive(Debug, Clone)]
pub struct ClaudeSource {
    root: PathBuf,
    preview_chars: usize,
    home_prefix: Option<PathBuf>,
}

impl ClaudeSource {
    pub fn new(root: impl Into<PathBuf>, preview_chars: usize, home_prefix: Option<PathBuf>) -> Self {
        Self {
            root: root.into(),
            preview_chars,
            home_prefix,
        }
    }

    fn session_path(&self, locator: &Locator) -> Result<PathBuf, SourceError> {
        match locator {
            Locator::File { dir, file } => Ok(dir.join(file)),
            Locator::Directory { .. } => Err(SourceError::ForeignLocator {
                backend: Backend::Claude,
                locator: locator.clone(),
            }),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRecord {
    #[serde(rename = "type")]
    kind: Option<String>,
    message: Option<RawMessage>,
    timestamp: Option<String>,
    cwd: Option<String>,
    summary: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMessage {
    role: Option<String>,
    content: RawContent,
}

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Segments(Vec<RawSegment>),
    #[default]
    Missing,
    Other(Value),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSegment {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
    name: Option<String>,
    input: Value,
}

impl RawRecord {
    fn role(&self) -> Option<Role> {
        self.message
            .as_ref()
            .and_then(|message| message.role.as_deref())
            .and_then(Role::parse)
            .or_else(|| self.kind.as_deref().and_then(Role::parse))
    }

    fn text(&self) -> String {
        match self.message.as_ref().map(|message| &message.content) {
            Some(RawContent::Text(text)) => text.clone(),
            Some(RawContent::Segments(segments)) => segments
                .iter()
                .filter(|segment| segment.kind.as_deref() == Some("text"))
                .filter_map(|segment| segment.text.as_deref())
                .collect(),
            _ => String::new(),
        }
    }

    fn tool_uses(&self) -> Vec<ToolUse> {
        let Some(RawContent::Segments(segments)) =
            self.message.as_ref().map(|message| &message.content)
        else {
            return Vec::new();
        };
        segments
            .iter()
            .filter(|segment| segment.kind.as_deref() == Some("tool_use"))
            .map(|segment| ToolUse {
                name: segment.name.clone().unwrap_or_default(),
                input: segment.input.clone(),
            })
            .collect()
    }

    fn is_summary(&self) -> bool {
        self.kind.as_deref() == Some("summary")
    }
}

/// Read every line that decodes as a record, skipping the rest.
fn read_records(path: &Path) -> Result<Vec<RawRecord>, SourceError> {
    let file = File::open(path).map_err(|err| SourceError::io(path, err))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();

    for (line_no, line) in reader.split(b'\n').enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(path = %path.display(), line = line_no + 1, "stopping at unreadable line: {err}");
                break;
            }
        };
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<RawRecord>(&line) {
            Ok(record) => records.push(record),
            Err(err) => {
                tracing::debug!(path = %path.display(), line = line_no + 1, "skipping invalid json line: {err}");
            }
        }
    }

    Ok(records)
}

impl SessionSource for ClaudeSource {
    fn backend(&self) -> Backend {
        Backend::Claude
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn fingerprint(&self) -> String {
        let home = self
            .home_prefix
            .as_deref()
            .map(|home| home.display().to_string())
            .unwrap_or_default();
        format!("preview={};home={home}", self.preview_chars)
    }

    fn candidates(&self) -> Vec<Candidate> {
        if !self.root.is_dir() {
            tracing::debug!(root = %self.root.display(), "claude projects root missing");
            return Vec::new();
        }

        WalkDir::new(&self.root)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::debug!(root = %self.root.display(), "skipping unreadable entry: {err}");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(OsStr::to_str) != Some(SESSION_EXT) {
                    return None;
                }
                let file = path.file_name()?.to_str()?.to_string();
                if file.starts_with(SUBAGENT_PREFIX) {
                    return None;
                }
                let dir = path.parent()?;
                if dir
                    .file_name()
                    .and_then(OsStr::to_str)
                    .is_some_and(|name| name.starts_with('.'))
                {
                    return None;
                }
                let id = path.file_stem()?.to_str()?.to_string();
                Some(Candidate {
                    id,
                    modified: modified_at(path),
                    locator: Locator::File {
                        dir: dir.to_path_buf(),
                        file,
                    },
                })
            })
            .collect()
    }

    fn parse_candidate(&self, candidate: &Candidate) -> Result<Session, SourceError> {
        let path = self.session_path(&candidate.locator)?;
        let records = read_records(&path)?;

        let mut tally = SessionTally::default();
        let mut cwd: Option<String> = None;
        let mut summary: Option<String> = None;

        for record in &records {
            tally.observe_timestamp(parse_rfc3339(record.timestamp.as_deref()));
            if cwd.is_none() {
                cwd = record
                    .cwd
                    .as_deref()
                    .filter(|value| !value.trim().is_empty())
                    .map(|value| value.nfc().collect());
            }
            if record.is_summary()
                && let Some(text) = record.summary.as_deref().map(str::trim)
                && !text.is_empty()
            {
                summary = Some(text.to_string());
            }
            if let Some(role) = record.role() {
                tally.observe_message(role, &record.text(), self.preview_chars);
            }
        }

        let project_path = cwd.unwrap_or_else(|| {
            let folder = candidate
                .locator
                .path()
                .parent()
                .and_then(Path::file_name)
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            decode_project_folder(&folder, self.home_prefix.as_deref())
        });
        let preview = tally.preview().unwrap_or_default().to_string();
        let title = summary.unwrap_or_else(|| derive_title(tally.preview()));

        Ok(Session {
            id: candidate.id.clone(),
            title,
            project_path,
            preview,
            message_count: tally.message_count(),
            first_timestamp: tally.first_timestamp(),
            last_activity: tally.last_activity(candidate.modified),
            locator: candidate.locator.clone(),
        })
    }

    fn load_messages(&self, locator: &Locator) -> Result<Vec<Message>, SourceError> {
        let path = self.session_path(locator)?;
        if !path.is_file() {
            return Err(SourceError::NotFound(path));
        }

        let mut messages: Vec<Message> = read_records(&path)?
            .into_iter()
            .filter_map(|record| {
                let role = record.role()?;
                let content = record.text();
                if content.trim().is_empty() {
                    return None;
                }
                let mut message =
                    Message::new(role, content, parse_rfc3339(record.timestamp.as_deref()));
                message.tool_uses = record.tool_uses();
                Some(message)
            })
            .collect();
        sort_chronologically(&mut messages);
        Ok(messages)
    }

    fn remove_session(&self, locator: &Locator) -> Result<(), SourceError> {
        let path = self.session_path(locator)?;
        let canonical = ensure_within(&self.root, &path)?;
        fs::remove_file(&canonical).map_err(|err| SourceError::io(&canonical, err))?;
        tracing::info!(path = %canonical.display(), "removed session log");
        Ok(())
    }
}

/// Encode a working directory the way project folders are named on disk:
/// every non-alphanumeric character becomes `-`.
#[must_use]
pub fn encode_project_path(path: &str) -> String {
    NON_ALNUM.replace_all(path, "-").into_owned()
}

/// Turn a project folder name back into a readable path. The encoded home
/// prefix collapses to `~`; other folders are treated as absolute.
#[must_use]
pub fn decode_project_folder(folder: &str, home_prefix: Option<&Path>) -> String {
    if let Some(home) = home_prefix {
        let encoded_home = encode_project_path(&home.to_string_lossy());
        if let Some(rest) = folder.strip_prefix(encoded_home.as_str()) {
            if rest.is_empty() {
                return "~".to_string();
            }
            if rest.starts_with('-') {
                return format!("~{}", rest.replace('-', "/"));
            }
        }
    }

    let trimmed = folder.strip_prefix('-').unwrap_or(folder);
    format!("/{}", trimmed.replace('-', "/"))
}
