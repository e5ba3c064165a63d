//! Per-file storage: one JSON file per message and per message part.
//!
//! ```text
//! storage/
//!   session/<project>/<session>.json   title, directory, time
//!   message/<session>/<message>.json   id, role, time.created
//!   part/<message>/<part>.json         type, text, synthetic, tool, state
//! ```

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{
    Candidate, SessionSource, SessionTally, SourceError, derive_title, ensure_within, from_unix_ms,
    latest, modified_at, sort_chronologically,
};
use crate::session::{Backend, Locator, Message, Role, Session, ToolUse};

const MESSAGE_DIR: &str = "message";
const PART_DIR: &str = "part";
const SESSION_DIR: &str = "session";

#[derive(Debug, Clone)]
pub struct OpenCodeSource {
    root: PathBuf,
    preview_chars: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTime {
    created: Option<i64>,
    updated: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMessage {
    id: Option<String>,
    role: Option<String>,
    time: RawTime,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPart {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
    synthetic: Option<bool>,
    tool: Option<String>,
    state: Option<RawToolState>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawToolState {
    input: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSessionInfo {
    title: Option<String>,
    directory: Option<String>,
    time: RawTime,
}

/// A decoded message file together with the id its parts are filed under.
struct StoredMessage {
    id: String,
    raw: RawMessage,
}

impl StoredMessage {
    fn timestamp(&self) -> Option<time::OffsetDateTime> {
        from_unix_ms(self.raw.time.created)
    }
}

/// Text and tool records assembled from a message's parts.
#[derive(Default)]
struct MessageBody {
    text: String,
    tool_uses: Vec<ToolUse>,
}

impl OpenCodeSource {
    pub fn new(root: impl Into<PathBuf>, preview_chars: usize) -> Self {
        Self {
            root: root.into(),
            preview_chars,
        }
    }

    fn message_root(&self) -> PathBuf {
        self.root.join(MESSAGE_DIR)
    }

    fn part_dir(&self, message_id: &str) -> PathBuf {
        self.root.join(PART_DIR).join(message_id)
    }

    /// Session info files live under an unknown project folder, so every
    /// project is probed for `<session>.json`.
    fn session_info_path(&self, session_id: &str) -> Option<PathBuf> {
        let file = format!("{session_id}.json");
        sorted_entries(&self.root.join(SESSION_DIR))
            .into_iter()
            .filter(|path| path.is_dir())
            .map(|project| project.join(&file))
            .find(|path| path.is_file())
    }

    fn session_info(&self, session_id: &str) -> Option<RawSessionInfo> {
        let path = self.session_info_path(session_id)?;
        match read_json::<RawSessionInfo>(&path) {
            Ok(info) => Some(info),
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "ignoring unreadable session info");
                None
            }
        }
    }

    fn read_body(&self, message_id: &str) -> MessageBody {
        let mut body = MessageBody::default();
        let mut texts = Vec::new();

        for path in json_files(&self.part_dir(message_id)) {
            let part = match read_json::<RawPart>(&path) {
                Ok(part) => part,
                Err(err) => {
                    tracing::debug!(path = %path.display(), error = %err, "skipping invalid part file");
                    continue;
                }
            };
            match part.kind.as_deref() {
                Some("text") if part.synthetic != Some(true) => {
                    if let Some(text) = part.text {
                        texts.push(text);
                    }
                }
                Some("tool") => body.tool_uses.push(ToolUse {
                    name: part.tool.unwrap_or_default(),
                    input: part.state.map(|state| state.input).unwrap_or_default(),
                }),
                _ => {}
            }
        }

        body.text = texts.join("\n");
        body
    }

    /// Latest modification time across the message folder, its message files,
    /// their part folders and part files, the session info file and the
    /// project folders that may hold it. Folder times move when an info file
    /// is created or removed.
    fn source_mtime(&self, session_id: &str, dir: &Path) -> Option<time::OffsetDateTime> {
        let mut newest = modified_at(dir);
        for message in json_files(dir) {
            newest = latest(newest, modified_at(&message));
            let Some(stem) = file_stem(&message) else {
                continue;
            };
            let parts = self.part_dir(&stem);
            newest = latest(newest, modified_at(&parts));
            for part in json_files(&parts) {
                newest = latest(newest, modified_at(&part));
            }
        }
        let session_root = self.root.join(SESSION_DIR);
        newest = latest(newest, modified_at(&session_root));
        for project in sorted_entries(&session_root) {
            newest = latest(newest, modified_at(&project));
        }
        if let Some(info) = self.session_info_path(session_id) {
            newest = latest(newest, modified_at(&info));
        }
        newest
    }
}

impl SessionSource for OpenCodeSource {
    fn backend(&self) -> Backend {
        Backend::OpenCode
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn fingerprint(&self) -> String {
        format!("preview={}", self.preview_chars)
    }

    fn candidates(&self) -> Vec<Candidate> {
        let message_root = self.message_root();
        if !message_root.is_dir() {
            tracing::debug!(root = %message_root.display(), "opencode message root missing");
            return Vec::new();
        }

        sorted_entries(&message_root)
            .into_iter()
            .filter(|path| path.is_dir())
            .filter_map(|path| {
                let id = path.file_name()?.to_str()?.to_string();
                if id.starts_with('.') {
                    return None;
                }
                Some(Candidate {
                    modified: self.source_mtime(&id, &path),
                    id,
                    locator: Locator::Directory { path },
                })
            })
            .collect()
    }

    fn parse_candidate(&self, candidate: &Candidate) -> Result<Session, SourceError> {
        let dir = message_dir(&candidate.locator)?;
        if !dir.is_dir() {
            return Err(SourceError::NotFound(dir.to_path_buf()));
        }

        let mut tally = SessionTally::default();
        for message in read_messages(dir) {
            tally.observe_timestamp(message.timestamp());
            let Some(role) = message.raw.role.as_deref().and_then(Role::parse) else {
                continue;
            };
            let text = if role == Role::User && tally.preview().is_none() {
                self.read_body(&message.id).text
            } else {
                String::new()
            };
            tally.observe_message(role, &text, self.preview_chars);
        }

        let info = self.session_info(&candidate.id).unwrap_or_default();
        let title = info
            .title
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| derive_title(tally.preview()));
        let project_path = info
            .directory
            .filter(|dir| !dir.trim().is_empty())
            .unwrap_or_else(|| candidate.id.clone());

        Ok(Session {
            id: candidate.id.clone(),
            title,
            project_path,
            preview: tally.preview().unwrap_or_default().to_string(),
            message_count: tally.message_count(),
            first_timestamp: tally
                .first_timestamp()
                .or_else(|| from_unix_ms(info.time.created)),
            last_activity: tally
                .last_activity(from_unix_ms(info.time.updated).or(candidate.modified)),
            locator: candidate.locator.clone(),
        })
    }

    fn load_messages(&self, locator: &Locator) -> Result<Vec<Message>, SourceError> {
        let dir = message_dir(locator)?;
        if !dir.is_dir() {
            return Err(SourceError::NotFound(dir.to_path_buf()));
        }

        let mut messages: Vec<Message> = read_messages(dir)
            .into_iter()
            .filter_map(|stored| {
                let role = stored.raw.role.as_deref().and_then(Role::parse)?;
                let body = self.read_body(&stored.id);
                if body.text.trim().is_empty() {
                    return None;
                }
                let mut message = Message::new(role, body.text, stored.timestamp());
                message.tool_uses = body.tool_uses;
                Some(message)
            })
            .collect();
        sort_chronologically(&mut messages);
        Ok(messages)
    }

    fn remove_session(&self, locator: &Locator) -> Result<(), SourceError> {
        let dir = message_dir(locator)?;
        let canonical = ensure_within(&self.root, dir)?;
        let session_id = file_stem(&canonical).unwrap_or_default();

        for message in read_messages(&canonical) {
            remove_dir_if_present(&self.part_dir(&message.id))?;
        }
        fs::remove_dir_all(&canonical).map_err(|err| SourceError::io(&canonical, err))?;
        if let Some(info) = self.session_info_path(&session_id) {
            fs::remove_file(&info).map_err(|err| SourceError::io(&info, err))?;
        }

        tracing::info!(session = %session_id, path = %canonical.display(), "removed session storage");
        Ok(())
    }
}

fn message_dir(locator: &Locator) -> Result<&Path, SourceError> {
    match locator {
        Locator::Directory { path } => Ok(path),
        Locator::File { .. } => Err(SourceError::ForeignLocator {
            backend: Backend::OpenCode,
            locator: locator.clone(),
        }),
    }
}

/// Messages in a session folder, oldest first. Files that fail to decode
/// are skipped.
fn read_messages(dir: &Path) -> Vec<StoredMessage> {
    let mut messages: Vec<StoredMessage> = json_files(dir)
        .into_iter()
        .filter_map(|path| {
            let raw = match read_json::<RawMessage>(&path) {
                Ok(raw) => raw,
                Err(err) => {
                    tracing::debug!(path = %path.display(), error = %err, "skipping invalid message file");
                    return None;
                }
            };
            let id = raw
                .id
                .clone()
                .filter(|id| !id.is_empty())
                .or_else(|| file_stem(&path))?;
            Some(StoredMessage { id, raw })
        })
        .collect();
    messages.sort_by_key(StoredMessage::timestamp);
    messages
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, SourceError> {
    let data = fs::read(path).map_err(|err| SourceError::io(path, err))?;
    serde_json::from_slice(&data).map_err(|source| SourceError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .collect();
    paths.sort();
    paths
}

fn json_files(dir: &Path) -> Vec<PathBuf> {
    sorted_entries(dir)
        .into_iter()
        .filter(|path| path.is_file() && path.extension().and_then(OsStr::to_str) == Some("json"))
        .collect()
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(OsStr::to_str)
        .map(str::to_string)
}

fn remove_dir_if_present(dir: &Path) -> Result<(), SourceError> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SourceError::io(dir, err)),
    }
}
