use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// On-disk storage convention a session was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Claude,
    OpenCode,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Claude, Backend::OpenCode];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Claude => "claude",
            Backend::OpenCode => "opencode",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', '_'], "");
        match normalized.as_str() {
            "claude" => Ok(Backend::Claude),
            "opencode" => Ok(Backend::OpenCode),
            _ => Err(format!(
                "unknown backend '{raw}' (expected 'claude' or 'opencode')"
            )),
        }
    }
}

/// Backend-specific reference used to re-open a session's source.
///
/// Consumers treat it as opaque; only the adapter that produced it knows how
/// to interpret the fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    File { dir: PathBuf, file: String },
    Directory { path: PathBuf },
}

impl Locator {
    /// Filesystem path the locator points at.
    #[must_use]
    pub fn path(&self) -> PathBuf {
        match self {
            Locator::File { dir, file } => dir.join(file),
            Locator::Directory { path } => path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub title: String,
    pub project_path: String,
    pub preview: String,
    pub message_count: usize,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub first_timestamp: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity: OffsetDateTime,
    pub locator: Locator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Map a raw role string onto the two conversational roles; anything else
    /// (system, tool, summary records) is not a message.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.eq_ignore_ascii_case("user") {
            Some(Role::User)
        } else if raw.eq_ignore_ascii_case("assistant") {
            Some(Role::Assistant)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolUse {
    pub name: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_uses: Vec<ToolUse>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, timestamp: Option<OffsetDateTime>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
            tool_uses: Vec::new(),
        }
    }
}

/// A listed session annotated with its overlay contents at read time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub backend: Backend,
    #[serde(flatten)]
    pub session: Session,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tags: Vec<String>,
}

impl SessionView {
    /// Custom name when the user set one, the derived title otherwise.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.custom_name.as_deref().unwrap_or(&self.session.title)
    }
}
