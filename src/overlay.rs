//! User-authored names, tags and descriptions layered over derived sessions.
//!
//! Each kind lives in its own JSON object keyed by session id. A mutation
//! rewrites only the file it touched; the last writer wins.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::session::{Backend, Session, SessionView};

pub const NAMES_FILE: &str = "session-names.json";
pub const TAGS_FILE: &str = "session-tags.json";
pub const DESCRIPTIONS_FILE: &str = "session-descriptions.json";

/// Implied by a custom name; never stored and never user-editable.
pub const RESERVED_TAG: &str = "named";

#[derive(Debug, Error)]
pub enum OverlayError {
    #[error("failed to write overlay file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode overlay data")]
    Encode(#[from] serde_json::Error),
    #[error("the 'named' tag is derived from custom names and cannot be edited")]
    ReservedTag,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overlay {
    names: IndexMap<String, String>,
    tags: IndexMap<String, IndexSet<String>>,
    descriptions: IndexMap<String, String>,
}

impl Overlay {
    #[must_use]
    pub fn custom_name(&self, id: &str) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    #[must_use]
    pub fn description(&self, id: &str) -> Option<&str> {
        self.descriptions.get(id).map(String::as_str)
    }

    /// Stored tags for a session, in insertion order.
    pub fn tags(&self, id: &str) -> impl Iterator<Item = &str> {
        self.tags
            .get(id)
            .into_iter()
            .flat_map(|tags| tags.iter().map(String::as_str))
    }

    /// Whether the session carries `tag`. The reserved tag matches sessions
    /// that have a custom name.
    #[must_use]
    pub fn has_tag(&self, id: &str, tag: &str) -> bool {
        if tag == RESERVED_TAG {
            return self.names.contains_key(id);
        }
        self.tags.get(id).is_some_and(|tags| tags.contains(tag))
    }

    /// Sorted union of every tag in use, including the reserved one when any
    /// session has a custom name.
    #[must_use]
    pub fn all_tags(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .tags
            .values()
            .flatten()
            .cloned()
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();
        if !self.names.is_empty() && !all.iter().any(|tag| tag == RESERVED_TAG) {
            all.push(RESERVED_TAG.to_string());
        }
        all.sort();
        all
    }

    #[must_use]
    pub fn display_name<'a>(&'a self, session: &'a Session) -> &'a str {
        self.custom_name(&session.id).unwrap_or(&session.title)
    }

    /// Merge overlay contents into a listed session.
    #[must_use]
    pub fn annotate(&self, backend: Backend, session: &Session) -> SessionView {
        let mut tags: Vec<String> = self.tags(&session.id).map(str::to_string).collect();
        if self.names.contains_key(&session.id) {
            tags.insert(0, RESERVED_TAG.to_string());
        }
        SessionView {
            backend,
            session: session.clone(),
            custom_name: self.custom_name(&session.id).map(str::to_string),
            description: self.description(&session.id).map(str::to_string),
            tags,
        }
    }
}

/// Outcome of a comma-separated bulk tag add.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagChange {
    pub tags: Vec<String>,
    pub added: Vec<String>,
    pub skipped: Vec<String>,
}

#[derive(Debug)]
pub struct OverlayStore {
    dir: PathBuf,
    overlay: Overlay,
}

impl OverlayStore {
    /// Load all overlay files from `dir`. Missing files are empty; unreadable
    /// ones are logged and treated as empty so startup never fails.
    #[must_use]
    pub fn load(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let names: IndexMap<String, String> = read_map(&dir.join(NAMES_FILE));
        let raw_tags: IndexMap<String, Vec<String>> = read_map(&dir.join(TAGS_FILE));
        let descriptions: IndexMap<String, String> = read_map(&dir.join(DESCRIPTIONS_FILE));

        let tags = raw_tags
            .into_iter()
            .filter_map(|(id, tags)| {
                let set: IndexSet<String> = tags
                    .iter()
                    .map(|tag| tag.trim())
                    .filter(|tag| !tag.is_empty() && *tag != RESERVED_TAG)
                    .map(str::to_string)
                    .collect();
                (!set.is_empty()).then_some((id, set))
            })
            .collect();

        Self {
            dir,
            overlay: Overlay {
                names: non_blank(names),
                tags,
                descriptions: non_blank(descriptions),
            },
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    /// Set or clear (empty input) a custom name.
    ///
    /// # Errors
    ///
    /// Returns an error when the names file cannot be written.
    pub fn set_name(&mut self, id: &str, name: &str) -> Result<(), OverlayError> {
        set_or_clear(&mut self.overlay.names, id, name);
        self.save_names()
    }

    /// Set or clear (empty input) a description.
    ///
    /// # Errors
    ///
    /// Returns an error when the descriptions file cannot be written.
    pub fn set_description(&mut self, id: &str, text: &str) -> Result<(), OverlayError> {
        set_or_clear(&mut self.overlay.descriptions, id, text);
        self.save_descriptions()
    }

    /// Add one tag. Returns whether the set changed.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::ReservedTag`] for the reserved tag, or an error
    /// when the tags file cannot be written.
    pub fn add_tag(&mut self, id: &str, tag: &str) -> Result<bool, OverlayError> {
        let tag = tag.trim();
        if tag == RESERVED_TAG {
            return Err(OverlayError::ReservedTag);
        }
        if tag.is_empty() {
            return Ok(false);
        }
        let added = self
            .overlay
            .tags
            .entry(id.to_string())
            .or_default()
            .insert(tag.to_string());
        if added {
            self.save_tags()?;
        }
        Ok(added)
    }

    /// Add every tag in a comma-separated list. Tags already present and the
    /// reserved tag are reported as skipped rather than failing the batch.
    ///
    /// # Errors
    ///
    /// Returns an error when the tags file cannot be written.
    pub fn add_tags(&mut self, id: &str, raw: &str) -> Result<TagChange, OverlayError> {
        let mut change = TagChange::default();
        let set = self.overlay.tags.entry(id.to_string()).or_default();
        for tag in raw.split(',').map(str::trim).filter(|tag| !tag.is_empty()) {
            if tag != RESERVED_TAG && set.insert(tag.to_string()) {
                change.added.push(tag.to_string());
            } else {
                change.skipped.push(tag.to_string());
            }
        }
        change.tags = set.iter().cloned().collect();
        if set.is_empty() {
            self.overlay.tags.shift_remove(id);
        }
        if !change.added.is_empty() {
            self.save_tags()?;
        }
        Ok(change)
    }

    /// Remove one tag. Returns whether the set changed; an emptied set drops
    /// the session's key.
    ///
    /// # Errors
    ///
    /// Returns [`OverlayError::ReservedTag`] for the reserved tag, or an error
    /// when the tags file cannot be written.
    pub fn remove_tag(&mut self, id: &str, tag: &str) -> Result<bool, OverlayError> {
        let tag = tag.trim();
        if tag == RESERVED_TAG {
            return Err(OverlayError::ReservedTag);
        }
        let Some(set) = self.overlay.tags.get_mut(id) else {
            return Ok(false);
        };
        let removed = set.shift_remove(tag);
        if set.is_empty() {
            self.overlay.tags.shift_remove(id);
        }
        if removed {
            self.save_tags()?;
        }
        Ok(removed)
    }

    /// Drop every overlay entry for a session that no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error when one of the touched files cannot be written.
    pub fn forget(&mut self, id: &str) -> Result<(), OverlayError> {
        if self.overlay.names.shift_remove(id).is_some() {
            self.save_names()?;
        }
        if self.overlay.tags.shift_remove(id).is_some() {
            self.save_tags()?;
        }
        if self.overlay.descriptions.shift_remove(id).is_some() {
            self.save_descriptions()?;
        }
        Ok(())
    }

    fn save_names(&self) -> Result<(), OverlayError> {
        write_map(&self.dir, NAMES_FILE, &self.overlay.names)
    }

    fn save_tags(&self) -> Result<(), OverlayError> {
        write_map(&self.dir, TAGS_FILE, &self.overlay.tags)
    }

    fn save_descriptions(&self) -> Result<(), OverlayError> {
        write_map(&self.dir, DESCRIPTIONS_FILE, &self.overlay.descriptions)
    }
}

fn set_or_clear(map: &mut IndexMap<String, String>, id: &str, value: &str) {
    let value = value.trim();
    if value.is_empty() {
        map.shift_remove(id);
    } else {
        map.insert(id.to_string(), value.to_string());
    }
}

fn non_blank(map: IndexMap<String, String>) -> IndexMap<String, String> {
    map.into_iter()
        .filter(|(_, value)| !value.trim().is_empty())
        .collect()
}

fn read_map<T: DeserializeOwned + Default>(path: &Path) -> T {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return T::default(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "overlay file unreadable; starting empty");
            return T::default();
        }
    };
    serde_json::from_str(&raw).unwrap_or_else(|err| {
        tracing::warn!(path = %path.display(), error = %err, "overlay file corrupt; starting empty");
        T::default()
    })
}

fn write_map<T: Serialize>(dir: &Path, file: &str, value: &T) -> Result<(), OverlayError> {
    fs::create_dir_all(dir).map_err(|source| OverlayError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(file);
    let tmp = path.with_extension("json.tmp");
    let text = serde_json::to_string_pretty(value)?;
    fs::write(&tmp, text).map_err(|source| OverlayError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, &path).map_err(|source| OverlayError::Io { path, source })?;
    tracing::debug!(file, "overlay saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;
    use color_eyre::Result;
    use predicates::prelude::*;

    #[test]
    fn load_tolerates_missing_and_corrupt_files() -> Result<()> {
        let temp = TempDir::new()?;
        temp.child(NAMES_FILE).write_str("{broken")?;
        temp.child(TAGS_FILE)
            .write_str(r#"{"s1":["bug"," bug ","","named"],"s2":[]}"#)?;

        let store = OverlayStore::load(temp.path());
        assert!(store.overlay().custom_name("s1").is_none());
        assert_eq!(store.overlay().tags("s1").collect::<Vec<_>>(), ["bug"]);
        assert_eq!(store.overlay().tags("s2").count(), 0);
        assert_eq!(store.overlay().all_tags(), ["bug"]);
        Ok(())
    }

    #[test]
    fn reserved_tag_is_rejected_and_implied() -> Result<()> {
        let temp = TempDir::new()?;
        let mut store = OverlayStore::load(temp.path());
        assert!(matches!(
            store.add_tag("s1", "named"),
            Err(OverlayError::ReservedTag)
        ));
        assert!(matches!(
            store.remove_tag("s1", " named "),
            Err(OverlayError::ReservedTag)
        ));

        store.set_name("s1", "Parser work")?;
        assert!(store.overlay().has_tag("s1", RESERVED_TAG));
        assert!(!store.overlay().has_tag("s2", RESERVED_TAG));
        assert_eq!(store.overlay().all_tags(), ["named"]);
        Ok(())
    }

    #[test]
    fn bulk_add_reports_added_and_skipped() -> Result<()> {
        let temp = TempDir::new()?;
        let mut store = OverlayStore::load(temp.path());
        store.add_tag("s1", "bug")?;

        let change = store.add_tags("s1", "bug, feature, ,named,feature")?;
        assert_eq!(change.added, ["feature"]);
        assert_eq!(change.skipped, ["bug", "named", "feature"]);
        assert_eq!(change.tags, ["bug", "feature"]);

        let change = store.add_tags("s9", " , named")?;
        assert!(change.added.is_empty());
        assert_eq!(store.overlay().tags("s9").count(), 0);
        temp.child(TAGS_FILE)
            .assert(predicates::str::contains("s9").not());
        Ok(())
    }

    #[test]
    fn descriptions_and_forget() -> Result<()> {
        let temp = TempDir::new()?;
        let mut store = OverlayStore::load(temp.path());
        store.set_name("s1", "Name")?;
        store.set_description("s1", "  Long-running refactor  ")?;
        store.add_tag("s1", "wip")?;
        assert_eq!(
            store.overlay().description("s1"),
            Some("Long-running refactor")
        );

        store.forget("s1")?;
        let reloaded = OverlayStore::load(temp.path());
        assert_eq!(reloaded.overlay(), &Overlay::default());
        Ok(())
    }

    #[test]
    fn annotate_merges_overlay_into_view() -> Result<()> {
        let temp = TempDir::new()?;
        let mut store = OverlayStore::load(temp.path());
        store.set_name("s1", "Custom")?;
        store.add_tag("s1", "bug")?;

        let session = Session {
            id: "s1".into(),
            title: "Derived".into(),
            project_path: "/tmp".into(),
            preview: String::new(),
            message_count: 1,
            first_timestamp: None,
            last_activity: time::OffsetDateTime::UNIX_EPOCH,
            locator: crate::session::Locator::Directory {
                path: "/tmp/x".into(),
            },
        };
        let view = store.overlay().annotate(Backend::OpenCode, &session);
        assert_eq!(view.display_name(), "Custom");
        assert_eq!(view.tags, ["named", "bug"]);
        assert_eq!(store.overlay().display_name(&session), "Custom");
        Ok(())
    }
}
