use std::cmp::Reverse;
use std::collections::HashMap;
use std::path::PathBuf;

use time::OffsetDateTime;

use crate::backend::{SessionSource, SourceError};
use crate::session::{Locator, Session};

/// A session together with the source modification time it was parsed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub session: Session,
    pub source_mtime: Option<OffsetDateTime>,
}

/// Ordered, listable sessions for one backend.
///
/// Sessions without messages never make it in, and entries stay sorted by
/// `last_activity` descending with ties broken by ascending id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexSnapshot {
    entries: Vec<IndexEntry>,
}

impl IndexSnapshot {
    #[must_use]
    pub fn from_entries(entries: Vec<IndexEntry>) -> Self {
        let mut entries: Vec<IndexEntry> = entries
            .into_iter()
            .filter(|entry| entry.session.message_count > 0)
            .collect();
        entries.sort_by(|a, b| {
            Reverse(a.session.last_activity)
                .cmp(&Reverse(b.session.last_activity))
                .then_with(|| a.session.id.cmp(&b.session.id))
        });
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.entries.iter().map(|entry| &entry.session)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn find(&self, id: &str) -> Option<&Session> {
        self.sessions().find(|session| session.id == id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Session> {
        let position = self
            .entries
            .iter()
            .position(|entry| entry.session.id == id)?;
        Some(self.entries.remove(position).session)
    }
}

#[derive(Debug, Default)]
pub struct RefreshReport {
    pub scanned: usize,
    pub reused: usize,
    pub parsed: usize,
    pub dropped_empty: usize,
    pub errors: Vec<IndexError>,
}

#[derive(Debug)]
pub struct IndexError {
    pub id: String,
    pub path: PathBuf,
    pub error: SourceError,
}

/// Parse every session the source exposes into a fresh snapshot.
pub fn build_index<S: SessionSource + ?Sized>(source: &S) -> IndexSnapshot {
    refresh_index(&IndexSnapshot::default(), source).0
}

/// Rebuild a snapshot, re-parsing only sources whose modification time moved.
///
/// An entry is reused when its candidate locator matches and both sides
/// report the same known modification time; everything else is parsed again.
/// Sessions that fail to parse are recorded in the report and left out.
pub fn refresh_index<S: SessionSource + ?Sized>(
    existing: &IndexSnapshot,
    source: &S,
) -> (IndexSnapshot, RefreshReport) {
    let cached: HashMap<&Locator, &IndexEntry> = existing
        .entries
        .iter()
        .map(|entry| (&entry.session.locator, entry))
        .collect();

    let mut report = RefreshReport::default();
    let mut entries = Vec::new();

    for candidate in source.candidates() {
        report.scanned += 1;

        if let Some(entry) = cached.get(&candidate.locator)
            && candidate.modified.is_some()
            && entry.source_mtime == candidate.modified
            && entry.session.id == candidate.id
        {
            report.reused += 1;
            entries.push((*entry).clone());
            continue;
        }

        match source.parse_candidate(&candidate) {
            Ok(session) => {
                report.parsed += 1;
                if session.message_count == 0 {
                    report.dropped_empty += 1;
                    tracing::debug!(backend = %source.backend(), session = %session.id, "dropping session without messages");
                    continue;
                }
                entries.push(IndexEntry {
                    session,
                    source_mtime: candidate.modified,
                });
            }
            Err(error) => {
                tracing::warn!(
                    backend = %source.backend(),
                    session = %candidate.id,
                    error = %error,
                    "skipping unreadable session"
                );
                report.errors.push(IndexError {
                    path: candidate.locator.path(),
                    id: candidate.id,
                    error,
                });
            }
        }
    }

    let snapshot = IndexSnapshot::from_entries(entries);
    tracing::debug!(
        backend = %source.backend(),
        sessions = snapshot.len(),
        scanned = report.scanned,
        reused = report.reused,
        parsed = report.parsed,
        "index rebuilt"
    );
    (snapshot, report)
}
