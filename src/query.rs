use time::OffsetDateTime;

use crate::indexer::IndexSnapshot;
use crate::overlay::Overlay;
use crate::session::{Backend, Session, SessionView};

/// Listing constraints. Every field is optional and they combine with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    /// Case-insensitive substring of the title, project path, preview or
    /// custom name.
    pub text: Option<String>,
    pub tag: Option<String>,
    /// Only sessions active at or after this instant.
    pub since: Option<OffsetDateTime>,
    pub limit: Option<usize>,
}

impl SessionFilter {
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    #[must_use]
    pub fn with_since(mut self, since: OffsetDateTime) -> Self {
        self.since = Some(since);
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Filter a snapshot and annotate the survivors, keeping snapshot order.
#[must_use]
pub fn query(
    snapshot: &IndexSnapshot,
    overlay: &Overlay,
    filter: &SessionFilter,
    backend: Backend,
) -> Vec<SessionView> {
    let needle = filter
        .text
        .as_deref()
        .filter(|text| !text.is_empty())
        .map(str::to_lowercase);
    let tag = filter
        .tag
        .as_deref()
        .map(str::trim)
        .filter(|tag| !tag.is_empty());

    snapshot
        .sessions()
        .filter(|session| tag.is_none_or(|tag| overlay.has_tag(&session.id, tag)))
        .filter(|session| filter.since.is_none_or(|since| session.last_activity >= since))
        .filter(|session| {
            needle
                .as_deref()
                .is_none_or(|needle| matches_text(session, overlay, needle))
        })
        .take(filter.limit.unwrap_or(usize::MAX))
        .map(|session| overlay.annotate(backend, session))
        .collect()
}

fn matches_text(session: &Session, overlay: &Overlay, needle: &str) -> bool {
    let contains = |haystack: &str| haystack.to_lowercase().contains(needle);
    contains(&session.title)
        || contains(&session.project_path)
        || contains(&session.preview)
        || overlay.custom_name(&session.id).is_some_and(contains)
}
