//! Owns one index slot per backend plus the overlay store.
//!
//! Lock order is always backend slot first, overlay second.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use thiserror::Error;

use crate::backend::{ClaudeSource, OpenCodeSource, SessionSource, SourceError};
use crate::cache;
use crate::config::LoadedConfig;
use crate::indexer::{IndexSnapshot, RefreshReport, refresh_index};
use crate::overlay::{OverlayError, OverlayStore, TagChange};
use crate::query::{SessionFilter, query};
use crate::session::{Backend, Locator, Message, Session, SessionView};

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("backend '{0}' is not enabled")]
    UnknownBackend(Backend),
    #[error("no {backend} session with id '{id}'")]
    UnknownSession { backend: Backend, id: String },
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Overlay(#[from] OverlayError),
}

#[derive(Debug, Default)]
struct IndexState {
    snapshot: IndexSnapshot,
    fresh: bool,
}

struct BackendSlot {
    source: Box<dyn SessionSource>,
    state: Mutex<IndexState>,
}

pub struct Library {
    slots: IndexMap<Backend, BackendSlot>,
    overlay: Mutex<OverlayStore>,
    cache_dir: Option<PathBuf>,
}

impl Library {
    /// An empty library; attach backends with [`Library::with_source`].
    #[must_use]
    pub fn new(overlay_dir: impl Into<PathBuf>, cache_dir: Option<PathBuf>) -> Self {
        Self {
            slots: IndexMap::new(),
            overlay: Mutex::new(OverlayStore::load(overlay_dir)),
            cache_dir,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: Box<dyn SessionSource>) -> Self {
        self.slots.insert(
            source.backend(),
            BackendSlot {
                source,
                state: Mutex::new(IndexState::default()),
            },
        );
        self
    }

    /// Wire up every enabled backend from configuration.
    #[must_use]
    pub fn from_config(loaded: &LoadedConfig) -> Self {
        let config = &loaded.config;
        let mut library = Self::new(loaded.overlay_dir(), loaded.cache_dir());
        for backend in config.enabled_backends() {
            let source: Box<dyn SessionSource> = match backend.backend {
                Backend::Claude => Box::new(ClaudeSource::new(
                    backend.root.clone(),
                    config.preview_chars,
                    config.home_prefix.clone(),
                )),
                Backend::OpenCode => Box::new(OpenCodeSource::new(
                    backend.root.clone(),
                    config.preview_chars,
                )),
            };
            library = library.with_source(source);
        }
        library
    }

    pub fn backends(&self) -> impl Iterator<Item = Backend> + '_ {
        self.slots.keys().copied()
    }

    /// Sessions for `backend` matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::UnknownBackend`] when the backend is not enabled.
    pub fn list_sessions(
        &self,
        backend: Backend,
        filter: &SessionFilter,
    ) -> Result<Vec<SessionView>, LibraryError> {
        let slot = self.slot(backend)?;
        let state = self.fresh_state(slot);
        let overlay = self.overlay();
        Ok(query(&state.snapshot, overlay.overlay(), filter, backend))
    }

    /// Look up one listed session by id.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::UnknownSession`] when no listed session has `id`.
    pub fn find_session(&self, backend: Backend, id: &str) -> Result<SessionView, LibraryError> {
        let slot = self.slot(backend)?;
        let state = self.fresh_state(slot);
        let session = state
            .snapshot
            .find(id)
            .ok_or_else(|| LibraryError::UnknownSession {
                backend,
                id: id.to_string(),
            })?;
        Ok(self.overlay().overlay().annotate(backend, session))
    }

    /// Load the full conversation behind a locator. Nothing is cached.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] when the locator no longer resolves.
    pub fn get_messages(
        &self,
        backend: Backend,
        locator: &Locator,
    ) -> Result<Vec<Message>, LibraryError> {
        let slot = self.slot(backend)?;
        Ok(slot.source.load_messages(locator)?)
    }

    /// Set (or clear, with an empty name) a custom name.
    ///
    /// # Errors
    ///
    /// Returns an error when the overlay cannot be persisted.
    pub fn rename_session(&self, id: &str, name: &str) -> Result<(), LibraryError> {
        self.overlay().set_name(id, name)?;
        tracing::info!(session = id, cleared = name.trim().is_empty(), "session renamed");
        Ok(())
    }

    /// Set (or clear) a description.
    ///
    /// # Errors
    ///
    /// Returns an error when the overlay cannot be persisted.
    pub fn set_description(&self, id: &str, text: &str) -> Result<(), LibraryError> {
        Ok(self.overlay().set_description(id, text)?)
    }

    /// # Errors
    ///
    /// Returns an error for the reserved tag or when the overlay cannot be
    /// persisted.
    pub fn add_tag(&self, id: &str, tag: &str) -> Result<bool, LibraryError> {
        Ok(self.overlay().add_tag(id, tag)?)
    }

    /// # Errors
    ///
    /// Returns an error when the overlay cannot be persisted.
    pub fn add_tags(&self, id: &str, raw: &str) -> Result<TagChange, LibraryError> {
        Ok(self.overlay().add_tags(id, raw)?)
    }

    /// # Errors
    ///
    /// Returns an error for the reserved tag or when the overlay cannot be
    /// persisted.
    pub fn remove_tag(&self, id: &str, tag: &str) -> Result<bool, LibraryError> {
        Ok(self.overlay().remove_tag(id, tag)?)
    }

    #[must_use]
    pub fn all_tags(&self) -> Vec<String> {
        self.overlay().overlay().all_tags()
    }

    /// Rescan a backend, reusing unchanged sessions from the current snapshot
    /// or the on-disk cache. Concurrent callers wait for the running rebuild.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::UnknownBackend`] when the backend is not enabled.
    pub fn refresh_index(&self, backend: Backend) -> Result<RefreshReport, LibraryError> {
        let slot = self.slot(backend)?;
        let mut state = lock(&slot.state);
        Ok(self.rebuild(slot, &mut state))
    }

    /// Remove a session's source files and every overlay entry for it.
    ///
    /// # Errors
    ///
    /// Returns [`LibraryError::UnknownSession`] when no listed session has the
    /// locator, or a [`SourceError`] when its files cannot be removed.
    pub fn delete_session(
        &self,
        backend: Backend,
        locator: &Locator,
    ) -> Result<Session, LibraryError> {
        let slot = self.slot(backend)?;
        let mut state = self.fresh_state(slot);
        let id = state
            .snapshot
            .sessions()
            .find(|session| &session.locator == locator)
            .map(|session| session.id.clone())
            .ok_or_else(|| LibraryError::UnknownSession {
                backend,
                id: locator.path().display().to_string(),
            })?;

        slot.source.remove_session(locator)?;
        let removed = state
            .snapshot
            .remove(&id)
            .ok_or_else(|| LibraryError::UnknownSession {
                backend,
                id: id.clone(),
            })?;
        self.store_cache(slot, &state.snapshot);
        self.overlay().forget(&id)?;

        tracing::info!(backend = %backend, session = %id, "session deleted");
        Ok(removed)
    }

    fn slot(&self, backend: Backend) -> Result<&BackendSlot, LibraryError> {
        self.slots
            .get(&backend)
            .ok_or(LibraryError::UnknownBackend(backend))
    }

    fn overlay(&self) -> MutexGuard<'_, OverlayStore> {
        lock(&self.overlay)
    }

    /// Lock a slot, building its snapshot first if this process has not yet.
    fn fresh_state<'a>(&self, slot: &'a BackendSlot) -> MutexGuard<'a, IndexState> {
        let mut state = lock(&slot.state);
        if !state.fresh {
            let report = self.rebuild(slot, &mut state);
            tracing::debug!(
                backend = %slot.source.backend(),
                reused = report.reused,
                parsed = report.parsed,
                "index ready"
            );
        }
        state
    }

    fn rebuild(&self, slot: &BackendSlot, state: &mut IndexState) -> RefreshReport {
        let backend = slot.source.backend();
        if !state.fresh
            && let Some(dir) = &self.cache_dir
        {
            state.snapshot = cache::load_snapshot(dir, backend, &slot.source.fingerprint());
        }

        let (snapshot, report) = refresh_index(&state.snapshot, slot.source.as_ref());
        state.snapshot = snapshot;
        state.fresh = true;
        self.store_cache(slot, &state.snapshot);
        report
    }

    fn store_cache(&self, slot: &BackendSlot, snapshot: &IndexSnapshot) {
        let Some(dir) = &self.cache_dir else {
            return;
        };
        let backend = slot.source.backend();
        let fingerprint = slot.source.fingerprint();
        if let Err(err) = cache::save_snapshot(dir, backend, &fingerprint, snapshot) {
            tracing::warn!(backend = %backend, error = %err, "failed to write index cache");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
