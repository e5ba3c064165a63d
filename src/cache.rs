//! Persisted index snapshots, one JSON file per backend.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::indexer::{IndexEntry, IndexSnapshot};
use crate::session::{Backend, Session};

const CACHE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read index cache {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse index cache {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode index cache")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write index cache {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    backend: Backend,
    /// Parse settings of the source that produced the entries.
    #[serde(default)]
    fingerprint: String,
    #[serde(default)]
    entries: Vec<CacheEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    #[serde(flatten)]
    session: Session,
    #[serde(
        rename = "sourceMTime",
        default,
        with = "time::serde::rfc3339::option"
    )]
    source_mtime: Option<OffsetDateTime>,
}

#[must_use]
pub fn cache_path(cache_dir: &Path, backend: Backend) -> PathBuf {
    cache_dir.join(format!("index-{backend}.json"))
}

/// Read a cached snapshot. `Ok(None)` means there is nothing usable on disk:
/// the file is missing or was written by another version, backend or set of
/// parse settings.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read or decoded.
pub fn read_snapshot(
    cache_dir: &Path,
    backend: Backend,
    fingerprint: &str,
) -> Result<Option<IndexSnapshot>, CacheError> {
    let path = cache_path(cache_dir, backend);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(source) if source.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(CacheError::Read { path, source }),
    };

    let file: CacheFile =
        serde_json::from_str(&raw).map_err(|source| CacheError::Parse { path: path.clone(), source })?;
    if file.version != CACHE_VERSION || file.backend != backend {
        tracing::debug!(
            path = %path.display(),
            version = file.version,
            cached_backend = %file.backend,
            "ignoring index cache from another layout"
        );
        return Ok(None);
    }
    if file.fingerprint != fingerprint {
        tracing::debug!(
            path = %path.display(),
            cached = %file.fingerprint,
            current = %fingerprint,
            "ignoring index cache built with other settings"
        );
        return Ok(None);
    }

    let entries = file
        .entries
        .into_iter()
        .map(|entry| IndexEntry {
            session: entry.session,
            source_mtime: entry.source_mtime,
        })
        .collect();
    Ok(Some(IndexSnapshot::from_entries(entries)))
}

/// Like [`read_snapshot`], but a broken cache only costs a warning.
#[must_use]
pub fn load_snapshot(cache_dir: &Path, backend: Backend, fingerprint: &str) -> IndexSnapshot {
    match read_snapshot(cache_dir, backend, fingerprint) {
        Ok(snapshot) => snapshot.unwrap_or_default(),
        Err(err) => {
            tracing::warn!(backend = %backend, error = %err, "discarding unreadable index cache");
            IndexSnapshot::default()
        }
    }
}

/// Write the snapshot through a temp file and rename it into place.
///
/// # Errors
///
/// Returns an error when the cache directory or file cannot be written.
pub fn save_snapshot(
    cache_dir: &Path,
    backend: Backend,
    fingerprint: &str,
    snapshot: &IndexSnapshot,
) -> Result<(), CacheError> {
    fs::create_dir_all(cache_dir).map_err(|source| CacheError::Write {
        path: cache_dir.to_path_buf(),
        source,
    })?;

    let path = cache_path(cache_dir, backend);
    let tmp = path.with_extension("json.tmp");
    let file = CacheFile {
        version: CACHE_VERSION,
        backend,
        fingerprint: fingerprint.to_string(),
        entries: snapshot
            .entries()
            .iter()
            .map(|entry| CacheEntry {
                session: entry.session.clone(),
                source_mtime: entry.source_mtime,
            })
            .collect(),
    };
    let text = serde_json::to_string_pretty(&file)?;
    fs::write(&tmp, text).map_err(|source| CacheError::Write {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, &path).map_err(|source| CacheError::Write { path, source })?;
    Ok(())
}
