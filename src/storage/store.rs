//! The in-memory feed registry and its snapshot file.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

use super::codec;
use super::types::{feed_id, Feed};

/// Directory under the platform state location that holds the store.
const STATE_DIR_NAME: &str = "MorningPost";
const STORE_FILE_NAME: &str = "morningpost.db";

/// Failures reading or writing the store's snapshot file.
///
/// A missing snapshot is never an error; it means "empty store".
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read feed store {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write feed store {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode feed store {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: bincode::Error,
    },

    #[error("feed store {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Default snapshot location: `<state dir>/MorningPost/morningpost.db`.
///
/// Uses the XDG state directory where the platform has one, otherwise the
/// per-user data directory (Application Support on macOS, roaming AppData on
/// Windows). Falls back to the working directory when no home is known.
pub fn default_store_path() -> PathBuf {
    let base = directories::BaseDirs::new()
        .map(|dirs| {
            dirs.state_dir()
                .unwrap_or_else(|| dirs.data_dir())
                .to_path_buf()
        })
        .unwrap_or_else(|| PathBuf::from("."));
    base.join(STATE_DIR_NAME).join(STORE_FILE_NAME)
}

/// Content-addressed registry of feeds, persisted as an explicit snapshot.
///
/// The in-memory map is the source of truth between [`load`](Self::load)
/// and [`save`](Self::save); nothing is written through on mutation.
/// Mutations take `&mut self`, so callers sharing a store across request
/// handlers must serialize access themselves.
#[derive(Debug)]
pub struct FeedStore {
    feeds: BTreeMap<u64, Feed>,
    path: PathBuf,
}

impl FeedStore {
    /// Creates an empty store backed by `path`. Nothing is read.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            feeds: BTreeMap::new(),
            path: path.into(),
        }
    }

    /// Creates a store backed by `path` and loads any existing snapshot.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let mut store = Self::new(path);
        store.load()?;
        Ok(store)
    }

    /// Opens the store at [`default_store_path`].
    pub fn open_default() -> Result<Self, PersistenceError> {
        Self::open(default_store_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Registers `feed`, keyed by the FNV-1a hash of its endpoint.
    ///
    /// The id carried by `feed` is ignored and recomputed. An existing entry
    /// for the same endpoint is overwritten. Returns the id.
    pub fn add(&mut self, feed: Feed) -> u64 {
        let id = feed_id(&feed.endpoint);
        tracing::debug!(id = id, endpoint = %feed.endpoint, kind = %feed.kind, "Registering feed");
        self.feeds.insert(
            id,
            Feed {
                id,
                endpoint: feed.endpoint,
                kind: feed.kind,
            },
        );
        id
    }

    /// Removes the feed with `id`, returning it if it was present.
    pub fn delete(&mut self, id: u64) -> Option<Feed> {
        self.feeds.remove(&id)
    }

    pub fn get(&self, id: u64) -> Option<&Feed> {
        self.feeds.get(&id)
    }

    /// All registered feeds. Callers must not rely on the order.
    pub fn all(&self) -> Vec<Feed> {
        self.feeds.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    /// Replaces the in-memory map with the snapshot at the backing path.
    ///
    /// A missing file leaves the store empty. Any other read or decode
    /// failure is returned and the in-memory map is left untouched.
    pub fn load(&mut self) -> Result<(), PersistenceError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No feed store found, starting empty");
                self.feeds.clear();
                return Ok(());
            }
            Err(source) => {
                return Err(PersistenceError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        self.feeds = codec::decode(&bytes).map_err(|reason| PersistenceError::Corrupt {
            path: self.path.clone(),
            reason,
        })?;
        tracing::info!(path = %self.path.display(), feeds = self.feeds.len(), "Loaded feed store");
        Ok(())
    }

    /// Writes the whole map to the backing path.
    ///
    /// Missing parent directories are created (mode 0755 on Unix). The
    /// snapshot is written to a temporary file in the same directory and
    /// renamed over the old one, so readers never observe a partial file.
    pub fn save(&self) -> Result<(), PersistenceError> {
        let write_err = |source| PersistenceError::Write {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        create_state_dir(&dir).map_err(write_err)?;

        let bytes = codec::encode(&self.feeds).map_err(|source| PersistenceError::Encode {
            path: self.path.clone(),
            source,
        })?;

        let mut temp = NamedTempFile::new_in(&dir).map_err(write_err)?;
        temp.write_all(&bytes).map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;
        temp.persist(&self.path).map_err(|e| write_err(e.error))?;

        tracing::info!(path = %self.path.display(), feeds = self.feeds.len(), "Saved feed store");
        Ok(())
    }
}

#[cfg(unix)]
fn create_state_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(dir)
}

#[cfg(not(unix))]
fn create_state_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}
