//! Intermediate artifact storage.
//!
//! Every stage persists its output through an [`ArtifactStore`] before the
//! next stage consumes it. Two implementations ship with the crate:
//!
//! * [`FsArtifactStore`]: the on-disk layout under the work directory;
//!   every file is plain text or pretty-printed JSON so a human can open it.
//! * [`MemoryArtifactStore`]: a map in memory, used by tests to drive the
//!   orchestrator's state machine without real disk I/O.
//!
//! A `(document, stage)` pair is written once per run. Concurrent writers to
//! the same pair are not supported; callers serialise them.

use crate::error::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Identity of one persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactKey {
    /// Text as extracted from the PDF.
    RawText(String),
    /// Text after cleaning.
    CleanText(String),
    /// Chunk list of a document.
    Chunks(String),
    /// One parsed LLM response.
    ChunkInsights { company: String, index: usize },
    /// All statements of a document, keyed by category.
    Insights(String),
    /// Sentiment scores of a document's statements.
    Sentiment(String),
    /// Per-(document, stage) status record.
    Manifest,
}

impl ArtifactKey {
    /// Location of the artifact relative to the store root.
    pub fn relative_path(&self) -> PathBuf {
        match self {
            ArtifactKey::RawText(c) => PathBuf::from("raw_text").join(format!("{c}.txt")),
            ArtifactKey::CleanText(c) => PathBuf::from("cleaned_text").join(format!("{c}.txt")),
            ArtifactKey::Chunks(c) => PathBuf::from("chunks").join(format!("{c}.json")),
            ArtifactKey::ChunkInsights { company, index } => PathBuf::from("llm_outputs")
                .join(company)
                .join(format!("chunk_{index:04}.json")),
            ArtifactKey::Insights(c) => PathBuf::from("llm_outputs").join(format!("{c}.json")),
            ArtifactKey::Sentiment(c) => {
                PathBuf::from("sentiment_outputs").join(format!("{c}.json"))
            }
            ArtifactKey::Manifest => PathBuf::from("manifest.json"),
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.relative_path().display())
    }
}

/// Key/value storage for stage outputs.
pub trait ArtifactStore: Send + Sync {
    /// Contents of `key`, or `None` when it was never written.
    fn read(&self, key: &ArtifactKey) -> Result<Option<String>, StoreError>;

    /// Create or overwrite `key`. Readers never observe a partial write.
    fn write(&self, key: &ArtifactKey, contents: &str) -> Result<(), StoreError>;

    fn exists(&self, key: &ArtifactKey) -> Result<bool, StoreError> {
        Ok(self.read(key)?.is_some())
    }
}

/// Deserialize a JSON artifact.
pub fn read_json<T: DeserializeOwned>(
    store: &dyn ArtifactStore,
    key: &ArtifactKey,
) -> Result<Option<T>, StoreError> {
    match store.read(key)? {
        None => Ok(None),
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Json {
                key: key.to_string(),
                source,
            }),
    }
}

/// Serialize `value` as pretty JSON and store it under `key`.
pub fn write_json<T: Serialize>(
    store: &dyn ArtifactStore,
    key: &ArtifactKey,
    value: &T,
) -> Result<(), StoreError> {
    let mut json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
        key: key.to_string(),
        source,
    })?;
    json.push('\n');
    store.write(key, &json)
}

// ── Filesystem ───────────────────────────────────────────────────────────

/// Artifacts as files under a root directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(key.relative_path())
    }
}

impl ArtifactStore for FsArtifactStore {
    fn read(&self, key: &ArtifactKey) -> Result<Option<String>, StoreError> {
        let path = self.path_of(key);
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    fn write(&self, key: &ArtifactKey, contents: &str) -> Result<(), StoreError> {
        let path = self.path_of(key);
        write_atomic(&path, contents.as_bytes()).map_err(|source| StoreError::Io { path, source })
    }

    fn exists(&self, key: &ArtifactKey) -> Result<bool, StoreError> {
        Ok(self.path_of(key).is_file())
    }
}

/// Write `bytes` to a temp file beside `path`, then rename over it.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

// ── In-memory ────────────────────────────────────────────────────────────

/// Artifacts in a map; counts writes so tests can assert on recomputation.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    entries: Mutex<BTreeMap<ArtifactKey, String>>,
    writes: AtomicUsize,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `write` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<ArtifactKey> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<ArtifactKey, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ArtifactStore for MemoryArtifactStore {
    fn read(&self, key: &ArtifactKey) -> Result<Option<String>, StoreError> {
        Ok(self.lock().get(key).cloned())
    }

    fn write(&self, key: &ArtifactKey, contents: &str) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.lock().insert(key.clone(), contents.to_string());
        Ok(())
    }

    fn exists(&self, key: &ArtifactKey) -> Result<bool, StoreError> {
        Ok(self.lock().contains_key(key))
    }
}
