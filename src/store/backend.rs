//! State backends
//!
//! A backend holds the committed [`ExchangeState`]. `load` always returns the
//! last committed state and `commit` replaces it all-or-nothing, so a failed
//! commit never leaves the three tables out of step with each other.

use crate::error::{QueueError, QueueResult};
use crate::store::state::ExchangeState;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// Trait for state persistence
#[cfg_attr(test, mockall::automock)]
pub trait StateBackend: Send + Sync {
    /// Load the last committed state
    fn load(&self) -> QueueResult<ExchangeState>;

    /// Atomically replace the committed state
    fn commit(&self, state: &ExchangeState) -> QueueResult<()>;

    /// Human-readable description for logs and health checks
    fn describe(&self) -> String;
}

/// Durable backend storing the state as a JSON document on disk.
///
/// Commits write a sibling temporary file and rename it over the data file,
/// so readers only ever see a complete document.
#[derive(Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
    fsync: bool,
}

impl JsonFileBackend {
    /// Open a backend at `path`, creating the parent directory if needed.
    /// A missing data file is treated as an empty exchange.
    pub fn open(path: impl Into<PathBuf>, fsync: bool) -> QueueResult<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    QueueError::storage(format!(
                        "failed to create data directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let backend = Self { path, fsync };

        // Fail fast on a corrupt file instead of at the first event
        let state = backend.load()?;
        info!(
            "Opened state file {} - participants: {}, queued: {}, pairings: {}",
            backend.path.display(),
            state.participants.len(),
            state.queue.len(),
            state.history.len()
        );

        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Flush the directory entry so a completed rename survives power loss
    fn sync_parent_dir(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        File::open(self.parent_dir())?.sync_all()?;
        Ok(())
    }

    fn write_temp(&self, state: &ExchangeState) -> std::io::Result<PathBuf> {
        let temp_path = self.temp_path();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)?;

        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, state)?;
        writer.flush()?;

        if self.fsync {
            writer.get_ref().sync_all()?;
        }

        Ok(temp_path)
    }
}

impl StateBackend for JsonFileBackend {
    fn load(&self) -> QueueResult<ExchangeState> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("State file {} not found, starting empty", self.path.display());
                return Ok(ExchangeState::new());
            }
            Err(e) => {
                return Err(QueueError::storage(format!(
                    "failed to open {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let state: ExchangeState = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            QueueError::storage(format!("corrupt state file {}: {}", self.path.display(), e))
        })?;

        state.validate().map_err(|e| {
            QueueError::storage(format!(
                "inconsistent state file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(state)
    }

    fn commit(&self, state: &ExchangeState) -> QueueResult<()> {
        let temp_path = self.write_temp(state).map_err(|e| {
            QueueError::storage(format!("failed to write {}: {}", self.path.display(), e))
        })?;

        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(QueueError::storage(format!(
                "failed to replace {}: {}",
                self.path.display(),
                e
            )));
        }

        if self.fsync {
            // The new document is already visible, so report rather than fail
            if let Err(e) = self.sync_parent_dir() {
                warn!(
                    "Failed to sync directory {}: {}",
                    self.parent_dir().display(),
                    e
                );
            }
        }

        debug!("Committed state to {}", self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json-file:{}", self.path.display())
    }
}

/// Non-durable backend keeping the committed state in memory
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    state: RwLock<ExchangeState>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing state (for tests and tooling)
    pub fn with_state(state: ExchangeState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }
}

impl StateBackend for InMemoryBackend {
    fn load(&self) -> QueueResult<ExchangeState> {
        let state = self
            .state
            .read()
            .map_err(|_| QueueError::storage("Failed to acquire state read lock"))?;
        Ok(state.clone())
    }

    fn commit(&self, state: &ExchangeState) -> QueueResult<()> {
        let mut committed = self
            .state
            .write()
            .map_err(|_| QueueError::storage("Failed to acquire state write lock"))?;
        *committed = state.clone();
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}
