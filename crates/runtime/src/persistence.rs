use std::path::{Path, PathBuf};

use foundation::time::EpochMillis;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::state::BudgetState;

#[derive(Debug)]
pub enum PersistError {
    Io(std::io::Error),
    Encode(serde_json::Error),
    Decode(serde_json::Error),
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "snapshot i/o failed: {err}"),
            Self::Encode(err) => write!(f, "snapshot encoding failed: {err}"),
            Self::Decode(err) => write!(f, "snapshot is malformed: {err}"),
        }
    }
}

impl std::error::Error for PersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Encode(err) | Self::Decode(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for PersistError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// Serialises a snapshot. Called with the state lock held; the file write
/// happens later, outside it.
pub fn encode(state: &BudgetState) -> Result<Vec<u8>, PersistError> {
    serde_json::to_vec_pretty(state).map_err(PersistError::Encode)
}

pub fn decode(bytes: &[u8]) -> Result<BudgetState, PersistError> {
    serde_json::from_slice(bytes).map_err(PersistError::Decode)
}

/// Durable home of the budget snapshot: a single JSON file replaced by
/// write-then-rename.
///
/// Every write carries a sequence number assigned when the snapshot was
/// encoded. Sequence numbers start at 1; a write whose number is not newer
/// than the last one on disk is dropped.
pub struct SnapshotStore {
    path: PathBuf,
    /// Serialises writers and remembers the sequence of the newest snapshot
    /// on disk.
    last_written: Mutex<u64>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_written: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("json.tmp")
    }

    /// Reads the snapshot as written; `None` when there is no file yet.
    pub async fn read(&self) -> Result<Option<BudgetState>, PersistError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => decode(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads the snapshot and deducts the time that passed while the process
    /// was down. Missing or unreadable snapshots yield defaults.
    pub async fn load(&self, now_ms: EpochMillis) -> BudgetState {
        match self.read().await {
            Ok(Some(mut state)) => {
                let deducted = state.reconcile_elapsed(now_ms);
                info!(
                    path = %self.path.display(),
                    remaining = state.remaining_seconds,
                    running = state.is_running,
                    deducted,
                    "snapshot loaded"
                );
                if let Some(goal) = state.goal_deadline_ms {
                    info!(goal_deadline_ms = goal, "goal deadline active");
                }
                state
            }
            Ok(None) => {
                info!(path = %self.path.display(), "no snapshot found, starting fresh");
                BudgetState::default()
            }
            Err(err) => {
                warn!(path = %self.path.display(), "ignoring snapshot: {err}");
                BudgetState::default()
            }
        }
    }

    /// Replaces the snapshot with `bytes`, encoded as save number `sequence`.
    ///
    /// Returns `Ok(false)` without touching the file when the same or a later
    /// save has already been written.
    pub async fn write(&self, bytes: &[u8], sequence: u64) -> Result<bool, PersistError> {
        let mut last_written = self.last_written.lock().await;
        if sequence <= *last_written {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        *last_written = sequence;
        Ok(true)
    }
}
