//! Run state persistence
//!
//! One record per workflow id. The JSON file store keeps each run in its own file so
//! independent workflows never contend for the same lock.

use crate::models::RunState;
use anyhow::{Context, Result};
use dashmap::DashMap;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Durable key-value storage for run states, keyed by workflow id
pub trait RunStateStore: Send + Sync {
    fn save(&self, workflow_id: &str, state: &RunState) -> Result<()>;

    fn load(&self, workflow_id: &str) -> Result<Option<RunState>>;

    /// Remove the record; clearing a missing record is not an error
    fn clear(&self, workflow_id: &str) -> Result<()>;

    /// Workflow ids that have a stored record
    fn list(&self) -> Result<Vec<String>>;
}

/// Stores each run state as `<dir>/<workflow_id>.json`
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Create the store, creating `dir` if needed
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create state directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, workflow_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(workflow_id)))
    }

    fn read_locked(path: &Path) -> Result<String> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open run state {}", path.display()))?;
        FileExt::lock_shared(&file).context("Failed to acquire read lock on run state")?;

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        let read = reader.read_to_string(&mut contents);
        FileExt::unlock(&file).context("Failed to release run state lock")?;
        read.context("Failed to read run state")?;
        Ok(contents)
    }
}

/// Keep ids usable as file names
///
/// Bytes outside `[A-Za-z0-9.-]` become `_XX` (hex), `_` included, so distinct ids
/// never share a file.
fn file_stem(workflow_id: &str) -> String {
    let mut stem = String::with_capacity(workflow_id.len());
    for byte in workflow_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'.' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("_{:02X}", byte));
        }
    }
    stem
}

impl RunStateStore for JsonFileStore {
    fn save(&self, workflow_id: &str, state: &RunState) -> Result<()> {
        let path = self.path_for(workflow_id);
        let json = serde_json::to_string_pretty(state).context("Failed to serialize run state")?;

        // Truncate only once the lock is held
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to open run state {} for writing", path.display()))?;
        FileExt::lock_exclusive(&file).context("Failed to acquire write lock on run state")?;

        let written = (|| -> Result<()> {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(json.as_bytes())?;
            file.flush()?;
            file.sync_data()?;
            Ok(())
        })();
        FileExt::unlock(&file).context("Failed to release run state lock")?;
        written.with_context(|| format!("Failed to write run state {}", path.display()))?;

        tracing::trace!(workflow_id, path = %path.display(), "Run state saved");
        Ok(())
    }

    fn load(&self, workflow_id: &str) -> Result<Option<RunState>> {
        let path = self.path_for(workflow_id);
        if !path.exists() {
            return Ok(None);
        }

        let contents = Self::read_locked(&path)?;
        if contents.trim().is_empty() {
            return Ok(None);
        }
        let state: RunState = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse run state {}", path.display()))?;
        if state.workflow_id != workflow_id {
            return Err(anyhow::anyhow!(
                "Run state {} belongs to workflow '{}', not '{}'",
                path.display(),
                state.workflow_id,
                workflow_id
            ));
        }
        Ok(Some(state))
    }

    fn clear(&self, workflow_id: &str) -> Result<()> {
        let path = self.path_for(workflow_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read state directory {}", self.dir.display()))?;

        for entry in entries {
            let path = entry.context("Failed to read state directory entry")?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            // The stem is sanitized, so report the id recorded inside the file
            match Self::read_locked(&path)
                .ok()
                .and_then(|contents| serde_json::from_str::<RunState>(&contents).ok())
            {
                Some(state) => ids.push(state.workflow_id),
                None => tracing::warn!(path = %path.display(), "Skipping unreadable run state"),
            }
        }

        ids.sort();
        Ok(ids)
    }
}

/// Process-local store, used by tests and embedders without durable storage
#[derive(Default)]
pub struct InMemoryStore {
    states: DashMap<String, RunState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStateStore for InMemoryStore {
    fn save(&self, workflow_id: &str, state: &RunState) -> Result<()> {
        self.states.insert(workflow_id.to_string(), state.clone());
        Ok(())
    }

    fn load(&self, workflow_id: &str) -> Result<Option<RunState>> {
        Ok(self.states.get(workflow_id).map(|entry| entry.value().clone()))
    }

    fn clear(&self, workflow_id: &str) -> Result<()> {
        self.states.remove(workflow_id);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.states.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}
