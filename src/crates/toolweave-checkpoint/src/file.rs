//! Directory-backed snapshot storage
//!
//! Each snapshot lives in `<dir>/<id>.json`. Writes go to a temporary file
//! in the same directory and are renamed into place, so a reader never
//! observes a half-written document.

use crate::error::{CheckpointError, Result};
use crate::record::ContextId;
use crate::snapshot::ExecutionSnapshot;
use crate::traits::SnapshotStore;
use std::fs;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Snapshot store that keeps one JSON file per execution
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    /// Open a store rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a snapshot with `id` is stored at
    pub fn path_for(&self, id: &ContextId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn put(&self, snapshot: &ExecutionSnapshot) -> Result<()> {
        let path = self.path_for(&snapshot.id());
        let tmp = self.dir.join(format!(".{}.json.tmp", snapshot.id()));
        {
            let mut writer = BufWriter::new(fs::File::create(&tmp)?);
            snapshot.to_writer(&mut writer)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &path)?;
        tracing::debug!(path = %path.display(), "snapshot written");
        Ok(())
    }

    fn get(&self, id: &ContextId) -> Result<ExecutionSnapshot> {
        let path = self.path_for(id);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CheckpointError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        ExecutionSnapshot::from_reader(BufReader::new(file))
    }

    fn list(&self) -> Result<Vec<ContextId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(ContextId::parse)
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn delete(&self, id: &ContextId) -> Result<bool> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CheckpointError::Storage(format!(
                "failed to delete snapshot {}: {}",
                id, e
            ))),
        }
    }
}
