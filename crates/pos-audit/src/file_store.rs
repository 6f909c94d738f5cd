//! File-based attack storage.
//!
//! Events are appended to a single JSON-lines file and mirrored in memory.
//! The file is read back on open; unparseable lines are skipped with a
//! warning. Retention rewrites the file through a temporary sibling and an
//! atomic rename.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::events::AttackEvent;
use crate::store::AttackStore;

/// Persistent attack store backed by a JSON-lines file.
#[derive(Debug)]
pub struct FileAttackStore {
    path: PathBuf,
    events: RwLock<Vec<AttackEvent>>,
}

impl FileAttackStore {
    /// Opens (or creates) the store at `path`, loading existing events.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the
    /// existing file cannot be read.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let events = if path.exists() {
            Self::load(&path)?
        } else {
            Vec::new()
        };
        debug!(path = %path.display(), count = events.len(), "Attack log loaded");

        Ok(Self {
            path,
            events: RwLock::new(events),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<Vec<AttackEvent>> {
        let reader = BufReader::new(File::open(path)?);
        let mut events = Vec::new();

        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AttackEvent>(&line) {
                Ok(event) => events.push(event),
                Err(err) => {
                    warn!(path = %path.display(), line = lineno + 1, error = %err, "Skipping malformed attack record");
                }
            }
        }
        Ok(events)
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn rewrite(&self, events: &[AttackEvent]) -> Result<()> {
        let tmp = self.tmp_path();
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            for event in events {
                writer.write_all(event.to_json()?.as_bytes())?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl AttackStore for FileAttackStore {
    fn append(&self, event: AttackEvent) -> Result<()> {
        let line = format!("{}\n", event.to_json()?);

        let mut events = self.events.write();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(line.as_bytes())?;
        writer.flush()?;

        events.push(event);
        Ok(())
    }

    fn events_since(&self, since: DateTime<Utc>) -> Result<Vec<AttackEvent>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.created_at() >= since)
            .cloned()
            .collect())
    }

    fn retain(&self, keep: &(dyn Fn(&AttackEvent) -> bool + Sync)) -> Result<usize> {
        let mut events = self.events.write();
        let kept: Vec<AttackEvent> = events.iter().filter(|&e| keep(e)).cloned().collect();
        let removed = events.len() - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        self.rewrite(&kept)?;
        *events = kept;
        Ok(removed)
    }

    fn len(&self) -> usize {
        self.events.read().len()
    }
}
