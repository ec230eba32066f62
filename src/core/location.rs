use crate::core::persist::{read_json, write_json_atomic};
use crate::error::DedupError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LocationEntry {
    current: PathBuf,
    /// Set while a move is announced but not yet confirmed.
    #[serde(default)]
    pending: bool,
}

/// One line of the move log. Each op sets the whole state of one original, so
/// replaying the log over a newer snapshot gives the same map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum MoveOp {
    Begin { original: PathBuf, target: PathBuf },
    Done { original: PathBuf, current: PathBuf },
    Forget { original: PathBuf },
}

/// Where the content originally found at a path lives now.
///
/// Only moved files have entries; untouched files resolve to themselves and
/// removed files are forgotten. Every mutation is appended to a move log and
/// synced before the call returns; [`LocationTracker::save`] folds the log into
/// the JSON snapshot and truncates it.
pub struct LocationTracker {
    path: PathBuf,
    log_path: PathBuf,
    entries: BTreeMap<PathBuf, LocationEntry>,
    log: Option<File>,
}

impl LocationTracker {
    /// Loads the snapshot, replays the move log, settles moves that were
    /// interrupted between the announcement and the confirmation, and compacts.
    pub fn load(path: &Path) -> Result<Self, DedupError> {
        let entries: BTreeMap<PathBuf, LocationEntry> = read_json(path)?.unwrap_or_default();
        let mut tracker = Self {
            path: path.to_path_buf(),
            log_path: path.with_extension("log"),
            entries,
            log: None,
        };
        let replayed = tracker.replay()?;
        let settled = tracker.reconcile();
        if replayed > 0 || settled > 0 {
            tracker.save()?;
        }
        Ok(tracker)
    }

    /// Applies the move log; returns the number of lines found.
    fn replay(&mut self) -> Result<usize, DedupError> {
        let raw = match fs::read_to_string(&self.log_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(DedupError::persistence(&self.log_path, e)),
        };

        let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str::<MoveOp>(line) {
                Ok(op) => self.apply(op),
                // A crash mid-append can only cut the last line short.
                Err(e) if i + 1 == lines.len() => {
                    log::warn!(
                        "Ignoring torn last entry of {}: {}",
                        self.log_path.display(),
                        e
                    );
                }
                Err(e) => return Err(DedupError::persistence(&self.log_path, e)),
            }
        }
        Ok(lines.len())
    }

    fn apply(&mut self, op: MoveOp) {
        match op {
            MoveOp::Begin { original, target } => {
                self.entries.insert(
                    original,
                    LocationEntry {
                        current: target,
                        pending: true,
                    },
                );
            }
            MoveOp::Done { original, current } => {
                if current == original {
                    self.entries.remove(&original);
                } else {
                    self.entries.insert(
                        original,
                        LocationEntry {
                            current,
                            pending: false,
                        },
                    );
                }
            }
            MoveOp::Forget { original } => {
                self.entries.remove(&original);
            }
        }
    }

    fn append(&mut self, op: MoveOp) -> Result<(), DedupError> {
        let line =
            serde_json::to_string(&op).map_err(|e| DedupError::persistence(&self.log_path, e))?;
        if self.log.is_none() {
            if let Some(parent) = self.log_path.parent() {
                fs::create_dir_all(parent).map_err(|e| DedupError::persistence(&self.log_path, e))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_path)
                .map_err(|e| DedupError::persistence(&self.log_path, e))?;
            self.log = Some(file);
        }
        if let Some(log) = self.log.as_mut() {
            writeln!(log, "{}", line).map_err(|e| DedupError::persistence(&self.log_path, e))?;
            log.sync_data()
                .map_err(|e| DedupError::persistence(&self.log_path, e))?;
        }
        self.apply(op);
        Ok(())
    }

    fn reconcile(&mut self) -> usize {
        let mut settled = 0;
        let pending: Vec<(PathBuf, PathBuf)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.pending)
            .map(|(original, entry)| (original.clone(), entry.current.clone()))
            .collect();

        for (original, target) in pending {
            settled += 1;
            if target.exists() && !original.exists() {
                log::info!(
                    "Completing interrupted move {} → {}",
                    original.display(),
                    target.display()
                );
                if let Some(entry) = self.entries.get_mut(&original) {
                    entry.pending = false;
                }
            } else {
                log::info!(
                    "Discarding unfinished move {} → {}",
                    original.display(),
                    target.display()
                );
                self.entries.remove(&original);
            }
        }
        settled
    }

    /// Current location of `original`; `original` itself if never moved.
    pub fn current(&self, original: &Path) -> PathBuf {
        match self.entries.get(original) {
            Some(entry) if !entry.pending => entry.current.clone(),
            _ => original.to_path_buf(),
        }
    }

    pub fn is_moved(&self, original: &Path) -> bool {
        self.entries
            .get(original)
            .is_some_and(|entry| !entry.pending)
    }

    /// Persists the intended destination before the file is touched.
    pub fn begin_move(&mut self, original: &Path, target: &Path) -> Result<(), DedupError> {
        self.append(MoveOp::Begin {
            original: original.to_path_buf(),
            target: target.to_path_buf(),
        })
    }

    pub fn record_move(&mut self, original: &Path, new_path: &Path) -> Result<(), DedupError> {
        self.append(MoveOp::Done {
            original: original.to_path_buf(),
            current: new_path.to_path_buf(),
        })
    }

    /// Drops an announced move that never happened.
    pub fn abort_move(&mut self, original: &Path) -> Result<(), DedupError> {
        if self
            .entries
            .get(original)
            .is_some_and(|entry| entry.pending)
        {
            self.append(MoveOp::Forget {
                original: original.to_path_buf(),
            })?;
        }
        Ok(())
    }

    pub fn record_removal(&mut self, original: &Path) -> Result<(), DedupError> {
        if self.entries.contains_key(original) {
            self.append(MoveOp::Forget {
                original: original.to_path_buf(),
            })?;
        }
        Ok(())
    }

    /// All confirmed moves as (original, current).
    pub fn moved(&self) -> impl Iterator<Item = (&Path, &Path)> {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.pending)
            .map(|(original, entry)| (original.as_path(), entry.current.as_path()))
    }

    /// Forgets moved files whose current location no longer exists.
    pub fn prune(&mut self) -> Result<usize, DedupError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.current.exists());
        let removed = before - self.entries.len();
        if removed > 0 {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Writes the snapshot, then truncates the move log it now covers.
    pub fn save(&mut self) -> Result<(), DedupError> {
        write_json_atomic(&self.path, &self.entries)?;
        self.log = None;
        match fs::remove_file(&self.log_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DedupError::persistence(&self.log_path, e)),
        }
    }
}
