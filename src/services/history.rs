use crate::error::DedupError;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// One destructive action, enough to reconstruct what happened to a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: String,
    pub stage: String,
    pub action: String, // "removed" or "moved"
    pub original: PathBuf,
    pub from: PathBuf,
    pub to: Option<PathBuf>,
    pub post: String,
    pub cluster: Option<String>,
    pub reason: String,
}

impl HistoryRecord {
    pub fn removed(stage: &str, original: &Path, from: &Path, post: String, reason: String) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            stage: stage.to_string(),
            action: "removed".to_string(),
            original: original.to_path_buf(),
            from: from.to_path_buf(),
            to: None,
            post,
            cluster: None,
            reason,
        }
    }

    pub fn moved(
        stage: &str,
        original: &Path,
        from: &Path,
        to: &Path,
        post: String,
        cluster: String,
        reason: String,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            stage: stage.to_string(),
            action: "moved".to_string(),
            original: original.to_path_buf(),
            from: from.to_path_buf(),
            to: Some(to.to_path_buf()),
            post,
            cluster: Some(cluster),
            reason,
        }
    }
}

/// Append-only JSON lines journal of removals and relocations.
pub struct Journal {
    path: PathBuf,
    out: Option<File>,
}

impl Journal {
    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            out: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &HistoryRecord) -> Result<(), DedupError> {
        if self.out.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DedupError::persistence(&self.path, e))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| DedupError::persistence(&self.path, e))?;
            self.out = Some(file);
        }

        let line =
            serde_json::to_string(record).map_err(|e| DedupError::persistence(&self.path, e))?;
        if let Some(out) = self.out.as_mut() {
            writeln!(out, "{}", line).map_err(|e| DedupError::persistence(&self.path, e))?;
            out.flush()
                .map_err(|e| DedupError::persistence(&self.path, e))?;
        }
        Ok(())
    }

    /// Reads every record, skipping malformed lines (a crash can cut the last one short).
    pub fn read_all(path: &Path) -> Result<Vec<HistoryRecord>, DedupError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(DedupError::Io(e)),
        };

        let mut records = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryRecord>(&line) {
                Ok(record) => records.push(record),
                Err(err) => log::warn!("Skipping malformed history entry {}: {}", i, err),
            }
        }
        Ok(records)
    }
}
