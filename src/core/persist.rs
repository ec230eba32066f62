use crate::error::DedupError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Serialize `value` as JSON next to `path`, fsync, then rename over `path`.
/// A crash leaves either the old file or the new one, never a truncated one.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), DedupError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| DedupError::persistence(path, e))?;

    let tmp = NamedTempFile::new_in(dir).map_err(|e| DedupError::persistence(path, e))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer(&mut writer, value).map_err(|e| DedupError::persistence(path, e))?;
        writer.flush().map_err(|e| DedupError::persistence(path, e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| DedupError::persistence(path, e))?;
    tmp.persist(path)
        .map_err(|e| DedupError::persistence(path, e.error))?;
    Ok(())
}

/// Returns `Ok(None)` when the file does not exist yet.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, DedupError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(DedupError::persistence(path, e)),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| DedupError::persistence(path, e))
}
