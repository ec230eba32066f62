use crate::core::{HashStore, ImageRecord, LocationTracker};
use crate::error::DedupError;
use crate::services::history::{HistoryRecord, Journal};
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    Removed,
    /// Already gone, e.g. removed by an interrupted earlier run.
    Missing,
    /// The file could not be deleted and stays in the working set.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relocation {
    Moved(PathBuf),
    Missing,
    Failed,
}

/// The only way stages touch the filesystem. Every change is written to the
/// location map and the journal before the call returns.
pub struct FileActions<'a> {
    pub hashes: &'a mut HashStore,
    pub locations: &'a mut LocationTracker,
    pub journal: &'a mut Journal,
    pub dry_run: bool,
}

impl FileActions<'_> {
    pub fn remove(
        &mut self,
        record: &ImageRecord,
        stage: &str,
        reason: &str,
    ) -> Result<Removal, DedupError> {
        let current = &record.current;
        if self.dry_run {
            log::info!(
                "[dry-run] {}: would remove {} (post {}): {}",
                stage,
                current.display(),
                record.key,
                reason
            );
            return Ok(Removal::Removed);
        }

        let outcome = match fs::remove_file(current) {
            Ok(()) => {
                log::info!(
                    "{}: removed {} (post {}): {}",
                    stage,
                    current.display(),
                    record.key,
                    reason
                );
                Removal::Removed
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let err = DedupError::FileMissing {
                    path: current.clone(),
                };
                log::warn!("{}: {}, forgetting it", stage, err);
                Removal::Missing
            }
            Err(e) => {
                log::warn!("{}: failed to remove {}: {}", stage, current.display(), e);
                return Ok(Removal::Failed);
            }
        };

        self.locations.record_removal(&record.original)?;
        self.hashes.invalidate(&record.original);
        self.journal.append(&HistoryRecord::removed(
            stage,
            &record.original,
            current,
            record.key.to_string(),
            reason.to_string(),
        ))?;
        Ok(outcome)
    }

    /// Moves the record's file to `target` (or a free variant of it).
    pub fn relocate(
        &mut self,
        record: &ImageRecord,
        target: &Path,
        stage: &str,
        cluster: &str,
        reason: &str,
    ) -> Result<Relocation, DedupError> {
        let current = &record.current;
        if self.dry_run {
            log::info!(
                "[dry-run] {}: would move {} → {} ({}, post {})",
                stage,
                current.display(),
                target.display(),
                cluster,
                record.key
            );
            return Ok(Relocation::Moved(target.to_path_buf()));
        }

        if !current.exists() {
            let err = DedupError::FileMissing {
                path: current.clone(),
            };
            log::warn!("{}: {}, skipping", stage, err);
            return Ok(Relocation::Missing);
        }

        let target = free_target(target);
        self.locations.begin_move(&record.original, &target)?;
        if let Err(e) = move_file(current, &target) {
            log::warn!(
                "{}: failed to move {} → {}: {}",
                stage,
                current.display(),
                target.display(),
                e
            );
            self.locations.abort_move(&record.original)?;
            return Ok(Relocation::Failed);
        }
        self.locations.record_move(&record.original, &target)?;

        log::info!(
            "{}: moved {} → {} ({}, post {}): {}",
            stage,
            current.display(),
            target.display(),
            cluster,
            record.key,
            reason
        );
        self.journal.append(&HistoryRecord::moved(
            stage,
            &record.original,
            current,
            &target,
            record.key.to_string(),
            cluster.to_string(),
            reason.to_string(),
        ))?;
        Ok(Relocation::Moved(target))
    }
}

/// `target`, or `<stem>_<n>.<ext>` for the first n that is not taken.
fn free_target(target: &Path) -> PathBuf {
    if !target.exists() {
        return target.to_path_buf();
    }
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = target
        .extension()
        .map(|s| format!(".{}", s.to_string_lossy()))
        .unwrap_or_default();
    let parent = target.parent().unwrap_or_else(|| Path::new(""));
    (1..)
        .map(|n| parent.join(format!("{}_{}{}", stem, n, ext)))
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| target.to_path_buf())
}

/// Rename, falling back to copy + fsync + delete across filesystems.
fn move_file(src: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::CrossesDevices => match fs::copy(src, dest) {
            Ok(_) => {
                fs::File::open(dest)?.sync_all()?;
                fs::remove_file(src)
            }
            Err(copy_err) => {
                let _ = fs::remove_file(dest);
                Err(copy_err)
            }
        },
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Fingerprint, PerceptualHasher, PostKey};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        hashes: HashStore,
        locations: LocationTracker,
        journal: Journal,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let state = root.join("state");
        Fixture {
            hashes: HashStore::load(&state.join("h.json"), PerceptualHasher::new(8)).unwrap(),
            locations: LocationTracker::load(&state.join("l.json")).unwrap(),
            journal: Journal::open(&state.join("history.jsonl")),
            root,
            _dir: dir,
        }
    }

    fn record_at(path: &Path) -> ImageRecord {
        ImageRecord {
            original: path.to_path_buf(),
            current: path.to_path_buf(),
            key: PostKey::new("1", "2"),
            image_index: "1".to_string(),
            extension: "jpg".to_string(),
            fingerprint: Fingerprint::from_bytes(&[0; 8]),
            duplicate_of: None,
        }
    }

    #[test]
    fn test_remove_updates_state_and_journal() {
        let mut fx = fixture();
        let path = fx.root.join("vkg1_2_1.jpg");
        fs::write(&path, b"x").unwrap();
        fx.hashes
            .insert(path.clone(), Fingerprint::from_bytes(&[0; 8]));

        let mut actions = FileActions {
            hashes: &mut fx.hashes,
            locations: &mut fx.locations,
            journal: &mut fx.journal,
            dry_run: false,
        };
        let outcome = actions.remove(&record_at(&path), "ad_filter", "ad").unwrap();
        assert_eq!(outcome, Removal::Removed);
        assert!(!path.exists());
        assert!(!fx.hashes.contains(&path));

        let again = FileActions {
            hashes: &mut fx.hashes,
            locations: &mut fx.locations,
            journal: &mut fx.journal,
            dry_run: false,
        }
        .remove(&record_at(&path), "ad_filter", "ad")
        .unwrap();
        assert_eq!(again, Removal::Missing);
        assert_eq!(Journal::read_all(fx.journal.path()).unwrap().len(), 2);
    }

    #[test]
    fn test_relocate_records_location() {
        let mut fx = fixture();
        let path = fx.root.join("vkg1_2_1.jpg");
        let target = fx.root.join("q").join("dup0001_1-2-1.jpg");
        fs::write(&path, b"x").unwrap();

        let mut actions = FileActions {
            hashes: &mut fx.hashes,
            locations: &mut fx.locations,
            journal: &mut fx.journal,
            dry_run: false,
        };
        let outcome = actions
            .relocate(&record_at(&path), &target, "relocating", "dup0001", "dup")
            .unwrap();
        assert_eq!(outcome, Relocation::Moved(target.clone()));
        assert!(target.exists());
        assert!(!path.exists());
        assert_eq!(fx.locations.current(&path), target);

        let missing = FileActions {
            hashes: &mut fx.hashes,
            locations: &mut fx.locations,
            journal: &mut fx.journal,
            dry_run: false,
        }
        .relocate(&record_at(&path), &target, "relocating", "dup0001", "dup")
        .unwrap();
        assert_eq!(missing, Relocation::Missing);
    }

    #[test]
    fn test_relocate_avoids_overwriting() {
        let mut fx = fixture();
        let path = fx.root.join("vkg1_2_1.jpg");
        let target = fx.root.join("dup0001_1-2-1.jpg");
        fs::write(&path, b"new").unwrap();
        fs::write(&target, b"old").unwrap();

        let outcome = FileActions {
            hashes: &mut fx.hashes,
            locations: &mut fx.locations,
            journal: &mut fx.journal,
            dry_run: false,
        }
        .relocate(&record_at(&path), &target, "relocating", "dup0001", "dup")
        .unwrap();

        let expected = fx.root.join("dup0001_1-2-1_1.jpg");
        assert_eq!(outcome, Relocation::Moved(expected.clone()));
        assert_eq!(fs::read(&target).unwrap(), b"old");
        assert_eq!(fs::read(&expected).unwrap(), b"new");
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let mut fx = fixture();
        let path = fx.root.join("vkg1_2_1.jpg");
        fs::write(&path, b"x").unwrap();

        let mut actions = FileActions {
            hashes: &mut fx.hashes,
            locations: &mut fx.locations,
            journal: &mut fx.journal,
            dry_run: true,
        };
        actions.remove(&record_at(&path), "ad_filter", "ad").unwrap();
        actions
            .relocate(&record_at(&path), &fx.root.join("q.jpg"), "relocating", "dup0001", "dup")
            .unwrap();

        assert!(path.exists());
        assert!(fx.locations.is_empty());
        assert!(!fx.journal.path().exists());
    }
}
