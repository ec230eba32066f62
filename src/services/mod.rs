pub mod actions;
pub mod cluster;
pub mod engine;
pub mod history;
pub mod interrupt;
pub mod intra_post;
pub mod relocate;
pub mod scanner;
pub mod special;

pub use cluster::Cluster;
pub use engine::{DedupEngine, RunStage, RunSummary};
pub use history::{HistoryRecord, Journal};
pub use interrupt::{Checkpoints, InterruptCoordinator};
pub use scanner::ScannerService;
pub use special::SpecialPatternFilter;

use serde::Serialize;

/// Counts from one stage.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub examined: usize,
    /// Images removed or moved.
    pub changed: usize,
    /// Already in their final place from an earlier run.
    pub skipped: usize,
    pub missing: usize,
    pub failed: usize,
    pub interrupted: bool,
}

#[cfg(test)]
pub(crate) mod test_fixture {
    use crate::core::{Fingerprint, HashStore, ImageRecord, LocationTracker, PerceptualHasher, PostKey};
    use crate::services::actions::FileActions;
    use crate::services::history::Journal;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    pub fn fingerprint(value: u64) -> Fingerprint {
        Fingerprint::from_bytes(&value.to_be_bytes())
    }

    /// Record for a file that does not exist on disk.
    pub fn record(group: &str, post: &str, index: &str, fp: Fingerprint) -> ImageRecord {
        let path = PathBuf::from(format!("/imgs/vkg{}_{}_{}.jpg", group, post, index));
        ImageRecord {
            original: path.clone(),
            current: path,
            key: PostKey::new(group, post),
            image_index: index.to_string(),
            extension: "jpg".to_string(),
            fingerprint: fp,
            duplicate_of: None,
        }
    }

    /// Temporary image directory plus the state a stage needs to mutate it.
    pub struct StateFixture {
        dir: TempDir,
        hashes: HashStore,
        locations: LocationTracker,
        journal: Journal,
    }

    impl StateFixture {
        pub fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let state = dir.path().join("state");
            Self {
                hashes: HashStore::load(&state.join("hashes.json"), PerceptualHasher::new(8))
                    .unwrap(),
                locations: LocationTracker::load(&state.join("locations.json")).unwrap(),
                journal: Journal::open(&state.join("history.jsonl")),
                dir,
            }
        }

        pub fn root(&self) -> &Path {
            self.dir.path()
        }

        pub fn path_of(&self, group: &str, post: &str, index: &str) -> PathBuf {
            self.dir
                .path()
                .join("imgs")
                .join(format!("vkg{}_{}_{}.jpg", group, post, index))
        }

        /// Writes a placeholder file and returns its record.
        pub fn image(&mut self, group: &str, post: &str, index: &str, fp: Fingerprint) -> ImageRecord {
            let path = self.path_of(group, post, index);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, format!("{}-{}-{}", group, post, index)).unwrap();
            self.hashes.insert(path.clone(), fp.clone());
            ImageRecord {
                original: path.clone(),
                current: path,
                key: PostKey::new(group, post),
                image_index: index.to_string(),
                extension: "jpg".to_string(),
                fingerprint: fp,
                duplicate_of: None,
            }
        }

        pub fn actions(&mut self, dry_run: bool) -> FileActions<'_> {
            FileActions {
                hashes: &mut self.hashes,
                locations: &mut self.locations,
                journal: &mut self.journal,
                dry_run,
            }
        }
    }
}
