use crate::error::DedupError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const STATE_DIR_NAME: &str = ".postdedup";
const HASH_FILE: &str = "hashes.json";
const LOCATION_FILE: &str = "locations.json";
const HISTORY_FILE: &str = "history.jsonl";

/// Settings for one pipeline run.
///
/// Values come from [`PipelineConfig::default`], then an optional JSON file,
/// then command line flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub base_dirs: Vec<PathBuf>,
    pub special_dirs: Vec<PathBuf>,
    pub quarantine_dir: PathBuf,
    pub state_dir: Option<PathBuf>,
    pub prefix: String,
    pub hash_size: u32,
    pub intra_post_threshold: u32,
    pub inter_post_threshold: u32,
    pub batch_size: usize,
    pub extensions: Vec<String>,
    pub dry_run: bool,
    pub quiet: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_dirs: Vec::new(),
            special_dirs: Vec::new(),
            quarantine_dir: PathBuf::from("duplicates"),
            state_dir: None,
            prefix: "vkg".to_string(),
            hash_size: 8,
            intra_post_threshold: 3,
            inter_post_threshold: 3,
            batch_size: 256,
            extensions: ["jpg", "jpeg", "png", "bmp", "gif", "tiff", "webp"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            dry_run: false,
            quiet: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, DedupError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| DedupError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_str(&raw)
            .map_err(|e| DedupError::Config(format!("invalid config {}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<(), DedupError> {
        if self.base_dirs.is_empty() {
            return Err(DedupError::Config(
                "at least one base image directory is required".to_string(),
            ));
        }
        for dir in self.base_dirs.iter().chain(self.special_dirs.iter()) {
            if !dir.is_dir() {
                return Err(DedupError::Config(format!(
                    "{} is not a directory",
                    dir.display()
                )));
            }
        }
        if self.base_dirs.iter().any(|dir| dir == &self.quarantine_dir) {
            return Err(DedupError::Config(
                "quarantine directory must differ from every base directory".to_string(),
            ));
        }
        if self.hash_size == 0 {
            return Err(DedupError::Config("hash size must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(DedupError::Config("batch size must be positive".to_string()));
        }
        if self.prefix.contains('_') {
            return Err(DedupError::Config(
                "file name prefix must not contain '_'".to_string(),
            ));
        }
        Ok(())
    }

    /// Explicit state directory, or `<first base dir>/.postdedup`.
    pub fn state_dir(&self) -> PathBuf {
        match (&self.state_dir, self.base_dirs.first()) {
            (Some(dir), _) => dir.clone(),
            (None, Some(base)) => base.join(STATE_DIR_NAME),
            (None, None) => PathBuf::from(STATE_DIR_NAME),
        }
    }

    pub fn hash_file(&self) -> PathBuf {
        self.state_dir().join(HASH_FILE)
    }

    pub fn location_file(&self) -> PathBuf {
        self.state_dir().join(LOCATION_FILE)
    }

    pub fn history_file(&self) -> PathBuf {
        self.state_dir().join(HISTORY_FILE)
    }
}
