use crate::core::{parse_file_name, ImageName, ParsedName};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct DiscoveredImage {
    pub path: PathBuf,
    pub name: ImageName,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub images: Vec<DiscoveredImage>,
    pub bad_names: usize,
    pub delimiters: usize,
}

/// Walks image directories, skipping excluded subtrees (quarantine, state).
pub struct ScannerService {
    prefix: String,
    extensions: HashSet<String>,
    excluded: Vec<PathBuf>,
}

impl ScannerService {
    pub fn new(prefix: &str, extensions: &[String], excluded: Vec<PathBuf>) -> Self {
        Self {
            prefix: prefix.to_string(),
            extensions: extensions.iter().map(|ext| ext.to_lowercase()).collect(),
            excluded,
        }
    }

    pub fn is_supported_format(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| self.extensions.contains(&ext.to_string_lossy().to_lowercase()))
            .unwrap_or(false)
    }

    /// Every supported image file under `dirs`, in a stable order.
    pub fn list_images(&self, dirs: &[PathBuf]) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for root in dirs {
            let walker = WalkDir::new(root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| !self.is_excluded(entry.path()));
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        log::warn!("Skipping unreadable directory entry: {}", e);
                        continue;
                    }
                };
                if entry.file_type().is_file() && self.is_supported_format(entry.path()) {
                    files.push(entry.into_path());
                }
            }
        }
        files
    }

    /// Lists images and parses their names. Unparseable names are logged and skipped.
    pub fn discover(&self, dirs: &[PathBuf]) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        for path in self.list_images(dirs) {
            match parse_file_name(&path, &self.prefix) {
                Ok(ParsedName::Image(name)) => outcome.images.push(DiscoveredImage { path, name }),
                Ok(ParsedName::Delimiter) => {
                    log::debug!("Skipping group delimiter {}", path.display());
                    outcome.delimiters += 1;
                }
                Err(e) => {
                    log::warn!("{}", e);
                    outcome.bad_names += 1;
                }
            }
        }
        outcome
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excluded.iter().any(|excluded| path.starts_with(excluded))
    }
}
