use crate::core::{BkTree, Corpus, Fingerprint, ImageRecord};
use crate::error::DedupError;
use crate::services::actions::{FileActions, Removal};
use crate::services::interrupt::Checkpoints;
use crate::services::StageReport;
use indicatif::ProgressBar;
use std::path::PathBuf;

pub const STAGE: &str = "ad_filter";

/// Known advertisement / watermark images. Anything close to one of them is
/// not an animal photo and leaves the corpus before clustering.
pub struct SpecialPatternFilter {
    reference: BkTree<PathBuf>,
}

impl SpecialPatternFilter {
    pub fn new() -> Self {
        Self {
            reference: BkTree::new(),
        }
    }

    pub fn from_fingerprints<I>(fingerprints: I) -> Self
    where
        I: IntoIterator<Item = (PathBuf, Fingerprint)>,
    {
        let mut filter = Self::new();
        for (path, fp) in fingerprints {
            filter.add(path, fp);
        }
        filter
    }

    pub fn add(&mut self, source: PathBuf, fingerprint: Fingerprint) {
        self.reference.insert(fingerprint, source);
    }

    /// Number of distinct reference fingerprints.
    pub fn len(&self) -> usize {
        self.reference.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reference.is_empty()
    }

    /// Closest reference within `threshold`, if any.
    pub fn matching(&self, fingerprint: &Fingerprint, threshold: u32) -> Option<(&PathBuf, u32)> {
        self.reference
            .find_within(fingerprint, threshold)
            .into_iter()
            .min_by_key(|m| m.distance)
            .and_then(|m| m.items.first().map(|source| (source, m.distance)))
    }

    /// Removes every image matching a reference. Checkpoint after every post.
    pub fn filter(
        &self,
        corpus: &mut Corpus,
        threshold: u32,
        actions: &mut FileActions<'_>,
        checkpoints: &Checkpoints,
        progress: &ProgressBar,
    ) -> Result<StageReport, DedupError> {
        let mut report = StageReport::default();
        progress.set_length(corpus.post_count() as u64);
        if self.is_empty() {
            progress.set_position(corpus.post_count() as u64);
            return Ok(report);
        }

        for key in corpus.keys() {
            let images: Vec<ImageRecord> = corpus.post(&key).to_vec();
            for record in images {
                report.examined += 1;
                let Some((source, distance)) = self.matching(&record.fingerprint, threshold) else {
                    continue;
                };
                let reason = format!(
                    "matches special pattern {} (distance {})",
                    source.display(),
                    distance
                );
                match actions.remove(&record, STAGE, &reason)? {
                    Removal::Removed | Removal::Missing => {
                        corpus.remove(&key, &record.original);
                        report.changed += 1;
                    }
                    Removal::Failed => report.failed += 1,
                }
            }

            progress.inc(1);
            if checkpoints.reached() {
                report.interrupted = true;
                break;
            }
        }
        Ok(report)
    }
}

impl Default for SpecialPatternFilter {
    fn default() -> Self {
        Self::new()
    }
}
