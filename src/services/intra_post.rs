use crate::core::{Corpus, Fingerprint, ImageRecord};
use crate::error::DedupError;
use crate::services::actions::{FileActions, Removal};
use crate::services::interrupt::Checkpoints;
use crate::services::StageReport;
use indicatif::ProgressBar;
use std::path::PathBuf;

pub const STAGE: &str = "intra_post_dedup";

/// Removes images that are within `threshold` of an earlier kept image of the
/// same post. Images are visited in image-index order, so the lowest index of
/// a near-duplicate run survives. Checkpoint after every post.
pub fn dedup_within_posts(
    corpus: &mut Corpus,
    threshold: u32,
    actions: &mut FileActions<'_>,
    checkpoints: &Checkpoints,
    progress: &ProgressBar,
) -> Result<StageReport, DedupError> {
    let mut report = StageReport::default();
    progress.set_length(corpus.post_count() as u64);

    for key in corpus.keys() {
        let images: Vec<ImageRecord> = corpus.post(&key).to_vec();
        let mut kept: Vec<(Fingerprint, PathBuf)> = Vec::with_capacity(images.len());

        for record in images {
            report.examined += 1;
            let near = kept
                .iter()
                .find(|(fp, _)| fp.distance(&record.fingerprint) <= threshold);

            let Some((fp, kept_path)) = near else {
                kept.push((record.fingerprint.clone(), record.current.clone()));
                continue;
            };

            let reason = format!(
                "near duplicate (distance {}) of {}",
                fp.distance(&record.fingerprint),
                kept_path.display()
            );
            match actions.remove(&record, STAGE, &reason)? {
                Removal::Removed | Removal::Missing => {
                    corpus.remove(&key, &record.original);
                    report.changed += 1;
                }
                Removal::Failed => {
                    report.failed += 1;
                    kept.push((record.fingerprint.clone(), record.current.clone()));
                }
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
