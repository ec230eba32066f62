use crate::core::{Corpus, ImageRecord};
use crate::error::DedupError;
use crate::services::actions::{FileActions, Relocation};
use crate::services::cluster::Cluster;
use crate::services::interrupt::Checkpoints;
use crate::services::StageReport;
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};

pub const STAGE: &str = "relocating";

/// `dup0007_<group>-<post>-<index>.<ext>` inside `quarantine`.
pub fn quarantine_name(quarantine: &Path, cluster: &Cluster, record: &ImageRecord) -> PathBuf {
    quarantine.join(format!(
        "{}_{}-{}-{}.{}",
        cluster.label(),
        record.key.group_id,
        record.key.post_id,
        record.image_index,
        record.extension
    ))
}

/// Moves every image of every non-canonical post into `quarantine`.
/// Images already inside `quarantine` are left alone, so re-running after an
/// interruption only finishes the remaining work. Checkpoint after every cluster.
pub fn relocate_clusters(
    corpus: &mut Corpus,
    clusters: &[Cluster],
    quarantine: &Path,
    actions: &mut FileActions<'_>,
    checkpoints: &Checkpoints,
    progress: &ProgressBar,
) -> Result<StageReport, DedupError> {
    let mut report = StageReport::default();
    progress.set_length(clusters.len() as u64);

    for cluster in clusters {
        let label = cluster.label();
        let reason = format!("duplicate of post {}", cluster.canonical);

        for key in cluster.duplicates() {
            let Some(images) = corpus.post_mut(key) else {
                continue;
            };
            for record in images.iter_mut() {
                report.examined += 1;
                record.duplicate_of = Some(cluster.canonical.clone());
                if record.current.starts_with(quarantine) && record.current.exists() {
                    report.skipped += 1;
                    continue;
                }

                let target = quarantine_name(quarantine, cluster, record);
                match actions.relocate(record, &target, STAGE, &label, &reason)? {
                    Relocation::Moved(new_path) => {
                        if !actions.dry_run {
                            record.current = new_path;
                        }
                        report.changed += 1;
                    }
                    Relocation::Missing => report.missing += 1,
                    Relocation::Failed => report.failed += 1,
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
