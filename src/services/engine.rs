use crate::config::PipelineConfig;
use crate::core::{
    parse_file_name, Corpus, HashStore, ImageName, ImageRecord, LocationTracker, ParsedName,
    PerceptualHasher,
};
use crate::error::DedupError;
use crate::services::actions::FileActions;
use crate::services::cluster::{build_clusters, Cluster};
use crate::services::history::Journal;
use crate::services::interrupt::Checkpoints;
use crate::services::scanner::ScannerService;
use crate::services::special::SpecialPatternFilter;
use crate::services::{intra_post, relocate, StageReport};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Idle,
    Loading,
    Hashing,
    IntraPostDedup,
    AdFilter,
    CrossPostCluster,
    Relocating,
    Saved,
    Terminated,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RunSummary {
    pub dry_run: bool,
    pub interrupted: bool,
    pub stopped_at: Option<RunStage>,
    pub pruned: usize,
    pub scanned: usize,
    pub reattached: usize,
    pub bad_names: usize,
    pub delimiters: usize,
    pub hashed: usize,
    pub cached: usize,
    pub unreadable: usize,
    pub special_references: usize,
    pub intra_post: StageReport,
    pub ad_filter: StageReport,
    pub clusters: Vec<Cluster>,
    pub relocation: StageReport,
    pub elapsed_secs: f64,
}

/// A file to fingerprint: the key it is cached under and where to read it.
struct HashTarget {
    original: PathBuf,
    current: PathBuf,
    name: Option<ImageName>,
}

#[derive(Default)]
struct HashingOutcome {
    computed: usize,
    unreadable: usize,
    interrupted: bool,
}

/// Owns every piece of mutable state for a run: the hash cache, the location
/// map and the journal. Stages borrow it; nothing is global.
///
/// State is flushed on every exit path. Normal and interrupted runs save
/// explicitly so persistence failures surface as errors; `Drop` flushes
/// whatever is still dirty if a run bails out early.
pub struct DedupEngine {
    config: PipelineConfig,
    hashes: HashStore,
    locations: LocationTracker,
    journal: Journal,
    checkpoints: Checkpoints,
    stage: RunStage,
    pruned: usize,
}

impl DedupEngine {
    /// Loading: reads persisted state, settles interrupted moves and prunes
    /// entries for files that no longer exist.
    pub fn open(config: PipelineConfig, checkpoints: Checkpoints) -> Result<Self, DedupError> {
        config.validate()?;
        let state_dir = config.state_dir();
        fs::create_dir_all(&state_dir).map_err(|e| DedupError::persistence(&state_dir, e))?;

        let hasher = PerceptualHasher::new(config.hash_size);
        let mut hashes = HashStore::load(&config.hash_file(), hasher)?;
        let mut locations = LocationTracker::load(&config.location_file())?;
        let journal = Journal::open(&config.history_file());

        let mut pruned = locations.prune()?;
        pruned += hashes.prune(|original| locations.current(original).exists());
        if pruned > 0 {
            log::info!("Pruned {} state entries for files that no longer exist", pruned);
        }

        Ok(Self {
            config,
            hashes,
            locations,
            journal,
            checkpoints,
            stage: RunStage::Loading,
            pruned,
        })
    }

    pub fn stage(&self) -> RunStage {
        self.stage
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn locations(&self) -> &LocationTracker {
        &self.locations
    }

    pub fn hashes(&self) -> &HashStore {
        &self.hashes
    }

    /// Runs every stage in order, stopping cleanly at the first checkpoint
    /// after an interrupt.
    pub fn run(&mut self) -> Result<RunSummary, DedupError> {
        let started = Instant::now();
        let mut summary = RunSummary {
            dry_run: self.config.dry_run,
            pruned: self.pruned,
            ..RunSummary::default()
        };

        self.stage = RunStage::Hashing;
        let mut corpus = self.load_corpus(&mut summary)?;
        let special = self.load_special_patterns(&mut summary)?;
        self.hashes.save()?;
        if summary.interrupted {
            return self.finish(summary, started);
        }
        log::info!(
            "Hashed corpus: {} images in {} posts ({} new, {} cached, {} unreadable)",
            corpus.len(),
            corpus.post_count(),
            summary.hashed,
            summary.cached,
            summary.unreadable
        );

        self.stage = RunStage::IntraPostDedup;
        let progress = self.progress_bar("Removing duplicates within posts");
        let threshold = self.config.intra_post_threshold;
        let (mut actions, checkpoints) = self.parts();
        summary.intra_post = benchmark("intra-post dedup", || {
            intra_post::dedup_within_posts(
                &mut corpus,
                threshold,
                &mut actions,
                checkpoints,
                &progress,
            )
        })?;
        progress.finish_and_clear();
        log::info!("Removed {} near-duplicates within posts", summary.intra_post.changed);
        if summary.intra_post.interrupted {
            return self.finish(summary, started);
        }

        self.stage = RunStage::AdFilter;
        let progress = self.progress_bar("Filtering special patterns");
        let (mut actions, checkpoints) = self.parts();
        summary.ad_filter = benchmark("special pattern filter", || {
            special.filter(&mut corpus, threshold, &mut actions, checkpoints, &progress)
        })?;
        progress.finish_and_clear();
        log::info!("Removed {} special-pattern images", summary.ad_filter.changed);
        if summary.ad_filter.interrupted {
            return self.finish(summary, started);
        }

        self.stage = RunStage::CrossPostCluster;
        let inter = self.config.inter_post_threshold;
        let clusters = benchmark("cross-post clustering", || build_clusters(&corpus, inter));
        log::info!(
            "Found {} clusters of reposted posts ({} posts to relocate)",
            clusters.len(),
            clusters.iter().map(|c| c.members.len() - 1).sum::<usize>()
        );
        summary.clusters = clusters;
        if self.checkpoints.reached() {
            return self.finish(summary, started);
        }

        self.stage = RunStage::Relocating;
        let quarantine = self.config.quarantine_dir.clone();
        if !self.config.dry_run {
            fs::create_dir_all(&quarantine)?;
        }
        let progress = self.progress_bar("Relocating duplicate posts");
        let clusters = std::mem::take(&mut summary.clusters);
        let (mut actions, checkpoints) = self.parts();
        summary.relocation = benchmark("relocation", || {
            relocate::relocate_clusters(
                &mut corpus,
                &clusters,
                &quarantine,
                &mut actions,
                checkpoints,
                &progress,
            )
        })?;
        summary.clusters = clusters;
        progress.finish_and_clear();
        log::info!(
            "Relocated {} images into {}",
            summary.relocation.changed,
            quarantine.display()
        );

        self.finish(summary, started)
    }

    fn finish(
        &mut self,
        mut summary: RunSummary,
        started: Instant,
    ) -> Result<RunSummary, DedupError> {
        if self.checkpoints.coordinator().is_requested() {
            summary.interrupted = true;
            summary.stopped_at = Some(self.stage);
            log::warn!("Interrupted during {:?}; saving state", self.stage);
        }
        self.save()?;
        self.stage = RunStage::Saved;
        summary.elapsed_secs = started.elapsed().as_secs_f64();
        self.stage = RunStage::Terminated;
        Ok(summary)
    }

    /// Flushes everything that is still only in memory.
    pub fn save(&mut self) -> Result<(), DedupError> {
        self.hashes.save()?;
        self.locations.save()
    }

    fn parts(&mut self) -> (FileActions<'_>, &Checkpoints) {
        (
            FileActions {
                hashes: &mut self.hashes,
                locations: &mut self.locations,
                journal: &mut self.journal,
                dry_run: self.config.dry_run,
            },
            &self.checkpoints,
        )
    }

    /// Scans base directories, re-attaches images already moved to
    /// quarantine, and fingerprints everything.
    fn load_corpus(&mut self, summary: &mut RunSummary) -> Result<Corpus, DedupError> {
        let scanner = ScannerService::new(
            &self.config.prefix,
            &self.config.extensions,
            vec![self.config.quarantine_dir.clone(), self.config.state_dir()],
        );
        let spinner = self.spinner("Scanning for images…");
        let outcome = scanner.discover(&self.config.base_dirs);
        spinner.finish_and_clear();
        summary.bad_names = outcome.bad_names;
        summary.delimiters = outcome.delimiters;

        let mut targets = Vec::with_capacity(outcome.images.len());
        let mut seen = HashSet::new();
        for image in outcome.images {
            let current = self.locations.current(&image.path);
            seen.insert(image.path.clone());
            targets.push(HashTarget {
                original: image.path,
                current,
                name: Some(image.name),
            });
        }
        for (original, current) in self.locations.moved() {
            if seen.contains(original) {
                continue;
            }
            match parse_file_name(original, &self.config.prefix) {
                Ok(ParsedName::Image(name)) => {
                    targets.push(HashTarget {
                        original: original.to_path_buf(),
                        current: current.to_path_buf(),
                        name: Some(name),
                    });
                    summary.reattached += 1;
                }
                Ok(ParsedName::Delimiter) => {}
                Err(e) => log::warn!("{}", e),
            }
        }
        summary.scanned = targets.len();

        let hashing = self.hash_missing(&targets, "Hashing images")?;
        summary.hashed += hashing.computed;
        summary.unreadable += hashing.unreadable;
        summary.interrupted |= hashing.interrupted;

        let mut corpus = Corpus::new();
        for target in targets {
            let (Some(name), Some(fp)) = (target.name, self.hashes.get(&target.original)) else {
                continue;
            };
            corpus.insert(ImageRecord {
                original: target.original,
                current: target.current,
                key: name.key,
                image_index: name.image_index,
                extension: name.extension,
                fingerprint: fp.clone(),
                duplicate_of: None,
            });
        }
        summary.cached = corpus.len().saturating_sub(summary.hashed);
        Ok(corpus)
    }

    fn load_special_patterns(
        &mut self,
        summary: &mut RunSummary,
    ) -> Result<SpecialPatternFilter, DedupError> {
        let mut filter = SpecialPatternFilter::new();
        if self.config.special_dirs.is_empty() || summary.interrupted {
            return Ok(filter);
        }

        let scanner = ScannerService::new(&self.config.prefix, &self.config.extensions, Vec::new());
        let targets: Vec<HashTarget> = scanner
            .list_images(&self.config.special_dirs)
            .into_iter()
            .map(|path| HashTarget {
                original: path.clone(),
                current: path,
                name: None,
            })
            .collect();

        let hashing = self.hash_missing(&targets, "Hashing special patterns")?;
        summary.hashed += hashing.computed;
        summary.unreadable += hashing.unreadable;
        summary.interrupted |= hashing.interrupted;

        for target in targets {
            if let Some(fp) = self.hashes.get(&target.original) {
                filter.add(target.original, fp.clone());
            }
        }
        summary.special_references = filter.len();
        log::info!(
            "Loaded {} special-pattern fingerprints from {} director(ies)",
            filter.len(),
            self.config.special_dirs.len()
        );
        Ok(filter)
    }

    /// Fingerprints every target missing from the cache, in parallel batches.
    /// The cache is saved and a checkpoint taken after every batch; workers
    /// skip their file once an interrupt is pending so the batch drains quickly.
    fn hash_missing(
        &mut self,
        targets: &[HashTarget],
        message: &'static str,
    ) -> Result<HashingOutcome, DedupError> {
        let mut outcome = HashingOutcome::default();
        let missing: Vec<&HashTarget> = targets
            .iter()
            .filter(|t| !self.hashes.contains(&t.original))
            .collect();
        if missing.is_empty() {
            return Ok(outcome);
        }

        let progress = self.progress_bar(message);
        progress.set_length(missing.len() as u64);
        let hasher = self.hashes.hasher();
        let coordinator = self.checkpoints.coordinator().clone();

        for batch in missing.chunks(self.config.batch_size) {
            let results: Vec<_> = batch
                .par_iter()
                .map_init(
                    || hasher.build(),
                    |h, target| {
                        if coordinator.is_requested() {
                            return None;
                        }
                        Some((target, hasher.hash_file(h, &target.current)))
                    },
                )
                .collect();

            for (target, result) in results.into_iter().flatten() {
                match result {
                    Ok(fp) => {
                        self.hashes.insert(target.original.clone(), fp);
                        outcome.computed += 1;
                    }
                    Err(e) => {
                        log::warn!("{}", e);
                        outcome.unreadable += 1;
                    }
                }
            }
            progress.inc(batch.len() as u64);
            self.hashes.save()?;

            if self.checkpoints.reached() {
                outcome.interrupted = true;
                break;
            }
        }
        progress.finish_and_clear();
        Ok(outcome)
    }

    fn progress_bar(&self, message: &'static str) -> ProgressBar {
        if self.config.quiet {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(message);
        bar
    }

    fn spinner(&self, message: &'static str) -> ProgressBar {
        if self.config.quiet {
            return ProgressBar::hidden();
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(message);
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }
}

impl Drop for DedupEngine {
    fn drop(&mut self) {
        if self.hashes.is_dirty() {
            if let Err(e) = self.hashes.save() {
                log::error!("Failed to flush hash cache on shutdown: {}", e);
            }
        }
    }
}

/// Run `f()`, log how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    log::info!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::interrupt::InterruptCoordinator;
    use crate::test_support::write_noise_image;
    use tempfile::TempDir;

    fn config_for(root: &std::path::Path) -> PipelineConfig {
        let base = root.join("imgs");
        fs::create_dir_all(&base).unwrap();
        PipelineConfig {
            base_dirs: vec![base],
            quarantine_dir: root.join("quarantine"),
            state_dir: Some(root.join("state")),
            quiet: true,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let result = DedupEngine::open(
            PipelineConfig::default(),
            Checkpoints::new(InterruptCoordinator::new()),
        );
        assert!(matches!(result, Err(DedupError::Config(_))));
    }

    #[test]
    fn test_stage_progression() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_for(temp_dir.path());
        write_noise_image(&config.base_dirs[0].join("vkg1_1_1.jpg"), 1);

        let mut engine =
            DedupEngine::open(config, Checkpoints::new(InterruptCoordinator::new())).unwrap();
        assert_eq!(engine.stage(), RunStage::Loading);
        let summary = engine.run().unwrap();
        assert_eq!(engine.stage(), RunStage::Terminated);
        assert!(!summary.interrupted);
        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.hashed, 1);
        assert_eq!(engine.hashes().len(), 1);
    }

    #[test]
    fn test_unreadable_and_misnamed_files_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_for(temp_dir.path());
        let base = config.base_dirs[0].clone();
        write_noise_image(&base.join("vkg1_1_1.jpg"), 1);
        fs::write(base.join("vkg1_1_2.jpg"), b"garbage").unwrap();
        write_noise_image(&base.join("photo.jpg"), 2);

        let mut engine =
            DedupEngine::open(config, Checkpoints::new(InterruptCoordinator::new())).unwrap();
        let summary = engine.run().unwrap();
        assert_eq!(summary.unreadable, 1);
        assert_eq!(summary.bad_names, 1);
        assert_eq!(summary.hashed, 1);
        assert!(base.join("vkg1_1_2.jpg").exists());
    }

    #[test]
    fn test_journal_write_failure_stops_the_run() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_for(temp_dir.path());
        let base = config.base_dirs[0].clone();
        write_noise_image(&base.join("vkg1_1_1.jpg"), 1);
        fs::copy(base.join("vkg1_1_1.jpg"), base.join("vkg1_1_2.jpg")).unwrap();
        fs::copy(base.join("vkg1_1_1.jpg"), base.join("vkg1_1_3.jpg")).unwrap();
        write_noise_image(&base.join("vkg1_2_1.jpg"), 2);
        fs::copy(base.join("vkg1_2_1.jpg"), base.join("vkg1_3_1.jpg")).unwrap();
        // A directory where the journal file should be makes every append fail.
        fs::create_dir_all(config.history_file()).unwrap();
        let quarantine = config.quarantine_dir.clone();

        let mut engine =
            DedupEngine::open(config, Checkpoints::new(InterruptCoordinator::new())).unwrap();
        let result = engine.run();

        assert!(matches!(result, Err(DedupError::Persistence { .. })));
        assert!(base.join("vkg1_1_1.jpg").exists());
        assert!(!base.join("vkg1_1_2.jpg").exists());
        // Nothing after the failed write was touched.
        assert!(base.join("vkg1_1_3.jpg").exists());
        assert!(base.join("vkg1_2_1.jpg").exists());
        assert!(base.join("vkg1_3_1.jpg").exists());
        assert!(!quarantine.exists());
    }

    #[test]
    fn test_hashes_are_saved_after_every_batch() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = config_for(temp_dir.path());
        config.batch_size = 1;
        for i in 1..=3u64 {
            write_noise_image(&config.base_dirs[0].join(format!("vkg1_{}_1.jpg", i)), i);
        }
        let hash_file = config.hash_file();

        // Stop after the second batch without going through `finish`.
        let checkpoints = Checkpoints::with_budget(InterruptCoordinator::new(), 1);
        let mut engine = DedupEngine::open(config.clone(), checkpoints).unwrap();
        let mut summary = RunSummary::default();
        engine.load_corpus(&mut summary).unwrap();
        assert!(summary.interrupted);
        std::mem::forget(engine);

        let reloaded =
            HashStore::load(&hash_file, PerceptualHasher::new(config.hash_size)).unwrap();
        assert_eq!(reloaded.len(), 2);
    }

    #[test]
    fn test_interrupt_before_start_saves_and_stops() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_for(temp_dir.path());
        write_noise_image(&config.base_dirs[0].join("vkg1_1_1.jpg"), 1);
        let hash_file = config.hash_file();

        let coordinator = InterruptCoordinator::new();
        coordinator.request();
        let mut engine = DedupEngine::open(config, Checkpoints::new(coordinator)).unwrap();
        let summary = engine.run().unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.stopped_at, Some(RunStage::Hashing));
        assert_eq!(summary.hashed, 0);
        assert!(hash_file.exists() || engine.hashes().is_empty());
    }
}
