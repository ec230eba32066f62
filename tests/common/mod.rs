#![allow(dead_code)]

use image::{Rgb, RgbImage};
use postdedup::{Checkpoints, DedupEngine, InterruptCoordinator, PipelineConfig, RunSummary};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 128x128 image of 8x8 random gray blocks. Same seed, same bytes.
pub fn write_noise_image(path: &Path, seed: u64) {
    let mut state = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let cells: Vec<u8> = (0..16 * 16)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 56) as u8
        })
        .collect();
    let img = RgbImage::from_fn(128, 128, |x, y| {
        let v = cells[((y / 8) * 16 + x / 8) as usize];
        Rgb([v, v, v])
    });
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    img.save(path).unwrap();
}

/// Corpus layout under one temporary root.
pub struct Workspace {
    pub root: PathBuf,
}

impl Workspace {
    pub fn new(root: &Path) -> Self {
        fs::create_dir_all(root.join("imgs")).unwrap();
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn base(&self) -> PathBuf {
        self.root.join("imgs")
    }

    pub fn ads(&self) -> PathBuf {
        self.root.join("ads")
    }

    pub fn quarantine(&self) -> PathBuf {
        self.root.join("quarantine")
    }

    /// Writes `vkg<group>_<post>_<index>.jpg` from `seed`.
    pub fn image(&self, group: &str, post: &str, index: &str, seed: u64) -> PathBuf {
        let path = self.base().join(format!("vkg{}_{}_{}.jpg", group, post, index));
        write_noise_image(&path, seed);
        path
    }

    /// Byte-identical copy of an existing image under a new name.
    pub fn copy(&self, from: &Path, group: &str, post: &str, index: &str) -> PathBuf {
        let path = self.base().join(format!("vkg{}_{}_{}.jpg", group, post, index));
        fs::copy(from, &path).unwrap();
        path
    }

    pub fn ad(&self, name: &str, seed: u64) -> PathBuf {
        let path = self.ads().join(name);
        write_noise_image(&path, seed);
        path
    }

    pub fn config(&self) -> PipelineConfig {
        let special_dirs = if self.ads().is_dir() {
            vec![self.ads()]
        } else {
            Vec::new()
        };
        PipelineConfig {
            base_dirs: vec![self.base()],
            special_dirs,
            quarantine_dir: self.quarantine(),
            state_dir: Some(self.root.join("state")),
            quiet: true,
            ..PipelineConfig::default()
        }
    }

    pub fn run(&self) -> RunSummary {
        self.run_with(self.config(), Checkpoints::new(InterruptCoordinator::new()))
    }

    pub fn run_with(&self, config: PipelineConfig, checkpoints: Checkpoints) -> RunSummary {
        let mut engine = DedupEngine::open(config, checkpoints).unwrap();
        engine.run().unwrap()
    }

    /// Relative path to file contents for every image outside the state dir.
    pub fn snapshot(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        let state = self.root.join("state");
        WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.path() != state.as_path())
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e.path().strip_prefix(&self.root).unwrap().to_path_buf();
                (rel, fs::read(e.path()).unwrap())
            })
            .collect()
    }

    pub fn names_in(&self, dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}
