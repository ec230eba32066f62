use crate::core::persist::{read_json, write_json_atomic};
use crate::error::DedupError;
use image::{DynamicImage, ImageReader};
use image_hasher::{HashAlg, Hasher, HasherConfig, ImageHash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Fixed-length perceptual fingerprint, compared by Hamming distance.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(Box<[u8]>);

impl Fingerprint {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Fingerprint(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn bits(&self) -> u32 {
        self.0.len() as u32 * 8
    }

    /// Hamming distance. Fingerprints of different lengths are maximally distant.
    pub fn distance(&self, other: &Fingerprint) -> u32 {
        if self.0.len() != other.0.len() {
            return u32::MAX;
        }
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    pub fn to_base64(&self) -> String {
        ImageHash::<Box<[u8]>>::from_bytes(&self.0)
            .map(|hash| hash.to_base64())
            .unwrap_or_default()
    }

    pub fn from_base64(encoded: &str) -> Option<Self> {
        ImageHash::<Box<[u8]>>::from_base64(encoded)
            .ok()
            .map(|hash| Fingerprint::from_bytes(hash.as_bytes()))
    }
}

impl From<ImageHash> for Fingerprint {
    fn from(hash: ImageHash) -> Self {
        Fingerprint::from_bytes(hash.as_bytes())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_base64())
    }
}

/// DCT-based perceptual hasher (pHash: DCT preprocessing, median threshold).
#[derive(Debug, Clone, Copy)]
pub struct PerceptualHasher {
    hash_size: u32,
}

impl PerceptualHasher {
    pub fn new(hash_size: u32) -> Self {
        Self { hash_size }
    }

    pub fn hash_size(&self) -> u32 {
        self.hash_size
    }

    /// `image_hasher::Hasher` holds DCT scratch state, so workers build their own.
    pub fn build(&self) -> Hasher {
        HasherConfig::new()
            .hash_size(self.hash_size, self.hash_size)
            .hash_alg(HashAlg::Median)
            .preproc_dct()
            .to_hasher()
    }

    pub fn hash_file(&self, hasher: &Hasher, path: &Path) -> Result<Fingerprint, DedupError> {
        let read_error = |message: String| DedupError::ImageRead {
            path: path.to_path_buf(),
            message,
        };
        let img = ImageReader::open(path)
            .map_err(|e| read_error(e.to_string()))?
            .with_guessed_format()
            .map_err(|e| read_error(e.to_string()))?
            .decode()
            .map_err(|e| read_error(e.to_string()))?;
        // Palette, alpha and 16-bit inputs all hash as plain RGB.
        let img = DynamicImage::ImageRgb8(img.to_rgb8());
        Ok(hasher.hash_image(&img).into())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HashCacheFile {
    hash_size: u32,
    entries: BTreeMap<PathBuf, String>,
}

/// Persisted map from original path to fingerprint.
pub struct HashStore {
    path: PathBuf,
    hasher: PerceptualHasher,
    entries: BTreeMap<PathBuf, Fingerprint>,
    dirty: bool,
}

impl HashStore {
    /// Loads the cache at `path`. A cache from a different hash size, or one that
    /// cannot be parsed, is discarded and rebuilt.
    pub fn load(path: &Path, hasher: PerceptualHasher) -> Result<Self, DedupError> {
        let mut store = Self {
            path: path.to_path_buf(),
            hasher,
            entries: BTreeMap::new(),
            dirty: false,
        };

        let file = match read_json::<HashCacheFile>(path) {
            Ok(file) => file,
            Err(DedupError::Persistence { message, .. }) if path.exists() => {
                log::warn!(
                    "Discarding unreadable hash cache {}: {}",
                    path.display(),
                    message
                );
                store.dirty = true;
                None
            }
            Err(e) => return Err(e),
        };

        if let Some(file) = file {
            if file.hash_size != hasher.hash_size() {
                log::info!(
                    "Hash cache {} was built with hash size {}, rebuilding for {}",
                    path.display(),
                    file.hash_size,
                    hasher.hash_size()
                );
                store.dirty = true;
            } else {
                for (original, encoded) in file.entries {
                    match Fingerprint::from_base64(&encoded) {
                        Some(fp) => {
                            store.entries.insert(original, fp);
                        }
                        None => {
                            log::warn!("Dropping malformed cached hash for {}", original.display());
                            store.dirty = true;
                        }
                    }
                }
            }
        }

        log::debug!("Loaded {} cached hashes", store.entries.len());
        Ok(store)
    }

    pub fn hasher(&self) -> PerceptualHasher {
        self.hasher
    }

    pub fn get(&self, original: &Path) -> Option<&Fingerprint> {
        self.entries.get(original)
    }

    pub fn contains(&self, original: &Path) -> bool {
        self.entries.contains_key(original)
    }

    pub fn insert(&mut self, original: PathBuf, fingerprint: Fingerprint) {
        self.entries.insert(original, fingerprint);
        self.dirty = true;
    }

    /// Cached fingerprint for `original`, computing it from `current` on a miss.
    pub fn get_or_compute(
        &mut self,
        hasher: &Hasher,
        original: &Path,
        current: &Path,
    ) -> Result<Fingerprint, DedupError> {
        if let Some(fp) = self.entries.get(original) {
            return Ok(fp.clone());
        }
        let fp = self.hasher.hash_file(hasher, current)?;
        self.insert(original.to_path_buf(), fp.clone());
        Ok(fp)
    }

    pub fn invalidate(&mut self, original: &Path) -> bool {
        let removed = self.entries.remove(original).is_some();
        self.dirty |= removed;
        removed
    }

    /// Drops every entry for which `exists` returns false. Returns the count removed.
    pub fn prune<F: Fn(&Path) -> bool>(&mut self, exists: F) -> usize {
        let before = self.entries.len();
        self.entries.retain(|original, _| exists(original));
        let removed = before - self.entries.len();
        self.dirty |= removed > 0;
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn save(&mut self) -> Result<(), DedupError> {
        if !self.dirty {
            return Ok(());
        }
        let file = HashCacheFile {
            hash_size: self.hasher.hash_size(),
            entries: self
                .entries
                .iter()
                .map(|(path, fp)| (path.clone(), fp.to_base64()))
                .collect(),
        };
        write_json_atomic(&self.path, &file)?;
        self.dirty = false;
        log::debug!("Saved {} hashes to {}", self.entries.len(), self.path.display());
        Ok(())
    }
}
