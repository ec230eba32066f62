use crate::core::filename::{compare_ids, PostKey};
use crate::core::hash::Fingerprint;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// Path at first scan; the record's identity for its whole life.
    pub original: PathBuf,
    pub current: PathBuf,
    pub key: PostKey,
    pub image_index: String,
    pub extension: String,
    pub fingerprint: Fingerprint,
    /// Canonical post of the cluster this image was relocated out of.
    pub duplicate_of: Option<PostKey>,
}

impl ImageRecord {
    pub fn is_duplicate(&self) -> bool {
        self.duplicate_of.is_some()
    }
}

/// Working set of hashed images grouped by post, each post ordered by image index.
#[derive(Debug, Default)]
pub struct Corpus {
    posts: BTreeMap<PostKey, Vec<ImageRecord>>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: ImageRecord) {
        let images = self.posts.entry(record.key.clone()).or_default();
        let pos = images
            .binary_search_by(|probe| {
                compare_ids(&probe.image_index, &record.image_index)
                    .then_with(|| probe.original.cmp(&record.original))
            })
            .unwrap_or_else(|pos| pos);
        images.insert(pos, record);
    }

    pub fn post(&self, key: &PostKey) -> &[ImageRecord] {
        self.posts.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn post_mut(&mut self, key: &PostKey) -> Option<&mut Vec<ImageRecord>> {
        self.posts.get_mut(key)
    }

    pub fn posts(&self) -> impl Iterator<Item = (&PostKey, &[ImageRecord])> {
        self.posts
            .iter()
            .map(|(key, images)| (key, images.as_slice()))
    }

    pub fn keys(&self) -> Vec<PostKey> {
        self.posts.keys().cloned().collect()
    }

    pub fn image_count(&self, key: &PostKey) -> usize {
        self.posts.get(key).map_or(0, Vec::len)
    }

    /// Drops a record; an emptied post disappears with it.
    pub fn remove(&mut self, key: &PostKey, original: &Path) -> Option<ImageRecord> {
        let images = self.posts.get_mut(key)?;
        let pos = images.iter().position(|r| r.original == original)?;
        let record = images.remove(pos);
        if images.is_empty() {
            self.posts.remove(key);
        }
        Some(record)
    }

    pub fn records(&self) -> impl Iterator<Item = &ImageRecord> {
        self.posts.values().flatten()
    }

    pub fn post_count(&self) -> usize {
        self.posts.len()
    }

    pub fn len(&self) -> usize {
        self.posts.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }
}
