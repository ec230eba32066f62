use crate::core::{BkTree, Corpus, DisjointSet, PostKey, PostRegistry};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Posts joined by at least one pair of near-duplicate images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cluster {
    /// 1-based, in order of each cluster's smallest member.
    pub id: usize,
    pub canonical: PostKey,
    /// All members in ascending order, canonical included.
    pub members: Vec<PostKey>,
}

impl Cluster {
    /// `dup0007` style label used in quarantine file names.
    pub fn label(&self) -> String {
        format!("dup{:04}", self.id)
    }

    pub fn duplicates(&self) -> impl Iterator<Item = &PostKey> {
        self.members.iter().filter(move |key| **key != self.canonical)
    }
}

/// Unions posts sharing fingerprints within `threshold` and returns every
/// cluster with more than one post.
pub fn build_clusters(corpus: &Corpus, threshold: u32) -> Vec<Cluster> {
    let mut registry = PostRegistry::default();
    let mut index: BkTree<usize> = BkTree::new();
    for (key, images) in corpus.posts() {
        let idx = registry.register(key);
        for record in images {
            index.insert(record.fingerprint.clone(), idx);
        }
    }

    let mut sets = DisjointSet::new(registry.len());
    for (fingerprint, posts) in index.entries() {
        let anchor = posts[0];
        for &post in &posts[1..] {
            sets.union(anchor, post);
        }
        for near in index.find_within(fingerprint, threshold) {
            sets.union(anchor, near.items[0]);
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for idx in 0..registry.len() {
        let root = sets.find(idx);
        groups.entry(root).or_default().push(idx);
    }

    // Registry indices follow PostKey order, so sorting by the first member is
    // sorting by smallest PostKey.
    let mut multi: Vec<Vec<usize>> = groups.into_values().filter(|g| g.len() > 1).collect();
    multi.sort_by_key(|members| members[0]);

    multi
        .into_iter()
        .enumerate()
        .map(|(i, members)| {
            let members: Vec<PostKey> = members
                .into_iter()
                .map(|idx| registry.key(idx).clone())
                .collect();
            let canonical = select_canonical(corpus, &members);
            Cluster {
                id: i + 1,
                canonical,
                members,
            }
        })
        .collect()
}

/// Most surviving images wins; ties go to the smallest PostKey.
pub fn select_canonical(corpus: &Corpus, members: &[PostKey]) -> PostKey {
    members
        .iter()
        .max_by_key(|key| (corpus.image_count(key), Reverse(*key)))
        .cloned()
        .unwrap_or_else(|| members[0].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_fixture::{fingerprint, record};

    fn corpus_of(images: &[(&str, &str, &str, u64)]) -> Corpus {
        let mut corpus = Corpus::new();
        for (group, post, index, fp) in images {
            corpus.insert(record(group, post, index, fingerprint(*fp)));
        }
        corpus
    }

    #[test]
    fn test_exact_shared_hash_clusters_posts() {
        let corpus = corpus_of(&[
            ("g1", "p1", "1", 0xaaaa_0000),
            ("g1", "p1", "2", 0xbbbb_0000_0000),
            ("g1", "p2", "1", 0xaaaa_0000),
            ("g1", "p3", "1", 0x1234_5678_9abc),
        ]);
        let clusters = build_clusters(&corpus, 3);
        assert_eq!(clusters.len(), 1);
        assert_eq!(
            clusters[0].members,
            vec![PostKey::new("g1", "p1"), PostKey::new("g1", "p2")]
        );
        assert_eq!(clusters[0].canonical, PostKey::new("g1", "p1"));
        assert_eq!(clusters[0].label(), "dup0001");
    }

    #[test]
    fn test_near_match_within_threshold() {
        let corpus = corpus_of(&[
            ("1", "1", "1", 0b0000),
            ("1", "2", "1", 0b0111),
            ("1", "3", "1", 0b1111_0000_0000),
        ]);
        let clusters = build_clusters(&corpus, 3);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members.len(), 2);

        assert!(build_clusters(&corpus, 2).is_empty());
    }

    #[test]
    fn test_transitive_union() {
        // 1 ~ 2 through one image, 2 ~ 3 through another: one cluster.
        let corpus = corpus_of(&[
            ("1", "1", "1", 0xf000_0000),
            ("1", "2", "1", 0xf000_0000),
            ("1", "2", "2", 0x000f_0000_0000),
            ("1", "3", "1", 0x000f_0000_0001),
            ("1", "4", "1", 0xffff_ffff_ffff),
        ]);
        let clusters = build_clusters(&corpus, 3);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].members.len(), 3);
        assert_eq!(clusters[0].canonical, PostKey::new("1", "2"));
        let dups: Vec<String> = clusters[0].duplicates().map(|k| k.to_string()).collect();
        assert_eq!(dups, vec!["1_1", "1_3"]);
    }

    #[test]
    fn test_canonical_tie_breaks_to_smallest_key() {
        let corpus = corpus_of(&[
            ("5", "20", "1", 0x77),
            ("5", "20", "2", 0x7777_0000_0000),
            ("5", "9", "1", 0x77),
            ("5", "9", "2", 0x1111_0000_0000_0000),
        ]);
        let clusters = build_clusters(&corpus, 0);
        assert_eq!(clusters.len(), 1);
        // Numeric order: post 9 < post 20.
        assert_eq!(clusters[0].canonical, PostKey::new("5", "9"));
    }

    #[test]
    fn test_cluster_ids_are_deterministic() {
        let images = [
            ("2", "1", "1", 0x0101u64),
            ("2", "2", "1", 0x0101),
            ("1", "7", "1", 0xff00_0000_0000),
            ("1", "8", "1", 0xff00_0000_0000),
        ];
        let first = build_clusters(&corpus_of(&images), 3);
        let mut reversed = images;
        reversed.reverse();
        let second = build_clusters(&corpus_of(&reversed), 3);

        assert_eq!(first, second);
        assert_eq!(first[0].canonical, PostKey::new("1", "7"));
        assert_eq!(first[1].canonical, PostKey::new("2", "1"));
        assert_eq!(first[1].id, 2);
    }

    #[test]
    fn test_singletons_are_not_actionable() {
        let corpus = corpus_of(&[("1", "1", "1", 0), ("1", "1", "2", 0)]);
        assert!(build_clusters(&corpus, 3).is_empty());
    }
}
