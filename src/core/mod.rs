pub mod bktree;
pub mod corpus;
pub mod filename;
pub mod hash;
pub mod location;
pub mod persist;
pub mod union_find;

pub use bktree::BkTree;
pub use corpus::{Corpus, ImageRecord};
pub use filename::{parse_file_name, ImageName, ParsedName, PostKey};
pub use hash::{Fingerprint, HashStore, PerceptualHasher};
pub use location::LocationTracker;
pub use union_find::{DisjointSet, PostRegistry};
