use crate::error::DedupError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

/// Compares ids numerically when both are all digits, otherwise as text.
/// Numeric ids sort before textual ones.
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    let a_num = is_numeric(a);
    let b_num = is_numeric(b);
    match (a_num, b_num) {
        (true, true) => {
            let a_trim = a.trim_start_matches('0');
            let b_trim = b.trim_start_matches('0');
            a_trim
                .len()
                .cmp(&b_trim.len())
                .then_with(|| a_trim.cmp(b_trim))
                .then_with(|| a.cmp(b))
        }
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.cmp(b),
    }
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Identity of a post: (group id, post id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostKey {
    pub group_id: String,
    pub post_id: String,
}

impl PostKey {
    pub fn new(group_id: impl Into<String>, post_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            post_id: post_id.into(),
        }
    }
}

impl Ord for PostKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_ids(&self.group_id, &other.group_id)
            .then_with(|| compare_ids(&self.post_id, &other.post_id))
    }
}

impl PartialOrd for PostKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.group_id, self.post_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageName {
    pub key: PostKey,
    pub image_index: String,
    pub extension: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedName {
    Image(ImageName),
    /// Separator inserted by the collectors: `<prefix><group>_<post>_DELIM.<ext>`
    /// between posts, `<prefix><group>_GROUP_<n>_DELIM.<ext>` between groups.
    Delimiter,
}

/// Parses `<prefix><groupId>_<postId>_<imageIndex>.<ext>`.
pub fn parse_file_name(path: &Path, prefix: &str) -> Result<ParsedName, DedupError> {
    let fail = |reason: String| DedupError::FilenameFormat {
        path: path.to_path_buf(),
        reason,
    };

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| fail("file name is not valid UTF-8".to_string()))?;
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .filter(|ext| !ext.is_empty())
        .ok_or_else(|| fail("missing extension".to_string()))?;
    let rest = stem
        .strip_prefix(prefix)
        .ok_or_else(|| fail(format!("expected prefix '{}'", prefix)))?;

    let parts: Vec<&str> = rest.split('_').collect();
    if parts.last() == Some(&"DELIM") {
        return Ok(ParsedName::Delimiter);
    }
    if parts.len() != 3 {
        return Err(fail(format!(
            "expected {}<GROUP_ID>_<POST_ID>_<IMG_NUM>.{}, got {} part(s)",
            prefix,
            extension,
            parts.len()
        )));
    }
    for (label, part) in ["group id", "post id", "image index"].iter().zip(&parts) {
        if part.is_empty() {
            return Err(fail(format!("empty {}", label)));
        }
        if !part.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(fail(format!("{} '{}' is not alphanumeric", label, part)));
        }
    }

    Ok(ParsedName::Image(ImageName {
        key: PostKey::new(parts[0], parts[1]),
        image_index: parts[2].to_string(),
        extension: extension.to_string(),
    }))
}
