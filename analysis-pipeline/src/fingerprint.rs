use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Content-derived cache key: a lowercase hex SHA-256 digest over a post's
/// normalized title and body. Post identifiers never enter the digest, so
/// reposted or syndicated content with identical text shares one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Normalization policy: leading/trailing whitespace is trimmed and
    /// internal whitespace runs collapse to a single space; case is
    /// preserved. Whitespace-only edits therefore share a fingerprint.
    pub fn of(title: &str, body: &str) -> Self {
        let content = format!(
            "Title: {}\nContent: {}",
            normalize(title),
            normalize(body)
        );
        Fingerprint(hex::encode(Sha256::digest(content.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
