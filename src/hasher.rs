//! Git blob content addressing.
//!
//! Computes the same SHA-1 the remote assigns to a blob, so a local file
//! can be compared against a tree listing without fetching it.

use sha1::{Digest, Sha1};

/// Compute the git blob SHA-1 of `content` as lowercase hex.
///
/// The hashed bytes are `"blob " + len + "\0" + content`.
pub fn git_blob_sha(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content);
    let digest = hasher.finalize();

    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// True when `content` hashes to `remote_sha`.
pub fn matches_remote(content: &[u8], remote_sha: &str) -> bool {
    git_blob_sha(content).eq_ignore_ascii_case(remote_sha)
}
