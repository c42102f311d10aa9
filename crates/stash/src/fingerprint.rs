//! Cheap change detection for a repository's stash list.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};

use crate::cli::{StashCli, StashError};

/// Lower-case hex SHA-256 of `raw`.
pub fn digest(raw: &str) -> String {
    Sha256::digest(raw.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// `None` when the repository has no stashes. Any push, drop, pop or clear
/// changes the value; otherwise it is stable.
pub async fn fingerprint(cli: &StashCli, repo_path: &Path) -> Result<Option<String>, StashError> {
    Ok(cli.raw_stash_list(repo_path).await?.as_deref().map(digest))
}

/// Last seen fingerprint per repository.
#[derive(Debug, Default)]
pub struct FingerprintCache {
    seen: HashMap<PathBuf, Option<String>>,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `current` and report whether it differs from the previous
    /// value. The first observation of a repository counts as a change.
    pub fn observe(&mut self, repo_path: &Path, current: Option<String>) -> bool {
        match self.seen.get(repo_path) {
            Some(previous) if *previous == current => false,
            _ => {
                self.seen.insert(repo_path.to_path_buf(), current);
                true
            }
        }
    }

    pub fn forget(&mut self, repo_path: &Path) {
        self.seen.remove(repo_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_hex_sha256() {
        assert_eq!(
            digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn cache_reports_changes_only() {
        let mut cache = FingerprintCache::new();
        let repo = Path::new("/r");
        assert!(cache.observe(repo, None));
        assert!(!cache.observe(repo, None));
        assert!(cache.observe(repo, Some(digest("a1"))));
        assert!(!cache.observe(repo, Some(digest("a1"))));
        assert!(cache.observe(repo, None));
        cache.forget(repo);
        assert!(cache.observe(repo, None));
    }
}
