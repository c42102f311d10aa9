//! Decide which stored version of a file to show and fetch it.
use serde::{Deserialize, Serialize};

use crate::{
    cli::{BlobSource, StashCli, StashError},
    model::{FileChange, FileKind},
};

/// Which side of a change to read. Only modified and renamed files have two.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSide {
    #[default]
    Change,
    Parent,
}

/// A resolved blob location: the commit of the stash and the path in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRead {
    pub source: BlobSource,
    pub path: String,
}

pub fn plan_read(file: &FileChange, side: Option<FileSide>) -> Result<BlobRead, StashError> {
    let side = side.unwrap_or_default();
    let current = || file.relative_path();

    let (source, path) = match (file.kind(), side) {
        (FileKind::Added, _) => (BlobSource::Stash, current()),
        (FileKind::Deleted, _) => (BlobSource::FirstParent, current()),
        (FileKind::Modified, FileSide::Change) => (BlobSource::Stash, current()),
        (FileKind::Modified, FileSide::Parent) => (BlobSource::FirstParent, current()),
        (FileKind::Renamed { .. }, FileSide::Change) => (BlobSource::Stash, current()),
        (FileKind::Renamed { old }, FileSide::Parent) => {
            if old.name().is_empty() {
                return Err(StashError::Unsupported(format!(
                    "rename of {} has no previous path",
                    file.relative_path()
                )));
            }
            (BlobSource::FirstParent, old.relative())
        }
        (FileKind::Untracked, _) => (BlobSource::ThirdParent, current()),
    };

    Ok(BlobRead { source, path })
}

pub async fn resolve_content(
    cli: &StashCli,
    file: &FileChange,
    side: Option<FileSide>,
) -> Result<String, StashError> {
    let read = plan_read(file, side)?;
    let stash = file.stash();
    cli.read_blob(stash.repo_path(), stash.index(), &read.path, read.source)
        .await
}
