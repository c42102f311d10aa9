use std::path::{Path, PathBuf};

use futures::future::join_all;

pub mod cli;
pub mod content;
pub mod exec;
pub mod fingerprint;
pub mod model;
pub mod settings;
pub mod tree;
mod validation;

pub use cli::{BlobSource, StashCli, StashError, StashMode, StashedFiles};
pub use content::FileSide;
pub use exec::{ExecConfig, ExecError, ExecOutput, Execution, Executor};
pub use model::{FileChange, FileKind, Repository, Stash, StashRef};
pub use settings::{EmptyRepoDisplay, FileSortMode, Settings};
pub use validation::is_valid_branch_name;

/// Discovery -> listing -> file listing -> content, on top of [`StashCli`].
#[derive(Debug, Clone, Default)]
pub struct StashService {
    cli: StashCli,
}

impl StashService {
    pub fn new(config: ExecConfig) -> Self {
        Self {
            cli: StashCli::new(Executor::new(config)),
        }
    }

    pub fn cli(&self) -> &StashCli {
        &self.cli
    }

    /// Whether any candidate lies inside a repository.
    pub async fn has_repositories(&self, candidates: &[PathBuf]) -> Result<bool, StashError> {
        Ok(!self.cli.list_repositories(candidates, true).await?.is_empty())
    }

    pub async fn discover(
        &self,
        candidates: &[PathBuf],
        workspace_folders: &[PathBuf],
    ) -> Result<Vec<Repository>, StashError> {
        let roots = self.cli.list_repositories(candidates, false).await?;
        tracing::debug!("Discovered {} repositories", roots.len());
        Ok(roots
            .into_iter()
            .map(|root| Repository::new(root, workspace_folders))
            .collect())
    }

    /// Replace the stashes of `repo` with a fresh listing. On error the
    /// previous children are left untouched.
    pub async fn load_stashes(&self, repo: &mut Repository) -> Result<(), StashError> {
        let records = self.cli.list_stashes(repo.path()).await.inspect_err(|e| {
            tracing::warn!("Failed to list stashes in {}: {e}", repo.path().display())
        })?;
        let stashes = records
            .into_iter()
            .map(|record| Stash::from_record(repo.path(), record))
            .collect();
        repo.set_stashes(stashes);
        Ok(())
    }

    /// List every repository concurrently. One result per repository, in
    /// input order; a failure in one leaves the others unaffected.
    pub async fn load_all_stashes(&self, repos: &mut [Repository]) -> Vec<Result<(), StashError>> {
        join_all(repos.iter_mut().map(|repo| self.load_stashes(repo))).await
    }

    /// Attach the file changes of `stash`, untracked files included when it
    /// has a third parent.
    pub async fn load_files(&self, stash: &mut Stash) -> Result<(), StashError> {
        let files = self
            .cli
            .list_stash_files(stash.repo_path(), stash.index(), stash.has_untracked())
            .await?;
        let changes = stash.file_changes(files);
        stash.set_files(changes);
        Ok(())
    }

    pub async fn file_content(
        &self,
        file: &FileChange,
        side: Option<FileSide>,
    ) -> Result<String, StashError> {
        content::resolve_content(&self.cli, file, side).await
    }

    pub async fn fingerprint(&self, repo_path: &Path) -> Result<Option<String>, StashError> {
        fingerprint::fingerprint(&self.cli, repo_path).await
    }
}

/// Assign each path to the repository with the longest root containing it.
/// Repositories keep their input order; those without paths are omitted and
/// paths outside every repository are dropped.
pub fn group_paths_by_repository(
    paths: &[PathBuf],
    repositories: &[PathBuf],
) -> Vec<(PathBuf, Vec<PathBuf>)> {
    let mut groups: Vec<Vec<PathBuf>> = vec![Vec::new(); repositories.len()];

    for path in paths {
        let owner = repositories
            .iter()
            .enumerate()
            .filter(|(_, root)| path.starts_with(root))
            .max_by_key(|(_, root)| root.components().count());
        match owner {
            Some((idx, _)) => groups[idx].push(path.clone()),
            None => tracing::debug!("{} is not inside a known repository", path.display()),
        }
    }

    repositories
        .iter()
        .cloned()
        .zip(groups)
        .filter(|(_, paths)| !paths.is_empty())
        .collect()
}
