//! Gateway to the `git` CLI for everything stash related.
//!
//! Queries are `async` and parse their output into plain records. Mutations
//! return the [`Execution`] untouched so the caller decides how to report the
//! outcome. Nothing here checks preconditions such as a clean working tree;
//! git itself is the source of truth for whether an operation is allowed.
use std::{
    collections::BTreeSet,
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    sync::LazyLock,
};

use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exec::{ExecError, Execution, Executor};

const GIT: &str = "git";

/// One record per stash: selector, committer date, hash, short hash, tree,
/// parents, reflog subject, then any notes.
const STASH_LIST_FORMAT: &str = "--format=%gd%n%ci%n%H%n%h%n%T%n%P%n%gs%n%N";
const STASH_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

static RENAME_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\s+([^\t]+)\t(.+)$").expect("rename pattern is valid"));

#[derive(Debug, Error)]
pub enum StashError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("unable to parse git output for {repository}: {message}")]
    Parse { repository: String, message: String },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("invalid branch name: {0}")]
    InvalidBranchName(String),
    #[error("invalid settings in {path}: {message}")]
    Settings { path: String, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StashError {
    fn parse(repository: &Path, message: impl Into<String>) -> Self {
        StashError::Parse {
            repository: repository.display().to_string(),
            message: message.into(),
        }
    }
}

/// A stash as listed by git, before any derived fields are computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashRecord {
    pub index: usize,
    pub date: DateTime<FixedOffset>,
    pub hash: String,
    pub short_hash: String,
    pub tree: String,
    pub parents: Vec<String>,
    pub subject: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamedPath {
    pub old: String,
    pub new: String,
}

/// Repository-relative paths of a stash grouped by change kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StashedFiles {
    pub added: Vec<String>,
    pub deleted: Vec<String>,
    pub modified: Vec<String>,
    pub renamed: Vec<RenamedPath>,
    pub untracked: Vec<String>,
}

impl StashedFiles {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.deleted.is_empty()
            && self.modified.is_empty()
            && self.renamed.is_empty()
            && self.untracked.is_empty()
    }
}

/// Which commit of the stash a blob is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobSource {
    /// The stash commit itself (working tree state).
    Stash,
    /// `^1`, the commit the stash was taken on.
    FirstParent,
    /// `^3`, the untracked-files commit.
    ThirdParent,
}

impl BlobSource {
    fn suffix(self) -> &'static str {
        match self {
            BlobSource::Stash => "",
            BlobSource::FirstParent => "^1",
            BlobSource::ThirdParent => "^3",
        }
    }
}

/// Flags applied to `git stash push`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StashMode {
    #[default]
    Simple,
    Staged,
    KeepIndex,
    IncludeUntracked,
    IncludeUntrackedKeepIndex,
    All,
    AllKeepIndex,
}

impl StashMode {
    pub fn flags(self) -> &'static [&'static str] {
        match self {
            StashMode::Simple => &[],
            StashMode::Staged => &["--staged"],
            StashMode::KeepIndex => &["--keep-index"],
            StashMode::IncludeUntracked => &["--include-untracked"],
            StashMode::IncludeUntrackedKeepIndex => &["--include-untracked", "--keep-index"],
            StashMode::All => &["--all"],
            StashMode::AllKeepIndex => &["--all", "--keep-index"],
        }
    }
}

fn stash_at(index: usize) -> String {
    format!("stash@{{{index}}}")
}

fn owned<'a>(parts: impl IntoIterator<Item = &'a str>) -> Vec<OsString> {
    parts.into_iter().map(OsString::from).collect()
}

pub fn create_stash_args(mode: StashMode, message: Option<&str>) -> Vec<OsString> {
    let mut args = owned(["stash", "push"]);
    args.extend(owned(mode.flags().iter().copied()));
    if let Some(message) = message.filter(|m| !m.is_empty()) {
        args.extend(owned(["--message", message]));
    }
    args
}

pub fn push_paths_args(paths: &[PathBuf], message: Option<&str>) -> Vec<OsString> {
    let mut args = owned(["stash", "push", "--include-untracked"]);
    if let Some(message) = message.filter(|m| !m.is_empty()) {
        args.extend(owned(["--message", message]));
    }
    args.push(OsString::from("--"));
    args.extend(paths.iter().map(|p| p.as_os_str().to_os_string()));
    args
}

fn restore_args(verb: &str, index: usize, with_index: bool) -> Vec<OsString> {
    let mut args = owned(["stash", verb]);
    if with_index {
        args.push(OsString::from("--index"));
    }
    args.push(OsString::from(stash_at(index)));
    args
}

pub fn pop_args(index: usize, with_index: bool) -> Vec<OsString> {
    restore_args("pop", index, with_index)
}

pub fn apply_args(index: usize, with_index: bool) -> Vec<OsString> {
    restore_args("apply", index, with_index)
}

/// Parse `git stash list -z` output produced with [`STASH_LIST_FORMAT`].
///
/// Each record is parsed independently; a malformed record yields an `Err`
/// without affecting the others.
pub fn parse_stash_list(output: &str) -> Vec<Result<StashRecord, String>> {
    output
        .split('\0')
        .map(|raw| raw.trim_start_matches(['\n', '\r']))
        .filter(|raw| !raw.trim().is_empty())
        .map(parse_stash_record)
        .collect()
}

fn parse_stash_record(raw: &str) -> Result<StashRecord, String> {
    let tokens: Vec<&str> = raw.split('\n').collect();
    if tokens.len() < 7 {
        return Err(format!(
            "expected at least 7 fields in stash record, found {}",
            tokens.len()
        ));
    }

    let digits: String = tokens[0].chars().filter(char::is_ascii_digit).collect();
    let index = digits
        .parse::<usize>()
        .map_err(|_| format!("invalid stash selector {:?}", tokens[0]))?;
    let date = DateTime::parse_from_str(tokens[1].trim(), STASH_DATE_FORMAT)
        .map_err(|e| format!("invalid stash date {:?}: {e}", tokens[1]))?;

    let note = tokens[7..].join("\n");
    let note = note.trim_end();

    Ok(StashRecord {
        index,
        date,
        hash: tokens[2].to_string(),
        short_hash: tokens[3].to_string(),
        tree: tokens[4].to_string(),
        parents: tokens[5]
            .split(' ')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
        subject: tokens[6].to_string(),
        note: (!note.is_empty()).then(|| note.to_string()),
    })
}

/// Parse `git diff --name-status -M` output.
///
/// Status codes other than A, D, M and R (type changes, copies, unmerged)
/// are skipped.
pub fn parse_name_status(output: &str) -> Result<StashedFiles, String> {
    let mut files = StashedFiles::default();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut chars = line.chars();
        let Some(status) = chars.next() else {
            continue;
        };
        let rest = chars.as_str();

        match status {
            'A' => files.added.push(unquote_path(rest.trim())),
            'D' => files.deleted.push(unquote_path(rest.trim())),
            'M' => files.modified.push(unquote_path(rest.trim())),
            'R' => {
                let caps = RENAME_LINE
                    .captures(rest.trim_end())
                    .ok_or_else(|| format!("malformed rename line {line:?}"))?;
                files.renamed.push(RenamedPath {
                    old: unquote_path(caps[1].trim()),
                    new: unquote_path(caps[2].trim()),
                });
            }
            other => tracing::debug!("Skipping name-status entry with code {other:?}: {line}"),
        }
    }

    Ok(files)
}

/// Git still C-quotes paths holding `"`, `\\` or control characters when
/// `core.quotepath` is off. Anything not wrapped in quotes is returned as is.
pub fn unquote_path(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) else {
        return raw.to_string();
    };

    let bytes = inner.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 == bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let escaped = bytes[i + 1];
        let simple = match escaped {
            b'a' => Some(0x07),
            b'b' => Some(0x08),
            b't' => Some(b'\t'),
            b'n' => Some(b'\n'),
            b'v' => Some(0x0b),
            b'f' => Some(0x0c),
            b'r' => Some(b'\r'),
            b'"' => Some(b'"'),
            b'\\' => Some(b'\\'),
            _ => None,
        };
        if let Some(byte) = simple {
            out.push(byte);
            i += 2;
            continue;
        }
        let octal = bytes
            .get(i + 1..i + 4)
            .filter(|d| d.iter().all(|b| (b'0'..=b'7').contains(b)))
            .map(|d| d.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0')))
            .and_then(|v| u8::try_from(v).ok());
        match octal {
            Some(byte) => {
                out.push(byte);
                i += 4;
            }
            None => {
                out.push(b'\\');
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Split NUL-terminated path output (`ls-tree -z`).
pub fn parse_nul_paths(output: &str) -> Vec<String> {
    output
        .split('\0')
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Branch names from `for-each-ref --format=%(refname) refs/heads/`.
pub fn parse_branch_refs(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix("refs/heads/"))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// `status --porcelain=2 -z` marks unmerged entries with a `u` header token.
/// Rename and copy records (`2 `) carry their original path in the next
/// NUL field, which is skipped.
pub fn has_unmerged_entry(output: &str) -> bool {
    let mut records = output.split('\0');
    while let Some(record) = records.next() {
        match record.split(' ').next() {
            Some("u") => return true,
            Some("2") => {
                records.next();
            }
            _ => {}
        }
    }
    false
}

#[derive(Debug, Clone, Default)]
pub struct StashCli {
    exec: Executor,
}

impl StashCli {
    pub fn new(exec: Executor) -> Self {
        Self { exec }
    }

    pub fn executor(&self) -> &Executor {
        &self.exec
    }

    fn git<I, S>(&self, repo_path: &Path, args: I) -> Execution
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.exec.run(GIT, args, Some(repo_path), None)
    }

    async fn git_stdout<I, S>(&self, repo_path: &Path, args: I) -> Result<String, StashError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Ok(self.git(repo_path, args).wait().await?.stdout)
    }

    /// Resolve each candidate directory to the root of the repository it is
    /// in. Candidates outside any repository are skipped. With `first_only`
    /// the search stops at the first hit.
    ///
    /// A launch failure (git missing) is an error; everything else just
    /// means "not a repository".
    pub async fn list_repositories(
        &self,
        candidates: &[PathBuf],
        first_only: bool,
    ) -> Result<Vec<PathBuf>, StashError> {
        let mut roots = BTreeSet::new();

        if first_only {
            for candidate in candidates {
                if let Some(root) = self.repository_root(self.toplevel(candidate)).await? {
                    roots.insert(root);
                    break;
                }
            }
        } else {
            let pending: Vec<Execution> = candidates.iter().map(|c| self.toplevel(c)).collect();
            for exec in pending {
                if let Some(root) = self.repository_root(exec).await? {
                    roots.insert(root);
                }
            }
        }

        Ok(roots.into_iter().collect())
    }

    fn toplevel(&self, candidate: &Path) -> Execution {
        self.git(candidate, ["rev-parse", "--show-toplevel"])
    }

    async fn repository_root(&self, exec: Execution) -> Result<Option<PathBuf>, StashError> {
        match exec.wait().await {
            Ok(out) => {
                let root = out.stdout.trim();
                Ok((!root.is_empty()).then(|| PathBuf::from(root).components().collect()))
            }
            Err(e) if e.is_launch_failure() => Err(e.into()),
            Err(e) => {
                tracing::debug!("Not a git repository: {e}");
                Ok(None)
            }
        }
    }

    /// `%h` of every stash, one per line; `None` when there are no stashes.
    pub async fn raw_stash_list(&self, repo_path: &Path) -> Result<Option<String>, StashError> {
        let out = self
            .git_stdout(repo_path, ["stash", "list", "--format=%h"])
            .await?;
        let out = out.trim();
        Ok((!out.is_empty()).then(|| out.to_string()))
    }

    pub async fn list_stashes(&self, repo_path: &Path) -> Result<Vec<StashRecord>, StashError> {
        let out = self
            .git_stdout(repo_path, ["stash", "list", "-z", STASH_LIST_FORMAT])
            .await?;
        parse_stash_list(&out)
            .into_iter()
            .map(|r| r.map_err(|message| StashError::parse(repo_path, message)))
            .collect()
    }

    /// Files touched by `stash@{index}`, relative to the repository root.
    ///
    /// Tracked changes come from diffing the stash against its first parent,
    /// which keeps user `stash.*` configuration out of the picture. Untracked
    /// files are read from the third parent when `include_untracked` is set.
    pub async fn list_stash_files(
        &self,
        repo_path: &Path,
        index: usize,
        include_untracked: bool,
    ) -> Result<StashedFiles, StashError> {
        let stash = stash_at(index);
        let parent = format!("{stash}^1");
        let tracked = self.git(
            repo_path,
            [
                "-c",
                "core.quotepath=false",
                "diff",
                "--name-status",
                "-M",
                parent.as_str(),
                stash.as_str(),
            ],
        );
        let untracked = include_untracked.then(|| {
            let third = format!("{stash}^3");
            self.git(
                repo_path,
                ["ls-tree", "-r", "-z", "--name-only", third.as_str()],
            )
        });

        let out = tracked.wait().await?;
        let mut files =
            parse_name_status(&out.stdout).map_err(|m| StashError::parse(repo_path, m))?;
        if let Some(untracked) = untracked {
            files.untracked = parse_nul_paths(&untracked.wait().await?.stdout);
        }
        Ok(files)
    }

    /// Exact content of `path` as stored in the chosen commit of the stash.
    /// stderr is never mixed into the result.
    pub async fn read_blob(
        &self,
        repo_path: &Path,
        index: usize,
        path: &str,
        source: BlobSource,
    ) -> Result<String, StashError> {
        let object = format!("{}{}:{path}", stash_at(index), source.suffix());
        self.git_stdout(repo_path, ["show", object.as_str()]).await
    }

    /// `Ok(false)` when status reports no unmerged paths. An error means
    /// the answer is unknown.
    pub async fn has_unmerged_paths(&self, repo_path: &Path) -> Result<bool, StashError> {
        let out = self
            .git_stdout(repo_path, ["status", "--porcelain=2", "-z"])
            .await?;
        Ok(has_unmerged_entry(&out))
    }

    pub fn create_stash(
        &self,
        repo_path: &Path,
        mode: StashMode,
        message: Option<&str>,
    ) -> Execution {
        self.git(repo_path, create_stash_args(mode, message))
    }

    /// Stash only `paths`, untracked ones included.
    pub fn push_stash(&self, repo_path: &Path, paths: &[PathBuf], message: Option<&str>) -> Execution {
        self.git(repo_path, push_paths_args(paths, message))
    }

    pub fn clear_stashes(&self, repo_path: &Path) -> Execution {
        self.git(repo_path, ["stash", "clear"])
    }

    pub fn pop(&self, repo_path: &Path, index: usize, with_index: bool) -> Execution {
        self.git(repo_path, pop_args(index, with_index))
    }

    pub fn apply(&self, repo_path: &Path, index: usize, with_index: bool) -> Execution {
        self.git(repo_path, apply_args(index, with_index))
    }

    pub fn branch(&self, repo_path: &Path, index: usize, name: &str) -> Execution {
        let stash = stash_at(index);
        self.git(repo_path, ["stash", "branch", name, stash.as_str()])
    }

    pub fn drop_stash(&self, repo_path: &Path, index: usize) -> Execution {
        let stash = stash_at(index);
        self.git(repo_path, ["stash", "drop", stash.as_str()])
    }

    /// Overwrite the working copy of a tracked file with its stashed version.
    pub fn apply_single_file(&self, repo_path: &Path, index: usize, path: &str) -> Execution {
        let stash = stash_at(index);
        self.git(repo_path, ["checkout", stash.as_str(), path])
    }

    /// Restore an untracked file from the stash's third parent.
    pub fn create_single_file(&self, repo_path: &Path, index: usize, path: &str) -> Execution {
        let third = format!("{}^3", stash_at(index));
        self.git(repo_path, ["checkout", third.as_str(), path])
    }

    pub fn checkout_branch(&self, repo_path: &Path, branch: &str) -> Execution {
        self.git(repo_path, ["checkout", branch])
    }

    /// Local branches, one `refs/heads/...` per line; see [`parse_branch_refs`].
    pub fn list_branches(&self, repo_path: &Path) -> Execution {
        self.git(
            repo_path,
            ["for-each-ref", "--format=%(refname)", "refs/heads/"],
        )
    }

    pub fn current_branch(&self, repo_path: &Path) -> Execution {
        self.git(repo_path, ["rev-parse", "--abbrev-ref", "HEAD"])
    }
}
