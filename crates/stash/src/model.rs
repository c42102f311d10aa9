//! Domain entities: repositories own stashes, stashes own file changes.
//!
//! Back-references (file -> stash -> repository) are plain values carried in
//! [`StashRef`]; they are used for identity and path composition only.
use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};

use chrono::{DateTime, FixedOffset};
use regex::Regex;
use serde::Serialize;

use crate::cli::{StashRecord, StashedFiles};

/// Directory component meaning "repository root".
pub const ROOT_DIR: &str = ".";

static SUBJECT_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(^WIP\son|^On)\s([^:\s]+):\s(.*)").expect("subject pattern is valid")
});

/// Lowercases and replaces anything outside `[a-z0-9]` with `_`.
fn id_segment(segment: &str) -> String {
    segment
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Split a stash subject into `(message, branch)`.
///
/// `"On main: fix"` and `"WIP on main: abc123 msg"` carry the branch; subjects
/// written by `git stash store -m` usually don't, in which case the whole
/// subject is the message.
pub fn parse_subject(subject: &str) -> (String, Option<String>) {
    match SUBJECT_PREFIX.captures(subject) {
        Some(caps) => (
            caps.get(3).map_or("", |m| m.as_str()).to_string(),
            caps.get(2).map(|m| m.as_str().to_string()),
        ),
        None => (subject.to_string(), None),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Repository {
    path: PathBuf,
    label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stashes: Option<Vec<Stash>>,
}

impl Repository {
    /// `workspace_folders` are the roots the caller shows to the user; the
    /// first one containing `path` names the repository, otherwise the last
    /// path segment does.
    pub fn new(path: impl Into<PathBuf>, workspace_folders: &[PathBuf]) -> Self {
        let path: PathBuf = path.into();
        let label = workspace_folders
            .iter()
            .find(|folder| path.starts_with(folder))
            .and_then(|folder| folder.file_name())
            .or_else(|| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Self {
            path,
            label,
            stashes: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn id(&self) -> String {
        format!("R.{}", self.path.display())
    }

    /// `None` until a listing has been attached.
    pub fn stashes(&self) -> Option<&[Stash]> {
        self.stashes.as_deref()
    }

    pub fn stashes_mut(&mut self) -> Option<&mut [Stash]> {
        self.stashes.as_deref_mut()
    }

    /// Replace the children wholesale; previous stash values are stale now.
    pub fn set_stashes(&mut self, stashes: Vec<Stash>) {
        self.stashes = Some(stashes);
    }
}

/// Non-owning reference from a file change to the stash it belongs to.
///
/// `index` is only meaningful for the listing snapshot it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StashRef {
    repo_path: PathBuf,
    index: usize,
    short_hash: String,
}

impl StashRef {
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn short_hash(&self) -> &str {
        &self.short_hash
    }

    /// `stash@{N}`
    pub fn at_index(&self) -> String {
        format!("stash@{{{}}}", self.index)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Stash {
    repo_path: PathBuf,
    index: usize,
    hash: String,
    short_hash: String,
    date: DateTime<FixedOffset>,
    tree: String,
    subject: String,
    message: String,
    branch: Option<String>,
    parents: Vec<String>,
    note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    files: Option<Vec<FileChange>>,
}

impl Stash {
    pub fn from_record(repo_path: &Path, record: StashRecord) -> Self {
        let (message, branch) = parse_subject(&record.subject);
        Self {
            repo_path: repo_path.to_path_buf(),
            index: record.index,
            hash: record.hash,
            short_hash: record.short_hash,
            date: record.date,
            tree: record.tree,
            subject: record.subject,
            message,
            branch,
            parents: record.parents,
            note: record.note,
            files: None,
        }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Position in the listing this value came from. Any pop/drop/apply/branch
    /// invalidates it; re-list before addressing the stash again.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn at_index(&self) -> String {
        format!("stash@{{{}}}", self.index)
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn short_hash(&self) -> &str {
        &self.short_hash
    }

    pub fn date(&self) -> DateTime<FixedOffset> {
        self.date
    }

    pub fn tree(&self) -> &str {
        &self.tree
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    pub fn parents(&self) -> &[String] {
        &self.parents
    }

    /// A third parent holds the untracked files of the stash.
    pub fn has_untracked(&self) -> bool {
        self.parents.len() > 2
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    /// Display key built from sanitized segments. Distinct repository paths
    /// such as `/a-b` and `/a_b` map to the same id; [`Stash::handle`] keeps
    /// the exact repository path and short hash.
    pub fn id(&self) -> String {
        format!(
            "s.{}.{}",
            id_segment(&self.repo_path.to_string_lossy()),
            id_segment(&self.short_hash)
        )
    }

    pub fn handle(&self) -> StashRef {
        StashRef {
            repo_path: self.repo_path.clone(),
            index: self.index,
            short_hash: self.short_hash.clone(),
        }
    }

    pub fn files(&self) -> Option<&[FileChange]> {
        self.files.as_deref()
    }

    pub fn set_files(&mut self, files: Vec<FileChange>) {
        self.files = Some(files);
    }

    /// Turn a grouped file listing into entities, ordered added, modified,
    /// renamed, untracked, deleted.
    pub fn file_changes(&self, files: StashedFiles) -> Vec<FileChange> {
        let owner = self.handle();
        let StashedFiles {
            added,
            deleted,
            modified,
            renamed,
            untracked,
        } = files;

        let simple = |kind: FileKind, paths: Vec<String>| {
            let owner = owner.clone();
            paths
                .into_iter()
                .map(move |p| FileChange::new(owner.clone(), kind.clone(), RelPath::parse(&p)))
        };

        let mut out: Vec<FileChange> = Vec::new();
        out.extend(simple(FileKind::Added, added));
        out.extend(simple(FileKind::Modified, modified));
        out.extend(renamed.into_iter().map(|r| {
            FileChange::new(
                owner.clone(),
                FileKind::Renamed {
                    old: RelPath::parse(&r.old),
                },
                RelPath::parse(&r.new),
            )
        }));
        out.extend(simple(FileKind::Untracked, untracked));
        out.extend(simple(FileKind::Deleted, deleted));
        out
    }
}

/// A repository-relative path split into directory and file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RelPath {
    dir: String,
    name: String,
}

impl RelPath {
    /// `"a/b/c.txt"` -> dir `"a/b"`, name `"c.txt"`; a bare name lives in [`ROOT_DIR`].
    pub fn parse(path: &str) -> Self {
        let path = path.trim_start_matches("./");
        match path.rsplit_once('/') {
            Some((dir, name)) if !dir.is_empty() => Self {
                dir: dir.to_string(),
                name: name.to_string(),
            },
            Some((_, name)) => Self {
                dir: ROOT_DIR.to_string(),
                name: name.to_string(),
            },
            None => Self {
                dir: ROOT_DIR.to_string(),
                name: path.to_string(),
            },
        }
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_root(&self) -> bool {
        self.dir == ROOT_DIR
    }

    /// Directory segments, none for the root.
    pub fn dir_segments(&self) -> impl Iterator<Item = &str> {
        let dir = if self.is_root() { "" } else { self.dir.as_str() };
        dir.split('/').filter(|s| !s.is_empty())
    }

    pub fn relative(&self) -> String {
        if self.is_root() {
            self.name.clone()
        } else {
            format!("{}/{}", self.dir, self.name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileKind {
    Added,
    Deleted,
    Modified,
    Renamed { old: RelPath },
    Untracked,
}

impl FileKind {
    pub fn tag(&self) -> &'static str {
        match self {
            FileKind::Added => "added",
            FileKind::Deleted => "deleted",
            FileKind::Modified => "modified",
            FileKind::Renamed { .. } => "renamed",
            FileKind::Untracked => "untracked",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileChange {
    stash: StashRef,
    #[serde(flatten)]
    kind: FileKind,
    path: RelPath,
}

impl FileChange {
    pub fn new(stash: StashRef, kind: FileKind, path: RelPath) -> Self {
        Self { stash, kind, path }
    }

    pub fn stash(&self) -> &StashRef {
        &self.stash
    }

    pub fn kind(&self) -> &FileKind {
        &self.kind
    }

    pub fn path(&self) -> &RelPath {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        self.path.name()
    }

    pub fn relative_path(&self) -> String {
        self.path.relative()
    }

    pub fn absolute_path(&self) -> PathBuf {
        self.stash.repo_path.join(self.path.relative())
    }

    /// Previous location, only for renames.
    pub fn old_path(&self) -> Option<&RelPath> {
        match &self.kind {
            FileKind::Renamed { old } => Some(old),
            _ => None,
        }
    }

    pub fn old_relative_path(&self) -> Option<String> {
        self.old_path().map(RelPath::relative)
    }

    pub fn old_absolute_path(&self) -> Option<PathBuf> {
        self.old_path()
            .map(|old| self.stash.repo_path.join(old.relative()))
    }

    pub fn id(&self) -> String {
        format!(
            "F-{}.{}.{}.{}",
            self.kind.tag(),
            self.stash.repo_path.display(),
            self.stash.short_hash,
            self.relative_path()
        )
    }
}
