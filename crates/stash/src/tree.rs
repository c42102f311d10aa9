//! Projections of a stash's file list: flat sorted lists or a directory tree.
use std::{collections::HashMap, path::Path};

use serde::Serialize;

use crate::{model::FileChange, settings::FileSortMode};

/// A directory in the tree projection. The root has an empty name and path.
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryNode<'a> {
    name: String,
    path: String,
    directories: Vec<DirectoryNode<'a>>,
    files: Vec<&'a FileChange>,
}

/// A child of a directory, directories first.
#[derive(Debug, Clone, Copy)]
pub enum TreeEntry<'n, 'a> {
    Directory(&'n DirectoryNode<'a>),
    File(&'a FileChange),
}

impl<'a> DirectoryNode<'a> {
    fn empty(name: String, path: String) -> Self {
        Self {
            name,
            path,
            directories: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slash-joined segments from the repository root.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn directories(&self) -> &[DirectoryNode<'a>] {
        &self.directories
    }

    pub fn files(&self) -> &[&'a FileChange] {
        &self.files
    }

    pub fn children(&self) -> impl Iterator<Item = TreeEntry<'_, 'a>> {
        self.directories
            .iter()
            .map(TreeEntry::Directory)
            .chain(self.files.iter().copied().map(TreeEntry::File))
    }

    /// Files in this directory and all below it.
    pub fn file_count(&self) -> usize {
        self.files.len()
            + self
                .directories
                .iter()
                .map(DirectoryNode::file_count)
                .sum::<usize>()
    }

    /// `D.` followed by the absolute directory path with every
    /// non-alphanumeric character replaced by `-`.
    pub fn id(&self, repo_path: &Path) -> String {
        let full = repo_path.join(&self.path).to_string_lossy().into_owned();
        let safe: String = full
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect();
        format!("D.{safe}")
    }
}

struct Slot<'a> {
    name: String,
    path: String,
    directories: Vec<usize>,
    files: Vec<&'a FileChange>,
}

/// Group files by their directory segments. Directories and files keep the
/// order in which they were first seen; every input file lands in exactly
/// one node.
pub fn build_tree<'a>(files: impl IntoIterator<Item = &'a FileChange>) -> DirectoryNode<'a> {
    let mut slots = vec![Slot {
        name: String::new(),
        path: String::new(),
        directories: Vec::new(),
        files: Vec::new(),
    }];
    let mut by_path: HashMap<String, usize> = HashMap::new();

    for file in files {
        let mut current = 0;
        let mut path = String::new();
        for segment in file.path().dir_segments() {
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(segment);

            current = match by_path.get(&path) {
                Some(&idx) => idx,
                None => {
                    let idx = slots.len();
                    slots.push(Slot {
                        name: segment.to_string(),
                        path: path.clone(),
                        directories: Vec::new(),
                        files: Vec::new(),
                    });
                    slots[current].directories.push(idx);
                    by_path.insert(path.clone(), idx);
                    idx
                }
            };
        }
        slots[current].files.push(file);
    }

    let mut slots: Vec<Option<Slot<'a>>> = slots.into_iter().map(Some).collect();
    assemble(&mut slots, 0)
}

fn assemble<'a>(slots: &mut [Option<Slot<'a>>], idx: usize) -> DirectoryNode<'a> {
    let Some(slot) = slots.get_mut(idx).and_then(Option::take) else {
        return DirectoryNode::empty(String::new(), String::new());
    };
    let directories = slot
        .directories
        .iter()
        .map(|&child| assemble(slots, child))
        .collect();
    DirectoryNode {
        name: slot.name,
        path: slot.path,
        directories,
        files: slot.files,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FileView<'a> {
    List(Vec<&'a FileChange>),
    Tree(DirectoryNode<'a>),
}

/// Arrange `files` for display. Sorting is a plain, stable string comparison
/// on the file name (`Name`) or repository-relative path (`Path`, `Tree`).
pub fn arrange(files: &[FileChange], mode: FileSortMode) -> FileView<'_> {
    let mut refs: Vec<&FileChange> = files.iter().collect();
    match mode {
        FileSortMode::Name => {
            refs.sort_by(|a, b| a.file_name().cmp(b.file_name()));
            FileView::List(refs)
        }
        FileSortMode::Path => {
            refs.sort_by_cached_key(|f| f.relative_path());
            FileView::List(refs)
        }
        FileSortMode::Tree => {
            refs.sort_by_cached_key(|f| f.relative_path());
            FileView::Tree(build_tree(refs))
        }
    }
}
