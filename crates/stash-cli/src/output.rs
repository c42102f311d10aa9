//! Plain-text rendering for terminal output.
use std::fmt::Write as _;

use serde::Serialize;
use stash::{
    EmptyRepoDisplay, FileChange, FileKind, Repository, Stash,
    tree::{DirectoryNode, FileView, TreeEntry},
};

#[derive(Debug, Serialize)]
pub struct MutationReport<'a> {
    command: &'a [String],
    success: bool,
    summary: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
}

impl<'a> MutationReport<'a> {
    pub fn success(command: &'a [String], summary: &'a str) -> Self {
        Self {
            command,
            success: true,
            summary,
            exit_code: None,
        }
    }

    pub fn failure(command: &'a [String], summary: &'a str, exit_code: i32) -> Self {
        Self {
            command,
            success: false,
            summary,
            exit_code: Some(exit_code),
        }
    }
}

/// `": summary"`, or nothing when the command printed nothing.
pub fn suffix(summary: &str) -> String {
    if summary.is_empty() {
        String::new()
    } else {
        format!(": {summary}")
    }
}

pub fn stash_line(stash: &Stash) -> String {
    let mut line = format!(
        "{}  {}  {}",
        stash.at_index(),
        stash.date().format("%Y-%m-%d %H:%M"),
        stash.message()
    );
    if let Some(branch) = stash.branch() {
        let _ = write!(line, "  [{branch}]");
    }
    if let Some(files) = stash.files() {
        let _ = write!(line, "  ({} files)", files.len());
    }
    line
}

pub fn render_listing(repos: &[&Repository], display: EmptyRepoDisplay) -> String {
    let mut out = String::new();
    if repos.is_empty() {
        if let Some(placeholder) = display.repositories_placeholder() {
            let _ = writeln!(out, "{placeholder}");
        }
        return out;
    }

    for repo in repos {
        let _ = writeln!(out, "{} ({})", repo.label(), repo.path().display());
        match repo.stashes() {
            Some([]) => {
                if let Some(placeholder) = display.stashes_placeholder() {
                    let _ = writeln!(out, "  {placeholder}");
                }
            }
            Some(stashes) => {
                for stash in stashes {
                    let _ = writeln!(out, "  {}", stash_line(stash));
                }
            }
            None => {}
        }
    }
    out
}

fn kind_letter(kind: &FileKind) -> char {
    match kind {
        FileKind::Added => 'A',
        FileKind::Deleted => 'D',
        FileKind::Modified => 'M',
        FileKind::Renamed { .. } => 'R',
        FileKind::Untracked => 'U',
    }
}

pub fn file_line(file: &FileChange, label: &str) -> String {
    match file.old_relative_path() {
        Some(old) => format!("{} {old} -> {label}", kind_letter(file.kind())),
        None => format!("{} {label}", kind_letter(file.kind())),
    }
}

fn render_directory(node: &DirectoryNode<'_>, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    for child in node.children() {
        match child {
            TreeEntry::Directory(dir) => {
                let _ = writeln!(out, "{indent}{}/", dir.name());
                render_directory(dir, depth + 1, out);
            }
            TreeEntry::File(file) => {
                let _ = writeln!(out, "{indent}{}", file_line(file, file.file_name()));
            }
        }
    }
}

pub fn render_files(view: &FileView<'_>) -> String {
    let mut out = String::new();
    match view {
        FileView::List(files) => {
            for file in files {
                let _ = writeln!(out, "{}", file_line(file, &file.relative_path()));
            }
        }
        FileView::Tree(root) => render_directory(root, 0, &mut out),
    }
    out
}
