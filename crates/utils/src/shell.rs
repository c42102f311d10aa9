//! Executable lookup and command rendering helpers

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

/// Resolve an executable by name.
///
/// The search order is:
/// 1. Explicit paths (absolute, or relative paths containing a separator).
/// 2. The current process PATH via `which`.
///
/// Returns `None` when nothing runnable was found; callers that still want to
/// attempt a launch can fall back to the bare name and let the OS report it.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }

    which(executable).await
}

async fn which(executable: &str) -> Option<PathBuf> {
    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(|result| result.ok())
}

/// Render `program args...` as a single shell-quoted line for logs.
pub fn render_command<I, S>(program: &str, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut rendered = vec![quote(program)];
    rendered.extend(
        args.into_iter()
            .map(|a| quote(&a.as_ref().to_string_lossy())),
    );
    rendered.join(" ")
}

fn quote(part: &str) -> String {
    shlex::try_quote(part)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| part.replace('\0', "\\0"))
}
