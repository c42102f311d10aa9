use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use git2::{Repository, RepositoryInitOptions};
use stash::{
    ExecConfig, FileKind, FileSide, StashError, StashMode, StashService,
    cli::parse_branch_refs,
    fingerprint::FingerprintCache,
};
use tempfile::TempDir;

fn write_file<P: AsRef<Path>>(base: P, rel: &str, content: &str) {
    let path = base.as_ref().join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut f = fs::File::create(&path).unwrap();
    f.write_all(content.as_bytes()).unwrap();
}

fn read_file<P: AsRef<Path>>(base: P, rel: &str) -> String {
    fs::read_to_string(base.as_ref().join(rel)).unwrap()
}

fn commit_all(repo: &Repository, message: &str) {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = repo.signature().unwrap();
    let parents: Vec<git2::Commit> = match repo.head() {
        Ok(h) => vec![h.peel_to_commit().unwrap()],
        Err(e) if e.code() == git2::ErrorCode::UnbornBranch => vec![],
        Err(e) => panic!("failed to read HEAD: {e}"),
    };
    let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
        .unwrap();
}

fn stage(repo: &Repository, add: &[&str], remove: &[&str]) {
    let mut index = repo.index().unwrap();
    for path in remove {
        index.remove_path(Path::new(path)).unwrap();
    }
    for path in add {
        index.add_path(Path::new(path)).unwrap();
    }
    index.write().unwrap();
}

fn configure_user(repo: &Repository) {
    let mut cfg = repo.config().unwrap();
    cfg.set_str("user.name", "Test User").unwrap();
    cfg.set_str("user.email", "test@example.com").unwrap();
}

/// Repository on `main` with one commit containing `files`.
fn init_repo(root: &TempDir, files: &[(&str, &str)]) -> (PathBuf, Repository) {
    let path = fs::canonicalize(root.path()).unwrap().join("repo");
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    let repo = Repository::init_opts(&path, &opts).unwrap();
    configure_user(&repo);
    for (rel, content) in files {
        write_file(&path, rel, content);
    }
    commit_all(&repo, "initial commit");
    (path, repo)
}

fn service() -> StashService {
    StashService::new(ExecConfig::default())
}

async fn stash_now(svc: &StashService, repo: &Path, mode: StashMode, message: &str) {
    svc.cli()
        .create_stash(repo, mode, Some(message))
        .wait()
        .await
        .unwrap();
}

#[tokio::test]
async fn repository_without_stashes() {
    let td = TempDir::new().unwrap();
    let (path, _repo) = init_repo(&td, &[("a.txt", "a\n")]);
    let svc = service();

    assert!(svc.cli().list_stashes(&path).await.unwrap().is_empty());
    assert_eq!(svc.fingerprint(&path).await.unwrap(), None);
    assert!(!svc.cli().has_unmerged_paths(&path).await.unwrap());
}

#[tokio::test]
async fn discovery_resolves_roots_and_skips_plain_dirs() {
    let td = TempDir::new().unwrap();
    let (path, _repo) = init_repo(&td, &[("sub/a.txt", "a\n")]);
    let plain = fs::canonicalize(td.path()).unwrap().join("plain");
    fs::create_dir_all(&plain).unwrap();
    let svc = service();

    let repos = svc
        .discover(
            &[path.join("sub"), plain.clone(), path.clone()],
            &[path.clone()],
        )
        .await
        .unwrap();
    assert_eq!(repos.len(), 1);
    assert_eq!(repos[0].path(), path);
    assert_eq!(repos[0].label(), "repo");

    assert!(svc.has_repositories(&[plain.clone(), path.clone()]).await.unwrap());
    assert!(!svc.has_repositories(&[plain]).await.unwrap());
}

#[tokio::test]
async fn stash_with_every_kind_of_change() {
    let td = TempDir::new().unwrap();
    let (path, repo) = init_repo(
        &td,
        &[
            ("a.txt", "original a\n"),
            ("gone.txt", "this file will be deleted\n"),
            ("docs/r1.txt", "a file that moves somewhere else entirely\n"),
        ],
    );

    write_file(&path, "a.txt", "changed a\n");
    fs::remove_file(path.join("gone.txt")).unwrap();
    fs::create_dir_all(path.join("moved")).unwrap();
    fs::rename(path.join("docs/r1.txt"), path.join("moved/r2.txt")).unwrap();
    write_file(&path, "new.txt", "brand new content\n");
    stage(&repo, &["moved/r2.txt", "new.txt"], &["docs/r1.txt"]);
    write_file(&path, "u/untracked.txt", "not tracked\n");

    let svc = service();
    stash_now(&svc, &path, StashMode::IncludeUntracked, "work in progress").await;
    assert!(!path.join("u/untracked.txt").exists());
    assert_eq!(read_file(&path, "a.txt"), "original a\n");

    let mut repository = svc.discover(&[path.clone()], &[]).await.unwrap().remove(0);
    svc.load_stashes(&mut repository).await.unwrap();
    let stashes = repository.stashes().unwrap();
    assert_eq!(stashes.len(), 1);

    let mut stash = stashes[0].clone();
    assert_eq!(stash.index(), 0);
    assert_eq!(stash.at_index(), "stash@{0}");
    assert_eq!(stash.message(), "work in progress");
    assert_eq!(stash.branch(), Some("main"));
    assert_eq!(stash.parents().len(), 3);
    assert!(stash.has_untracked());
    assert!(stash.note().is_none());

    svc.load_files(&mut stash).await.unwrap();
    let files = stash.files().unwrap();
    let summary: Vec<(&str, String)> = files
        .iter()
        .map(|f| (f.kind().tag(), f.relative_path()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("added", "new.txt".to_string()),
            ("modified", "a.txt".to_string()),
            ("renamed", "moved/r2.txt".to_string()),
            ("untracked", "u/untracked.txt".to_string()),
            ("deleted", "gone.txt".to_string()),
        ]
    );
    let renamed = &files[2];
    assert!(matches!(renamed.kind(), FileKind::Renamed { .. }));
    assert_eq!(renamed.old_relative_path().as_deref(), Some("docs/r1.txt"));
    assert_eq!(renamed.absolute_path(), path.join("moved/r2.txt"));

    let content = |idx: usize, side: Option<FileSide>| {
        let svc = svc.clone();
        let file = files[idx].clone();
        async move { svc.file_content(&file, side).await.unwrap() }
    };
    assert_eq!(content(0, None).await, "brand new content\n");
    assert_eq!(content(1, None).await, "changed a\n");
    assert_eq!(content(1, Some(FileSide::Parent)).await, "original a\n");
    assert_eq!(
        content(2, Some(FileSide::Parent)).await,
        "a file that moves somewhere else entirely\n"
    );
    assert_eq!(content(3, None).await, "not tracked\n");
    assert_eq!(content(4, None).await, "this file will be deleted\n");

    let json = serde_json::to_value(&stash).unwrap();
    assert_eq!(json["index"], 0);
    assert_eq!(json["branch"], "main");
}

#[tokio::test]
async fn fingerprint_changes_with_the_stash_list() {
    let td = TempDir::new().unwrap();
    let (path, _repo) = init_repo(&td, &[("a.txt", "a\n")]);
    let svc = service();
    let mut cache = FingerprintCache::new();

    write_file(&path, "a.txt", "one\n");
    stash_now(&svc, &path, StashMode::Simple, "one").await;
    let first = svc.fingerprint(&path).await.unwrap();
    assert!(first.is_some());
    assert!(cache.observe(&path, first.clone()));
    assert_eq!(svc.fingerprint(&path).await.unwrap(), first);
    assert!(!cache.observe(&path, first.clone()));

    write_file(&path, "a.txt", "two\n");
    stash_now(&svc, &path, StashMode::Simple, "two").await;
    let second = svc.fingerprint(&path).await.unwrap();
    assert_ne!(second, first);
    assert!(cache.observe(&path, second));

    svc.cli().drop_stash(&path, 0).wait().await.unwrap();
    assert_eq!(svc.fingerprint(&path).await.unwrap(), first);

    svc.cli().clear_stashes(&path).wait().await.unwrap();
    assert_eq!(svc.fingerprint(&path).await.unwrap(), None);
}

#[tokio::test]
async fn drop_shifts_indices_until_relisted() {
    let td = TempDir::new().unwrap();
    let (path, _repo) = init_repo(&td, &[("a.txt", "a\n")]);
    let svc = service();

    write_file(&path, "a.txt", "first\n");
    stash_now(&svc, &path, StashMode::Simple, "first").await;
    write_file(&path, "a.txt", "second\n");
    stash_now(&svc, &path, StashMode::Simple, "second").await;

    let mut repository = svc.discover(&[path.clone()], &[]).await.unwrap().remove(0);
    svc.load_stashes(&mut repository).await.unwrap();
    let before: Vec<_> = repository
        .stashes()
        .unwrap()
        .iter()
        .map(|s| (s.index(), s.message().to_string()))
        .collect();
    assert_eq!(before, [(0, "second".into()), (1, "first".into())]);
    let stale = repository.stashes().unwrap()[1].clone();

    svc.cli().drop_stash(&path, 0).wait().await.unwrap();
    svc.load_stashes(&mut repository).await.unwrap();
    let after = repository.stashes().unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].index(), 0);
    assert_eq!(after[0].message(), "first");
    assert_eq!(after[0].hash(), stale.hash());
    assert_eq!(stale.index(), 1);
}

#[tokio::test]
async fn loading_files_of_a_stale_index_fails() {
    let td = TempDir::new().unwrap();
    let (path, _repo) = init_repo(&td, &[("a.txt", "a\n")]);
    let svc = service();

    write_file(&path, "a.txt", "first\n");
    stash_now(&svc, &path, StashMode::Simple, "first").await;
    write_file(&path, "a.txt", "second\n");
    stash_now(&svc, &path, StashMode::Simple, "second").await;

    let mut repository = svc.discover(&[path.clone()], &[]).await.unwrap().remove(0);
    svc.load_stashes(&mut repository).await.unwrap();
    let mut stale = repository.stashes().unwrap()[1].clone();
    assert_eq!(stale.index(), 1);

    svc.cli().drop_stash(&path, 0).wait().await.unwrap();

    let result = svc.load_files(&mut stale).await;
    assert!(matches!(result, Err(StashError::Exec(_))), "{result:?}");
    assert!(stale.files().is_none());
}

#[tokio::test]
async fn push_paths_only_stashes_named_files() {
    let td = TempDir::new().unwrap();
    let (path, _repo) = init_repo(&td, &[("a.txt", "a\n"), ("b.txt", "b\n")]);
    let svc = service();

    write_file(&path, "a.txt", "a changed\n");
    write_file(&path, "b.txt", "b changed\n");
    let exec = svc
        .cli()
        .push_stash(&path, &[path.join("a.txt")], Some("only a"));
    assert_eq!(exec.args().last().map(String::as_str), path.join("a.txt").to_str());
    exec.wait().await.unwrap();

    assert_eq!(read_file(&path, "a.txt"), "a\n");
    assert_eq!(read_file(&path, "b.txt"), "b changed\n");

    let files = svc.cli().list_stash_files(&path, 0, false).await.unwrap();
    assert_eq!(files.modified, ["a.txt"]);
}

#[tokio::test]
async fn staged_rename_is_not_unmerged() {
    let td = TempDir::new().unwrap();
    let (path, repo) = init_repo(&td, &[("utils.rs", "pub fn helper() {}\n")]);
    let svc = service();

    fs::rename(path.join("utils.rs"), path.join("lib.rs")).unwrap();
    stage(&repo, &["lib.rs"], &["utils.rs"]);

    assert!(!svc.cli().has_unmerged_paths(&path).await.unwrap());
}

#[tokio::test]
async fn pop_conflict_leaves_unmerged_paths() {
    let td = TempDir::new().unwrap();
    let (path, repo) = init_repo(&td, &[("a.txt", "base\n")]);
    let svc = service();

    write_file(&path, "a.txt", "stashed\n");
    stash_now(&svc, &path, StashMode::Simple, "conflicting").await;
    write_file(&path, "a.txt", "committed\n");
    commit_all(&repo, "diverge");

    let err = svc.cli().pop(&path, 0, false).wait().await.unwrap_err();
    assert_ne!(err.exit_code(), 0);
    assert!(svc.cli().has_unmerged_paths(&path).await.unwrap());
    // A failed pop keeps the stash.
    assert_eq!(svc.cli().list_stashes(&path).await.unwrap().len(), 1);
}

#[tokio::test]
async fn apply_keeps_stash_and_pop_removes_it() {
    let td = TempDir::new().unwrap();
    let (path, _repo) = init_repo(&td, &[("a.txt", "a\n")]);
    let svc = service();

    write_file(&path, "a.txt", "stashed\n");
    stash_now(&svc, &path, StashMode::Simple, "keep").await;

    svc.cli().apply(&path, 0, false).wait().await.unwrap();
    assert_eq!(read_file(&path, "a.txt"), "stashed\n");
    assert_eq!(svc.cli().list_stashes(&path).await.unwrap().len(), 1);

    write_file(&path, "a.txt", "a\n");
    svc.cli().pop(&path, 0, true).wait().await.unwrap();
    assert_eq!(read_file(&path, "a.txt"), "stashed\n");
    assert!(svc.cli().list_stashes(&path).await.unwrap().is_empty());
}

#[tokio::test]
async fn single_file_restore_from_stash() {
    let td = TempDir::new().unwrap();
    let (path, _repo) = init_repo(&td, &[("a.txt", "a\n")]);
    let svc = service();

    write_file(&path, "a.txt", "stashed a\n");
    write_file(&path, "u.txt", "untracked\n");
    stash_now(&svc, &path, StashMode::IncludeUntracked, "files").await;
    assert!(!path.join("u.txt").exists());

    svc.cli()
        .apply_single_file(&path, 0, "a.txt")
        .wait()
        .await
        .unwrap();
    assert_eq!(read_file(&path, "a.txt"), "stashed a\n");

    svc.cli()
        .create_single_file(&path, 0, "u.txt")
        .wait()
        .await
        .unwrap();
    assert_eq!(read_file(&path, "u.txt"), "untracked\n");
}

#[tokio::test]
async fn branch_from_stash_switches_and_drops() {
    let td = TempDir::new().unwrap();
    let (path, _repo) = init_repo(&td, &[("a.txt", "a\n")]);
    let svc = service();

    write_file(&path, "a.txt", "on branch\n");
    stash_now(&svc, &path, StashMode::Simple, "branch me").await;
    svc.cli()
        .branch(&path, 0, "from-stash")
        .wait()
        .await
        .unwrap();

    let current = svc.cli().current_branch(&path).wait().await.unwrap();
    assert_eq!(current.stdout.trim(), "from-stash");
    let refs = svc.cli().list_branches(&path).wait().await.unwrap();
    let branches = parse_branch_refs(&refs.stdout);
    assert!(branches.contains(&"main".to_string()));
    assert!(branches.contains(&"from-stash".to_string()));
    assert!(svc.cli().list_stashes(&path).await.unwrap().is_empty());
    assert_eq!(read_file(&path, "a.txt"), "on branch\n");

    // Both branches point at the same commit, so the restored change follows along.
    svc.cli().checkout_branch(&path, "main").wait().await.unwrap();
    let current = svc.cli().current_branch(&path).wait().await.unwrap();
    assert_eq!(current.stdout.trim(), "main");
    assert_eq!(read_file(&path, "a.txt"), "on branch\n");
}

#[tokio::test]
async fn failed_listing_reports_per_repository() {
    let td = TempDir::new().unwrap();
    let (path, _repo) = init_repo(&td, &[("a.txt", "a\n")]);
    let gone = fs::canonicalize(td.path()).unwrap().join("removed");
    let svc = service();

    let mut repos = vec![
        stash::Repository::new(path.clone(), &[]),
        stash::Repository::new(gone, &[]),
    ];
    let results = svc.load_all_stashes(&mut repos).await;
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
    assert!(repos[0].stashes().is_some());
    assert!(repos[1].stashes().is_none());
}
