mod output;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};
use stash::{
    Execution, FileSide, FileSortMode, Repository, Settings, Stash, StashError, StashMode,
    StashService, cli::parse_branch_refs, group_paths_by_repository, is_valid_branch_name,
    settings::{DEBUG_ENV, NO_REPOSITORIES},
    tree,
};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use utils::{shell::render_command, text::summarize};

const DEFAULT_FILTER: &str = "warn,stash=info,utils=info";
const VERBOSE_FILTER: &str = "warn,stash=debug,utils=debug,stash_explorer=debug";

#[derive(Parser, Debug)]
#[command(name = "stash-explorer")]
#[command(about = "Browse, inspect and manage git stashes across one or more repositories")]
#[command(version)]
struct Args {
    /// Enable verbose output
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Print machine-readable JSON instead of text
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Directory to search for repositories; repeatable, defaults to the current directory
    #[arg(short = 'C', long = "dir", global = true)]
    dirs: Vec<PathBuf>,

    /// Settings file (defaults to the platform config directory)
    #[arg(long, env = "STASH_EXPLORER_SETTINGS", global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List repositories found in the search directories
    Repos,
    /// List the stashes of every repository
    List {
        /// Also load the files of every stash
        #[arg(long)]
        eager: bool,
    },
    /// List the files of a stash
    Files {
        index: usize,
        #[arg(long, value_enum)]
        sort: Option<SortArg>,
    },
    /// Print one stashed file
    Show {
        index: usize,
        /// Repository-relative path as listed by `files`
        path: String,
        #[arg(long, value_enum)]
        side: Option<SideArg>,
    },
    /// Print the stash-list fingerprint of every repository
    Fingerprint,
    /// Create a stash, optionally limited to some paths
    Push {
        #[arg(long, value_enum, default_value_t = ModeArg::Simple)]
        mode: ModeArg,
        #[arg(short, long)]
        message: Option<String>,
        paths: Vec<PathBuf>,
    },
    /// Apply a stash and drop it
    Pop {
        /// Defaults to the latest stash
        index: Option<usize>,
        /// Also restore the index
        #[arg(long = "index")]
        restore_index: bool,
    },
    /// Apply a stash and keep it
    Apply {
        index: usize,
        #[arg(long = "index")]
        restore_index: bool,
    },
    /// Drop a stash
    Drop { index: usize },
    /// Create a branch from a stash
    Branch { index: usize, name: String },
    /// Drop every stash
    Clear,
    /// Overwrite a tracked file with its stashed version
    CheckoutFile { index: usize, path: String },
    /// Restore an untracked file from a stash
    CreateFile { index: usize, path: String },
    /// List local branches
    Branches,
    /// Print the current branch
    CurrentBranch,
    /// Check out a branch
    Switch { branch: String },
    /// Report whether the working tree has unmerged paths
    Conflicts,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Name,
    Path,
    Tree,
}

impl From<SortArg> for FileSortMode {
    fn from(value: SortArg) -> Self {
        match value {
            SortArg::Name => FileSortMode::Name,
            SortArg::Path => FileSortMode::Path,
            SortArg::Tree => FileSortMode::Tree,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SideArg {
    Change,
    Parent,
}

impl From<SideArg> for FileSide {
    fn from(value: SideArg) -> Self {
        match value {
            SideArg::Change => FileSide::Change,
            SideArg::Parent => FileSide::Parent,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Simple,
    Staged,
    KeepIndex,
    IncludeUntracked,
    IncludeUntrackedKeepIndex,
    All,
    AllKeepIndex,
}

impl From<ModeArg> for StashMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Simple => StashMode::Simple,
            ModeArg::Staged => StashMode::Staged,
            ModeArg::KeepIndex => StashMode::KeepIndex,
            ModeArg::IncludeUntracked => StashMode::IncludeUntracked,
            ModeArg::IncludeUntrackedKeepIndex => StashMode::IncludeUntrackedKeepIndex,
            ModeArg::All => StashMode::All,
            ModeArg::AllKeepIndex => StashMode::AllKeepIndex,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Settings are read before logging starts because they decide the debug sink.
    let settings_path = args.settings.clone().or_else(Settings::config_path);
    let (settings, settings_error) = match settings_path.as_deref().map(Settings::load_from) {
        Some(Ok(settings)) => (settings, None),
        Some(Err(e)) => (Settings::default(), Some(e)),
        None => (Settings::default(), None),
    };
    let exec_config = settings.resolve_exec_config(std::env::var(DEBUG_ENV).ok().as_deref());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if args.verbose || exec_config.debug {
            EnvFilter::new(VERBOSE_FILTER)
        } else {
            EnvFilter::new(DEFAULT_FILTER)
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(e) = settings_error {
        warn!("Using default settings: {e}");
    }
    debug!("Args: {:?}", args);

    let app = App {
        service: StashService::new(exec_config),
        settings,
        json: args.json,
        dirs: if args.dirs.is_empty() {
            vec![std::env::current_dir().context("Failed to read the current directory")?]
        } else {
            args.dirs
        },
    };

    if let Err(e) = app.run(args.command).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}

struct App {
    service: StashService,
    settings: Settings,
    json: bool,
    dirs: Vec<PathBuf>,
}

impl App {
    async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Repos => self.repos().await,
            Command::List { eager } => self.list(eager || self.settings.explorer.eager_load_stashes).await,
            Command::Files { index, sort } => {
                let sort = sort.map_or(self.settings.explorer.file_sorting, FileSortMode::from);
                self.files(index, sort).await
            }
            Command::Show { index, path, side } => self.show(index, &path, side.map(Into::into)).await,
            Command::Fingerprint => self.fingerprint().await,
            Command::Push {
                mode,
                message,
                paths,
            } => self.push(mode.into(), message.as_deref(), &paths).await,
            Command::Pop {
                index,
                restore_index,
            } => {
                let repo = self.repository().await?;
                let exec = self.service.cli().pop(repo.path(), index.unwrap_or(0), restore_index);
                self.finish_restore("Pop", repo.path(), exec).await
            }
            Command::Apply {
                index,
                restore_index,
            } => {
                let repo = self.repository().await?;
                let exec = self.service.cli().apply(repo.path(), index, restore_index);
                self.finish_restore("Apply", repo.path(), exec).await
            }
            Command::Drop { index } => {
                let repo = self.repository().await?;
                self.finish("Drop", self.service.cli().drop_stash(repo.path(), index))
                    .await
            }
            Command::Branch { index, name } => {
                ensure_branch_name(&name)?;
                let repo = self.repository().await?;
                let exec = self.service.cli().branch(repo.path(), index, &name);
                self.finish_restore("Branch", repo.path(), exec).await
            }
            Command::Clear => {
                let repo = self.repository().await?;
                self.finish("Clear", self.service.cli().clear_stashes(repo.path()))
                    .await
            }
            Command::CheckoutFile { index, path } => {
                let repo = self.repository().await?;
                let exec = self.service.cli().apply_single_file(repo.path(), index, &path);
                self.finish("Checkout file", exec).await
            }
            Command::CreateFile { index, path } => {
                let repo = self.repository().await?;
                let exec = self.service.cli().create_single_file(repo.path(), index, &path);
                self.finish("Create file", exec).await
            }
            Command::Branches => self.branches().await,
            Command::CurrentBranch => {
                let repo = self.repository().await?;
                let out = self.service.cli().current_branch(repo.path()).wait().await?;
                self.emit(&out.stdout.trim(), out.stdout.trim())
            }
            Command::Switch { branch } => {
                ensure_branch_name(&branch)?;
                let repo = self.repository().await?;
                self.finish("Switch", self.service.cli().checkout_branch(repo.path(), &branch))
                    .await
            }
            Command::Conflicts => {
                let repo = self.repository().await?;
                let unmerged = self
                    .service
                    .cli()
                    .has_unmerged_paths(repo.path())
                    .await
                    .context("Unable to tell whether there are unmerged paths")?;
                let text = if unmerged {
                    "unmerged paths present"
                } else {
                    "no unmerged paths"
                };
                self.emit(&unmerged, text)
            }
        }
    }

    fn emit<T: serde::Serialize + ?Sized>(&self, value: &T, text: impl std::fmt::Display) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{text}");
        }
        Ok(())
    }

    async fn repositories(&self) -> Result<Vec<Repository>> {
        Ok(self.service.discover(&self.dirs, &self.dirs).await?)
    }

    /// The first repository found; stash commands address one repository.
    async fn repository(&self) -> Result<Repository> {
        self.repositories()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!(NO_REPOSITORIES))
    }

    async fn stash(&self, index: usize) -> Result<Stash> {
        let mut repo = self.repository().await?;
        self.service.load_stashes(&mut repo).await?;
        repo.stashes()
            .and_then(|stashes| stashes.iter().find(|s| s.index() == index))
            .cloned()
            .with_context(|| format!("No stash@{{{index}}} in {}", repo.path().display()))
    }

    async fn repos(&self) -> Result<()> {
        let repos = self.repositories().await?;
        let display = self.settings.explorer.empty_repositories;
        if self.json {
            return self.emit(&repos, "");
        }
        if repos.is_empty() {
            if let Some(placeholder) = display.repositories_placeholder() {
                println!("{placeholder}");
            }
            return Ok(());
        }
        for repo in &repos {
            println!("{}\t{}", repo.label(), repo.path().display());
        }
        Ok(())
    }

    async fn list(&self, eager: bool) -> Result<()> {
        let mut repos = self.repositories().await?;
        let results = self.service.load_all_stashes(&mut repos).await;
        for (repo, result) in repos.iter().zip(results) {
            if let Err(e) = result {
                warn!("Skipping {}: {e}", repo.path().display());
            }
        }

        if eager {
            for repo in &mut repos {
                let Some(stashes) = repo.stashes_mut() else {
                    continue;
                };
                for stash in stashes {
                    if let Err(e) = self.service.load_files(stash).await {
                        warn!("Unable to list files of {}: {e}", stash.at_index());
                    }
                }
            }
        }

        let display = self.settings.explorer.empty_repositories;
        let visible = display.visible(&repos, eager);
        if self.json {
            return self.emit(&visible, "");
        }
        print!("{}", output::render_listing(&visible, display));
        Ok(())
    }

    async fn files(&self, index: usize, sort: FileSortMode) -> Result<()> {
        let mut stash = self.stash(index).await?;
        self.service.load_files(&mut stash).await?;
        let files = stash.files().unwrap_or_default();
        let view = tree::arrange(files, sort);
        if self.json {
            return self.emit(&view, "");
        }
        print!("{}", output::render_files(&view));
        Ok(())
    }

    async fn show(&self, index: usize, path: &str, side: Option<FileSide>) -> Result<()> {
        let mut stash = self.stash(index).await?;
        self.service.load_files(&mut stash).await?;
        let file = stash
            .files()
            .unwrap_or_default()
            .iter()
            .find(|f| f.relative_path() == path)
            .with_context(|| format!("{path} is not part of {}", stash.at_index()))?;
        let content = self.service.file_content(file, side).await?;
        if self.json {
            return self.emit(&content, "");
        }
        print!("{content}");
        Ok(())
    }

    async fn fingerprint(&self) -> Result<()> {
        let repos = self.repositories().await?;
        let mut rows = Vec::with_capacity(repos.len());
        for repo in &repos {
            rows.push((repo.path().to_path_buf(), self.service.fingerprint(repo.path()).await?));
        }
        if self.json {
            return self.emit(&rows, "");
        }
        for (path, fingerprint) in rows {
            println!("{}\t{}", fingerprint.as_deref().unwrap_or("-"), path.display());
        }
        Ok(())
    }

    async fn push(&self, mode: StashMode, message: Option<&str>, paths: &[PathBuf]) -> Result<()> {
        if paths.is_empty() {
            let repo = self.repository().await?;
            let exec = self.service.cli().create_stash(repo.path(), mode, message);
            return self.finish("Stash", exec).await;
        }
        if mode != StashMode::Simple {
            warn!("--mode is ignored when paths are given");
        }

        let absolute = paths
            .iter()
            .map(std::path::absolute)
            .collect::<std::io::Result<Vec<_>>>()
            .context("Failed to resolve paths")?;
        let roots: Vec<PathBuf> = self
            .repositories()
            .await?
            .iter()
            .map(|r| r.path().to_path_buf())
            .collect();
        let groups = group_paths_by_repository(&absolute, &roots);
        if groups.is_empty() {
            bail!("None of the given paths is inside a repository");
        }
        for (repo, files) in groups {
            let exec = self.service.cli().push_stash(&repo, &files, message);
            self.finish("Stash", exec).await?;
        }
        Ok(())
    }

    async fn branches(&self) -> Result<()> {
        let repo = self.repository().await?;
        let cli = self.service.cli();
        let (listing, current) = (cli.list_branches(repo.path()), cli.current_branch(repo.path()));
        let branches = parse_branch_refs(&listing.wait().await?.stdout);
        let current = current.wait().await?.stdout.trim().to_string();
        if self.json {
            return self.emit(&branches, "");
        }
        for branch in branches {
            let marker = if branch == current { '*' } else { ' ' };
            println!("{marker} {branch}");
        }
        Ok(())
    }

    /// Report a mutation: the command that ran and a bounded summary of its output.
    async fn finish(&self, label: &str, exec: Execution) -> Result<()> {
        self.report(label, exec, None).await
    }

    /// Like [`App::finish`], but a failure is checked for conflicts it left behind.
    async fn finish_restore(&self, label: &str, repo: &Path, exec: Execution) -> Result<()> {
        self.report(label, exec, Some(repo)).await
    }

    async fn report(&self, label: &str, exec: Execution, conflict_check: Option<&Path>) -> Result<()> {
        let command = exec.args().to_vec();
        let rendered = render_command("git", &command);
        let max = self.settings.log.summary_length;

        match exec.wait().await {
            Ok(out) => {
                let summary = summarize(&out.combined(), max);
                if self.json {
                    return self.emit(&output::MutationReport::success(&command, &summary), "");
                }
                println!("$ {rendered}");
                if self.settings.notifications.show_success {
                    println!("{label} succeeded{}", output::suffix(&summary));
                }
                Ok(())
            }
            Err(e) => {
                let mut summary = summarize(&e.to_string(), max);
                if let Some(repo) = conflict_check {
                    match self.service.cli().has_unmerged_paths(repo).await {
                        Ok(true) => summary = format!("conflicts need to be resolved. {summary}"),
                        Ok(false) => {}
                        Err(check) => debug!("Unmerged-path check failed: {check}"),
                    }
                }
                if self.json {
                    self.emit(
                        &output::MutationReport::failure(&command, &summary, e.exit_code()),
                        "",
                    )?;
                } else {
                    println!("$ {rendered}");
                }
                bail!("{label} failed: {summary}")
            }
        }
    }
}

fn ensure_branch_name(name: &str) -> Result<()> {
    if is_valid_branch_name(name) {
        Ok(())
    } else {
        Err(StashError::InvalidBranchName(name.to_string()).into())
    }
}
