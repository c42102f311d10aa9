use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{cli::StashError, exec::ExecConfig, model::Repository};

/// Environment variable that overrides the `debug` setting when present.
pub const DEBUG_ENV: &str = "STASH_EXPLORER_DEBUG";

pub const NO_REPOSITORIES: &str = "No repositories found.";
pub const NO_STASHES: &str = "No stashes found.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileSortMode {
    Name,
    #[default]
    Path,
    Tree,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmptyRepoDisplay {
    HideEmpty,
    #[default]
    IndicateEmpty,
    ShowEmpty,
}

impl EmptyRepoDisplay {
    /// Repositories to show. `hide-empty` only drops repositories once their
    /// stashes are known to be empty, which requires eager loading.
    pub fn visible<'a>(self, repos: &'a [Repository], eager: bool) -> Vec<&'a Repository> {
        repos
            .iter()
            .filter(|repo| {
                !(self == EmptyRepoDisplay::HideEmpty
                    && eager
                    && repo.stashes().is_some_and(<[_]>::is_empty))
            })
            .collect()
    }

    /// Message shown in place of an empty list of repositories.
    pub fn repositories_placeholder(self) -> Option<&'static str> {
        (self == EmptyRepoDisplay::IndicateEmpty).then_some(NO_REPOSITORIES)
    }

    /// Message shown in place of an empty list of stashes.
    pub fn stashes_placeholder(self) -> Option<&'static str> {
        (self == EmptyRepoDisplay::IndicateEmpty).then_some(NO_STASHES)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Notifications {
    pub show_success: bool,
}

impl Default for Notifications {
    fn default() -> Self {
        Self { show_success: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Explorer {
    pub file_sorting: FileSortMode,
    pub empty_repositories: EmptyRepoDisplay,
    pub eager_load_stashes: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Log {
    pub summary_length: usize,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            summary_length: 200,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub debug: bool,
    pub notifications: Notifications,
    pub explorer: Explorer,
    pub log: Log,
}

impl Settings {
    /// `~/.config/stash-explorer/settings.toml` on Linux.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("stash-explorer").join("settings.toml"))
    }

    /// Read settings from `path`. A missing file yields the defaults; an
    /// unreadable or invalid one is an error the caller may log and ignore.
    pub fn load_from(path: &Path) -> Result<Self, StashError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| StashError::Settings {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Decide the debug flag once. `env_value` is the value of
    /// [`DEBUG_ENV`] if the variable is set; it wins over the file.
    pub fn resolve_exec_config(&self, env_value: Option<&str>) -> ExecConfig {
        ExecConfig {
            debug: match env_value {
                Some(value) => value == "1",
                None => self.debug,
            },
        }
    }
}
