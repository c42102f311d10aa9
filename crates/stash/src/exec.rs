//! Process execution for external tools.
//!
//! Every call to [`Executor::run`] spawns the process inside its own tokio
//! task and hands back an [`Execution`]: the argument vector that was used
//! plus a deferred result. Dropping the `Execution` does not kill the process;
//! it runs to completion and its resources are reaped by the task.
//!
//! stdout and stderr are collected as raw bytes and decoded only once the
//! process has exited, so multi-byte characters split across pipe reads are
//! never corrupted.
use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::Stdio,
    time::Instant,
};

use chrono::Utc;
use thiserror::Error;
use tokio::{process::Command, task::JoinHandle};
use utils::shell::{render_command, resolve_executable_path};

/// Settings resolved once at startup and threaded into the executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecConfig {
    /// Emit one structured record per completed invocation.
    pub debug: bool,
}

/// Output of a process that exited with code 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u64,
}

impl ExecOutput {
    /// stdout followed by stderr.
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecError {
    /// The process could not be started at all (missing binary, bad cwd, permissions).
    #[error("[launch] {0}")]
    Launch(String),
    /// The process ran and exited non-zero (or was killed by a signal, reported as -1).
    #[error("{}", exited_message(.code, .stdout, .stderr))]
    Exited {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// The task driving the process was cancelled or panicked before reporting.
    #[error("execution interrupted: {0}")]
    Interrupted(String),
}

fn exited_message(code: &i32, stdout: &str, stderr: &str) -> String {
    let text = format!("{stderr}{stdout}");
    let text = text.trim();
    if text.is_empty() {
        format!("command exited with code {code}")
    } else {
        text.to_string()
    }
}

impl ExecError {
    /// Exit code of the process; -1 when it never ran or never reported one.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecError::Exited { code, .. } => *code,
            ExecError::Launch(_) | ExecError::Interrupted(_) => -1,
        }
    }

    pub fn stderr(&self) -> String {
        match self {
            ExecError::Exited { stderr, .. } => stderr.clone(),
            ExecError::Launch(msg) => format!("[launch] {msg}"),
            ExecError::Interrupted(msg) => msg.clone(),
        }
    }

    pub fn stdout(&self) -> &str {
        match self {
            ExecError::Exited { stdout, .. } => stdout,
            ExecError::Launch(_) | ExecError::Interrupted(_) => "",
        }
    }

    pub fn is_launch_failure(&self) -> bool {
        matches!(self, ExecError::Launch(_))
    }
}

/// A spawned invocation: the arguments used plus the pending outcome.
#[derive(Debug)]
pub struct Execution {
    args: Vec<String>,
    handle: JoinHandle<Result<ExecOutput, ExecError>>,
}

impl Execution {
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Wait for the process to exit.
    pub async fn wait(self) -> Result<ExecOutput, ExecError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(ExecError::Interrupted(e.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Executor {
    config: ExecConfig,
}

impl Executor {
    pub fn new(config: ExecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> ExecConfig {
        self.config
    }

    /// Spawn `program args...` in `cwd` with `envs` added to the inherited
    /// environment. Must be called from within a tokio runtime.
    pub fn run<I, S>(
        &self,
        program: &str,
        args: I,
        cwd: Option<&Path>,
        envs: Option<&[(OsString, OsString)]>,
    ) -> Execution
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let os_args: Vec<OsString> = args
            .into_iter()
            .map(|a| a.as_ref().to_os_string())
            .collect();
        let args = os_args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let invocation = Invocation {
            program: program.to_string(),
            args: os_args,
            cwd: cwd.map(Path::to_path_buf),
            envs: envs.map(<[_]>::to_vec).unwrap_or_default(),
            debug: self.config.debug,
        };
        let handle = tokio::spawn(invocation.run());

        Execution { args, handle }
    }
}

struct Invocation {
    program: String,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    envs: Vec<(OsString, OsString)>,
    debug: bool,
}

impl Invocation {
    async fn run(self) -> Result<ExecOutput, ExecError> {
        let started = Instant::now();
        let rendered = render_command(&self.program, &self.args);

        let program = resolve_executable_path(&self.program)
            .await
            .unwrap_or_else(|| PathBuf::from(&self.program));

        let mut cmd = Command::new(&program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &self.envs {
            cmd.env(k, v);
        }

        tracing::trace!(cwd = ?self.cwd, "Running command: {rendered}");

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.record(&rendered, started, None);
                return Err(ExecError::Launch(format!("{}: {e}", self.program)));
            }
        };
        let out = child
            .wait_with_output()
            .await
            .map_err(|e| ExecError::Interrupted(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
        let code = out.status.code();
        let elapsed_ms = self.record(&rendered, started, code);

        match code {
            Some(0) => Ok(ExecOutput {
                stdout,
                stderr,
                elapsed_ms,
            }),
            other => Err(ExecError::Exited {
                code: other.unwrap_or(-1),
                stdout,
                stderr,
            }),
        }
    }

    /// Writes the debug record when enabled. `code` is `None` for processes
    /// that never started or were killed by a signal.
    fn record(&self, rendered: &str, started: Instant, code: Option<i32>) -> u64 {
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if self.debug {
            tracing::debug!(
                timestamp = %Utc::now().to_rfc3339(),
                command = %rendered,
                args = ?self.args,
                cwd = ?self.cwd,
                elapsed_ms,
                exit_code = ?code,
                "command finished"
            );
        }
        elapsed_ms
    }
}
