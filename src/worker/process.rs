//! Worker process spawning and control.
//!
//! Credentials are only ever passed through the environment so they never
//! show up in process listings.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The worker executable was not found.
    #[error("Worker executable not found: {0}")]
    NotFound(String),
    /// Permission denied when spawning.
    #[error("Permission denied spawning worker: {0}")]
    PermissionDenied(String),
    /// A standard stream was not captured.
    #[error("Worker {0} not available")]
    MissingStream(&'static str),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(program: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(program.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(program.to_string()),
            _ => Self::Io(err),
        }
    }
}

/// Builder for the worker command.
#[derive(Clone, Default)]
pub struct WorkerProcessBuilder {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    working_dir: Option<PathBuf>,
    clear_env: bool,
}

impl fmt::Debug for WorkerProcessBuilder {
    // Environment values carry tokens; only the names are printed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerProcessBuilder")
            .field("program", &self.program)
            .field("args", &self.args)
            .field(
                "envs",
                &self.envs.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            )
            .field("working_dir", &self.working_dir)
            .field("clear_env", &self.clear_env)
            .finish()
    }
}

impl WorkerProcessBuilder {
    /// Create a new builder for the given executable.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Append command-line arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set several environment variables for the child.
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.envs
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Start the child with an empty environment plus the variables set here.
    #[must_use]
    pub fn clear_env(mut self, clear: bool) -> Self {
        self.clear_env = clear;
        self
    }

    /// Set the working directory for the worker.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Names of the environment variables that will be set.
    #[must_use]
    pub fn env_keys(&self) -> Vec<&str> {
        self.envs.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// Look up a configured environment value.
    #[must_use]
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.envs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if self.clear_env {
            cmd.env_clear();
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// Piped standard streams of a freshly spawned worker.
#[derive(Debug)]
pub struct WorkerPipes {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: Option<ChildStderr>,
}

/// A running worker process. Dropping it kills the child.
#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
}

impl WorkerProcess {
    /// Spawn the worker and detach its pipes.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn or stdin/stdout
    /// were not captured.
    pub fn spawn(builder: &WorkerProcessBuilder) -> Result<(Self, WorkerPipes), SpawnError> {
        let mut child = builder
            .command()
            .spawn()
            .map_err(|e| SpawnError::from_io(builder.program(), e))?;

        tracing::debug!(
            program = %builder.program(),
            pid = ?child.id(),
            env = ?builder.env_keys(),
            "Worker process spawned"
        );

        let stdin = child.stdin.take().ok_or(SpawnError::MissingStream("stdin"))?;
        let stdout = child.stdout.take().ok_or(SpawnError::MissingStream("stdout"))?;
        let pipes = WorkerPipes {
            stdin,
            stdout,
            stderr: child.stderr.take(),
        };
        Ok((Self { child }, pipes))
    }

    /// Process ID, until the process has been reaped.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit and return its exit code. A process
    /// killed by a signal has none.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    /// SIGTERM, then SIGKILL if the worker is still running after `grace`.
    /// Platforms without signals kill immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be killed or reaped.
    pub async fn terminate(&mut self, grace: Duration) -> std::io::Result<()> {
        let Some(pid) = self.id() else {
            return Ok(());
        };

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let target = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
            if let Err(e) = kill(target, Signal::SIGTERM) {
                tracing::debug!(pid, error = %e, "SIGTERM not delivered");
            }
            if let Ok(waited) = tokio::time::timeout(grace, self.child.wait()).await {
                return waited.map(drop);
            }
            tracing::warn!(pid, "Worker ignored SIGTERM, killing");
        }

        #[cfg(not(unix))]
        let _ = (pid, grace);

        self.child.kill().await
    }
}
