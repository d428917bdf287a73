//! Seam between the gateway and whatever actually runs the worker.
//!
//! The gateway only needs three byte streams and a way to wait for or stop
//! the worker. [`ProcessLauncher`] provides them from a real child process;
//! tests provide them from in-memory pipes.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::config::WorkerConfig;
use crate::rpc::WorkerWriter;
use crate::worker::{SpawnError, WorkerProcess, WorkerProcessBuilder};

/// Readable half of a worker stream.
pub type WorkerReader = Box<dyn AsyncRead + Send + Unpin>;

/// Everything needed to start a worker for one user.
#[derive(Clone, Default)]
pub struct LaunchRequest {
    pub user: String,
    pub env: Vec<(String, String)>,
}

impl fmt::Debug for LaunchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchRequest")
            .field("user", &self.user)
            .field(
                "env",
                &self.env.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl LaunchRequest {
    /// Look up an environment value by name.
    #[must_use]
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Wait for or stop a launched worker.
#[async_trait]
pub trait WorkerControl: Send {
    /// OS process ID, if there is one.
    fn id(&self) -> Option<u32>;

    /// Wait for the worker to exit. Returns its exit code, if it had one.
    async fn wait(&mut self) -> std::io::Result<Option<i32>>;

    /// Ask the worker to exit, forcing it after `grace`.
    async fn terminate(&mut self, grace: Duration) -> std::io::Result<()>;
}

/// Streams and control handle of a freshly launched worker.
pub struct WorkerIo {
    pub stdin: WorkerWriter,
    pub stdout: WorkerReader,
    pub stderr: Option<WorkerReader>,
    pub control: Box<dyn WorkerControl>,
}

impl fmt::Debug for WorkerIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerIo")
            .field("pid", &self.control.id())
            .field("stderr", &self.stderr.is_some())
            .finish_non_exhaustive()
    }
}

/// Starts workers.
pub trait WorkerLauncher: Send + Sync {
    /// Start a worker for the given request.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the worker cannot be started.
    fn launch(&self, request: &LaunchRequest) -> Result<WorkerIo, SpawnError>;
}

/// Launches the worker as a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: WorkerConfig,
}

impl ProcessLauncher {
    #[must_use]
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    /// Build the command for a launch request without starting it.
    #[must_use]
    pub fn builder_for(&self, request: &LaunchRequest) -> WorkerProcessBuilder {
        let mut builder = WorkerProcessBuilder::new(self.config.program.clone())
            .args(self.config.args.iter().cloned())
            .clear_env(!self.config.inherit_env)
            .envs(request.env.iter().cloned());
        if let Some(dir) = &self.config.working_dir {
            builder = builder.working_dir(dir.clone());
        }
        builder
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<WorkerIo, SpawnError> {
        let (process, pipes) = WorkerProcess::spawn(&self.builder_for(request))?;
        Ok(WorkerIo {
            stdin: Box::new(pipes.stdin),
            stdout: Box::new(pipes.stdout),
            stderr: pipes.stderr.map(|s| Box::new(s) as WorkerReader),
            control: Box::new(ChildControl { process }),
        })
    }
}

/// [`WorkerControl`] over a real child process.
#[derive(Debug)]
struct ChildControl {
    process: WorkerProcess,
}

#[async_trait]
impl WorkerControl for ChildControl {
    fn id(&self) -> Option<u32> {
        self.process.id()
    }

    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        self.process.wait().await
    }

    async fn terminate(&mut self, grace: Duration) -> std::io::Result<()> {
        self.process.terminate(grace).await
    }
}
