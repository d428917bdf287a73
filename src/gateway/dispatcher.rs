//! Per-worker I/O tasks.
//!
//! Each launched worker gets three helper tasks feeding one ordered event
//! channel: a pump per output stream and an exit watcher. A single dispatcher
//! task drains that channel. It owns the readiness detector, routes replies
//! into the worker's [`Multiplexer`], answers requests the worker sends us,
//! and reports the exit back to the gateway.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::protocol::{Inbound, JsonRpcResponse, LineFramer, NoiseFilter, WorkerMessage, METHOD_NOT_FOUND};
use crate::readiness::{ReadinessDetector, ReadinessState};
use crate::rpc::{CloseReason, Multiplexer};
use crate::worker::{WorkerControl, WorkerIo, WorkerReader};

const EVENT_BUFFER: usize = 256;
const READ_CHUNK: usize = 8 * 1024;

/// Which worker stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        })
    }
}

/// How a worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
}

#[derive(Debug)]
enum WorkerEvent {
    Line { stream: StreamKind, line: String },
    Closed { stream: StreamKind },
    Exited(WorkerExit),
}

/// Called once by the dispatcher after the worker has exited.
pub type ExitHook = Box<dyn FnOnce(WorkerExit) + Send>;

/// Settings for one worker's dispatcher.
pub struct DispatchOptions {
    pub generation: u64,
    pub detector: Box<dyn ReadinessDetector>,
    pub noise: NoiseFilter,
    pub request_timeout: Duration,
    pub terminate_grace: Duration,
}

/// Handles to a worker whose tasks are running.
#[derive(Debug, Clone)]
pub struct RunningWorker {
    pub generation: u64,
    pub pid: Option<u32>,
    pub mux: Arc<Multiplexer>,
    readiness: watch::Receiver<ReadinessState>,
    exit: watch::Receiver<Option<WorkerExit>>,
    cancel: CancellationToken,
}

impl RunningWorker {
    /// Start the I/O tasks for a freshly launched worker.
    #[must_use]
    pub fn start(io: WorkerIo, options: DispatchOptions, on_exit: ExitHook) -> Self {
        let WorkerIo {
            stdin,
            stdout,
            stderr,
            control,
        } = io;
        let pid = control.id();
        let mux = Arc::new(Multiplexer::new(stdin, options.request_timeout));
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (readiness_tx, readiness_rx) = watch::channel(ReadinessState::new());
        let (exit_tx, exit_rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        tokio::spawn(pump(stdout, StreamKind::Stdout, events_tx.clone()));
        if let Some(stderr) = stderr {
            tokio::spawn(pump(stderr, StreamKind::Stderr, events_tx.clone()));
        }
        tokio::spawn(watch_exit(
            control,
            cancel.clone(),
            options.terminate_grace,
            events_tx,
        ));

        tokio::spawn(watch_stdin(
            mux.write_failed(),
            cancel.clone(),
            options.generation,
        ));

        let dispatcher = Dispatcher {
            generation: options.generation,
            detector: options.detector,
            noise: options.noise,
            mux: Arc::clone(&mux),
            readiness: readiness_tx,
            exit: exit_tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(dispatcher.run(events_rx, on_exit));

        Self {
            generation: options.generation,
            pid,
            mux,
            readiness: readiness_rx,
            exit: exit_rx,
            cancel,
        }
    }

    /// Latest readiness snapshot.
    #[must_use]
    pub fn readiness(&self) -> ReadinessState {
        self.readiness.borrow().clone()
    }

    /// A receiver that sees every readiness change.
    #[must_use]
    pub fn readiness_updates(&self) -> watch::Receiver<ReadinessState> {
        self.readiness.clone()
    }

    /// Exit status, once the worker has exited.
    #[must_use]
    pub fn exit_status(&self) -> Option<WorkerExit> {
        *self.exit.borrow()
    }

    /// Wait for the worker to exit.
    pub async fn exited(&self) -> Option<WorkerExit> {
        let mut rx = self.exit.clone();
        let exit = match rx.wait_for(Option::is_some).await {
            Ok(exit) => *exit,
            Err(_) => None,
        };
        exit
    }

    /// Fail outstanding requests with `reason` and ask the worker to stop.
    pub fn stop(&self, reason: CloseReason) {
        let failed = self.mux.close(reason.clone());
        tracing::debug!(generation = self.generation, ?reason, failed, "Stopping worker");
        self.cancel.cancel();
    }
}

struct Dispatcher {
    generation: u64,
    detector: Box<dyn ReadinessDetector>,
    noise: NoiseFilter,
    mux: Arc<Multiplexer>,
    readiness: watch::Sender<ReadinessState>,
    exit: watch::Sender<Option<WorkerExit>>,
    cancel: CancellationToken,
}

impl Dispatcher {
    async fn run(mut self, mut events: mpsc::Receiver<WorkerEvent>, on_exit: ExitHook) {
        let generation = self.generation;
        let mut exit = WorkerExit { code: None };
        while let Some(event) = events.recv().await {
            match event {
                WorkerEvent::Line { stream, line } => self.handle_line(stream, &line),
                WorkerEvent::Closed { stream } => {
                    tracing::debug!(generation, %stream, "Worker stream closed");
                    if stream == StreamKind::Stdout {
                        // Replies can no longer arrive.
                        self.cancel.cancel();
                    }
                }
                WorkerEvent::Exited(status) => {
                    exit = status;
                    break;
                }
            }
        }

        tracing::info!(generation, code = ?exit.code, "Worker exited");
        self.mux.close(CloseReason::ProcessExit { code: exit.code });
        self.exit.send_replace(Some(exit));
        on_exit(exit);
    }

    fn handle_line(&mut self, stream: StreamKind, line: &str) {
        match Inbound::classify(line) {
            Inbound::Log(text) => self.handle_log(stream, &text),
            Inbound::Response(response) => {
                self.mux.handle_response(response);
            }
            Inbound::Worker(message) => self.handle_worker_message(message),
            Inbound::Unexpected(value) => {
                tracing::debug!(generation = self.generation, %stream, %value, "Ignoring non-JSON-RPC message");
            }
        }
    }

    fn handle_log(&mut self, stream: StreamKind, text: &str) {
        let observation = self.detector.observe(text);
        if observation.changed {
            let state = observation.state.clone();
            if observation.became_ready {
                tracing::info!(generation = self.generation, "Worker reported ready");
            }
            if let Some(failure) = &state.failure {
                tracing::warn!(generation = self.generation, %failure, "Worker reported a startup failure");
            }
            self.readiness.send_replace(state);
        }

        if !text.trim().is_empty() && !self.noise.is_noise(text) {
            tracing::debug!(target: "worker", generation = self.generation, %stream, "{}", text.trim_end());
        }
    }

    fn handle_worker_message(&self, message: WorkerMessage) {
        let Some(id) = message.id else {
            tracing::debug!(generation = self.generation, method = %message.method, "Worker notification");
            return;
        };

        let response = match message.method.as_str() {
            "ping" => JsonRpcResponse::success(id, json!({})),
            other => {
                tracing::debug!(generation = self.generation, method = other, "Rejecting worker request");
                JsonRpcResponse::failure(id, METHOD_NOT_FOUND, format!("Method not found: {other}"))
            }
        };

        // Writing here could stall the event loop behind a blocked request.
        let mux = Arc::clone(&self.mux);
        tokio::spawn(async move {
            if let Err(e) = mux.respond(&response).await {
                tracing::debug!(error = %e, "Failed to answer worker request");
            }
        });
    }
}

async fn pump(mut reader: WorkerReader, stream: StreamKind, events: mpsc::Sender<WorkerEvent>) {
    let mut framer = LineFramer::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                framer.push(&chunk[..n]);
                while let Some(line) = framer.next_line() {
                    if events.send(WorkerEvent::Line { stream, line }).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(%stream, error = %e, "Failed to read from worker");
                break;
            }
        }
    }

    if let Some(line) = framer.finish() {
        let _ = events.send(WorkerEvent::Line { stream, line }).await;
    }
    let _ = events.send(WorkerEvent::Closed { stream }).await;
}

/// A worker whose stdin broke can no longer be driven; stop it.
async fn watch_stdin(write_failed: CancellationToken, cancel: CancellationToken, generation: u64) {
    tokio::select! {
        () = write_failed.cancelled() => {
            tracing::warn!(generation, "Worker stdin failed, stopping worker");
            cancel.cancel();
        }
        () = cancel.cancelled() => {}
    }
}

async fn watch_exit(
    mut control: Box<dyn WorkerControl>,
    cancel: CancellationToken,
    grace: Duration,
    events: mpsc::Sender<WorkerEvent>,
) {
    let status = tokio::select! {
        biased;
        status = control.wait() => Some(status),
        () = cancel.cancelled() => None,
    };

    let status = match status {
        Some(status) => status,
        None => {
            if let Err(e) = control.terminate(grace).await {
                tracing::warn!(pid = ?control.id(), error = %e, "Failed to terminate worker");
            }
            control.wait().await
        }
    };

    let code = status.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to collect worker exit status");
        None
    });
    let _ = events.send(WorkerEvent::Exited(WorkerExit { code })).await;
}
