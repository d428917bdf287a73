//! Request/response correlation over one worker's stdin/stdout pair.
//!
//! Every request gets the next integer ID and a pending entry holding a
//! `oneshot` sender. The dispatcher feeds replies read from stdout into
//! [`Multiplexer::handle_response`], which completes the entry with the
//! matching ID. Replies may arrive in any order.
//!
//! A pending entry is removed exactly once: by its reply, by its timeout, by
//! the caller abandoning the request, or by [`Multiplexer::close`].
//!
//! Lines are written by a single writer task that owns stdin. Callers only
//! queue lines, so a caller that times out or is dropped can never leave a
//! partial line behind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::protocol::{
    encode_line, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};
use crate::rpc::{CloseReason, RpcError};

/// Default budget for a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Writable half of the worker channel.
pub type WorkerWriter = Box<dyn AsyncWrite + Send + Unpin>;

type Completion = oneshot::Sender<Result<Value, RpcError>>;

/// Outstanding request awaiting its reply.
#[derive(Debug)]
struct PendingRequest {
    method: String,
    created_at: Instant,
    tx: Completion,
}

#[derive(Debug, Default)]
struct PendingTable {
    next_id: u64,
    entries: HashMap<u64, PendingRequest>,
    closed: Option<CloseReason>,
}

impl PendingTable {
    /// Mark the table closed, keeping the first reason, and take every entry.
    fn close(&mut self, reason: CloseReason) -> (CloseReason, Vec<(u64, PendingRequest)>) {
        let reason = self.closed.get_or_insert(reason).clone();
        (reason, self.entries.drain().collect())
    }
}

type SharedTable = Arc<Mutex<PendingTable>>;

fn lock(table: &Mutex<PendingTable>) -> MutexGuard<'_, PendingTable> {
    table.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn fail_all(reason: &CloseReason, drained: Vec<(u64, PendingRequest)>) -> usize {
    let failed = drained.len();
    for (id, entry) in drained {
        tracing::debug!(id, method = %entry.method, ?reason, "Failing outstanding request");
        let _ = entry.tx.send(Err(reason.clone().into()));
    }
    failed
}

/// One queued line for the writer task.
struct Outgoing {
    line: String,
    /// Set for requests, whose failure is reported through the pending entry.
    id: Option<u64>,
    /// Set for notifications and responses, which wait for the write.
    ack: Option<oneshot::Sender<Result<(), RpcError>>>,
}

/// JSON-RPC client side of one worker instance.
///
/// IDs start at 1 and are never reused for the lifetime of the multiplexer,
/// which matches the lifetime of the worker it writes to.
pub struct Multiplexer {
    table: SharedTable,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    write_failed: CancellationToken,
    request_timeout: Duration,
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl Multiplexer {
    /// Create a multiplexer and spawn the task writing to `writer`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(writer: WorkerWriter, request_timeout: Duration) -> Self {
        let table: SharedTable = Arc::new(Mutex::new(PendingTable {
            next_id: 1,
            ..PendingTable::default()
        }));
        let (outgoing, queue) = mpsc::unbounded_channel();
        let write_failed = CancellationToken::new();
        tokio::spawn(write_loop(
            writer,
            queue,
            Arc::clone(&table),
            write_failed.clone(),
        ));

        Self {
            table,
            outgoing,
            write_failed,
            request_timeout,
        }
    }

    fn table(&self) -> MutexGuard<'_, PendingTable> {
        lock(&self.table)
    }

    /// The default per-request budget.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Number of requests awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.table().entries.len()
    }

    /// Returns true once the channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.table().closed.is_some()
    }

    /// Cancelled when writing to the worker fails. The channel is closed
    /// with `StreamClosed` at that point.
    #[must_use]
    pub fn write_failed(&self) -> CancellationToken {
        self.write_failed.clone()
    }

    /// Send a request and wait for its reply using the default budget.
    ///
    /// # Errors
    ///
    /// Returns `RpcError::Remote` if the worker answered with an error,
    /// `RpcError::Timeout` if no reply arrived in time, or a teardown error if
    /// the channel was closed before or while the request was outstanding.
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        self.send_with_timeout(method, params, self.request_timeout)
            .await
    }

    /// Send a request with an explicit budget.
    ///
    /// The budget covers the wait for the reply. A request that times out
    /// while still queued is written in full later and its reply ignored.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let (id, mut rx) = self.enqueue_request(method, params)?;
        let guard = PendingGuard {
            mux: self,
            id,
            armed: true,
        };
        tracing::trace!(id, method, "Request queued");

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(outcome)) => {
                guard.disarm();
                outcome
            }
            Ok(Err(_)) => {
                guard.disarm();
                Err(RpcError::Unavailable)
            }
            Err(_) => {
                if guard.take() {
                    tracing::warn!(id, method, ?timeout, "Request timed out");
                    Err(RpcError::Timeout {
                        method: method.to_string(),
                        timeout,
                    })
                } else {
                    // The reply claimed the entry just as the timer fired.
                    rx.await.unwrap_or(Err(RpcError::Unavailable))
                }
            }
        }
    }

    /// Register a request and queue its line. Both happen under the table
    /// lock so IDs reach the wire in order.
    fn enqueue_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(u64, oneshot::Receiver<Result<Value, RpcError>>), RpcError> {
        let mut table = self.table();
        if let Some(reason) = table.closed.clone() {
            return Err(reason.into());
        }
        let id = table.next_id;
        table.next_id += 1;
        let line = encode_line(&JsonRpcRequest::new(id, method, params))
            .map_err(|e| RpcError::Encode(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        table.entries.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                created_at: Instant::now(),
                tx,
            },
        );
        let queued = self.outgoing.send(Outgoing {
            line,
            id: Some(id),
            ack: None,
        });
        if queued.is_err() {
            table.entries.remove(&id);
            return Err(RpcError::StreamClosed);
        }
        Ok((id, rx))
    }

    /// Send a notification. Resolves once the line is written.
    ///
    /// # Errors
    ///
    /// Returns a teardown error if the channel is closed, or
    /// `RpcError::Write` if the write fails.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        let line = encode_line(&JsonRpcNotification::new(method, params))
            .map_err(|e| RpcError::Encode(e.to_string()))?;
        self.write_raw(line).await?;
        tracing::trace!(method, "Notification sent");
        Ok(())
    }

    /// Answer a request that the worker sent to us.
    ///
    /// # Errors
    ///
    /// Same as [`notify`](Self::notify).
    pub async fn respond(&self, response: &JsonRpcResponse) -> Result<(), RpcError> {
        let line = encode_line(response).map_err(|e| RpcError::Encode(e.to_string()))?;
        self.write_raw(line).await
    }

    async fn write_raw(&self, line: String) -> Result<(), RpcError> {
        let (ack, written) = oneshot::channel();
        {
            let table = self.table();
            if let Some(reason) = table.closed.clone() {
                return Err(reason.into());
            }
            self.outgoing
                .send(Outgoing {
                    line,
                    id: None,
                    ack: Some(ack),
                })
                .map_err(|_| RpcError::StreamClosed)?;
        }
        written.await.unwrap_or(Err(RpcError::StreamClosed))
    }

    /// Complete the pending request matching a reply.
    ///
    /// Returns false if the reply's ID is unknown, already resolved, or not an
    /// integer. Such replies are ignored.
    pub fn handle_response(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.numeric_id() else {
            tracing::debug!(id = %response.id, "Ignoring reply with non-numeric id");
            return false;
        };

        let Some(entry) = self.table().entries.remove(&id) else {
            tracing::debug!(id, "Ignoring reply for unknown or expired request");
            return false;
        };

        let outcome = match response.error {
            Some(error) => Err(RpcError::Remote {
                code: error.code,
                message: error.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };

        tracing::debug!(
            id,
            method = %entry.method,
            elapsed = ?entry.created_at.elapsed(),
            ok = outcome.is_ok(),
            "Reply received"
        );
        let _ = entry.tx.send(outcome);
        true
    }

    /// Close the channel and fail every outstanding request.
    ///
    /// Later calls keep the first reason. Returns the number of requests that
    /// were failed by this call.
    pub fn close(&self, reason: CloseReason) -> usize {
        let (reason, drained) = self.table().close(reason);
        fail_all(&reason, drained)
    }

    fn forget(&self, id: u64) -> bool {
        self.table().entries.remove(&id).is_some()
    }
}

/// Removes a pending entry if the request future is dropped early.
struct PendingGuard<'a> {
    mux: &'a Multiplexer,
    id: u64,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }

    /// Remove the entry now. Returns true if it was still pending.
    fn take(mut self) -> bool {
        self.armed = false;
        self.mux.forget(self.id)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.mux.forget(self.id);
        }
    }
}

/// Owns the worker's stdin. Stops at the first failed write, closing the
/// table with `StreamClosed`, or when the multiplexer is dropped.
async fn write_loop(
    mut writer: WorkerWriter,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
    table: SharedTable,
    write_failed: CancellationToken,
) {
    while let Some(outgoing) = queue.recv().await {
        let error = match write_line(&mut writer, &outgoing.line).await {
            Ok(()) => {
                if let Some(ack) = outgoing.ack {
                    let _ = ack.send(Ok(()));
                }
                continue;
            }
            Err(e) => RpcError::Write(e.to_string()),
        };

        tracing::warn!(id = ?outgoing.id, %error, "Worker stdin failed, closing channel");
        let (failed, (reason, drained)) = {
            let mut table = lock(&table);
            let failed = outgoing.id.and_then(|id| table.entries.remove(&id));
            (failed, table.close(CloseReason::StreamClosed))
        };
        if let Some(entry) = failed {
            let _ = entry.tx.send(Err(error.clone()));
        }
        if let Some(ack) = outgoing.ack {
            let _ = ack.send(Err(error));
        }
        fail_all(&reason, drained);
        write_failed.cancel();
        break;
    }
}

async fn write_line(writer: &mut WorkerWriter, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
