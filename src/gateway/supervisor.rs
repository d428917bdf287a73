//! The gateway: one worker slot shared by every caller.
//!
//! At most one worker runs at a time and it is bound to a single user.
//! Initialization is single-flight: concurrent callers for the same user share
//! one attempt, and a caller for another user waits for the running attempt to
//! settle before tearing that worker down and starting its own.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::GatewayConfig;
use crate::credentials::{worker_env, CredentialStore, FileCredentialStore, OAuthClient};
use crate::gateway::{
    DispatchOptions, ExitHook, GatewayError, GatewayStats, Phase, PhaseMachine, RunningWorker,
    WorkerExit,
};
use crate::protocol::{InitializeParams, NoiseFilter, ToolCallParams};
use crate::readiness::{MarkerDetector, ReadinessDetector, ReadinessState, Service};
use crate::rpc::{CloseReason, RpcError};
use crate::tools::{
    fallback_catalog, CatalogSource, ToolCallResult, ToolCatalog, ToolDescriptor,
};
use crate::worker::{LaunchRequest, ProcessLauncher, WorkerLauncher};

/// Builds a fresh readiness detector for each worker.
pub type DetectorFactory = Arc<dyn Fn() -> Box<dyn ReadinessDetector> + Send + Sync>;

type InitFuture = Shared<BoxFuture<'static, Result<(), GatewayError>>>;

/// Extra time allowed for a stopped worker to be reaped.
const REAP_SLACK: Duration = Duration::from_secs(1);

struct Inflight {
    user: String,
    attempt: u64,
    future: InitFuture,
}

struct Slot {
    machine: PhaseMachine,
    bound_user: Option<String>,
    worker: Option<RunningWorker>,
    inflight: Option<Inflight>,
    catalog: Arc<ToolCatalog>,
    next_generation: u64,
    next_attempt: u64,
    shut_down: bool,
}

impl Slot {
    fn ready_worker(&self, user: Option<&str>) -> Option<&RunningWorker> {
        if self.machine.phase() != Phase::Ready {
            return None;
        }
        if let Some(user) = user {
            if self.bound_user.as_deref() != Some(user) {
                return None;
            }
        }
        self.worker
            .as_ref()
            .filter(|worker| worker.exit_status().is_none())
    }

    fn check_attempt(&self, attempt: u64) -> Result<(), GatewayError> {
        if self.shut_down {
            return Err(GatewayError::ShutDown);
        }
        match &self.inflight {
            Some(inflight) if inflight.attempt == attempt => Ok(()),
            _ => Err(GatewayError::Superseded),
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.worker.as_ref().map(|w| w.generation) == Some(generation)
    }
}

struct GatewayInner {
    config: GatewayConfig,
    credentials: Arc<dyn CredentialStore>,
    launcher: Arc<dyn WorkerLauncher>,
    oauth: OAuthClient,
    detector: DetectorFactory,
    slot: Mutex<Slot>,
}

impl GatewayInner {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle_exit(&self, generation: u64, exit: WorkerExit) {
        let mut slot = self.slot();
        if !slot.is_current(generation) {
            tracing::debug!(generation, "Ignoring exit of a replaced worker");
            return;
        }

        slot.worker = None;
        let user = slot.bound_user.take();
        if slot.machine.phase() == Phase::Ready {
            tracing::warn!(generation, user = ?user, code = ?exit.code, "Worker exited unexpectedly");
            slot.machine.transition(Phase::Terminating);
            slot.machine.transition(Phase::Idle);
        }
    }
}

/// Snapshot returned by [`Gateway::status`].
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub phase: Phase,
    pub ready: bool,
    pub bound_user: Option<String>,
    pub tool_count: usize,
    pub catalog_source: CatalogSource,
    pub readiness: ReadinessState,
    pub generation: Option<u64>,
    pub pid: Option<u32>,
    pub stats: GatewayStats,
}

/// Builder for [`Gateway`].
pub struct GatewayBuilder {
    config: GatewayConfig,
    credentials: Option<Arc<dyn CredentialStore>>,
    launcher: Option<Arc<dyn WorkerLauncher>>,
    oauth: Option<OAuthClient>,
    detector: Option<DetectorFactory>,
}

impl GatewayBuilder {
    /// Credential source. Defaults to the TOML file named in the config.
    #[must_use]
    pub fn credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    /// Worker launcher. Defaults to spawning the configured program.
    #[must_use]
    pub fn launcher(mut self, launcher: Arc<dyn WorkerLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// OAuth client identity. Defaults to reading the configured variables.
    #[must_use]
    pub fn oauth_client(mut self, client: OAuthClient) -> Self {
        self.oauth = Some(client);
        self
    }

    /// Readiness detector used for each new worker.
    #[must_use]
    pub fn detector(mut self, factory: DetectorFactory) -> Self {
        self.detector = Some(factory);
        self
    }

    #[must_use]
    pub fn build(self) -> Gateway {
        let config = self.config;
        let credentials: Arc<dyn CredentialStore> = match self.credentials {
            Some(store) => store,
            None => Arc::new(FileCredentialStore::new(config.credentials.path.clone())),
        };
        let launcher: Arc<dyn WorkerLauncher> = match self.launcher {
            Some(launcher) => launcher,
            None => Arc::new(ProcessLauncher::new(config.worker.clone())),
        };
        let oauth = self.oauth.unwrap_or_else(|| config.oauth.from_env());
        let detector: DetectorFactory = match self.detector {
            Some(factory) => factory,
            None => {
                let required = config.readiness.required.clone();
                Arc::new(move || {
                    Box::new(MarkerDetector::with_required(required.clone()))
                        as Box<dyn ReadinessDetector>
                })
            }
        };

        let slot = Slot {
            machine: PhaseMachine::new(),
            bound_user: None,
            worker: None,
            inflight: None,
            catalog: Arc::new(fallback_catalog()),
            next_generation: 1,
            next_attempt: 1,
            shut_down: false,
        };

        Gateway {
            inner: Arc::new(GatewayInner {
                config,
                credentials,
                launcher,
                oauth,
                detector,
                slot: Mutex::new(slot),
            }),
        }
    }
}

/// Cloneable handle to a gateway.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.inner.slot();
        f.debug_struct("Gateway")
            .field("phase", &slot.machine.phase())
            .field("bound_user", &slot.bound_user)
            .finish_non_exhaustive()
    }
}

enum Step {
    Join(InitFuture),
    Wait(InitFuture),
}

impl Gateway {
    #[must_use]
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder {
            config,
            credentials: None,
            launcher: None,
            oauth: None,
            detector: None,
        }
    }

    /// Gateway with the default file credential store and process launcher.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self::builder(config).build()
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    /// Make sure a ready worker is bound to `user`.
    ///
    /// Returns at once if it already is. Otherwise joins the initialization
    /// already running for `user`, or waits for one running for someone else
    /// and then starts a new one.
    ///
    /// # Errors
    ///
    /// Returns the lifecycle error that failed the attempt. The gateway is
    /// left idle and a later call starts over.
    pub async fn ensure_ready(&self, user: &str) -> Result<(), GatewayError> {
        loop {
            let step = {
                let mut slot = self.inner.slot();
                if slot.shut_down {
                    return Err(GatewayError::ShutDown);
                }
                if slot.ready_worker(Some(user)).is_some() {
                    return Ok(());
                }
                let inflight = slot
                    .inflight
                    .as_ref()
                    .map(|i| (i.user.clone(), i.future.clone()));
                match inflight {
                    Some((owner, init)) if owner == user => Step::Join(init),
                    Some((owner, init)) => {
                        tracing::debug!(user, busy_with = %owner, "Waiting for another user's initialization");
                        Step::Wait(init)
                    }
                    None => Step::Join(self.begin(&mut slot, user)),
                }
            };

            match step {
                Step::Join(init) => return init.await,
                Step::Wait(init) => {
                    let _ = init.await;
                }
            }
        }
    }

    /// Start an initialization attempt. The caller holds the slot lock, so
    /// the attempt is registered before its task can observe the slot.
    fn begin(&self, slot: &mut Slot, user: &str) -> InitFuture {
        let attempt = slot.next_attempt;
        slot.next_attempt += 1;

        let gateway = self.clone();
        let owned_user = user.to_string();
        let task = tokio::spawn(async move { gateway.initialize(owned_user, attempt).await });
        let future = async move {
            task.await.unwrap_or_else(|e| {
                Err(GatewayError::SpawnFailure(format!(
                    "initialization task failed: {e}"
                )))
            })
        }
        .boxed()
        .shared();

        slot.inflight = Some(Inflight {
            user: user.to_string(),
            attempt,
            future: future.clone(),
        });
        future
    }

    async fn initialize(self, user: String, attempt: u64) -> Result<(), GatewayError> {
        tracing::info!(user = %user, attempt, "Initializing tool worker");
        let mut result = self.run_initialization(&user, attempt).await;

        let mut slot = self.inner.slot();
        let current = slot.check_attempt(attempt);
        if current.is_ok() {
            slot.inflight = None;
        }
        match &mut result {
            Ok(()) => tracing::info!(user = %user, "Tool worker ready"),
            Err(e) => {
                // Report why the attempt was cut short rather than its symptom.
                if let Err(interrupted) = current {
                    *e = interrupted;
                    if slot.worker.is_none() {
                        slot.machine.transition(Phase::Idle);
                    }
                } else {
                    slot.machine.fail();
                }
                tracing::warn!(user = %user, error = %e, "Tool worker initialization failed");
            }
        }
        result
    }

    async fn run_initialization(&self, user: &str, attempt: u64) -> Result<(), GatewayError> {
        let grace = self.inner.config.worker.terminate_grace();

        let previous = {
            let mut slot = self.inner.slot();
            slot.check_attempt(attempt)?;
            let previous = slot.worker.take();
            let previous_user = slot.bound_user.take();
            if previous.is_some() {
                tracing::info!(user, previous = ?previous_user, "Replacing running worker");
                slot.machine.transition(Phase::Terminating);
            } else {
                slot.machine.transition(Phase::Starting);
            }
            previous
        };
        if let Some(previous) = previous {
            stop_and_reap(&previous, CloseReason::Superseded, grace).await;
            let mut slot = self.inner.slot();
            slot.check_attempt(attempt)?;
            slot.machine.transition(Phase::Starting);
        }

        let credentials = self
            .inner
            .credentials
            .credentials_for(user)
            .await
            .map_err(|e| GatewayError::Credentials(e.to_string()))?
            .ok_or_else(|| {
                GatewayError::SpawnFailure(format!("no credentials stored for user '{user}'"))
            })?;
        if credentials.is_expired(chrono::Utc::now()) {
            tracing::debug!(user, "Access token expired, worker will refresh it");
        }
        let request = LaunchRequest {
            user: user.to_string(),
            env: worker_env(user, &credentials, &self.inner.oauth),
        };

        let (worker, required) = {
            let mut slot = self.inner.slot();
            slot.check_attempt(attempt)?;
            let io = self
                .inner
                .launcher
                .launch(&request)
                .map_err(|e| GatewayError::SpawnFailure(e.to_string()))?;

            let generation = slot.next_generation;
            slot.next_generation += 1;
            slot.machine.record_spawn();

            let detector = (self.inner.detector)();
            let required = detector.required().to_vec();
            let options = DispatchOptions {
                generation,
                detector,
                noise: NoiseFilter::new(self.inner.config.readiness.noise.iter().cloned()),
                request_timeout: self.inner.config.timeouts.request(),
                terminate_grace: grace,
            };
            let worker = RunningWorker::start(io, options, self.exit_hook(generation));
            tracing::info!(user, generation, pid = ?worker.pid, "Worker launched");

            slot.worker = Some(worker.clone());
            slot.machine.transition(Phase::AwaitingReadiness);
            (worker, required)
        };

        match self.handshake(&worker, &required, attempt).await {
            Ok(catalog) => {
                let mut slot = self.inner.slot();
                if let Err(e) = slot.check_attempt(attempt) {
                    drop(slot);
                    worker.stop(CloseReason::Superseded);
                    return Err(e);
                }
                if !slot.is_current(worker.generation) {
                    return Err(GatewayError::ProcessExit {
                        code: worker.exit_status().and_then(|e| e.code),
                    });
                }
                if let Some(catalog) = catalog {
                    slot.catalog = Arc::new(catalog);
                }
                slot.bound_user = Some(user.to_string());
                slot.machine.transition(Phase::Ready);
                Ok(())
            }
            Err(e) => {
                {
                    let mut slot = self.inner.slot();
                    if slot.is_current(worker.generation) {
                        slot.worker = None;
                    }
                }
                worker.stop(CloseReason::Superseded);
                Err(e)
            }
        }
    }

    /// Wait for readiness, then run the protocol handshake and fetch the
    /// catalog. A `None` catalog means the listing failed.
    async fn handshake(
        &self,
        worker: &RunningWorker,
        required: &[Service],
        attempt: u64,
    ) -> Result<Option<ToolCatalog>, GatewayError> {
        let state = self.await_readiness(worker, required).await?;
        tracing::debug!(
            generation = worker.generation,
            services = ?state.up_services(),
            "Worker readiness confirmed"
        );

        {
            let mut slot = self.inner.slot();
            slot.check_attempt(attempt)?;
            slot.machine.transition(Phase::Handshaking);
        }

        let client = &self.inner.config.client;
        let params = InitializeParams {
            protocol_version: client.protocol_version.clone(),
            capabilities: json!({}),
            client_info: client.client_info(),
        };
        let params = serde_json::to_value(params)
            .map_err(|e| GatewayError::HandshakeFailure(e.to_string()))?;
        let info = worker
            .mux
            .send("initialize", Some(params))
            .await
            .map_err(|e| GatewayError::HandshakeFailure(e.to_string()))?;
        let server = info.get("serverInfo").cloned().unwrap_or_default();
        tracing::debug!(generation = worker.generation, %server, "Worker initialized");
        worker
            .mux
            .notify("notifications/initialized", None)
            .await
            .map_err(|e| GatewayError::HandshakeFailure(e.to_string()))?;

        let catalog = match worker.mux.send("tools/list", None).await {
            Ok(listing) => match ToolCatalog::from_listing(&listing) {
                Ok(catalog) => Some(catalog),
                Err(e) => {
                    tracing::warn!(error = %e, "Unusable tool listing, keeping previous catalog");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list tools, keeping previous catalog");
                None
            }
        };
        Ok(catalog)
    }

    async fn await_readiness(
        &self,
        worker: &RunningWorker,
        required: &[Service],
    ) -> Result<ReadinessState, GatewayError> {
        let readiness = &self.inner.config.readiness;
        let timeout = self.inner.config.timeouts.readiness();
        let mut updates = worker.readiness_updates();

        let settled = tokio::select! {
            biased;
            exit = worker.exited() => {
                return Err(GatewayError::ProcessExit { code: exit.and_then(|e| e.code) });
            }
            state = updates.wait_for(|s| s.ready || s.failure.is_some()) => {
                state.ok().map(|s| ReadinessState::clone(&s))
            }
            () = tokio::time::sleep(timeout) => None,
        };

        match settled {
            Some(state) if state.ready => Ok(state),
            Some(state) => Err(GatewayError::WorkerStartupFailed(
                state.failure.unwrap_or_default(),
            )),
            None => {
                if let Some(exit) = worker.exit_status() {
                    return Err(GatewayError::ProcessExit { code: exit.code });
                }
                let state = worker.readiness();
                if state.ready
                    || (readiness.relaxed_fallback
                        && !required.is_empty()
                        && state.services_up(required))
                {
                    tracing::warn!(
                        generation = worker.generation,
                        services = ?state.up_services(),
                        "Readiness wait timed out but required services are up, continuing"
                    );
                    Ok(state)
                } else {
                    Err(GatewayError::ReadinessTimeout(timeout))
                }
            }
        }
    }

    fn exit_hook(&self, generation: u64) -> ExitHook {
        let inner: Weak<GatewayInner> = Arc::downgrade(&self.inner);
        Box::new(move |exit| {
            if let Some(inner) = inner.upgrade() {
                inner.handle_exit(generation, exit);
            }
        })
    }

    /// Current tool catalog. Never empty: before the first successful
    /// listing it is the built-in fallback.
    #[must_use]
    pub fn catalog(&self) -> Arc<ToolCatalog> {
        Arc::clone(&self.inner.slot().catalog)
    }

    /// Descriptors of every known tool.
    #[must_use]
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.catalog().tools().to_vec()
    }

    /// Call a tool on the current worker.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NotReady` without touching the worker if no
    /// worker is ready, `GatewayError::Invocation` if the request fails, and
    /// `GatewayError::ToolReported` if the tool itself reported an error.
    pub async fn invoke(&self, tool: &str, arguments: Value) -> Result<String, GatewayError> {
        let worker = self.ready_worker(None)?;
        self.call(&worker, tool, arguments).await
    }

    /// Call a tool on a worker bound to `user`, starting or switching the
    /// worker first if needed.
    ///
    /// # Errors
    ///
    /// Returns the initialization error if the worker cannot be made ready,
    /// `GatewayError::NotReady` if another user took the worker over before
    /// the call was sent, or any error from [`invoke`](Self::invoke).
    pub async fn invoke_as(
        &self,
        user: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<String, GatewayError> {
        self.ensure_ready(user).await?;
        let worker = self.ready_worker(Some(user))?;
        self.call(&worker, tool, arguments).await
    }

    fn ready_worker(&self, user: Option<&str>) -> Result<RunningWorker, GatewayError> {
        let mut slot = self.inner.slot();
        let worker = slot
            .ready_worker(user)
            .cloned()
            .ok_or(GatewayError::NotReady)?;
        slot.machine.record_invocation();
        Ok(worker)
    }

    async fn call(
        &self,
        worker: &RunningWorker,
        tool: &str,
        arguments: Value,
    ) -> Result<String, GatewayError> {
        let invocation = |source: RpcError| GatewayError::Invocation {
            tool: tool.to_string(),
            source,
        };

        if !self.catalog().contains(tool) {
            tracing::debug!(tool, "Calling a tool missing from the catalog");
        }
        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        let params = serde_json::to_value(ToolCallParams {
            name: tool.to_string(),
            arguments,
        })
        .map_err(|e| invocation(RpcError::Encode(e.to_string())))?;

        tracing::debug!(tool, generation = worker.generation, "Invoking tool");
        let reply = worker
            .mux
            .send("tools/call", Some(params))
            .await
            .map_err(invocation)?;

        let result = ToolCallResult::from_value(reply);
        if result.is_error() {
            return Err(GatewayError::ToolReported {
                tool: tool.to_string(),
                message: result.into_text(),
            });
        }
        Ok(result.into_text())
    }

    /// Snapshot of the gateway.
    #[must_use]
    pub fn status(&self) -> GatewayStatus {
        let slot = self.inner.slot();
        let ready = slot.ready_worker(None).is_some();
        let worker = slot.worker.as_ref();
        GatewayStatus {
            phase: slot.machine.phase(),
            ready,
            bound_user: slot.bound_user.clone(),
            tool_count: slot.catalog.len(),
            catalog_source: slot.catalog.source(),
            readiness: worker.map(RunningWorker::readiness).unwrap_or_default(),
            generation: worker.map(|w| w.generation),
            pid: worker.and_then(|w| w.pid),
            stats: slot.machine.stats(),
        }
    }

    /// Tear down the current worker and start a new one for the same user.
    ///
    /// Outstanding calls fail with a superseded error. With no bound user
    /// this only stops the worker.
    ///
    /// # Errors
    ///
    /// Returns the error of the new initialization attempt.
    pub async fn restart(&self) -> Result<(), GatewayError> {
        let (user, worker) = loop {
            let pending = {
                let mut slot = self.inner.slot();
                if slot.shut_down {
                    return Err(GatewayError::ShutDown);
                }
                if let Some(inflight) = &slot.inflight {
                    inflight.future.clone()
                } else {
                    let user = slot.bound_user.take();
                    let worker = slot.worker.take();
                    if worker.is_some() {
                        slot.machine.transition(Phase::Terminating);
                    }
                    break (user, worker);
                }
            };
            let _ = pending.await;
        };

        tracing::info!(user = ?user, "Restarting tool worker");
        if let Some(worker) = worker {
            stop_and_reap(
                &worker,
                CloseReason::Superseded,
                self.inner.config.worker.terminate_grace(),
            )
            .await;
        }
        self.settle_idle();

        match user {
            Some(user) => self.ensure_ready(&user).await,
            None => Ok(()),
        }
    }

    /// Stop the worker and refuse further work.
    pub async fn shutdown(&self) {
        let worker = {
            let mut slot = self.inner.slot();
            slot.shut_down = true;
            slot.inflight = None;
            slot.bound_user = None;
            let worker = slot.worker.take();
            if worker.is_some() {
                slot.machine.transition(Phase::Terminating);
            }
            worker
        };

        if let Some(worker) = worker {
            tracing::info!(generation = worker.generation, "Shutting down tool worker");
            stop_and_reap(
                &worker,
                CloseReason::Superseded,
                self.inner.config.worker.terminate_grace(),
            )
            .await;
        }
        self.settle_idle();
    }

    fn settle_idle(&self) {
        let mut slot = self.inner.slot();
        if slot.worker.is_none() && !slot.machine.phase().is_starting() {
            slot.machine.transition(Phase::Idle);
        }
    }
}

async fn stop_and_reap(worker: &RunningWorker, reason: CloseReason, grace: Duration) {
    worker.stop(reason);
    if tokio::time::timeout(grace + REAP_SLACK, worker.exited())
        .await
        .is_err()
    {
        tracing::warn!(generation = worker.generation, "Worker did not exit after termination");
    }
}
