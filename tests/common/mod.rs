//! In-process fake worker for lifecycle tests.
//!
//! [`FakeLauncher`] hands the gateway in-memory pipes instead of a child
//! process. Each launch runs a small scripted worker task on the other end of
//! those pipes.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::watch;

use toolkit_gateway::config::GatewayConfig;
use toolkit_gateway::credentials::{Credentials, MemoryCredentialStore, OAuthClient};
use toolkit_gateway::gateway::Gateway;
use toolkit_gateway::worker::{
    LaunchRequest, SpawnError, WorkerControl, WorkerIo, WorkerLauncher,
};

/// Startup output of a healthy worker.
pub const BOOT_LOG: &[&str] = &[
    "Starting Google Workspace toolkit",
    "DeprecationWarning: file_cache is only supported with oauth2client<4.0.0",
    "Google Drive service initialized",
    "Gmail service initialized",
    "Google Calendar service initialized",
    "Server ready",
];

/// How a fake worker behaves.
#[derive(Debug, Clone)]
pub struct Script {
    pub boot: Vec<String>,
    pub boot_delay: Duration,
    /// Reply to `tools/list`. `None` answers with an error.
    pub tools: Option<Value>,
    pub fail_initialize: bool,
    /// Exit with this code right after printing the boot log.
    pub exit_after_boot: Option<i32>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            boot: BOOT_LOG.iter().map(|s| (*s).to_string()).collect(),
            boot_delay: Duration::from_millis(20),
            tools: Some(json!({
                "tools": [
                    {
                        "name": "drive_search",
                        "description": "Search for files in Google Drive",
                        "inputSchema": {
                            "type": "object",
                            "properties": {"query": {"type": "string"}},
                            "required": ["query"]
                        }
                    },
                    {"name": "gmail_list_labels", "description": "List Gmail labels"}
                ]
            })),
            fail_initialize: false,
            exit_after_boot: None,
        }
    }
}

impl Script {
    pub fn boot(mut self, lines: &[&str]) -> Self {
        self.boot = lines.iter().map(|s| (*s).to_string()).collect();
        self
    }

    pub fn boot_delay(mut self, delay: Duration) -> Self {
        self.boot_delay = delay;
        self
    }

    pub fn without_tool_listing(mut self) -> Self {
        self.tools = None;
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn exit_after_boot(mut self, code: i32) -> Self {
        self.exit_after_boot = Some(code);
        self
    }
}

type ExitSignal = Arc<watch::Sender<Option<Option<i32>>>>;

/// Record of one launched fake worker.
#[derive(Clone)]
pub struct Launch {
    pub user: String,
    pub env: Vec<(String, String)>,
    received: Arc<Mutex<Vec<Value>>>,
    exit: ExitSignal,
}

impl Launch {
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every message the worker read from its stdin.
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    /// Methods of every message read, in order.
    pub fn methods(&self) -> Vec<String> {
        self.received()
            .iter()
            .filter_map(|m| m.get("method").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// Make the worker exit on its own.
    pub fn crash(&self, code: i32) {
        self.exit.send_if_modified(|exit| {
            if exit.is_none() {
                *exit = Some(Some(code));
                true
            } else {
                false
            }
        });
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }
}

/// Launcher producing scripted in-memory workers.
#[derive(Default)]
pub struct FakeLauncher {
    script: Mutex<Script>,
    launches: Mutex<Vec<Launch>>,
}

impl FakeLauncher {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            launches: Mutex::new(Vec::new()),
        })
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock().unwrap() = script;
    }

    pub fn launches(&self) -> Vec<Launch> {
        self.launches.lock().unwrap().clone()
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn last(&self) -> Launch {
        self.launches.lock().unwrap().last().cloned().unwrap()
    }
}

impl WorkerLauncher for FakeLauncher {
    fn launch(&self, request: &LaunchRequest) -> Result<WorkerIo, SpawnError> {
        let (gateway_stdin, worker_stdin) = tokio::io::duplex(64 * 1024);
        let (worker_stdout, gateway_stdout) = tokio::io::duplex(64 * 1024);
        let (worker_stderr, gateway_stderr) = tokio::io::duplex(64 * 1024);
        let (exit_tx, exit_rx) = watch::channel(None);
        let exit = Arc::new(exit_tx);

        let launch = Launch {
            user: request.user.clone(),
            env: request.env.clone(),
            received: Arc::new(Mutex::new(Vec::new())),
            exit: Arc::clone(&exit),
        };
        self.launches.lock().unwrap().push(launch.clone());

        let script = self.script.lock().unwrap().clone();
        tokio::spawn(serve(script, launch, worker_stdin, worker_stdout, worker_stderr));

        Ok(WorkerIo {
            stdin: Box::new(gateway_stdin),
            stdout: Box::new(gateway_stdout),
            stderr: Some(Box::new(gateway_stderr)),
            control: Box::new(FakeControl { exit_rx, exit }),
        })
    }
}

struct FakeControl {
    exit_rx: watch::Receiver<Option<Option<i32>>>,
    exit: ExitSignal,
}

#[async_trait]
impl WorkerControl for FakeControl {
    fn id(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        loop {
            if let Some(code) = *self.exit_rx.borrow_and_update() {
                return Ok(code);
            }
            if self.exit_rx.changed().await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn terminate(&mut self, _grace: Duration) -> std::io::Result<()> {
        self.exit.send_if_modified(|exit| {
            if exit.is_none() {
                *exit = Some(None);
                true
            } else {
                false
            }
        });
        Ok(())
    }
}

async fn serve(
    script: Script,
    launch: Launch,
    stdin: DuplexStream,
    mut stdout: DuplexStream,
    mut stderr: DuplexStream,
) {
    let mut exit_rx = launch.exit.subscribe();

    tokio::time::sleep(script.boot_delay).await;
    for line in &script.boot {
        let _ = stderr.write_all(format!("{line}\n").as_bytes()).await;
    }
    if let Some(code) = script.exit_after_boot {
        launch.crash(code);
        return;
    }

    let mut lines = BufReader::new(stdin).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = exit_rx.changed() => break,
        };
        let Ok(Some(line)) = line else {
            break;
        };
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        launch.received.lock().unwrap().push(message.clone());

        let Some(id) = message.get("id").cloned() else {
            continue;
        };
        let method = message["method"].as_str().unwrap_or_default();
        let reply = match method {
            "initialize" if script.fail_initialize => Some(json!({
                "jsonrpc": "2.0", "id": id,
                "error": {"code": -32603, "message": "initialization refused"}
            })),
            "initialize" => Some(json!({
                "jsonrpc": "2.0", "id": id,
                "result": {
                    "protocolVersion": "2024-11-05",
                    "serverInfo": {"name": "google-workspace", "version": "1.0"},
                    "capabilities": {"tools": {}}
                }
            })),
            "tools/list" => Some(match &script.tools {
                Some(tools) => json!({"jsonrpc": "2.0", "id": id, "result": tools}),
                None => json!({
                    "jsonrpc": "2.0", "id": id,
                    "error": {"code": -32601, "message": "Method not found"}
                }),
            }),
            "tools/call" => call(&launch, id, &message["params"]),
            _ => Some(json!({
                "jsonrpc": "2.0", "id": id,
                "error": {"code": -32601, "message": "Method not found"}
            })),
        };

        if launch.has_exited() {
            break;
        }
        if let Some(reply) = reply {
            let line = format!("{reply}\n");
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    }
    launch.crash(0);
}

fn call(launch: &Launch, id: Value, params: &Value) -> Option<Value> {
    let name = params["name"].as_str().unwrap_or_default();
    match name {
        "hang" => None,
        "crash" => {
            launch.crash(3);
            None
        }
        "remote_error" => Some(json!({
            "jsonrpc": "2.0", "id": id,
            "error": {"code": -32000, "message": "quota exceeded"}
        })),
        "reported" => Some(json!({
            "jsonrpc": "2.0", "id": id,
            "result": {"content": [{"type": "text", "text": "file not found"}], "isError": true}
        })),
        _ => Some(json!({
            "jsonrpc": "2.0", "id": id,
            "result": {
                "content": [
                    {"type": "text", "text": format!("{}:{name}", launch.user)},
                    {"type": "text", "text": params["arguments"].to_string()}
                ]
            }
        })),
    }
}

/// Config with short budgets suited to tests.
pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.timeouts.readiness_secs = 2;
    config.timeouts.request_secs = 2;
    config.worker.terminate_grace_secs = 1;
    config
}

/// Credentials for `u1` and `u2`.
pub fn test_store() -> Arc<MemoryCredentialStore> {
    Arc::new(
        [
            ("u1", Credentials::new("token-u1").with_refresh_token("refresh-u1")),
            ("u2", Credentials::new("token-u2")),
        ]
        .into_iter()
        .collect(),
    )
}

pub fn gateway_with(config: GatewayConfig, launcher: &Arc<FakeLauncher>) -> Gateway {
    Gateway::builder(config)
        .credentials(test_store())
        .launcher(Arc::clone(launcher) as Arc<dyn WorkerLauncher>)
        .oauth_client(OAuthClient {
            client_id: Some("client-id".to_string()),
            client_secret: Some("client-secret".to_string()),
        })
        .build()
}

pub fn gateway(script: Script) -> (Gateway, Arc<FakeLauncher>) {
    let launcher = FakeLauncher::new(script);
    (gateway_with(test_config(), &launcher), launcher)
}
