//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credentials::OAuthClient;
use crate::protocol::{ClientInfo, DEFAULT_NOISE_PATTERNS};
use crate::readiness::{Service, DEFAULT_REQUIRED};

/// How to start the tool worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Executable to run.
    pub program: String,
    /// Arguments passed to the executable. Never carries credentials.
    pub args: Vec<String>,
    /// Working directory for the worker.
    pub working_dir: Option<PathBuf>,
    /// Seconds to wait after SIGTERM before killing the worker.
    pub terminate_grace_secs: u64,
    /// Pass the gateway's own environment through to the worker.
    pub inherit_env: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["server/mcp_toolkit.py".to_string()],
            working_dir: None,
            terminate_grace_secs: 5,
            inherit_env: true,
        }
    }
}

impl WorkerConfig {
    #[must_use]
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }
}

/// Time budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Seconds to wait for the worker's readiness markers.
    pub readiness_secs: u64,
    /// Seconds to wait for each request's reply.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            readiness_secs: 30,
            request_secs: 30,
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub fn readiness(&self) -> Duration {
        Duration::from_secs(self.readiness_secs)
    }

    #[must_use]
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

/// Readiness detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Services that must report in before the worker is considered ready.
    pub required: Vec<Service>,
    /// Log substrings hidden from operator logging.
    pub noise: Vec<String>,
    /// On timeout, accept a worker whose required services are up even if
    /// it never printed its final ready line.
    pub relaxed_fallback: bool,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            required: DEFAULT_REQUIRED.to_vec(),
            noise: DEFAULT_NOISE_PATTERNS
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            relaxed_fallback: true,
        }
    }
}

/// Identity announced in the `initialize` handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
}

fn default_protocol_version() -> String {
    "2024-11-05".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: default_protocol_version(),
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

/// Where the shared OAuth client identity comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Environment variable holding the OAuth client ID.
    pub client_id_env: String,
    /// Environment variable holding the OAuth client secret.
    pub client_secret_env: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id_env: "GOOGLE_CLIENT_ID".to_string(),
            client_secret_env: "GOOGLE_CLIENT_SECRET".to_string(),
        }
    }
}

impl OAuthConfig {
    /// Read the client identity from the gateway's environment.
    #[must_use]
    pub fn from_env(&self) -> OAuthClient {
        OAuthClient {
            client_id: std::env::var(&self.client_id_env).ok(),
            client_secret: std::env::var(&self.client_secret_env).ok(),
        }
    }
}

/// File-backed credential store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub path: PathBuf,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        let path = dirs::config_dir()
            .map(|dir| dir.join("toolkit-gateway").join("credentials.toml"))
            .unwrap_or_else(|| PathBuf::from("credentials.toml"));
        Self { path }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub worker: WorkerConfig,
    pub timeouts: TimeoutConfig,
    pub readiness: ReadinessConfig,
    pub client: ClientConfig,
    pub oauth: OAuthConfig,
    pub credentials: CredentialsConfig,
}
