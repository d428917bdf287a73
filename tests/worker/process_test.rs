//! Drives a shell-script worker through the full gateway.

use std::io::Write;
use std::sync::Arc;

use serde_json::json;
use toolkit_gateway::config::GatewayConfig;
use toolkit_gateway::credentials::{CredentialStore, FileCredentialStore, OAuthClient};
use toolkit_gateway::gateway::{Gateway, GatewayError, Phase};

use crate::gateway::wait_for_status;

const WORKER_SCRIPT: &str = r#"
echo "Starting Google Workspace toolkit" >&2
echo "DeprecationWarning: file_cache is only supported with oauth2client<4.0.0" >&2
echo "Google Drive service initialized" >&2
echo "Gmail service initialized" >&2
echo "Server ready" >&2
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"serverInfo":{"name":"sh-worker"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"whoami","description":"Report the bound user"}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      case "$line" in
        *'"name":"exit"'*) exit 7 ;;
      esac
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"%s %s"}]}}\n' "$id" "$SESSION_USER_ID" "$GOOGLE_ACCESS_TOKEN" ;;
  esac
done
"#;

fn script_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(WORKER_SCRIPT.as_bytes()).unwrap();
    file
}

fn credentials_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        [users.alice]
        access_token = "alice-token"
        refresh_token = "alice-refresh"
        expires_at = "2030-01-01T00:00:00Z"
        "#
    )
    .unwrap();
    file
}

fn config(script: &tempfile::NamedTempFile) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.worker.program = "sh".to_string();
    config.worker.args = vec![script.path().display().to_string()];
    config.worker.terminate_grace_secs = 1;
    config.timeouts.readiness_secs = 5;
    config.timeouts.request_secs = 5;
    config
}

fn gateway(config: GatewayConfig, credentials: &tempfile::NamedTempFile) -> Gateway {
    let store: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::new(credentials.path()));
    Gateway::builder(config)
        .credentials(store)
        .oauth_client(OAuthClient::default())
        .build()
}

#[tokio::test]
async fn shell_worker_serves_tool_calls() {
    let script = script_file();
    let credentials = credentials_file();
    let gateway = gateway(config(&script), &credentials);

    gateway.ensure_ready("alice").await.unwrap();
    let status = gateway.status();
    assert!(status.ready);
    assert!(status.pid.is_some());
    assert_eq!(gateway.list_tools()[0].name, "whoami");

    let text = gateway.invoke("whoami", json!({})).await.unwrap();
    assert_eq!(text, "alice alice-token");

    gateway.shutdown().await;
    assert_eq!(gateway.status().phase, Phase::Idle);
}

#[tokio::test]
async fn shell_worker_exit_is_reported() {
    let script = script_file();
    let credentials = credentials_file();
    let gateway = gateway(config(&script), &credentials);
    gateway.ensure_ready("alice").await.unwrap();

    let err = gateway.invoke("exit", json!({})).await.unwrap_err();
    assert!(matches!(err, GatewayError::Invocation { .. }), "{err:?}");

    let status = wait_for_status(&gateway, |s| s.phase == Phase::Idle).await;
    assert!(!status.ready);
    assert!(status.bound_user.is_none());
}

#[tokio::test]
async fn missing_executable_is_a_spawn_failure() {
    let script = script_file();
    let credentials = credentials_file();
    let mut config = config(&script);
    config.worker.program = "/nonexistent/toolkit-worker".to_string();
    let gateway = gateway(config, &credentials);

    let err = gateway.ensure_ready("alice").await.unwrap_err();
    assert!(matches!(err, GatewayError::SpawnFailure(ref msg) if msg.contains("not found")));
    assert_eq!(gateway.status().phase, Phase::Idle);
}

#[tokio::test]
async fn unknown_user_in_credentials_file_is_a_spawn_failure() {
    let script = script_file();
    let credentials = credentials_file();
    let gateway = gateway(config(&script), &credentials);

    let err = gateway.ensure_ready("bob").await.unwrap_err();
    assert!(matches!(err, GatewayError::SpawnFailure(_)));
}
