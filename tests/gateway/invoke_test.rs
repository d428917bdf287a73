//! Tool invocation through a ready worker.

use std::time::Duration;

use serde_json::{json, Value};
use toolkit_gateway::gateway::{GatewayError, Phase};
use toolkit_gateway::rpc::RpcError;

use super::wait_for_status;
use crate::common::{gateway, gateway_with, test_config, FakeLauncher, Script};

#[tokio::test]
async fn invoke_before_any_worker_is_not_ready() {
    let (gateway, launcher) = gateway(Script::default());

    let err = gateway.invoke("drive_search", json!({"query": "x"})).await.unwrap_err();
    assert_eq!(err, GatewayError::NotReady);
    assert_eq!(launcher.launch_count(), 0);
}

#[tokio::test]
async fn invoke_while_booting_writes_nothing() {
    let (gateway, launcher) = gateway(Script::default().boot_delay(Duration::from_millis(200)));

    let init = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.ensure_ready("u1").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(gateway.status().phase.is_starting());

    let err = gateway.invoke("drive_search", json!({"query": "x"})).await.unwrap_err();
    assert_eq!(err, GatewayError::NotReady);

    init.await.unwrap().unwrap();
    assert!(!launcher.last().methods().iter().any(|m| m == "tools/call"));
}

#[tokio::test]
async fn invoke_returns_normalized_text() {
    let (gateway, launcher) = gateway(Script::default());
    gateway.ensure_ready("u1").await.unwrap();

    let text = gateway
        .invoke("drive_search", json!({"query": "quarterly report"}))
        .await
        .unwrap();
    assert_eq!(text, "u1:drive_search\n{\"query\":\"quarterly report\"}");

    let call = launcher
        .last()
        .received()
        .into_iter()
        .find(|m| m["method"] == "tools/call")
        .unwrap();
    assert_eq!(
        call["params"],
        json!({"name": "drive_search", "arguments": {"query": "quarterly report"}})
    );
    assert_eq!(gateway.status().stats.invocations, 1);
}

#[tokio::test]
async fn null_arguments_are_sent_as_empty_object() {
    let (gateway, _launcher) = gateway(Script::default());
    gateway.ensure_ready("u1").await.unwrap();

    let text = gateway.invoke("gmail_list_labels", Value::Null).await.unwrap();
    assert_eq!(text, "u1:gmail_list_labels\n{}");
}

#[tokio::test]
async fn concurrent_invocations_get_their_own_replies() {
    let (gateway, _launcher) = gateway(Script::default());
    gateway.ensure_ready("u1").await.unwrap();

    let calls = (0..10).map(|i| {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            let text = gateway.invoke("drive_read", json!({"fileId": i})).await;
            (i, text)
        })
    });
    for call in futures_util::future::join_all(calls).await {
        let (i, text) = call.unwrap();
        assert_eq!(text.unwrap(), format!("u1:drive_read\n{{\"fileId\":{i}}}"));
    }
}

#[tokio::test]
async fn remote_error_fails_only_that_call() {
    let (gateway, _launcher) = gateway(Script::default());
    gateway.ensure_ready("u1").await.unwrap();

    let err = gateway.invoke("remote_error", json!({})).await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::Invocation {
            tool: "remote_error".to_string(),
            source: RpcError::Remote {
                code: -32000,
                message: "quota exceeded".to_string(),
            },
        }
    );

    assert!(gateway.status().ready);
    assert!(gateway.invoke("drive_search", json!({})).await.is_ok());
}

#[tokio::test]
async fn tool_reported_error_is_surfaced() {
    let (gateway, _launcher) = gateway(Script::default());
    gateway.ensure_ready("u1").await.unwrap();

    let err = gateway.invoke("reported", json!({})).await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::ToolReported {
            tool: "reported".to_string(),
            message: "file not found".to_string(),
        }
    );
    assert!(gateway.status().ready);
}

#[tokio::test]
async fn request_timeout_leaves_worker_up() {
    let launcher = FakeLauncher::new(Script::default());
    let mut config = test_config();
    config.timeouts.request_secs = 1;
    let gateway = gateway_with(config, &launcher);
    gateway.ensure_ready("u1").await.unwrap();

    let err = gateway.invoke("hang", json!({})).await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::Invocation { ref tool, source: RpcError::Timeout { ref method, .. } }
            if tool == "hang" && method == "tools/call"
    ));

    assert!(gateway.status().ready);
    let text = gateway.invoke("drive_search", json!({})).await.unwrap();
    assert!(text.starts_with("u1:"));
}

#[tokio::test]
async fn worker_crash_fails_outstanding_call() {
    let (gateway, _launcher) = gateway(Script::default());
    gateway.ensure_ready("u1").await.unwrap();

    let err = gateway.invoke("crash", json!({})).await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::Invocation {
            tool: "crash".to_string(),
            source: RpcError::ProcessExit { code: Some(3) },
        }
    );

    let status = wait_for_status(&gateway, |s| s.phase == Phase::Idle).await;
    assert!(!status.ready);
}

#[tokio::test]
async fn invoke_as_binds_the_caller() {
    let (gateway, launcher) = gateway(Script::default());

    let text = gateway.invoke_as("u1", "drive_search", json!({})).await.unwrap();
    assert!(text.starts_with("u1:drive_search"));

    let text = gateway.invoke_as("u2", "drive_search", json!({})).await.unwrap();
    assert!(text.starts_with("u2:drive_search"));

    let text = gateway.invoke_as("u2", "drive_search", json!({})).await.unwrap();
    assert!(text.starts_with("u2:drive_search"));

    assert_eq!(launcher.launch_count(), 2);
    assert_eq!(gateway.status().bound_user.as_deref(), Some("u2"));
}

#[tokio::test]
async fn invoke_as_reports_initialization_failure() {
    let (gateway, launcher) = gateway(Script::default());

    let err = gateway
        .invoke_as("nobody", "drive_search", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::SpawnFailure(_)));
    assert_eq!(launcher.launch_count(), 0);
}
