//! Gateway lifecycle and invocation tests.

mod invoke_test;

use std::time::Duration;

use toolkit_gateway::gateway::{Gateway, GatewayStatus};

/// Poll the gateway until `predicate` holds or a second passes.
pub async fn wait_for_status(gateway: &Gateway, predicate: impl Fn(&GatewayStatus) -> bool) -> GatewayStatus {
    for _ in 0..100 {
        let status = gateway.status();
        if predicate(&status) {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    gateway.status()
}

/// Verify the public gateway types are exported from the library.
#[test]
fn test_all_gateway_types_exported() {
    use toolkit_gateway::gateway::{
        DetectorFactory, GatewayBuilder, GatewayError, GatewayStats, Phase, PhaseMachine,
        RunningWorker, WorkerExit,
    };

    let _ = PhaseMachine::new();
    let _ = GatewayStats::default();
    let _: fn() -> GatewayError = || GatewayError::NotReady;
    let _ = Phase::Idle;
    let _ = WorkerExit { code: None };
    let _: Option<DetectorFactory> = None;
    let _: Option<GatewayBuilder> = None;
    let _: Option<RunningWorker> = None;
}
