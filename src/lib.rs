//! Toolkit Gateway - process-backed JSON-RPC gateway to a per-user tool worker.

pub mod config;
pub mod credentials;
pub mod gateway;
pub mod protocol;
pub mod readiness;
pub mod rpc;
pub mod tools;
pub mod worker;
