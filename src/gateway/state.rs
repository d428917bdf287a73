//! Gateway lifecycle state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle phase of the worker slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Starting,
    AwaitingReadiness,
    Handshaking,
    Ready,
    Terminating,
    Error,
}

impl Phase {
    /// True while an initialization attempt is running.
    #[must_use]
    pub fn is_starting(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::AwaitingReadiness | Self::Handshaking
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::AwaitingReadiness => "awaiting_readiness",
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
            Self::Terminating => "terminating",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Tracks the current phase and lifetime counters.
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    phase: Phase,
    spawns: usize,
    failures: usize,
    invocations: usize,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            spawns: 0,
            failures: 0,
            invocations: 0,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn transition(&mut self, new_phase: Phase) {
        if self.phase != new_phase {
            tracing::debug!(from = %self.phase, to = %new_phase, "Gateway phase transition");
        }
        self.phase = new_phase;
    }

    /// Record a failed attempt. The `Error` phase is transient and always
    /// settles back to `Idle`.
    pub fn fail(&mut self) {
        self.transition(Phase::Error);
        self.failures = self.failures.saturating_add(1);
        self.transition(Phase::Idle);
    }

    pub fn record_spawn(&mut self) {
        self.spawns = self.spawns.saturating_add(1);
    }

    pub fn record_invocation(&mut self) {
        self.invocations = self.invocations.saturating_add(1);
    }

    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            spawns: self.spawns,
            failures: self.failures,
            invocations: self.invocations,
        }
    }
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    /// Workers launched.
    pub spawns: usize,
    /// Initialization attempts that failed.
    pub failures: usize,
    /// Tool calls sent to a worker.
    pub invocations: usize,
}
