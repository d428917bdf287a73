//! Readiness flags for one worker instance.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Backend service the worker connects to during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Drive,
    #[serde(alias = "mail")]
    Gmail,
    Calendar,
    Docs,
}

impl Service {
    /// Every tracked service, in display order.
    pub const ALL: [Service; 4] = [
        Service::Drive,
        Service::Gmail,
        Service::Calendar,
        Service::Docs,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Drive => "drive",
            Self::Gmail => "gmail",
            Self::Calendar => "calendar",
            Self::Docs => "docs",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of what the worker has announced so far.
///
/// Flags only ever go from `false` to `true` for a given worker instance. A
/// restarted worker starts from [`ReadinessState::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessState {
    pub services: BTreeMap<Service, bool>,
    pub server_ready: bool,
    /// Set once the required services and `server_ready` are all true.
    pub ready: bool,
    /// First fatal startup message reported by the worker, if any.
    pub failure: Option<String>,
}

impl Default for ReadinessState {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessState {
    /// All flags cleared.
    #[must_use]
    pub fn new() -> Self {
        Self {
            services: Service::ALL.iter().map(|s| (*s, false)).collect(),
            server_ready: false,
            ready: false,
            failure: None,
        }
    }

    #[must_use]
    pub fn is_up(&self, service: Service) -> bool {
        self.services.get(&service).copied().unwrap_or(false)
    }

    /// Check whether the given services plus the server flag are all set.
    ///
    /// This ignores `ready` itself, so it also answers the question for a
    /// worker whose ready event has not been observed yet.
    #[must_use]
    pub fn requirements_met(&self, required: &[Service]) -> bool {
        self.server_ready && self.services_up(required)
    }

    /// Check the service flags alone, without the server flag.
    ///
    /// Used by the relaxed fallback when the readiness wait times out: a
    /// worker whose services all came up is accepted even if its final
    /// "ready" line was never seen.
    #[must_use]
    pub fn services_up(&self, required: &[Service]) -> bool {
        required.iter().all(|s| self.is_up(*s))
    }

    /// Services announced so far.
    #[must_use]
    pub fn up_services(&self) -> Vec<Service> {
        self.services
            .iter()
            .filter(|(_, up)| **up)
            .map(|(s, _)| *s)
            .collect()
    }
}
