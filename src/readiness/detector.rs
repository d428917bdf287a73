//! Log-scraping readiness detection.
//!
//! The worker does not speak a health-check protocol during startup; it prints
//! human-oriented progress lines to stderr. [`MarkerDetector`] infers
//! readiness from fixed substrings of those lines. Anything that can answer
//! the same questions can replace it through the [`ReadinessDetector`] trait.

use crate::readiness::{ReadinessState, Service};

/// Result of feeding one line to a detector.
#[derive(Debug)]
pub struct Observation<'a> {
    /// State after the line was applied.
    pub state: &'a ReadinessState,
    /// True if any flag changed.
    pub changed: bool,
    /// True only for the line that completed the required set.
    pub became_ready: bool,
}

/// Classifies worker output into readiness flags.
pub trait ReadinessDetector: Send {
    /// Apply one line of worker output.
    fn observe(&mut self, line: &str) -> Observation<'_>;

    /// Current state.
    fn state(&self) -> &ReadinessState;

    /// Services that must be up before the worker counts as ready.
    fn required(&self) -> &[Service];
}

/// Substrings the worker prints as it brings each service up.
#[derive(Debug, Clone)]
pub struct MarkerSet {
    pub services: Vec<(Service, String)>,
    pub server: Vec<String>,
    pub failures: Vec<String>,
}

impl Default for MarkerSet {
    fn default() -> Self {
        Self {
            services: vec![
                (Service::Drive, "Google Drive service initialized".to_string()),
                (Service::Gmail, "Gmail service initialized".to_string()),
                (
                    Service::Calendar,
                    "Google Calendar service initialized".to_string(),
                ),
                (Service::Docs, "Google Docs service initialized".to_string()),
            ],
            server: vec!["Server ready".to_string()],
            failures: vec![
                "Missing required OAuth credentials".to_string(),
                "No credentials available".to_string(),
                "Token refresh failed".to_string(),
                "Token expired and no refresh token available".to_string(),
            ],
        }
    }
}

/// Services required by default.
///
/// Calendar is only announced when the account has a primary calendar, and
/// docs is not needed by most tools.
pub const DEFAULT_REQUIRED: &[Service] = &[Service::Drive, Service::Gmail];

/// Substring-matching detector.
#[derive(Debug, Clone)]
pub struct MarkerDetector {
    markers: MarkerSet,
    required: Vec<Service>,
    state: ReadinessState,
}

impl Default for MarkerDetector {
    fn default() -> Self {
        Self::new(MarkerSet::default(), DEFAULT_REQUIRED.to_vec())
    }
}

impl MarkerDetector {
    #[must_use]
    pub fn new(markers: MarkerSet, required: Vec<Service>) -> Self {
        Self {
            markers,
            required,
            state: ReadinessState::new(),
        }
    }

    /// Detector with default markers and a custom required set.
    #[must_use]
    pub fn with_required(required: Vec<Service>) -> Self {
        Self::new(MarkerSet::default(), required)
    }
}

impl ReadinessDetector for MarkerDetector {
    fn observe(&mut self, line: &str) -> Observation<'_> {
        let mut changed = false;

        for (service, marker) in &self.markers.services {
            if line.contains(marker.as_str()) {
                let flag = self.state.services.entry(*service).or_insert(false);
                if !*flag {
                    *flag = true;
                    changed = true;
                    tracing::debug!(service = %service, "Worker service up");
                }
            }
        }

        if !self.state.server_ready
            && self.markers.server.iter().any(|m| line.contains(m.as_str()))
        {
            self.state.server_ready = true;
            changed = true;
            tracing::debug!("Worker server ready marker seen");
        }

        if self.state.failure.is_none()
            && self.markers.failures.iter().any(|m| line.contains(m.as_str()))
        {
            self.state.failure = Some(line.trim().to_string());
            changed = true;
        }

        let mut became_ready = false;
        if !self.state.ready && self.state.requirements_met(&self.required) {
            self.state.ready = true;
            became_ready = true;
            changed = true;
        }

        Observation {
            state: &self.state,
            changed,
            became_ready,
        }
    }

    fn state(&self) -> &ReadinessState {
        &self.state
    }

    fn required(&self) -> &[Service] {
        &self.required
    }
}
