//! Per-user OAuth credential lookup.
//!
//! Acquiring and refreshing tokens is someone else's job; the gateway only
//! reads the current record for a user and hands it to the worker through
//! its environment.

mod store;

pub use store::*;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Environment variable names understood by the worker.
pub mod env {
    pub const ACCESS_TOKEN: &str = "GOOGLE_ACCESS_TOKEN";
    pub const REFRESH_TOKEN: &str = "GOOGLE_REFRESH_TOKEN";
    /// Expiry as epoch milliseconds.
    pub const EXPIRES_AT: &str = "GOOGLE_TOKEN_EXPIRES_AT";
    pub const CLIENT_ID: &str = "GOOGLE_CLIENT_ID";
    pub const CLIENT_SECRET: &str = "GOOGLE_CLIENT_SECRET";
    pub const SESSION_USER_ID: &str = "SESSION_USER_ID";
}

/// OAuth tokens stored for one user.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credentials {
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// True if the access token has an expiry in the past.
    ///
    /// An expired token is still handed to the worker, which refreshes it
    /// itself when a refresh token is present.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// OAuth client identity shared by all users.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct OAuthClient {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Build the worker environment for one user.
#[must_use]
pub fn worker_env(
    user: &str,
    credentials: &Credentials,
    client: &OAuthClient,
) -> Vec<(String, String)> {
    let mut vars = vec![
        (env::ACCESS_TOKEN.to_string(), credentials.access_token.clone()),
        (env::SESSION_USER_ID.to_string(), user.to_string()),
    ];
    if let Some(token) = &credentials.refresh_token {
        vars.push((env::REFRESH_TOKEN.to_string(), token.clone()));
    }
    if let Some(at) = credentials.expires_at {
        vars.push((env::EXPIRES_AT.to_string(), at.timestamp_millis().to_string()));
    }
    if let Some(id) = &client.client_id {
        vars.push((env::CLIENT_ID.to_string(), id.clone()));
    }
    if let Some(secret) = &client.client_secret {
        vars.push((env::CLIENT_SECRET.to_string(), secret.clone()));
    }
    vars
}
