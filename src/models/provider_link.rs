//! # Provider Link Model
//!
//! Per-account session and consent state for the upstream provider. The login
//! collaborator owns the row; the relay only touches fetch bookkeeping
//! (`last_fetched_at`, `last_identity_hash`, error fields) after each fetch.
//!
//! One row per `(account_id, provider)`, always upserted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Opaque session token produced by the login flow.
///
/// The relay never inspects the contents; it only hands them to the executor.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct SessionBlob(String);

impl SessionBlob {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SessionBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionBlob(<{} bytes>)", self.0.len())
    }
}

/// Everything the executor needs to authenticate upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionArtifacts {
    pub step_data: Option<SessionBlob>,
    pub cookie_data: Option<SessionBlob>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProviderLink {
    pub account_id: String,
    pub provider: String,
    pub linked: bool,
    pub login_method: Option<String>,
    pub login_org_cd: Option<String>,
    #[serde(skip_serializing)]
    pub step_data: Option<SessionBlob>,
    #[serde(skip_serializing)]
    pub cookie_data: Option<SessionBlob>,
    pub last_linked_at: Option<DateTime<Utc>>,
    pub last_fetched_at: Option<DateTime<Utc>>,
    pub last_identity_hash: Option<String>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProviderLink {
    /// A freshly linked account with session artifacts, as the login flow leaves it
    pub fn linked(
        account_id: impl Into<String>,
        provider: impl Into<String>,
        step_data: Option<SessionBlob>,
        cookie_data: Option<SessionBlob>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            provider: provider.into(),
            linked: true,
            login_method: None,
            login_org_cd: None,
            step_data,
            cookie_data,
            last_linked_at: Some(now),
            last_fetched_at: None,
            last_identity_hash: None,
            last_error_code: None,
            last_error_message: None,
            updated_at: now,
        }
    }

    /// Session artifacts, if the link is active and holds at least one non-empty token
    pub fn session_artifacts(&self) -> Option<SessionArtifacts> {
        if !self.linked {
            return None;
        }
        let step_data = self.step_data.clone().filter(|b| !b.is_empty());
        let cookie_data = self.cookie_data.clone().filter(|b| !b.is_empty());
        if step_data.is_none() && cookie_data.is_none() {
            return None;
        }
        Some(SessionArtifacts {
            step_data,
            cookie_data,
        })
    }

    pub fn has_session(&self) -> bool {
        self.session_artifacts().is_some()
    }

    /// Apply fetch bookkeeping to this row
    pub fn apply(&mut self, update: &FetchLinkUpdate) {
        if let Some(fetched_at) = update.fetched_at {
            self.last_fetched_at = Some(fetched_at);
        }
        self.last_identity_hash = Some(update.identity_hash.clone());
        match &update.error {
            Some(error) => {
                self.last_error_code = Some(error.code.clone());
                self.last_error_message = Some(error.message.clone());
            }
            None => {
                self.last_error_code = None;
                self.last_error_message = None;
            }
        }
        self.updated_at = update.updated_at;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkError {
    pub code: String,
    pub message: String,
}

/// Post-fetch update written by the persistence writer
#[derive(Debug, Clone, PartialEq)]
pub struct FetchLinkUpdate {
    pub account_id: String,
    pub provider: String,
    pub identity_hash: String,
    /// Set only when the fetch succeeded
    pub fetched_at: Option<DateTime<Utc>>,
    /// `None` clears the stored error
    pub error: Option<LinkError>,
    pub updated_at: DateTime<Utc>,
}
