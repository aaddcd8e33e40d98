//! # Fetch Executor Port
//!
//! The upstream provider is reached through [`FetchExecutor`]. Implementations own
//! the whole multi-step exchange (init, sign, fetch) and report either a normalized
//! JSON payload or an [`UpstreamFailure`]. The relay never looks inside the session
//! artifacts it hands over.

use crate::fingerprint::RequestFingerprint;
use crate::models::SessionArtifacts;
use crate::targets::FetchTarget;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Synthetic code for an upstream call that exceeded its deadline
pub const TIMEOUT_CODE: &str = "TIMEOUT";

/// Synthetic code for an executor task that panicked or was torn down
pub const EXECUTOR_PANIC_CODE: &str = "EXECUTOR_PANIC";

/// What to fetch upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorRequest {
    pub provider: String,
    pub targets: Vec<FetchTarget>,
    pub year_limit: i32,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub subject_type: String,
    pub login_org: Option<String>,
}

impl ExecutorRequest {
    pub fn from_fingerprint(
        provider: impl Into<String>,
        fingerprint: &RequestFingerprint,
        login_org: Option<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            targets: fingerprint.normalized_targets.clone(),
            year_limit: fingerprint.year_limit,
            from_date: fingerprint.from_date,
            to_date: fingerprint.to_date,
            subject_type: fingerprint.subject_type.clone(),
            login_org,
        }
    }
}

/// Failure reported by the upstream exchange, before classification
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("Upstream failure {code}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct UpstreamFailure {
    pub code: String,
    pub message: String,
    pub status_code: Option<i32>,
}

impl UpstreamFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status_code: None,
        }
    }

    pub fn with_status(mut self, status_code: i32) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            TIMEOUT_CODE,
            format!("upstream request timed out after {}ms", after.as_millis()),
        )
    }

    pub fn panicked(detail: impl Into<String>) -> Self {
        Self::new(EXECUTOR_PANIC_CODE, detail)
    }
}

#[async_trait]
pub trait FetchExecutor: Send + Sync + std::fmt::Debug {
    /// Run the full upstream exchange for `request`
    async fn execute(
        &self,
        request: &ExecutorRequest,
        session: &SessionArtifacts,
    ) -> Result<serde_json::Value, UpstreamFailure>;
}
