//! # Upstream Failure Classification
//!
//! Maps raw [`UpstreamFailure`]s onto the relay's failure taxonomy and produces a
//! message that is safe to show end users.
//!
//! | Kind             | Matched by                                    | Status |
//! |------------------|-----------------------------------------------|--------|
//! | `SessionExpired` | `SESSION_EXPIRED`, `CF-12100`, `CF-00401`, `LOGIN_REQUIRED` | 401 |
//! | `Timeout`        | synthetic `TIMEOUT`                           | 504    |
//! | `Upstream`       | everything else                               | reported or 502 |
//!
//! No retry is ever scheduled here. `retryable` only tells the caller whether a
//! user-initiated retry can help without re-authenticating first.

use crate::executor::{UpstreamFailure, TIMEOUT_CODE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upstream codes meaning the provider session must be re-established
pub const SESSION_EXPIRED_CODES: [&str; 4] =
    ["SESSION_EXPIRED", "CF-12100", "CF-00401", "LOGIN_REQUIRED"];

pub const MAX_MESSAGE_CHARS: usize = 200;

pub const FALLBACK_MESSAGE: &str = "upstream request failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    SessionExpired,
    Timeout,
    Upstream,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::SessionExpired => write!(f, "Session Expired"),
            FailureKind::Timeout => write!(f, "Timeout"),
            FailureKind::Upstream => write!(f, "Upstream"),
        }
    }
}

/// Classified failure, ready for audit and for the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedFailure {
    pub kind: FailureKind,
    pub code: String,
    /// Sanitized, user-safe message
    pub message: String,
    /// Status written to the attempt log
    pub status_code: i32,
    pub reauth_required: bool,
    pub retryable: bool,
}

pub trait FailureClassifier: Send + Sync + fmt::Debug {
    fn classify(&self, failure: &UpstreamFailure) -> ClassifiedFailure;

    fn classifier_name(&self) -> &'static str;
}

#[derive(Debug, Clone, Default)]
pub struct StandardFailureClassifier;

impl StandardFailureClassifier {
    pub fn new() -> Self {
        Self
    }

    fn kind_of(failure: &UpstreamFailure) -> FailureKind {
        let code = failure.code.trim();
        if SESSION_EXPIRED_CODES
            .iter()
            .any(|expired| code.eq_ignore_ascii_case(expired))
        {
            FailureKind::SessionExpired
        } else if code.eq_ignore_ascii_case(TIMEOUT_CODE) {
            FailureKind::Timeout
        } else {
            FailureKind::Upstream
        }
    }
}

impl FailureClassifier for StandardFailureClassifier {
    fn classify(&self, failure: &UpstreamFailure) -> ClassifiedFailure {
        let kind = Self::kind_of(failure);
        let status_code = match kind {
            FailureKind::SessionExpired => 401,
            FailureKind::Timeout => 504,
            FailureKind::Upstream => failure.status_code.unwrap_or(502),
        };

        ClassifiedFailure {
            kind,
            code: failure.code.trim().to_string(),
            message: sanitize_message(&failure.message),
            status_code,
            reauth_required: kind == FailureKind::SessionExpired,
            retryable: kind != FailureKind::SessionExpired,
        }
    }

    fn classifier_name(&self) -> &'static str {
        "StandardFailureClassifier"
    }
}

/// Strip markup, collapse whitespace and cap the length of an upstream message.
///
/// Escaped markup is decoded before tags are stripped, so `&lt;b&gt;` is removed
/// like `<b>`. `&amp;` is decoded last and cannot reintroduce a tag.
pub fn sanitize_message(raw: &str) -> String {
    let decoded = raw
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"");

    let mut text = String::with_capacity(decoded.len());
    let mut in_tag = false;
    for ch in decoded.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }
    let text = text.replace("&amp;", "&");

    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return FALLBACK_MESSAGE.to_string();
    }

    if collapsed.chars().count() > MAX_MESSAGE_CHARS {
        collapsed
            .chars()
            .take(MAX_MESSAGE_CHARS)
            .collect::<String>()
            .trim_end()
            .to_string()
    } else {
        collapsed
    }
}
