//! # Identity Resolution
//!
//! Derives a stable, non-reversible hash for the real-world person behind a linked
//! provider account. Only the hash is stored next to cache entries and attempts.
//!
//! Inputs are normalized before hashing so cosmetic differences do not fragment
//! the cache: names ignore case and whitespace, birth ids and mobile numbers keep
//! digits only, the login organisation ignores case and surrounding whitespace.
//!
//! When every personal field is blank the acting account id is folded into the
//! hash instead, so accounts without linked PII never share cache entries.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const HASH_VERSION: &str = "identity.v1";
const FIELD_SEPARATOR: char = '\u{1f}';

/// Personal attributes of a linked provider account
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LinkedIdentity {
    pub name: Option<String>,
    pub birth_id: Option<String>,
    pub mobile: Option<String>,
    pub login_org: Option<String>,
}

// PII never reaches logs through Debug
impl fmt::Debug for LinkedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedIdentity")
            .field("name", &self.name.as_ref().map(|_| "<redacted>"))
            .field("birth_id", &self.birth_id.as_ref().map(|_| "<redacted>"))
            .field("mobile", &self.mobile.as_ref().map(|_| "<redacted>"))
            .field("login_org", &self.login_org)
            .finish()
    }
}

impl LinkedIdentity {
    pub fn new(
        name: impl Into<String>,
        birth_id: impl Into<String>,
        mobile: impl Into<String>,
        login_org: impl Into<String>,
    ) -> Self {
        Self {
            name: Some(name.into()),
            birth_id: Some(birth_id.into()),
            mobile: Some(mobile.into()),
            login_org: Some(login_org.into()),
        }
    }
}

/// Hex-encoded SHA-256 identity hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityHash(String);

impl IdentityHash {
    /// Wrap a hash previously produced by [`IdentityResolver::resolve`]
    pub fn from_stored(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for IdentityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pure, total identity hashing
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityResolver;

impl IdentityResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(&self, account_id: &str, identity: &LinkedIdentity) -> IdentityHash {
        let name = normalize_name(identity.name.as_deref());
        let birth_id = digits_only(identity.birth_id.as_deref());
        let mobile = digits_only(identity.mobile.as_deref());
        let login_org = normalize_org(identity.login_org.as_deref());

        let anonymous = name.is_empty() && birth_id.is_empty() && mobile.is_empty();
        let account_scope = if anonymous { account_id.trim() } else { "" };

        let canonical = [
            HASH_VERSION,
            account_scope,
            login_org.as_str(),
            name.as_str(),
            birth_id.as_str(),
            mobile.as_str(),
        ]
        .join(&FIELD_SEPARATOR.to_string());

        IdentityHash(hex::encode(Sha256::digest(canonical.as_bytes())))
    }
}

fn normalize_name(value: Option<&str>) -> String {
    value
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn normalize_org(value: Option<&str>) -> String {
    value.unwrap_or_default().trim().to_lowercase()
}

fn digits_only(value: Option<&str>) -> String {
    value
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_digit)
        .collect()
}
