//! Credential resolution for tool calls.
//!
//! A call's FetchFox API key comes from the caller's `Authorization: Bearer`
//! header when one is present, and from the process-wide default
//! (`FETCHFOX_API_KEY` or the config file) otherwise.
//!
//! # Security Note
//!
//! [`Credential`] never prints its value: both `Debug` and `Display` are
//! redacted, so it can sit inside structs that are logged.

use std::fmt;

use serde::Deserialize;

use crate::error::AuthError;

/// An API key authorising calls against the FetchFox service.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wraps a raw API key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the raw key for use in an outbound `Authorization` header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Extracts the token from an `Authorization` header value.
///
/// The scheme is matched case-insensitively. Returns `None` for other
/// schemes and for an empty token.
#[must_use]
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Resolves the effective credential for a call.
///
/// # Errors
///
/// Returns [`AuthError::CredentialRequired`] if the header carries no bearer
/// token and no default credential is configured.
pub fn resolve(
    authorization: Option<&str>,
    default: Option<&Credential>,
) -> Result<Credential, AuthError> {
    if let Some(token) = authorization.and_then(bearer_token) {
        return Ok(Credential::new(token));
    }
    default.cloned().ok_or(AuthError::CredentialRequired)
}
