//! Identity value objects.
//!
//! An [`Identity`] is owned by the external authentication service. This
//! application only ever changes its display name and photo.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Error returned when a value object cannot be built.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid email formatting")]
    InvalidEmailFormat,
    #[error("identity id must not be empty")]
    EmptyId,
}

/// Opaque identifier handed out by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(String);

impl IdentityId {
    /// Converts a [`String`] into an [`IdentityId`].
    ///
    /// # Errors
    ///
    /// Returns `Err` if the trimmed string is empty.
    pub fn parse(id: impl Into<String>) -> Result<Self, IdentityError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::EmptyId);
        }

        Ok(Self(trimmed.to_owned()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value object of a valid email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmailAddress(String);

impl EmailAddress {
    /// Converts a string into a lowercased [`EmailAddress`].
    ///
    /// # Errors
    ///
    /// Returns `Err` if the string does not hold exactly one `@` with text
    /// on both sides.
    pub fn parse(email: impl AsRef<str>) -> Result<Self, IdentityError> {
        let email = email.as_ref().trim();
        match email.split_once('@') {
            Some((local, domain))
                if !local.is_empty()
                    && !domain.is_empty()
                    && !domain.contains('@') =>
            {
                Ok(Self(email.to_lowercase()))
            },
            _ => Err(IdentityError::InvalidEmailFormat),
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for EmailAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The externally managed authenticated-user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: IdentityId,
    pub email: EmailAddress,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

/// The only identity attributes this application may change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityChanges {
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

/// Plain-text password. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    /// Minimum length accepted by the auth provider.
    pub const MIN_LENGTH: usize = 6;

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Password")
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Short-lived bearer token proving an identity to the backing services.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Long-lived token exchanged for a fresh [`AccessToken`].
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshToken(String);

impl RefreshToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshToken([REDACTED])")
    }
}

/// Result of every successful sign-in, sign-up or refresh.
#[derive(Debug, Clone)]
pub struct Grant {
    pub identity: Identity,
    pub access_token: AccessToken,
    pub refresh_token: RefreshToken,
    /// Lifetime of `access_token`.
    pub expires_in: Duration,
}

/// Authenticated identity together with the token to act on its behalf.
#[derive(Debug, Clone)]
pub struct Principal {
    pub identity: Identity,
    pub token: AccessToken,
}

/// Proof obtained from an external identity provider (e.g. `google.com`).
///
/// A missing `id_token` means the user closed the provider's prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalCredential {
    pub provider_id: String,
    #[serde(default)]
    pub id_token: Option<String>,
}
