//! Validated identifier newtypes
//!
//! Provides [`SecretId`] and [`RequestToken`] newtypes so malformed
//! identifiers are rejected at the edge instead of travelling into store
//! calls.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::ValidationError;

/// Maximum length for secret identifiers. Store ARNs are long but bounded;
/// anything beyond this is garbage input.
const MAX_SECRET_ID_LENGTH: usize = 2048;

/// Maximum length for request tokens (UUID-sized identifiers).
const MAX_TOKEN_LENGTH: usize = 64;

/// Opaque identifier of the secret being rotated (validated)
///
/// Accepts the identifier forms a secret store hands out, including full
/// ARNs with `:` and `/`. Rejects empty strings, control characters, and
/// whitespace.
///
/// # Examples
///
/// ```
/// use keyturn_rotation::SecretId;
///
/// let id = SecretId::new("arn:aws:secretsmanager:eu-west-1:123:secret:db-creds").unwrap();
/// assert!(SecretId::new("").is_err());
/// assert!(SecretId::new("has spaces").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecretId(String);

impl SecretId {
    /// Creates a new validated secret identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptySecretId`] for an empty string and
    /// [`ValidationError::InvalidSecretId`] when the identifier is too long
    /// or contains whitespace or control characters.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();

        if id.is_empty() {
            return Err(ValidationError::EmptySecretId);
        }

        if id.len() > MAX_SECRET_ID_LENGTH {
            return Err(ValidationError::InvalidSecretId {
                id,
                reason: format!("exceeds maximum length of {MAX_SECRET_ID_LENGTH} characters"),
            });
        }

        if id.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(ValidationError::InvalidSecretId {
                id,
                reason: "contains whitespace or control characters".to_string(),
            });
        }

        Ok(Self(id))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Converts to an owned string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SecretId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<SecretId> for String {
    fn from(id: SecretId) -> Self {
        id.0
    }
}

impl TryFrom<String> for SecretId {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        SecretId::new(s)
    }
}

/// Client-generated idempotency token for one rotation attempt (validated)
///
/// The token doubles as the version id of the secret version being created,
/// so it is held to version-id rules: 1–64 characters, alphanumeric,
/// hyphens, and underscores only.
///
/// # Examples
///
/// ```
/// use keyturn_rotation::RequestToken;
///
/// let token = RequestToken::new("3c7e9d52-4d6f-4f5e-9b3a-1a2b3c4d5e6f".replace('-', "_")).unwrap();
/// assert!(RequestToken::new("").is_err());
/// assert!(RequestToken::new("token/with/slashes").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RequestToken(String);

impl RequestToken {
    /// Creates a new validated request token.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyRequestToken`] for an empty string and
    /// [`ValidationError::InvalidRequestToken`] when the token is too long or
    /// contains characters other than alphanumerics, hyphens, or
    /// underscores.
    pub fn new(token: impl Into<String>) -> Result<Self, ValidationError> {
        let token = token.into();

        if token.is_empty() {
            return Err(ValidationError::EmptyRequestToken);
        }

        if token.len() > MAX_TOKEN_LENGTH {
            return Err(ValidationError::InvalidRequestToken {
                token,
                reason: format!("exceeds maximum length of {MAX_TOKEN_LENGTH} characters"),
            });
        }

        if !token
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidRequestToken {
                token,
                reason:
                    "contains invalid characters (only alphanumeric, hyphens, underscores allowed)"
                        .to_string(),
            });
        }

        Ok(Self(token))
    }

    /// Returns the token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Converts to an owned string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<RequestToken> for String {
    fn from(token: RequestToken) -> Self {
        token.0
    }
}

impl TryFrom<String> for RequestToken {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        RequestToken::new(s)
    }
}
