//! Secret material with zeroization and redacted output
//!
//! Material passes through this crate on its way between the store and the
//! caller's collaborator functions. It is never logged; `Debug` output is
//! redacted and buffers are wiped on drop.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A string secret that zeroizes its buffer on drop.
///
/// Comparison is constant-time over the bytes (length is not hidden).
/// `Debug` never reveals the value.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    /// Wraps a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Exposes the underlying value. Callers must not persist or log the
    /// returned slice.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the value is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(***)")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl Eq for SecretString {}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Serialize for SecretString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Opaque secret payload with two representable forms, string and binary.
///
/// At most one form is logically meaningful per secret; the store protocol
/// carries whichever one the credential domain uses.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SecretMaterial {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    secret_string: Option<SecretString>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    secret_binary: Option<Vec<u8>>,
}

impl SecretMaterial {
    /// Material holding a string secret.
    pub fn from_string(value: impl Into<SecretString>) -> Self {
        Self {
            secret_string: Some(value.into()),
            secret_binary: None,
        }
    }

    /// Material holding a binary secret.
    pub fn from_binary(value: Vec<u8>) -> Self {
        Self {
            secret_string: None,
            secret_binary: Some(value),
        }
    }

    /// The string form, if present.
    pub fn secret_string(&self) -> Option<&SecretString> {
        self.secret_string.as_ref()
    }

    /// The binary form, if present.
    pub fn secret_binary(&self) -> Option<&[u8]> {
        self.secret_binary.as_deref()
    }

    /// Whether neither form is present.
    pub fn is_empty(&self) -> bool {
        self.secret_string.is_none() && self.secret_binary.is_none()
    }
}

impl From<String> for SecretMaterial {
    fn from(value: String) -> Self {
        Self::from_string(SecretString::new(value))
    }
}

impl From<&str> for SecretMaterial {
    fn from(value: &str) -> Self {
        Self::from_string(value)
    }
}

impl fmt::Debug for SecretMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretMaterial")
            .field("secret_string", &self.secret_string.as_ref().map(|_| "***"))
            .field("secret_binary", &self.secret_binary.as_ref().map(|_| "***"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_is_redacted() {
        let material = SecretMaterial::from_string("hunter2");
        let rendered = format!("{material:?}");
        assert!(!rendered.contains("hunter2"));

        let s = SecretString::new("hunter2");
        assert_eq!(format!("{s:?}"), "SecretString(***)");
    }

    #[test]
    fn equality_by_value() {
        assert_eq!(SecretString::new("abc"), SecretString::new("abc"));
        assert_ne!(SecretString::new("abc"), SecretString::new("abd"));
        assert_ne!(SecretString::new("abc"), SecretString::new("abcd"));

        assert_eq!(
            SecretMaterial::from_string("abc"),
            SecretMaterial::from_string("abc")
        );
        assert_ne!(
            SecretMaterial::from_string("abc"),
            SecretMaterial::from_binary(b"abc".to_vec())
        );
    }

    #[test]
    fn serde_skips_absent_form() {
        let material = SecretMaterial::from_string("s");
        let json = serde_json::to_string(&material).unwrap();
        assert_eq!(json, r#"{"secret_string":"s"}"#);

        let parsed: SecretMaterial = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, material);
    }

    #[test]
    fn empty_material() {
        assert!(SecretMaterial::default().is_empty());
        assert!(!SecretMaterial::from_binary(vec![1, 2, 3]).is_empty());
    }
}
