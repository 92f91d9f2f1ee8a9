//! Core types for rotation handlers

mod error;
mod id;
mod request;
mod secret;

pub use error::{BoxError, RotationError, RotationResult, ValidationError};
pub use id::{RequestToken, SecretId};
pub use request::{RotationRequest, RotationStep};
pub use secret::{SecretMaterial, SecretString};
