//! Store protocol: staging labels, snapshots, and the remote-store trait
//!
//! The secret store is an external collaborator with a fixed API contract.
//! This module defines that contract as the [`SecretStore`] trait plus the
//! types that cross it. The store's consistency guarantees — atomic label
//! moves, each label owned by at most one version — are assumed here, never
//! reimplemented; the controller checks label state instead of assuming it.

mod memory;

pub use memory::{InMemorySecretStore, StageMove};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

use crate::core::{SecretId, SecretMaterial};

/// A staging label the store attaches to a secret version.
///
/// A version may carry zero, one, or multiple labels; each label is
/// exclusive to at most one version at a time (store-enforced).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStage {
    /// The live version consumers resolve by default.
    Current,
    /// The candidate version being rotated in.
    Pending,
    /// The outgoing version after a promotion.
    Previous,
}

impl VersionStage {
    /// Label name as used in messages and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "Current",
            Self::Pending => "Pending",
            Self::Previous => "Previous",
        }
    }
}

impl fmt::Display for VersionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of labels attached to one version.
pub type StageSet = BTreeSet<VersionStage>;

/// Result of querying the store for a secret's rotation metadata.
///
/// Transient: fetched per validation, never cached across steps.
/// `versions` is `None` when the secret has no version-to-stage mapping at
/// all (a secret that has never held a value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingSnapshot {
    /// Whether rotation is enabled on the secret.
    pub rotation_enabled: bool,
    /// Version id to label-set mapping, if the secret has one.
    pub versions: Option<HashMap<String, StageSet>>,
}

impl StagingSnapshot {
    /// Labels attached to `version_id`, if that version exists.
    pub fn stages_of(&self, version_id: &str) -> Option<&StageSet> {
        self.versions.as_ref()?.get(version_id)
    }
}

/// How to address a version in a value read: by explicit id or by label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionSelector<'a> {
    /// A specific version id.
    Id(&'a str),
    /// Whichever version currently carries the label.
    Stage(VersionStage),
}

impl fmt::Display for VersionSelector<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "version id {id}"),
            Self::Stage(stage) => write!(f, "stage {stage}"),
        }
    }
}

/// A fetched secret value together with the version id that holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretValue {
    /// Version id the value was read from.
    pub version_id: String,
    /// The secret payload.
    pub material: SecretMaterial,
}

/// Errors returned by [`SecretStore`] implementations.
///
/// `NotFound` is the only variant with special local handling (it drives
/// the idempotent-create branch and the label-propagation poll); every
/// other failure is opaque to this crate and propagated verbatim.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No value matched the given selector.
    #[error("no value for {selector} on secret {secret_id}")]
    NotFound { secret_id: String, selector: String },

    /// Any other store failure, opaque to the rotation logic.
    #[error("secret store call {operation} failed: {message}")]
    Remote { operation: String, message: String },
}

impl StoreError {
    /// Builds a `NotFound` error.
    pub fn not_found(secret_id: impl Into<String>, selector: impl fmt::Display) -> Self {
        Self::NotFound {
            secret_id: secret_id.into(),
            selector: selector.to_string(),
        }
    }

    /// Builds an opaque remote failure.
    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether this is the not-found outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Remote secret store, abstracted as asynchronous request/response calls.
///
/// Implementations wrap a concrete store client. All calls suspend the
/// task for the duration of the remote call; none spawn background work.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Reads the secret's rotation metadata and full version-to-label
    /// mapping.
    async fn describe(&self, secret_id: &SecretId) -> Result<StagingSnapshot, StoreError>;

    /// Reads a secret value by version id or staging label. Fails with
    /// [`StoreError::NotFound`] when nothing matches the selector.
    async fn get_value(
        &self,
        secret_id: &SecretId,
        selector: VersionSelector<'_>,
    ) -> Result<SecretValue, StoreError>;

    /// Stores material as a new version under `version_id`, attaching the
    /// given labels.
    async fn put_value(
        &self,
        secret_id: &SecretId,
        version_id: &str,
        material: SecretMaterial,
        stages: &[VersionStage],
    ) -> Result<(), StoreError>;

    /// Moves a staging label between versions in one atomic store call.
    /// With `move_to` absent the label is only removed from `remove_from`.
    async fn move_stage(
        &self,
        secret_id: &SecretId,
        stage: VersionStage,
        move_to: Option<&str>,
        remove_from: Option<&str>,
    ) -> Result<(), StoreError>;
}
