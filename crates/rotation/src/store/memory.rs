//! In-memory secret store
//!
//! Backs the crate's test suite and doubles as a reference implementation
//! of the store contract. Beyond plain storage it carries the test
//! instrumentation the rotation properties need: per-operation call
//! counters, a configurable visibility lag on stage reads (simulating
//! label-propagation delay after a write), a scripted `move_stage` failure,
//! and a log of every label move for exact-call assertions.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::{SecretId, SecretMaterial};
use crate::store::{
    SecretStore, SecretValue, StageSet, StagingSnapshot, StoreError, VersionSelector, VersionStage,
};

/// One recorded `move_stage` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageMove {
    /// The label that was moved or removed.
    pub stage: VersionStage,
    /// Destination version id, if the label was attached somewhere.
    pub move_to: Option<String>,
    /// Source version id, if the label was detached somewhere.
    pub remove_from: Option<String>,
}

#[derive(Debug, Default, Clone)]
struct VersionRecord {
    // None models a version that is staged in the label map but whose
    // value has not been put yet; reads of it report not-found.
    material: Option<SecretMaterial>,
    stages: StageSet,
}

#[derive(Debug, Default)]
struct SecretRecord {
    rotation_enabled: bool,
    // None models a secret that has never held a value: describe reports
    // no version mapping at all.
    versions: Option<HashMap<String, VersionRecord>>,
}

#[derive(Debug, Default)]
struct OpCounters {
    describe: AtomicU64,
    get: AtomicU64,
    put: AtomicU64,
    mv: AtomicU64,
}

/// In-memory [`SecretStore`] with fault injection for tests.
#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    secrets: RwLock<HashMap<String, SecretRecord>>,
    counters: OpCounters,
    // stage -> number of upcoming reads of that stage that still see nothing
    stage_lag: Mutex<HashMap<VersionStage, u32>>,
    // Some(n): the next n move_stage calls succeed, every later one fails
    move_budget: Mutex<Option<u32>>,
    move_log: Mutex<Vec<StageMove>>,
}

impl InMemorySecretStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces a secret with no versions.
    pub async fn upsert_secret(&self, secret_id: &SecretId, rotation_enabled: bool) {
        let mut secrets = self.secrets.write().await;
        secrets.insert(
            secret_id.as_str().to_string(),
            SecretRecord {
                rotation_enabled,
                versions: None,
            },
        );
    }

    /// Gives a secret an empty version mapping without inserting a version.
    pub async fn init_version_map(&self, secret_id: &SecretId) {
        let mut secrets = self.secrets.write().await;
        if let Some(record) = secrets.get_mut(secret_id.as_str()) {
            record.versions.get_or_insert_with(HashMap::new);
        }
    }

    /// Inserts a version with the given material and labels, creating the
    /// secret (rotation enabled) if it does not exist.
    pub async fn upsert_version(
        &self,
        secret_id: &SecretId,
        version_id: &str,
        material: SecretMaterial,
        stages: impl IntoIterator<Item = VersionStage>,
    ) {
        let mut secrets = self.secrets.write().await;
        let record = secrets
            .entry(secret_id.as_str().to_string())
            .or_insert_with(|| SecretRecord {
                rotation_enabled: true,
                versions: None,
            });
        record.versions.get_or_insert_with(HashMap::new).insert(
            version_id.to_string(),
            VersionRecord {
                material: Some(material),
                stages: stages.into_iter().collect(),
            },
        );
    }

    /// Registers a version in the staging map without a stored value.
    ///
    /// Mirrors the state a rotation starts from: the request token already
    /// appears in the version-to-stage mapping, but reading its value still
    /// reports not-found until something is put under it.
    pub async fn stage_version(
        &self,
        secret_id: &SecretId,
        version_id: &str,
        stages: impl IntoIterator<Item = VersionStage>,
    ) {
        let mut secrets = self.secrets.write().await;
        let record = secrets
            .entry(secret_id.as_str().to_string())
            .or_insert_with(|| SecretRecord {
                rotation_enabled: true,
                versions: None,
            });
        record.versions.get_or_insert_with(HashMap::new).insert(
            version_id.to_string(),
            VersionRecord {
                material: None,
                stages: stages.into_iter().collect(),
            },
        );
    }

    /// Makes the next `reads` stage-selector reads of `stage` report
    /// not-found, simulating label-propagation lag after a write.
    pub fn delay_stage_visibility(&self, stage: VersionStage, reads: u32) {
        self.stage_lag
            .lock()
            .expect("stage lag lock poisoned")
            .insert(stage, reads);
    }

    /// Lets the next `successes` `move_stage` calls succeed and fails every
    /// call after that with an injected remote error.
    pub fn fail_move_stage_after(&self, successes: u32) {
        *self.move_budget.lock().expect("move budget lock poisoned") = Some(successes);
    }

    /// Number of `describe` calls served.
    pub fn describe_calls(&self) -> u64 {
        self.counters.describe.load(Ordering::SeqCst)
    }

    /// Number of `get_value` calls served.
    pub fn get_calls(&self) -> u64 {
        self.counters.get.load(Ordering::SeqCst)
    }

    /// Number of `put_value` calls served.
    pub fn put_calls(&self) -> u64 {
        self.counters.put.load(Ordering::SeqCst)
    }

    /// Number of `move_stage` calls served, including failed ones.
    pub fn move_calls(&self) -> u64 {
        self.counters.mv.load(Ordering::SeqCst)
    }

    /// Every label move attempted so far, in order. Injected failures are
    /// not recorded; the log reflects applied mutations only.
    pub fn stage_moves(&self) -> Vec<StageMove> {
        self.move_log.lock().expect("move log lock poisoned").clone()
    }

    /// Labels currently attached to `version_id`, if the version exists.
    pub async fn stages_of(&self, secret_id: &SecretId, version_id: &str) -> Option<StageSet> {
        let secrets = self.secrets.read().await;
        let record = secrets.get(secret_id.as_str())?;
        Some(record.versions.as_ref()?.get(version_id)?.stages.clone())
    }

    fn take_lagged_read(&self, stage: VersionStage) -> bool {
        let mut lag = self.stage_lag.lock().expect("stage lag lock poisoned");
        match lag.get_mut(&stage) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn take_move_budget(&self) -> Result<(), StoreError> {
        let mut budget = self.move_budget.lock().expect("move budget lock poisoned");
        match budget.as_mut() {
            Some(0) => Err(StoreError::remote("move_stage", "injected failure")),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn describe(&self, secret_id: &SecretId) -> Result<StagingSnapshot, StoreError> {
        self.counters.describe.fetch_add(1, Ordering::SeqCst);
        let secrets = self.secrets.read().await;
        let record = secrets
            .get(secret_id.as_str())
            .ok_or_else(|| StoreError::not_found(secret_id.as_str(), "metadata"))?;
        Ok(StagingSnapshot {
            rotation_enabled: record.rotation_enabled,
            versions: record.versions.as_ref().map(|versions| {
                versions
                    .iter()
                    .map(|(id, v)| (id.clone(), v.stages.clone()))
                    .collect()
            }),
        })
    }

    async fn get_value(
        &self,
        secret_id: &SecretId,
        selector: VersionSelector<'_>,
    ) -> Result<SecretValue, StoreError> {
        self.counters.get.fetch_add(1, Ordering::SeqCst);
        if let VersionSelector::Stage(stage) = selector {
            if self.take_lagged_read(stage) {
                return Err(StoreError::not_found(secret_id.as_str(), selector));
            }
        }

        let secrets = self.secrets.read().await;
        let record = secrets
            .get(secret_id.as_str())
            .ok_or_else(|| StoreError::not_found(secret_id.as_str(), selector))?;
        let versions = record
            .versions
            .as_ref()
            .ok_or_else(|| StoreError::not_found(secret_id.as_str(), selector))?;

        let found = match selector {
            VersionSelector::Id(id) => versions.get(id).map(|v| (id.to_string(), v)),
            VersionSelector::Stage(stage) => versions
                .iter()
                .find(|(_, v)| v.stages.contains(&stage))
                .map(|(id, v)| (id.clone(), v)),
        };

        found
            .and_then(|(version_id, record)| {
                record.material.clone().map(|material| SecretValue {
                    version_id,
                    material,
                })
            })
            .ok_or_else(|| StoreError::not_found(secret_id.as_str(), selector))
    }

    async fn put_value(
        &self,
        secret_id: &SecretId,
        version_id: &str,
        material: SecretMaterial,
        stages: &[VersionStage],
    ) -> Result<(), StoreError> {
        self.counters.put.fetch_add(1, Ordering::SeqCst);
        let mut secrets = self.secrets.write().await;
        let record = secrets
            .get_mut(secret_id.as_str())
            .ok_or_else(|| StoreError::not_found(secret_id.as_str(), "metadata"))?;
        record.versions.get_or_insert_with(HashMap::new).insert(
            version_id.to_string(),
            VersionRecord {
                material: Some(material),
                stages: stages.iter().copied().collect(),
            },
        );
        Ok(())
    }

    async fn move_stage(
        &self,
        secret_id: &SecretId,
        stage: VersionStage,
        move_to: Option<&str>,
        remove_from: Option<&str>,
    ) -> Result<(), StoreError> {
        self.counters.mv.fetch_add(1, Ordering::SeqCst);
        self.take_move_budget()?;

        let mut secrets = self.secrets.write().await;
        let record = secrets
            .get_mut(secret_id.as_str())
            .ok_or_else(|| StoreError::not_found(secret_id.as_str(), "metadata"))?;
        let versions = record
            .versions
            .as_mut()
            .ok_or_else(|| StoreError::not_found(secret_id.as_str(), "metadata"))?;

        if let Some(from) = remove_from {
            if !versions.contains_key(from) {
                return Err(StoreError::not_found(
                    secret_id.as_str(),
                    VersionSelector::Id(from),
                ));
            }
        }
        if let Some(to) = move_to {
            if !versions.contains_key(to) {
                return Err(StoreError::not_found(
                    secret_id.as_str(),
                    VersionSelector::Id(to),
                ));
            }
        }

        // Single-owner invariant, checked against the prospective state: a
        // rejected move must leave the store untouched.
        let owners = versions
            .iter()
            .filter(|(id, version)| {
                if move_to == Some(id.as_str()) {
                    true
                } else if remove_from == Some(id.as_str()) {
                    false
                } else {
                    version.stages.contains(&stage)
                }
            })
            .count();
        if owners > 1 {
            return Err(StoreError::remote(
                "move_stage",
                format!("stage {stage} would be attached to {owners} versions"),
            ));
        }

        if let Some(from) = remove_from {
            if let Some(version) = versions.get_mut(from) {
                version.stages.remove(&stage);
            }
        }
        if let Some(to) = move_to {
            if let Some(version) = versions.get_mut(to) {
                version.stages.insert(stage);
            }
        }

        self.move_log
            .lock()
            .expect("move log lock poisoned")
            .push(StageMove {
                stage,
                move_to: move_to.map(ToString::to_string),
                remove_from: remove_from.map(ToString::to_string),
            });
        Ok(())
    }
}
