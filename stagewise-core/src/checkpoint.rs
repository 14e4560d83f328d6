//! Checkpoint persistence for models.
//!
//! The model side ([`BaseModel::save_to_disk`], [`BaseModel::load_from_disk`],
//! [`BaseModel::get_latest_from_disk`]) only deals in [`ModelState`] and
//! checkpoint ids. Where and how the state is written is up to the
//! [`CheckpointStore`].

use crate::batch::Batch;
use crate::error::ModelError;
use crate::model::{BaseModel, Predictor};
use crate::state::ModelState;
use candle_core::Device;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Identifier and location of a stored checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRef {
    pub id: String,
    pub path: PathBuf,
}

/// Storage backend for model states.
pub trait CheckpointStore {
    /// Persist `state`, returning its new id and location.
    fn store(&self, state: &ModelState) -> Result<(String, PathBuf), ModelError>;

    /// Load the state stored under `id`.
    fn load(&self, id: &str) -> Result<ModelState, ModelError>;
}

impl<P: Predictor, B: Batch> BaseModel<P, B> {
    /// Persist the model (without its reference batch) and remember the id.
    pub fn save_to_disk(&mut self, store: &dyn CheckpointStore) -> Result<CheckpointRef, ModelError> {
        let state = self.to_state()?;
        let (id, path) = store.store(&state)?;
        tracing::info!(id = %id, path = %path.display(), "Checkpoint saved");
        self.latest_checkpoint = Some(id.clone());
        Ok(CheckpointRef { id, path })
    }

    /// Load a model from the checkpoint `id`. The result has no reference batch.
    pub fn load_from_disk(store: &dyn CheckpointStore, id: &str) -> Result<Self, ModelError> {
        Self::load_from_disk_on(store, id, &Device::Cpu)
    }

    /// Like [`Self::load_from_disk`], placing parameters on `device`.
    pub fn load_from_disk_on(
        store: &dyn CheckpointStore,
        id: &str,
        device: &Device,
    ) -> Result<Self, ModelError> {
        let state = store.load(id)?;
        tracing::debug!(id, predictor = %state.predictor_kind, "Checkpoint loaded");
        let mut model = Self::from_state(state, device)?;
        // The stored state was captured before its own id existed.
        model.latest_checkpoint = Some(id.to_string());
        Ok(model)
    }

    /// Load the checkpoint most recently saved by this model.
    pub fn get_latest_from_disk(&self, store: &dyn CheckpointStore) -> Result<Self, ModelError> {
        let id = self
            .latest_checkpoint
            .as_deref()
            .ok_or_else(|| ModelError::not_found("no checkpoint has been saved for this model"))?;
        Self::load_from_disk_on(store, id, &self.device)
    }
}

/// Manifest entry for a checkpoint written by [`FileCheckpointStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub id: String,
    pub predictor_kind: String,
    pub path: PathBuf,
    pub hash: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

const MANIFEST_FILE: &str = "checkpoints.json";

/// Stores each checkpoint as `<base_dir>/<id>.json` and tracks them in a
/// `checkpoints.json` manifest, keeping at most `max_checkpoints` entries.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    base_dir: PathBuf,
    max_checkpoints: usize,
}

impl FileCheckpointStore {
    pub fn new(base_dir: impl Into<PathBuf>, max_checkpoints: usize) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_checkpoints: max_checkpoints.max(1),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn manifest_path(&self) -> PathBuf {
        self.base_dir.join(MANIFEST_FILE)
    }

    fn checkpoint_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }

    /// Manifest entries, oldest first. A missing manifest means no checkpoints.
    pub fn list(&self) -> Result<Vec<CheckpointRecord>, ModelError> {
        match std::fs::read(self.manifest_path()) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_manifest(&self, records: &[CheckpointRecord]) -> Result<(), ModelError> {
        let bytes = serde_json::to_vec_pretty(records)?;
        replace_file(&self.manifest_path(), &bytes)?;
        Ok(())
    }

    /// Most recently written checkpoint, if any.
    pub fn latest(&self) -> Result<Option<CheckpointRecord>, ModelError> {
        Ok(self.list()?.pop())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn store(&self, state: &ModelState) -> Result<(String, PathBuf), ModelError> {
        let id = uuid::Uuid::new_v4().to_string();
        let path = self.checkpoint_path(&id);
        let payload = serde_json::to_vec(state)?;
        std::fs::create_dir_all(&self.base_dir)?;
        replace_file(&path, &payload)?;

        let hash = format!("{:x}", Sha256::digest(&payload));
        let mut records = self.list()?;
        records.push(CheckpointRecord {
            id: id.clone(),
            predictor_kind: state.predictor_kind.clone(),
            path: path.clone(),
            hash,
            size_bytes: payload.len() as u64,
            created_at: Utc::now(),
        });

        // Enforce max_checkpoints by removing oldest entries.
        while records.len() > self.max_checkpoints {
            let old = records.remove(0);
            if let Err(e) = std::fs::remove_file(&old.path) {
                tracing::warn!(id = %old.id, error = %e, "Failed to remove pruned checkpoint");
            }
        }

        self.write_manifest(&records)?;
        Ok((id, path))
    }

    fn load(&self, id: &str) -> Result<ModelState, ModelError> {
        let path = self.checkpoint_path(id);
        let payload = match std::fs::read(&path) {
            Ok(payload) => payload,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ModelError::not_found(format!("checkpoint {id}")));
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(record) = self.list()?.into_iter().find(|r| r.id == id) {
            let hash = format!("{:x}", Sha256::digest(&payload));
            if hash != record.hash {
                return Err(ModelError::storage(format!(
                    "checkpoint {id} does not match its recorded hash"
                )));
            }
        }

        Ok(serde_json::from_slice(&payload)?)
    }
}

/// Stage `bytes` in a `.partial` sibling and rename it over `path`, so a
/// reader sees either the old file or the complete new one.
fn replace_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let staging = path.with_extension("json.partial");
    std::fs::write(&staging, bytes)?;
    std::fs::rename(&staging, path)
}

/// Keeps states in memory; paths are synthetic `memory://<id>` locations.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    states: Mutex<HashMap<String, ModelState>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn store(&self, state: &ModelState) -> Result<(String, PathBuf), ModelError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.states
            .lock()
            .map_err(|_| ModelError::storage("checkpoint store lock poisoned"))?
            .insert(id.clone(), state.clone());
        let path = PathBuf::from(format!("memory://{id}"));
        Ok((id, path))
    }

    fn load(&self, id: &str) -> Result<ModelState, ModelError> {
        self.states
            .lock()
            .map_err(|_| ModelError::storage("checkpoint store lock poisoned"))?
            .get(id)
            .cloned()
            .ok_or_else(|| ModelError::not_found(format!("checkpoint {id}")))
    }
}
