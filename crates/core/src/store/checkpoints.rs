//! Atomic checkpoint store with integrity verification.
//!
//! Write contract: after `save` returns, `checkpoint_NNNN.json` either
//! holds the complete serialization or does not exist. Protocol:
//! serialize, hash, temp file in the destination directory, write,
//! fsync, atomic rename, then the `.sha256` sidecar. Reads verify the
//! digest before deserializing and migrate older schemas forward.
//! Corrupt checkpoints are quarantined, never deleted.

use crate::error::PipelineError;
use crate::state::{migrate_state_value, ResearchState};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Rotation keeps at least this many checkpoints regardless of
/// configuration, so a crash during the newest write still leaves a
/// valid predecessor.
const ROTATION_FLOOR: usize = 2;

pub struct CheckpointStore {
    directory: PathBuf,
    max_keep: usize,
}

impl CheckpointStore {
    pub fn new(directory: impl Into<PathBuf>, max_keep: usize) -> Result<Self, PipelineError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        Ok(Self { directory, max_keep })
    }

    fn checkpoint_path(&self, step: u64) -> PathBuf {
        self.directory.join(format!("checkpoint_{step:04}.json"))
    }

    fn sidecar_path(&self, step: u64) -> PathBuf {
        self.directory.join(format!("checkpoint_{step:04}.sha256"))
    }

    fn hex_digest(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    /// Atomically persist the state as checkpoint `step`.
    pub fn save(&self, state: &ResearchState, step: u64) -> Result<PathBuf, PipelineError> {
        let payload = serde_json::to_vec_pretty(state)?;
        let digest = Self::hex_digest(&payload);

        let destination = self.checkpoint_path(step);
        Self::atomic_write(&self.directory, &destination, &payload)?;
        Self::atomic_write(&self.directory, &self.sidecar_path(step), digest.as_bytes())?;

        self.rotate()?;

        tracing::info!(
            checkpoint = %destination.display(),
            step,
            size_bytes = payload.len(),
            "checkpoint_saved"
        );
        Ok(destination)
    }

    /// Write bytes via temp file -> fsync -> rename. The temp file is
    /// removed on any failure (`NamedTempFile` deletes on drop).
    fn atomic_write(directory: &Path, destination: &Path, data: &[u8]) -> Result<(), PipelineError> {
        let mut temp = NamedTempFile::new_in(directory)?;
        temp.write_all(data)?;
        temp.as_file().sync_all()?;
        temp.persist(destination)
            .map_err(|e| PipelineError::Checkpoint(format!("rename failed: {e}")))?;
        Ok(())
    }

    /// Load and verify checkpoint `step`, migrating the schema forward.
    pub fn load(&self, step: u64) -> Result<ResearchState, PipelineError> {
        let path = self.checkpoint_path(step);
        let checkpoint_id = format!("checkpoint_{step:04}");

        let payload = std::fs::read(&path)?;
        let sidecar = std::fs::read_to_string(self.sidecar_path(step)).map_err(|_| {
            PipelineError::CheckpointCorrupt {
                checkpoint_id: checkpoint_id.clone(),
                detail: "integrity sidecar missing".to_string(),
            }
        })?;

        let expected = sidecar.trim();
        let actual = Self::hex_digest(&payload);
        if actual != expected {
            return Err(PipelineError::CheckpointCorrupt {
                checkpoint_id,
                detail: format!("expected {expected}, got {actual}"),
            });
        }

        let value: serde_json::Value = serde_json::from_slice(&payload).map_err(|e| {
            PipelineError::CheckpointCorrupt {
                checkpoint_id: checkpoint_id.clone(),
                detail: format!("unparseable JSON: {e}"),
            }
        })?;
        let migrated = migrate_state_value(value)?;
        let state: ResearchState = serde_json::from_value(migrated)?;

        tracing::info!(checkpoint_id = %checkpoint_id, "checkpoint_loaded");
        Ok(state)
    }

    /// Step numbers of all checkpoints on disk, newest first.
    pub fn list_steps(&self) -> Result<Vec<u64>, PipelineError> {
        let mut steps = Vec::new();
        for entry in std::fs::read_dir(&self.directory)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(step) = name
                .strip_prefix("checkpoint_")
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|digits| digits.parse::<u64>().ok())
            {
                steps.push(step);
            }
        }
        steps.sort_unstable_by(|a, b| b.cmp(a));
        Ok(steps)
    }

    pub fn latest_step(&self) -> Result<Option<u64>, PipelineError> {
        Ok(self.list_steps()?.into_iter().next())
    }

    /// Find the newest checkpoint that verifies, quarantining any
    /// corrupt ones encountered along the way. `None` means fresh start.
    pub fn recover(&self) -> Result<Option<(u64, ResearchState)>, PipelineError> {
        for step in self.list_steps()? {
            match self.load(step) {
                Ok(state) => {
                    tracing::info!(step, "recovery_success");
                    return Ok(Some((step, state)));
                }
                Err(PipelineError::CheckpointCorrupt { checkpoint_id, detail }) => {
                    tracing::warn!(
                        checkpoint_id = %checkpoint_id,
                        detail = %detail,
                        "recovery_quarantine"
                    );
                    self.quarantine(step)?;
                }
                Err(err) => {
                    tracing::warn!(step, error = %err, "recovery_skip");
                }
            }
        }
        tracing::info!("recovery_fresh_start");
        Ok(None)
    }

    /// Move a corrupt checkpoint (data + sidecar) under `quarantine/`.
    fn quarantine(&self, step: u64) -> Result<(), PipelineError> {
        let quarantine_dir = self.directory.join("quarantine");
        std::fs::create_dir_all(&quarantine_dir)?;

        for path in [self.checkpoint_path(step), self.sidecar_path(step)] {
            if path.exists() {
                let destination = quarantine_dir.join(path.file_name().unwrap());
                std::fs::rename(&path, &destination)?;
            }
        }

        tracing::info!(step, "checkpoint_quarantined");
        Ok(())
    }

    /// Remove the oldest checkpoints beyond `max(max_keep, 2)`.
    fn rotate(&self) -> Result<(), PipelineError> {
        let effective_max = self.max_keep.max(ROTATION_FLOOR);
        let steps = self.list_steps()?;
        for step in steps.into_iter().skip(effective_max) {
            for path in [self.checkpoint_path(step), self.sidecar_path(step)] {
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
            }
            tracing::debug!(step, "checkpoint_rotated");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ResearchState;

    fn store(dir: &Path, max_keep: usize) -> CheckpointStore {
        CheckpointStore::new(dir, max_keep).unwrap()
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 5);

        let mut state = ResearchState::new("run-rt", "roundtrip");
        state.total_cost = 0.42;
        store.save(&state, 1).unwrap();

        let loaded = store.load(1).unwrap();
        assert_eq!(loaded.run_id, "run-rt");
        assert_eq!(loaded.total_cost, 0.42);
    }

    #[test]
    fn test_sidecar_matches_payload_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 5);
        let state = ResearchState::new("run-h", "hash");
        let path = store.save(&state, 1).unwrap();

        let payload = std::fs::read(&path).unwrap();
        let sidecar = std::fs::read_to_string(dir.path().join("checkpoint_0001.sha256")).unwrap();
        assert_eq!(sidecar.trim(), CheckpointStore::hex_digest(&payload));
    }

    #[test]
    fn test_truncated_checkpoint_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 5);
        let state = ResearchState::new("run-c", "corrupt");
        let path = store.save(&state, 5).unwrap();

        // Truncate the payload by 50 bytes without touching the sidecar.
        let payload = std::fs::read(&path).unwrap();
        std::fs::write(&path, &payload[..payload.len() - 50]).unwrap();

        match store.load(5) {
            Err(PipelineError::CheckpointCorrupt { checkpoint_id, .. }) => {
                assert_eq!(checkpoint_id, "checkpoint_0005");
            }
            other => panic!("expected corruption error, got {other:?}"),
        }
    }

    #[test]
    fn test_recover_quarantines_corrupt_and_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 5);

        let mut state = ResearchState::new("run-q", "quarantine");
        store.save(&state, 4).unwrap();
        state.total_tokens = 999;
        let newest = store.save(&state, 5).unwrap();

        let payload = std::fs::read(&newest).unwrap();
        std::fs::write(&newest, &payload[..payload.len() - 50]).unwrap();

        let (step, recovered) = store.recover().unwrap().expect("should recover");
        assert_eq!(step, 4);
        assert_eq!(recovered.total_tokens, 0);

        // Corrupt data and sidecar moved under quarantine/.
        let quarantine = dir.path().join("quarantine");
        assert!(quarantine.join("checkpoint_0005.json").exists());
        assert!(quarantine.join("checkpoint_0005.sha256").exists());
        assert!(!dir.path().join("checkpoint_0005.json").exists());
    }

    #[test]
    fn test_recover_empty_directory_is_fresh_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 5);
        assert!(store.recover().unwrap().is_none());
    }

    #[test]
    fn test_rotation_respects_floor_of_two() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 1);
        let state = ResearchState::new("run-r", "rotate");

        for step in 1..=4 {
            store.save(&state, step).unwrap();
        }

        let steps = store.list_steps().unwrap();
        assert_eq!(steps, vec![4, 3]);
        assert!(!dir.path().join("checkpoint_0001.sha256").exists());
    }

    #[test]
    fn test_rotation_keeps_max_keep() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 3);
        let state = ResearchState::new("run-r", "rotate");

        for step in 1..=5 {
            store.save(&state, step).unwrap();
        }

        assert_eq!(store.list_steps().unwrap(), vec![5, 4, 3]);
    }

    #[test]
    fn test_missing_sidecar_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path(), 5);
        let state = ResearchState::new("run-m", "missing");
        store.save(&state, 1).unwrap();
        std::fs::remove_file(dir.path().join("checkpoint_0001.sha256")).unwrap();

        assert!(matches!(
            store.load(1),
            Err(PipelineError::CheckpointCorrupt { .. })
        ));
    }
}
