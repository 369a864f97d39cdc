//! Durable snapshot store for optimizer output.
//!
//! Writes go to a temp file and land with an atomic rename; the previous
//! snapshot is kept as `.bak`. Each snapshot is wrapped in an envelope with
//! a blake3 content hash used purely as an integrity check on load —
//! `load_or_recover` falls back to the backup when the primary is corrupt,
//! and to `None` when both are.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    hash: String,
    payload: serde_json::Value,
}

/// Owned store for one snapshot file.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self) -> PathBuf {
        self.path.with_extension("bak")
    }

    /// Persist a snapshot durably: hash, write to temp, atomic rename.
    pub fn persist<T: Serialize>(&self, snapshot: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let payload = serde_json::to_value(snapshot)?;
        let hash = blake3::hash(&serde_json::to_vec(&payload)?).to_hex().to_string();
        let envelope = Envelope { hash, payload };
        let bytes = serde_json::to_vec_pretty(&envelope)?;

        // Keep the previous good snapshot around for recovery.
        if self.path.exists() {
            let _ = std::fs::copy(&self.path, self.backup_path());
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)
            .with_context(|| format!("failed to write snapshot temp file {:?}", tmp))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to move snapshot into place at {:?}", self.path))?;

        Ok(())
    }

    fn try_load<T: DeserializeOwned>(path: &Path) -> Option<T> {
        let bytes = std::fs::read(path).ok()?;
        let envelope: Envelope = serde_json::from_slice(&bytes).ok()?;

        let recomputed = blake3::hash(&serde_json::to_vec(&envelope.payload).ok()?)
            .to_hex()
            .to_string();
        if recomputed != envelope.hash {
            warn!("Snapshot {:?} failed integrity check", path);
            return None;
        }

        serde_json::from_value(envelope.payload).ok()
    }

    /// Load the snapshot, recovering from the backup if the primary is
    /// missing or corrupt. `None` means start fresh.
    pub fn load_or_recover<T: DeserializeOwned>(&self) -> Option<T> {
        if let Some(value) = Self::try_load(&self.path) {
            return Some(value);
        }

        let backup = self.backup_path();
        if backup.exists() {
            warn!("Recovering snapshot from backup {:?}", backup);
            return Self::try_load(&backup);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RegimeParamSet, StrategyParams};
    use crate::regime::Regime;

    fn temp_store(name: &str) -> SnapshotStore {
        let dir = std::env::temp_dir().join("zerodte-store-test");
        let store = SnapshotStore::open(dir.join(name));
        let _ = std::fs::remove_file(store.path());
        let _ = std::fs::remove_file(store.backup_path());
        store
    }

    #[test]
    fn persist_and_reload() {
        let store = temp_store("params.json");
        let mut set = RegimeParamSet::default();
        set.set(Regime::BullTrend, StrategyParams { renko_k: 1.2, ..Default::default() });

        store.persist(&set).unwrap();
        let loaded: RegimeParamSet = store.load_or_recover().unwrap();

        assert_eq!(loaded.get(Regime::BullTrend).unwrap().renko_k, 1.2);
        assert!(loaded.get(Regime::BearTrend).is_none());
    }

    #[test]
    fn corrupt_primary_recovers_from_backup() {
        let store = temp_store("recover.json");
        let first = RegimeParamSet {
            sideways: Some(StrategyParams::default()),
            ..Default::default()
        };
        store.persist(&first).unwrap();
        // Second persist moves the first snapshot to .bak.
        let second = RegimeParamSet {
            sideways: Some(StrategyParams { renko_k: 2.0, ..Default::default() }),
            ..Default::default()
        };
        store.persist(&second).unwrap();

        // Corrupt the primary.
        std::fs::write(store.path(), b"{ not json").unwrap();

        let recovered: RegimeParamSet = store.load_or_recover().unwrap();
        assert_eq!(recovered.get(Regime::Sideways).unwrap().renko_k, 1.0);
    }

    #[test]
    fn tampered_payload_fails_integrity() {
        let store = temp_store("tamper.json");
        store.persist(&RegimeParamSet::default()).unwrap();

        // Flip a byte inside the payload while keeping valid JSON.
        let text = std::fs::read_to_string(store.path()).unwrap();
        let tampered = text.replacen("null", "1234", 1);
        if tampered != text {
            std::fs::write(store.path(), tampered).unwrap();
            let loaded: Option<RegimeParamSet> = store.load_or_recover();
            assert!(loaded.is_none());
        }
    }
}
