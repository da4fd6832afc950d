//! Relationship persistence. The on-disk format is a two-key dictionary
//! `{relationships: {id -> record}, intensities: {id -> intensity}}` encoded
//! as indented UTF-8 JSON with RFC 3339 timestamps.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::RelationshipEngine;
use crate::error::{RelationshipError, Result};
use crate::types::{IntensitySnapshot, RelationshipRecord};

#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    relationships: BTreeMap<String, RelationshipRecord>,
    intensities: BTreeMap<String, IntensitySnapshot>,
}

/// Serialize the engine's records (and their derived intensities) to bytes.
pub fn save_to_bytes(engine: &RelationshipEngine) -> Result<Vec<u8>> {
    let mut relationships = BTreeMap::new();
    let mut intensities = BTreeMap::new();
    for record in engine.records_snapshot() {
        let snapshot = engine.intensity_of(&record);
        intensities.insert(record.id.clone(), snapshot);
        relationships.insert(record.id.clone(), record);
    }
    let state = PersistedState {
        relationships,
        intensities,
    };
    Ok(serde_json::to_vec_pretty(&state)?)
}

/// Load persisted records back into the engine. Intensities are re-derived
/// on demand, so only the records are restored.
pub fn load_from_bytes(engine: &RelationshipEngine, bytes: &[u8]) -> Result<usize> {
    let state: PersistedState = serde_json::from_slice(bytes)?;
    let count = state.relationships.len();
    engine.restore_records(state.relationships.into_values().collect());
    info!(count, "relationship records loaded");
    Ok(count)
}

/// Write-all-or-nothing save via temp-file-plus-rename.
pub fn save_to_path(engine: &RelationshipEngine, path: &Path) -> Result<()> {
    let bytes = save_to_bytes(engine)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| RelationshipError::Io(e.error))?;
    Ok(())
}

pub fn load_from_path(engine: &RelationshipEngine, path: &Path) -> Result<usize> {
    let bytes = std::fs::read(path)?;
    load_from_bytes(engine, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InteractionUpdate;
    use colloquy_core::config::RelationshipConfig;
    use colloquy_core::types::ParticipantKind;

    fn populated_engine() -> RelationshipEngine {
        let engine = RelationshipEngine::new(RelationshipConfig::default());
        for user in ["u1", "u2", "u3"] {
            for _ in 0..10 {
                engine
                    .update_interaction(
                        InteractionUpdate::new(
                            user,
                            ParticipantKind::Human,
                            "assistant",
                            ParticipantKind::Ai,
                        )
                        .with_resonance(true),
                    )
                    .unwrap();
            }
        }
        engine
    }

    #[test]
    fn format_has_the_two_normative_keys() {
        let engine = populated_engine();
        let bytes = save_to_bytes(&engine).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("relationships").is_some());
        assert!(value.get("intensities").is_some());
        assert_eq!(value["relationships"].as_object().unwrap().len(), 3);
        assert_eq!(value["intensities"].as_object().unwrap().len(), 3);
        // Indented output, not a single line.
        assert!(bytes.windows(2).any(|w| w == b"\n ".as_slice()));
    }

    #[test]
    fn roundtrip_is_fieldwise_equal() {
        let engine = populated_engine();
        let before = engine.records_snapshot();
        let bytes = save_to_bytes(&engine).unwrap();

        let restored = RelationshipEngine::new(RelationshipConfig::default());
        let count = load_from_bytes(&restored, &bytes).unwrap();
        assert_eq!(count, 3);

        let after = restored.records_snapshot();
        assert_eq!(before, after);
        // Symmetric lookup still works after restore.
        let record = restored.lookup("assistant", "u1").unwrap();
        assert_eq!(record.total_interaction_rounds, 10);
    }

    #[test]
    fn save_to_path_replaces_atomically() {
        let engine = populated_engine();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relationships.json");
        save_to_path(&engine, &path).unwrap();
        assert!(path.exists());

        // A second save overwrites in place without leaving temp litter.
        save_to_path(&engine, &path).unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);

        let restored = RelationshipEngine::new(RelationshipConfig::default());
        assert_eq!(load_from_path(&restored, &path).unwrap(), 3);
    }
}
