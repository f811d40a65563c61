//! Deterministic snapshot fingerprints using blake3.
//!
//! A fingerprint identifies one exact scene state. The undo history records
//! the fingerprint of the snapshot it was saved alongside, so a history
//! paired with a different snapshot is detected on load.
//!
//! # Determinism
//!
//! The snapshot serializes registries in id order, tags in registry order
//! and the palette as a sorted map; `serde_json::to_vec` of the same scene
//! therefore always yields the same bytes.

use rflow_core::SceneGraph;

use crate::error::StorageError;

/// Hashes already-serialized snapshot bytes, returning lowercase hex.
fn fingerprint_bytes(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Computes the fingerprint of a scene's canonical JSON form.
pub fn snapshot_fingerprint(scene: &SceneGraph) -> Result<String, StorageError> {
    let bytes = serde_json::to_vec(scene)?;
    Ok(fingerprint_bytes(&bytes))
}
