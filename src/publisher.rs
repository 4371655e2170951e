//! State Publisher (component G): writes an atomic JSON snapshot of the
//! aggregated cluster state.

use crate::model::{MemberState, ObservedState};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Serialize)]
struct Snapshot<'a> {
    db_nodes: &'a HashMap<String, MemberState>,
    observer_nodes: &'a HashMap<String, ObservedState>,
    current_master: &'a Option<String>,
}

/// Writes the snapshot to a sibling temp file, then renames it over the
/// target so readers never observe a partially-written document.
///
/// # Errors
///
/// Returns an error on any I/O or serialisation failure.
pub fn write(
    path: &Path,
    db_nodes: &HashMap<String, MemberState>,
    observer_nodes: &HashMap<String, ObservedState>,
    current_master: &Option<String>,
) -> Result<()> {
    let snapshot = Snapshot {
        db_nodes,
        observer_nodes,
        current_master,
    };
    let json = serde_json::to_string_pretty(&snapshot).context("serialising state snapshot")?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn writes_valid_json_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut db_nodes = HashMap::new();
        db_nodes.insert("a".to_string(), MemberState::default());

        write(&path, &db_nodes, &HashMap::new(), &Some("a".to_string())).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["current_master"], "a");
        assert!(parsed["db_nodes"]["a"].is_object());
        assert!(!dir.path().join("state.json.tmp").exists());
    }
}
