//! JSON snapshots of the memory backend.
//!
//! ```json
//! { "tables": { "users": [{ "id": 1, "uid": "alice" }] } }
//! ```
//!
//! Saving writes a sibling temp file and renames it over the target, so a
//! crash leaves either the old snapshot or the new one.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use vdir_engine::Row;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub tables: BTreeMap<String, Vec<Row>>,
}

impl Snapshot {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("parsing snapshot")
    }
}

pub fn load_snapshot(path: &Path) -> anyhow::Result<Snapshot> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    Snapshot::from_json(&text).with_context(|| format!("loading snapshot {}", path.display()))
}

pub fn save_snapshot(path: &Path, snapshot: &Snapshot) -> anyhow::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating snapshot directory {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(snapshot)?;
    let tmp = temp_path(path);
    std::fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("replacing snapshot {}", path.display()))?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use vdir_mapping::Value;

    #[test]
    fn test_save_replaces_atomically() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("tables.json");

        let mut snapshot = Snapshot::default();
        snapshot.tables.insert(
            "users".to_string(),
            vec![Row::from_pairs([("id", Value::Integer(1))])],
        );
        save_snapshot(&path, &snapshot).unwrap();
        assert!(!temp_path(&path).exists());
        assert_eq!(load_snapshot(&path).unwrap(), snapshot);

        snapshot.tables.clear();
        save_snapshot(&path, &snapshot).unwrap();
        assert!(load_snapshot(&path).unwrap().tables.is_empty());
    }

    #[test]
    fn test_single_values_and_lists_both_load() {
        let snapshot =
            Snapshot::from_json(r#"{ "tables": { "emails": [{ "user_id": 1, "address": ["a", "b"] }] } }"#)
                .unwrap();
        let row = &snapshot.tables["emails"][0];
        assert_eq!(row.get("address").map(<[Value]>::len), Some(2));
        assert_eq!(row.first("user_id"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_missing_file_names_the_path() {
        let dir = tempdir().unwrap();
        let err = load_snapshot(&dir.path().join("absent.json")).unwrap_err();
        assert!(format!("{err:#}").contains("absent.json"));
    }
}
