use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};

use crate::model::{FileRecord, MetadataRecord};
use crate::paths::{absolutize, normalize};

/// Per-file metadata produced by an upstream extraction step.
#[derive(Debug, Clone, Default)]
pub struct MetadataManifest {
    entries: HashMap<PathBuf, MetadataRecord>,
}

type RawManifest = BTreeMap<String, serde_json::Map<String, serde_json::Value>>;

/// Reads a JSON or YAML manifest mapping file paths to field/value mappings.
/// Relative paths are taken relative to the manifest's own directory.
pub fn load_manifest(path: &Path) -> Result<MetadataManifest> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw: RawManifest = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&data)
            .with_context(|| format!("failed to parse {}", path.display()))?,
        Some("json") | None => serde_json::from_str(&data)
            .with_context(|| format!("failed to parse {}", path.display()))?,
        Some(other) => {
            return Err(anyhow!(
                "unsupported manifest format '.{other}' for {}; use .json or .yaml",
                path.display()
            ))
        }
    };

    let base_dir = absolutize(path)
        .with_context(|| format!("failed to resolve {}", path.display()))?
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let mut manifest = MetadataManifest::default();
    for (file, fields) in raw {
        manifest.insert(
            normalize(&base_dir.join(file)),
            MetadataRecord::from_json_map(&fields),
        );
    }
    if manifest.is_empty() {
        warn!("{} lists no files", path.display());
    } else {
        info!(
            "loaded metadata for {} file(s) from {}",
            manifest.len(),
            path.display()
        );
    }
    Ok(manifest)
}

impl MetadataManifest {
    pub fn insert(&mut self, path: PathBuf, record: MetadataRecord) {
        self.entries.insert(path, record);
    }

    pub fn get(&self, path: &Path) -> Option<&MetadataRecord> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pairs each file with its metadata, in the order given. Files the
    /// manifest does not mention get an empty record.
    pub fn records_for(&self, files: &[PathBuf]) -> Vec<FileRecord> {
        files
            .iter()
            .map(|file| {
                let key = absolutize(file).unwrap_or_else(|_| normalize(file));
                let metadata = match self.entries.get(&key) {
                    Some(record) => record.clone(),
                    None => {
                        debug!("no metadata recorded for {}", file.display());
                        MetadataRecord::default()
                    }
                };
                FileRecord::new(key, metadata)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::load_manifest;
    use crate::model::{MetadataField, MetadataValue};

    #[test]
    fn loads_json_with_paths_relative_to_manifest() {
        let temp = TempDir::new().expect("tempdir");
        let manifest_path = temp.path().join("metadata.json");
        fs::write(
            &manifest_path,
            r#"{"raw/a.nwb": {"subject_id": "RAT123", "age": 3, "lab": "x"}}"#,
        )
        .expect("write");

        let manifest = load_manifest(&manifest_path).expect("load");
        let records = manifest.records_for(&[
            temp.path().join("raw").join("a.nwb"),
            temp.path().join("raw").join("b.nwb"),
        ]);

        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].metadata.get(MetadataField::SubjectId),
            Some(&MetadataValue::Text("RAT123".to_string()))
        );
        assert!(records[1].metadata.is_empty());
        assert!(records.iter().all(|record| record.destination.is_none()));
    }

    #[test]
    fn loads_yaml_manifest() {
        let temp = TempDir::new().expect("tempdir");
        let manifest_path = temp.path().join("metadata.yaml");
        let data_file = temp.path().join("a.nwb");
        fs::write(
            &manifest_path,
            format!("{}:\n  subject_id: s1\n  sex: F\n", data_file.display()),
        )
        .expect("write");

        let manifest = load_manifest(&manifest_path).expect("load");
        let record = manifest.get(&data_file).expect("record");
        assert_eq!(
            record.get(MetadataField::Sex),
            Some(&MetadataValue::Text("F".to_string()))
        );
    }

    #[test]
    fn empty_manifest_loads_as_empty() {
        let temp = TempDir::new().expect("tempdir");
        let manifest_path = temp.path().join("metadata.json");
        fs::write(&manifest_path, "{}").expect("write");

        let manifest = load_manifest(&manifest_path).expect("load");
        assert!(manifest.is_empty());
        assert_eq!(manifest.len(), 0);

        let records = manifest.records_for(&[temp.path().join("a.nwb")]);
        assert!(records[0].metadata.is_empty());
    }

    #[test]
    fn rejects_unknown_format() {
        let temp = TempDir::new().expect("tempdir");
        let manifest_path = temp.path().join("metadata.csv");
        fs::write(&manifest_path, "a,b\n").expect("write");
        assert!(load_manifest(&manifest_path).is_err());
    }
}
