use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::errors::{DandisetError, MergeError};
use crate::model::{DatasetSummary, DANDISET_METADATA_FILE};
use crate::sidecar::SidecarEngine;

/// A dataset directory together with its `dandiset.yaml` record.
#[derive(Debug, Clone)]
pub struct Dandiset {
    path: PathBuf,
    metadata_path: PathBuf,
    metadata: Option<Mapping>,
    engine: SidecarEngine,
}

impl Dandiset {
    /// The dandiset rooted at `path`, with its sidecar not read yet.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            metadata_path: path.join(DANDISET_METADATA_FILE),
            path,
            metadata: None,
            engine: SidecarEngine::default(),
        }
    }

    /// Opens and loads the dandiset rooted at `path`. Without `allow_empty` the sidecar must exist.
    pub fn open(path: impl Into<PathBuf>, allow_empty: bool) -> Result<Self, DandisetError> {
        let mut dandiset = Self::at(path);
        if !allow_empty && !dandiset.metadata_path.is_file() {
            return Err(DandisetError::NotADandiset(dandiset.path));
        }
        dandiset.load()?;
        Ok(dandiset)
    }

    /// Finds the dandiset containing `path`, checking `path` itself and then its parents.
    pub fn find(path: &Path) -> Result<Option<Self>, DandisetError> {
        match path
            .ancestors()
            .find(|candidate| candidate.join(DANDISET_METADATA_FILE).is_file())
        {
            Some(root) => Self::open(root, false).map(Some),
            None => Ok(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata_path(&self) -> &Path {
        &self.metadata_path
    }

    pub fn metadata(&self) -> Option<&Mapping> {
        self.metadata.as_ref()
    }

    /// Re-reads the sidecar from disk with a plain YAML parser.
    pub fn load(&mut self) -> Result<Option<&Mapping>, DandisetError> {
        self.metadata = read_mapping(&self.metadata_path)?;
        Ok(self.metadata.as_ref())
    }

    /// Merges `summary` into the sidecar and keeps the merged mapping as the
    /// loaded metadata. The file is read once; nothing happens for an empty summary.
    pub fn update(&mut self, summary: &DatasetSummary) -> Result<bool, DandisetError> {
        match self.engine.merge_and_write(&self.metadata_path, summary)? {
            Some(document) => {
                self.metadata = Some(document.to_mapping());
                Ok(true)
            }
            None => {
                debug!("No updates to metadata, returning");
                Ok(false)
            }
        }
    }

    pub fn identifier(&self) -> Result<String, DandisetError> {
        let missing = || DandisetError::MissingIdentifier(self.metadata_path.clone());
        let value = self
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.get("identifier"))
            .ok_or_else(missing)?;
        match value {
            Value::String(text) => Ok(text.clone()),
            Value::Number(number) => Ok(number.to_string()),
            _ => Err(missing()),
        }
    }
}

fn read_mapping(path: &Path) -> Result<Option<Mapping>, MergeError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(MergeError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if text.trim().is_empty() {
        return Ok(None);
    }

    match serde_yaml::from_str::<Value>(&text) {
        Ok(Value::Mapping(mapping)) => Ok(Some(mapping)),
        Ok(Value::Null) => Ok(None),
        Ok(_) => Err(MergeError::NotAMapping {
            path: path.to_path_buf(),
        }),
        Err(source) => Err(MergeError::Parse {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_yaml::Value;
    use tempfile::TempDir;

    use super::Dandiset;
    use crate::aggregate::aggregate;
    use crate::errors::{DandisetError, MergeError};
    use crate::model::{DatasetSummary, MetadataField, MetadataRecord};

    #[test]
    fn open_requires_sidecar_unless_empty_allowed() {
        let temp = TempDir::new().expect("tempdir");
        assert!(matches!(
            Dandiset::open(temp.path(), false),
            Err(DandisetError::NotADandiset(_))
        ));

        let dandiset = Dandiset::open(temp.path(), true).expect("allow empty");
        assert!(dandiset.metadata().is_none());
        assert!(matches!(
            dandiset.identifier(),
            Err(DandisetError::MissingIdentifier(_))
        ));
    }

    #[test]
    fn find_walks_up_to_the_sidecar() {
        let temp = TempDir::new().expect("tempdir");
        fs::write(temp.path().join("dandiset.yaml"), "identifier: '000027'\n").expect("write");
        let nested = temp.path().join("sub-1").join("deeper");
        fs::create_dir_all(&nested).expect("mkdir");

        let dandiset = Dandiset::find(&nested)
            .expect("find")
            .expect("dandiset found");
        assert_eq!(dandiset.path(), temp.path());
        assert_eq!(dandiset.identifier().expect("identifier"), "000027");

        let elsewhere = TempDir::new().expect("tempdir");
        assert!(Dandiset::find(elsewhere.path()).expect("find").is_none());
    }

    #[test]
    fn update_merges_and_keeps_merged_metadata() {
        let temp = TempDir::new().expect("tempdir");
        fs::write(temp.path().join("dandiset.yaml"), "identifier: abc\n").expect("write");
        let mut dandiset = Dandiset::open(temp.path(), false).expect("open");

        assert!(!dandiset.update(&DatasetSummary::default()).expect("noop"));

        let records = vec![MetadataRecord::new()
            .with(MetadataField::SubjectId, "s1")
            .with(MetadataField::Sex, "F")];
        assert!(dandiset.update(&aggregate(&records)).expect("update"));

        let metadata = dandiset.metadata().expect("metadata");
        assert_eq!(metadata.get("number_subjects"), Some(&Value::from(1)));
        assert_eq!(dandiset.identifier().expect("identifier"), "abc");
    }

    #[test]
    fn at_defers_reading_until_update() {
        let temp = TempDir::new().expect("tempdir");
        fs::write(temp.path().join("dandiset.yaml"), "id: [unterminated\n").expect("write");

        let mut dandiset = Dandiset::at(temp.path());
        assert!(dandiset.metadata().is_none());

        let records = vec![MetadataRecord::new().with(MetadataField::CellId, "c1")];
        let err = dandiset
            .update(&aggregate(&records))
            .expect_err("corrupt sidecar");
        assert!(matches!(err, DandisetError::Merge(MergeError::Parse { .. })));
    }

    #[test]
    fn update_on_a_fresh_directory_creates_the_sidecar() {
        let temp = TempDir::new().expect("tempdir");
        let mut dandiset = Dandiset::at(temp.path().join("new"));

        let records = vec![MetadataRecord::new().with(MetadataField::SubjectId, "s1")];
        assert!(dandiset.update(&aggregate(&records)).expect("update"));
        assert_eq!(
            dandiset
                .metadata()
                .and_then(|metadata| metadata.get("number_subjects")),
            Some(&Value::from(1))
        );
        assert!(dandiset.metadata_path().is_file());
    }
}
