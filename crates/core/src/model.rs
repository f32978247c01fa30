use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ConfigurationError;

pub const REPORT_VERSION: &str = "1.0.0";
pub const DANDISET_METADATA_FILE: &str = "dandiset.yaml";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetadataField {
    SubjectId,
    SessionId,
    TissueSampleId,
    SliceId,
    CellId,
    Sex,
    Species,
    Age,
}

/// How a field takes part in dataset-level aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Distinct values are counted.
    Identifier,
    /// Distinct values are listed.
    Categorical,
    /// Values contribute to a minimum/maximum range.
    Measurement,
}

impl MetadataField {
    pub const ALL: [MetadataField; 8] = [
        MetadataField::SubjectId,
        MetadataField::SessionId,
        MetadataField::TissueSampleId,
        MetadataField::SliceId,
        MetadataField::CellId,
        MetadataField::Sex,
        MetadataField::Species,
        MetadataField::Age,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MetadataField::SubjectId => "subject_id",
            MetadataField::SessionId => "session_id",
            MetadataField::TissueSampleId => "tissue_sample_id",
            MetadataField::SliceId => "slice_id",
            MetadataField::CellId => "cell_id",
            MetadataField::Sex => "sex",
            MetadataField::Species => "species",
            MetadataField::Age => "age",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.name() == name)
    }

    pub fn kind(self) -> FieldKind {
        match self {
            MetadataField::SubjectId
            | MetadataField::SessionId
            | MetadataField::TissueSampleId
            | MetadataField::SliceId
            | MetadataField::CellId => FieldKind::Identifier,
            MetadataField::Sex | MetadataField::Species => FieldKind::Categorical,
            MetadataField::Age => FieldKind::Measurement,
        }
    }

    /// Key written into the sidecar for this field's aggregate, if it has one.
    pub fn aggregate_key(self) -> Option<&'static str> {
        match self {
            MetadataField::SubjectId => Some("number_subjects"),
            MetadataField::TissueSampleId => Some("number_tissueSamples"),
            MetadataField::CellId => Some("number_cells"),
            MetadataField::Sex => Some("sex"),
            MetadataField::Species => Some("species"),
            MetadataField::Age => Some("age"),
            MetadataField::SessionId | MetadataField::SliceId => None,
        }
    }

    /// Entity prefix used when the field contributes to a planned file name.
    pub fn path_entity(self) -> Option<&'static str> {
        match self {
            MetadataField::SubjectId => Some("sub"),
            MetadataField::SessionId => Some("ses"),
            MetadataField::TissueSampleId => Some("tis"),
            MetadataField::SliceId => Some("slice"),
            MetadataField::CellId => Some("cell"),
            MetadataField::Sex | MetadataField::Species | MetadataField::Age => None,
        }
    }
}

impl fmt::Display for MetadataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    /// Numeric view used by measurement aggregates. Text is accepted when it parses as a number.
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            MetadataValue::Integer(value) => *value as f64,
            MetadataValue::Float(value) => *value,
            MetadataValue::Text(text) => text.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then_some(value)
    }

    pub fn to_yaml(&self) -> serde_yaml::Value {
        match self {
            MetadataValue::Integer(value) => serde_yaml::Value::from(*value),
            MetadataValue::Float(value) => serde_yaml::Value::from(*value),
            MetadataValue::Text(text) => serde_yaml::Value::String(text.clone()),
        }
    }

    fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(text) => Some(MetadataValue::Text(text.clone())),
            serde_json::Value::Number(number) => number
                .as_i64()
                .map(MetadataValue::Integer)
                .or_else(|| number.as_f64().map(MetadataValue::Float)),
            serde_json::Value::Bool(flag) => Some(MetadataValue::Text(flag.to_string())),
            serde_json::Value::Null
            | serde_json::Value::Array(_)
            | serde_json::Value::Object(_) => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Integer(value) => write!(f, "{value}"),
            MetadataValue::Float(value) => write!(f, "{value}"),
            MetadataValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

impl From<i32> for MetadataValue {
    fn from(value: i32) -> Self {
        MetadataValue::Integer(value.into())
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

/// Metadata extracted upstream for a single input file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataRecord {
    fields: BTreeMap<MetadataField, MetadataValue>,
}

impl MetadataRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: MetadataField, value: impl Into<MetadataValue>) -> Self {
        self.fields.insert(field, value.into());
        self
    }

    /// Builds a record from a loosely typed mapping, ignoring unrecognized field names
    /// and values that are not scalars.
    pub fn from_json_map(map: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut fields = BTreeMap::new();
        for (name, raw) in map {
            let Some(field) = MetadataField::from_name(name) else {
                debug!("ignoring unrecognized metadata field '{name}'");
                continue;
            };
            match MetadataValue::from_json(raw) {
                Some(value) => {
                    fields.insert(field, value);
                }
                None => debug!("ignoring non-scalar value for metadata field '{name}'"),
            }
        }
        Self { fields }
    }

    pub fn get(&self, field: MetadataField) -> Option<&MetadataValue> {
        self.fields.get(&field)
    }

    pub fn contains(&self, field: MetadataField) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One input file moving through an organize run.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub source: PathBuf,
    pub metadata: MetadataRecord,
    /// Relative path inside the dandiset, assigned once by the planner.
    pub destination: Option<PathBuf>,
}

impl FileRecord {
    pub fn new(source: impl Into<PathBuf>, metadata: MetadataRecord) -> Self {
        Self {
            source: source.into(),
            metadata,
            destination: None,
        }
    }

    pub fn with_destination(self, destination: PathBuf) -> Self {
        Self {
            destination: Some(destination),
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SummaryValue {
    Count(u64),
    Values(Vec<String>),
    Range {
        minimum: MetadataValue,
        maximum: MetadataValue,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryEntry {
    pub key: String,
    pub value: SummaryValue,
}

/// Dataset-level aggregate, recomputed wholesale on every run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DatasetSummary {
    entries: Vec<SummaryEntry>,
}

impl DatasetSummary {
    pub fn push(&mut self, key: impl Into<String>, value: SummaryValue) {
        let key = key.into();
        if let Some(existing) = self.entries.iter_mut().find(|entry| entry.key == key) {
            existing.value = value;
        } else {
            self.entries.push(SummaryEntry { key, value });
        }
    }

    pub fn get(&self, key: &str) -> Option<&SummaryValue> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| &entry.value)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SummaryEntry> {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidMode {
    /// Abort the run when a file lacks a required field.
    #[default]
    Error,
    /// Skip such files with a warning.
    Warn,
}

impl InvalidMode {
    pub const ALL: [InvalidMode; 2] = [InvalidMode::Error, InvalidMode::Warn];

    pub fn as_str(self) -> &'static str {
        match self {
            InvalidMode::Error => "error",
            InvalidMode::Warn => "warn",
        }
    }
}

impl FromStr for InvalidMode {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == value)
            .ok_or_else(|| {
                ConfigurationError::new(
                    "invalid-handling mode",
                    value,
                    Self::ALL.iter().map(|mode| mode.as_str()),
                )
            })
    }
}

impl fmt::Display for InvalidMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementMode {
    #[default]
    Dry,
    Simulate,
    Copy,
    Move,
    Symlink,
    SymlinkRelative,
}

impl PlacementMode {
    pub const ALL: [PlacementMode; 6] = [
        PlacementMode::Dry,
        PlacementMode::Simulate,
        PlacementMode::Copy,
        PlacementMode::Move,
        PlacementMode::Symlink,
        PlacementMode::SymlinkRelative,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PlacementMode::Dry => "dry",
            PlacementMode::Simulate => "simulate",
            PlacementMode::Copy => "copy",
            PlacementMode::Move => "move",
            PlacementMode::Symlink => "symlink",
            PlacementMode::SymlinkRelative => "symlink-relative",
        }
    }

    pub fn mutates_filesystem(self) -> bool {
        !matches!(self, PlacementMode::Dry | PlacementMode::Simulate)
    }
}

impl FromStr for PlacementMode {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == value)
            .ok_or_else(|| {
                ConfigurationError::new(
                    "placement mode",
                    value,
                    Self::ALL.iter().map(|mode| mode.as_str()),
                )
            })
    }
}

impl fmt::Display for PlacementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file left out of the run because required fields were missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub missing: Vec<MetadataField>,
}

/// Several sources planned onto one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationCollision {
    pub destination: PathBuf,
    pub sources: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedFile {
    pub source: PathBuf,
    pub destination: PathBuf,
    #[serde(default)]
    pub link_target: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementFailure {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizeReport {
    pub report_version: String,
    pub generated_at: String,
    pub run_id: String,
    pub dandiset_path: PathBuf,
    pub mode: PlacementMode,
    pub invalid: InvalidMode,
    pub placed: Vec<PlacedFile>,
    pub skipped: Vec<SkippedFile>,
    pub failures: Vec<PlacementFailure>,
    pub summary: DatasetSummary,
    pub sidecar_written: bool,
    pub warnings: Vec<String>,
}

impl OrganizeReport {
    pub fn sidecar_path(&self) -> PathBuf {
        self.dandiset_path.join(DANDISET_METADATA_FILE)
    }

    pub fn destinations(&self) -> impl Iterator<Item = &Path> {
        self.placed.iter().map(|file| file.destination.as_path())
    }
}

#[cfg(test)]
mod tests {
    use super::{InvalidMode, MetadataField, MetadataRecord, MetadataValue, PlacementMode};

    #[test]
    fn field_names_round_trip() {
        for field in MetadataField::ALL {
            assert_eq!(MetadataField::from_name(field.name()), Some(field));
        }
        assert_eq!(MetadataField::from_name("experimenter"), None);
    }

    #[test]
    fn record_from_json_skips_unknown_and_nested_values() {
        let raw = serde_json::json!({
            "subject_id": "RAT123",
            "age": 12,
            "experimenter": "someone",
            "cell_id": ["a", "b"],
            "sex": null,
        });
        let map = raw.as_object().expect("object");
        let record = MetadataRecord::from_json_map(map);

        assert_eq!(
            record.get(MetadataField::SubjectId),
            Some(&MetadataValue::Text("RAT123".to_string()))
        );
        assert_eq!(
            record.get(MetadataField::Age),
            Some(&MetadataValue::Integer(12))
        );
        assert!(!record.contains(MetadataField::CellId));
        assert!(!record.contains(MetadataField::Sex));
    }

    #[test]
    fn numeric_view_accepts_numeric_text_only() {
        assert_eq!(MetadataValue::from("2.5").as_f64(), Some(2.5));
        assert_eq!(MetadataValue::from("P90D").as_f64(), None);
        assert_eq!(MetadataValue::from(f64::NAN).as_f64(), None);
    }

    #[test]
    fn modes_parse_from_cli_strings() {
        assert_eq!(
            "symlink-relative".parse::<PlacementMode>().expect("mode"),
            PlacementMode::SymlinkRelative
        );
        assert_eq!("warn".parse::<InvalidMode>().expect("mode"), InvalidMode::Warn);

        let err = "hardlink".parse::<PlacementMode>().expect_err("unknown mode");
        assert!(err.to_string().contains("symlink-relative"));
    }
}
