//! Comment-preserving edits of the `dandiset.yaml` sidecar.
//!
//! The document is held as an ordered list of top-level entries. Every entry
//! keeps the raw text it was read from together with the comment lines in
//! front of it, so a merge can replace the subtree at one key and leave the
//! rest of the file exactly as the user wrote it.

use std::fs;
use std::io;
use std::path::Path;

use serde_yaml::{Mapping, Value};
use tracing::{debug, info, warn};

use crate::errors::MergeError;
use crate::model::{DatasetSummary, MetadataValue, SummaryValue};

pub const DANDISET_HEADER: &str = "\
# DO NOT EDIT this file manually.
# It can be obtained from the dandiarchive, and updated using dandi organize
";

pub const DEFAULT_UNITS: &str = "TODO";
pub const PLACEHOLDER: &str = "REQUIRED";

const TEMPLATE: &str = "\
# Unique identifier assigned by the archive
identifier: REQUIRED
name: REQUIRED
description: REQUIRED
# Everyone who contributed to the collection of the data
contributors:
  - name: REQUIRED
    email: REQUIRED
    affiliation: REQUIRED
    roles:
      - REQUIRED
license: REQUIRED
keywords:
  - REQUIRED
experiment_description: REQUIRED
related_publications:
  - REQUIRED
# Filled in by organize from the metadata of the organized files
number_subjects: REQUIRED
number_tissueSamples: REQUIRED
number_cells: REQUIRED
sex:
  - REQUIRED
species:
  - REQUIRED
age:
  minimum: REQUIRED
  maximum: REQUIRED
  units: REQUIRED
";

/// Reader/writer configuration for sidecar documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarEngine {
    header: String,
    default_units: String,
    placeholders: Vec<String>,
}

impl Default for SidecarEngine {
    fn default() -> Self {
        Self {
            header: DANDISET_HEADER.to_string(),
            default_units: DEFAULT_UNITS.to_string(),
            placeholders: vec![DEFAULT_UNITS.to_string(), PLACEHOLDER.to_string()],
        }
    }
}

impl SidecarEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `summary` into the sidecar at `path` and writes it back, reading
    /// the file once.
    ///
    /// An empty summary skips the operation entirely: the file is neither read
    /// nor written and `None` is returned. Otherwise the merged document is
    /// returned.
    pub fn merge_and_write(
        &self,
        path: &Path,
        summary: &DatasetSummary,
    ) -> Result<Option<SidecarDocument>, MergeError> {
        if summary.is_empty() {
            debug!("no summary fields to merge into {}", path.display());
            return Ok(None);
        }

        let mut document = self.read(path)?;
        self.merge(&mut document, summary)?;
        self.write(path, &document)?;
        info!(
            "merged {} summary field(s) into {}",
            summary.len(),
            path.display()
        );
        Ok(Some(document))
    }

    /// Writes a sidecar with every known field set to the placeholder marker.
    pub fn create_template(&self, path: &Path) -> Result<(), MergeError> {
        ensure_parent(path)?;
        fs::write(path, format!("{}{}", self.header, TEMPLATE)).map_err(|source| {
            MergeError::Write {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    /// Loads the document at `path`; a missing file is an empty document.
    pub fn read(&self, path: &Path) -> Result<SidecarDocument, MergeError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(SidecarDocument::default())
            }
            Err(source) => {
                return Err(MergeError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        self.parse(&text, path)
    }

    pub fn parse(&self, text: &str, path: &Path) -> Result<SidecarDocument, MergeError> {
        let body = self.strip_header(text);
        if is_blank_document(&body) {
            return Ok(SidecarDocument {
                leading: body.lines().map(str::to_string).collect(),
                ..SidecarDocument::default()
            });
        }

        let mapping = match serde_yaml::from_str::<Value>(&body) {
            Ok(Value::Mapping(mapping)) => mapping,
            Ok(Value::Null) => Mapping::new(),
            Ok(_) => {
                return Err(MergeError::NotAMapping {
                    path: path.to_path_buf(),
                })
            }
            Err(source) => {
                return Err(MergeError::Parse {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        match split_entries(&body) {
            Some(document) if document.matches(&mapping) => Ok(document),
            _ => {
                warn!(
                    "{} cannot be edited in place; its comments and layout will not be preserved",
                    path.display()
                );
                SidecarDocument::from_mapping(mapping, path)
            }
        }
    }

    pub fn merge(
        &self,
        document: &mut SidecarDocument,
        summary: &DatasetSummary,
    ) -> Result<(), MergeError> {
        for entry in summary.iter() {
            let value = match &entry.value {
                SummaryValue::Count(count) => Value::from(*count),
                SummaryValue::Values(values) => {
                    Value::Sequence(values.iter().cloned().map(Value::String).collect())
                }
                SummaryValue::Range { minimum, maximum } => {
                    self.range_value(document.get(&entry.key), minimum, maximum)
                }
            };
            document.set(&entry.key, value)?;
        }
        Ok(())
    }

    pub fn render(&self, document: &SidecarDocument) -> String {
        let mut out = self.header.clone();
        let entries = document
            .entries
            .iter()
            .flat_map(|entry| entry.comments.iter().chain(entry.body.iter()));
        let lines = document
            .leading
            .iter()
            .chain(entries)
            .chain(document.trailer.iter());
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    pub fn write(&self, path: &Path, document: &SidecarDocument) -> Result<(), MergeError> {
        ensure_parent(path)?;
        fs::write(path, self.render(document)).map_err(|source| MergeError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    // Header lines are compared one at a time so CRLF files are recognized too.
    fn strip_header(&self, text: &str) -> String {
        let header = self.header.lines().collect::<Vec<_>>();
        let lines = text.lines().collect::<Vec<_>>();
        let has_header = lines.len() >= header.len()
            && lines
                .iter()
                .zip(&header)
                .all(|(line, expected)| line == expected);
        let skip = if has_header { header.len() } else { 0 };
        lines[skip..].join("\n")
    }

    // Existing sub-keys survive; `units` is only defaulted when unset.
    fn range_value(
        &self,
        existing: Option<&Value>,
        minimum: &MetadataValue,
        maximum: &MetadataValue,
    ) -> Value {
        let mut mapping = match existing {
            Some(Value::Mapping(mapping)) => mapping.clone(),
            _ => Mapping::new(),
        };
        mapping.insert(Value::String("minimum".to_string()), minimum.to_yaml());
        mapping.insert(Value::String("maximum".to_string()), maximum.to_yaml());

        let units_set = mapping
            .get("units")
            .is_some_and(|units| !self.is_placeholder(units));
        if !units_set {
            mapping.insert(
                Value::String("units".to_string()),
                Value::String(self.default_units.clone()),
            );
        }
        Value::Mapping(mapping)
    }

    fn is_placeholder(&self, value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::String(text) => self
                .placeholders
                .iter()
                .any(|placeholder| placeholder == text.trim()),
            _ => false,
        }
    }
}

/// Ordered, comment-annotated view of a sidecar's top-level mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SidecarDocument {
    /// Comment lines of a document that has no entries yet.
    leading: Vec<String>,
    entries: Vec<SidecarEntry>,
    trailer: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct SidecarEntry {
    key: String,
    comments: Vec<String>,
    body: Vec<String>,
    value: Value,
}

impl SidecarDocument {
    fn from_mapping(mapping: Mapping, path: &Path) -> Result<Self, MergeError> {
        let mut document = Self::default();
        for (key, value) in mapping {
            let Some(text) = key_text(&key) else {
                return Err(MergeError::UnsupportedKey {
                    path: path.to_path_buf(),
                    key: describe_key(&key),
                });
            };
            document.set(&text, value)?;
        }
        Ok(document)
    }

    /// Plain mapping view of the document's entries.
    pub fn to_mapping(&self) -> Mapping {
        self.entries
            .iter()
            .map(|entry| (Value::String(entry.key.clone()), entry.value.clone()))
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.key.as_str())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| &entry.value)
    }

    /// Replaces the subtree at `key` in place, or appends a new entry.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), MergeError> {
        let body = render_entry(key, &value)?;
        match self.entries.iter_mut().find(|entry| entry.key == key) {
            Some(entry) => {
                entry.body = body;
                entry.value = value;
            }
            None => self.entries.push(SidecarEntry {
                key: key.to_string(),
                comments: Vec::new(),
                body,
                value,
            }),
        }
        Ok(())
    }

    fn matches(&self, mapping: &Mapping) -> bool {
        self.entries.len() == mapping.len()
            && self
                .entries
                .iter()
                .zip(mapping.keys())
                .all(|(entry, key)| key_text(key).as_deref() == Some(entry.key.as_str()))
    }
}

enum LineKind {
    Detached,
    Key,
    Continuation,
    Unsupported,
}

fn classify(line: &str) -> LineKind {
    let trimmed = line.trim_start();
    if trimmed.is_empty()
        || trimmed.starts_with('#')
        || line.starts_with("---")
        || line.starts_with("...")
    {
        LineKind::Detached
    } else if line.starts_with(char::is_whitespace) || line.starts_with('-') {
        LineKind::Continuation
    } else if line.starts_with(|ch: char| matches!(ch, '{' | '[' | '?' | '&' | '!' | '*')) {
        LineKind::Unsupported
    } else {
        LineKind::Key
    }
}

// Comment and blank lines attach to the entry that follows them unless more
// content of the current entry comes after.
fn split_entries(body: &str) -> Option<SidecarDocument> {
    let mut entries = Vec::new();
    let mut pending: Vec<String> = Vec::new();
    let mut current: Option<(Vec<String>, Vec<String>)> = None;

    for line in body.lines() {
        match classify(line) {
            LineKind::Detached => pending.push(line.to_string()),
            LineKind::Key => {
                if let Some((comments, lines)) = current.take() {
                    entries.push(finish_entry(comments, lines)?);
                }
                current = Some((std::mem::take(&mut pending), vec![line.to_string()]));
            }
            LineKind::Continuation => {
                let (_, lines) = current.as_mut()?;
                lines.append(&mut pending);
                lines.push(line.to_string());
            }
            LineKind::Unsupported => return None,
        }
    }
    if let Some((comments, lines)) = current.take() {
        entries.push(finish_entry(comments, lines)?);
    }

    Some(SidecarDocument {
        leading: Vec::new(),
        entries,
        trailer: pending,
    })
}

fn finish_entry(comments: Vec<String>, body: Vec<String>) -> Option<SidecarEntry> {
    let parsed = serde_yaml::from_str::<Mapping>(&body.join("\n")).ok()?;
    let mut pairs = parsed.into_iter();
    let (key, value) = pairs.next()?;
    if pairs.next().is_some() {
        return None;
    }
    Some(SidecarEntry {
        key: key_text(&key)?,
        comments,
        body,
        value,
    })
}

fn render_entry(key: &str, value: &Value) -> Result<Vec<String>, MergeError> {
    let mut single = Mapping::new();
    single.insert(Value::String(key.to_string()), value.clone());
    let text = serde_yaml::to_string(&single).map_err(|source| MergeError::Serialize {
        key: key.to_string(),
        source,
    })?;
    let text = text.strip_prefix("---\n").unwrap_or(&text);
    Ok(text.lines().map(str::to_string).collect())
}

fn key_text(key: &Value) -> Option<String> {
    match key {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn describe_key(key: &Value) -> String {
    serde_yaml::to_string(key)
        .map(|text| text.trim_end().to_string())
        .unwrap_or_else(|_| format!("{key:?}"))
}

fn is_blank_document(body: &str) -> bool {
    body.lines().all(|line| {
        let trimmed = line.trim();
        trimmed.is_empty() || trimmed.starts_with('#')
    })
}

fn ensure_parent(path: &Path) -> Result<(), MergeError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|source| MergeError::Write {
                path: parent.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_yaml::Value;
    use tempfile::TempDir;

    use super::{SidecarEngine, DANDISET_HEADER};
    use crate::aggregate::aggregate;
    use crate::errors::MergeError;
    use crate::model::{DatasetSummary, MetadataField, MetadataRecord};

    fn sample_records() -> Vec<MetadataRecord> {
        vec![
            MetadataRecord::new()
                .with(MetadataField::Age, 1)
                .with(MetadataField::CellId, "1")
                .with(MetadataField::TissueSampleId, 1)
                .with(MetadataField::Sex, "M"),
            MetadataRecord::new()
                .with(MetadataField::Age, 2)
                .with(MetadataField::CellId, "2")
                .with(MetadataField::TissueSampleId, 1)
                .with(MetadataField::Sex, "F"),
        ]
    }

    fn load(path: &std::path::Path) -> Value {
        let text = fs::read_to_string(path).expect("read sidecar");
        serde_yaml::from_str(&text).expect("plain yaml parses")
    }

    #[test]
    fn empty_summary_leaves_file_untouched() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("blah.yaml");
        let engine = SidecarEngine::new();

        fs::write(&path, "").expect("write");
        assert!(engine
            .merge_and_write(&path, &DatasetSummary::default())
            .expect("merge")
            .is_none());
        assert_eq!(fs::read_to_string(&path).expect("read"), "");

        fs::write(&path, "id: test1  # comment").expect("write");
        assert!(engine
            .merge_and_write(&path, &DatasetSummary::default())
            .expect("merge")
            .is_none());
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "id: test1  # comment"
        );

        let absent = temp.path().join("absent.yaml");
        engine
            .merge_and_write(&absent, &DatasetSummary::default())
            .expect("merge");
        assert!(!absent.exists());
    }

    #[test]
    fn merges_summary_and_keeps_user_keys() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("blah.yaml");
        let engine = SidecarEngine::new();
        fs::write(&path, "id: test1  # comment").expect("write");

        engine
            .merge_and_write(&path, &aggregate(&sample_records()))
            .expect("merge");

        let expected: Value = serde_yaml::from_str(
            "id: test1\nnumber_tissueSamples: 1\nnumber_cells: 2\nsex: [F, M]\n\
             age: {minimum: 1, maximum: 2, units: TODO}\n",
        )
        .expect("expected yaml");
        assert_eq!(load(&path), expected);

        let text = fs::read_to_string(&path).expect("read");
        assert!(text.starts_with(DANDISET_HEADER));
        assert!(text.contains("id: test1  # comment"));
    }

    #[test]
    fn existing_units_survive_later_merges() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("dandiset.yaml");
        let engine = SidecarEngine::new();
        let records = sample_records();

        fs::write(&path, "id: test1  # comment\n").expect("write");
        engine
            .merge_and_write(&path, &aggregate(&records))
            .expect("first merge");

        let text = fs::read_to_string(&path).expect("read");
        fs::write(&path, text.replace("units: TODO", "units: years")).expect("edit units");

        engine
            .merge_and_write(&path, &aggregate(&records[..1]))
            .expect("second merge");

        let expected: Value = serde_yaml::from_str(
            "id: test1\nnumber_tissueSamples: 1\nnumber_cells: 1\nsex: [M]\n\
             age: {minimum: 1, maximum: 1, units: years}\n",
        )
        .expect("expected yaml");
        assert_eq!(load(&path), expected);

        let text = fs::read_to_string(&path).expect("read");
        assert_eq!(text.matches("DO NOT EDIT").count(), 1);
    }

    #[test]
    fn comments_and_order_of_untouched_keys_survive() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("dandiset.yaml");
        let engine = SidecarEngine::new();
        fs::write(
            &path,
            "# leading note\nidentifier: '000001'\n# cells counted by organize\nnumber_cells: 10\n\
             description: |\n  first line\n\n  second line\n# trailing note\n",
        )
        .expect("write");

        engine
            .merge_and_write(&path, &aggregate(&sample_records()))
            .expect("merge");

        let text = fs::read_to_string(&path).expect("read");
        assert!(text.contains("# leading note\nidentifier: '000001'\n"));
        assert!(text.contains("# cells counted by organize\nnumber_cells: 2\n"));
        assert!(text.contains("description: |\n  first line\n\n  second line\n"));
        assert!(text.trim_end().ends_with("# trailing note"));

        let document = engine.read(&path).expect("reread");
        let keys = document.keys().collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec![
                "identifier",
                "number_cells",
                "description",
                "number_tissueSamples",
                "sex",
                "age"
            ]
        );
    }

    #[test]
    fn template_round_trip() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("dandiset.yaml");
        let engine = SidecarEngine::new();

        engine.create_template(&path).expect("template");
        let before = fs::read_to_string(&path).expect("read");
        assert!(before.matches("REQUIRED").count() > 10);

        engine
            .merge_and_write(&path, &DatasetSummary::default())
            .expect("empty merge");
        assert_eq!(fs::read_to_string(&path).expect("read"), before);

        engine
            .merge_and_write(&path, &aggregate(&sample_records()))
            .expect("merge");
        let after = load(&path);
        assert_eq!(after["number_cells"], Value::from(2));
        assert_eq!(after["identifier"], Value::from("REQUIRED"));
        assert_eq!(after["number_subjects"], Value::from("REQUIRED"));
        assert_eq!(after["age"]["units"], Value::from("TODO"));
        assert_eq!(after["contributors"][0]["email"], Value::from("REQUIRED"));
    }

    #[test]
    fn corrupt_sidecar_is_reported_and_left_alone() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("dandiset.yaml");
        let engine = SidecarEngine::new();
        fs::write(&path, "id: [unterminated\n").expect("write");

        let err = engine
            .merge_and_write(&path, &aggregate(&sample_records()))
            .expect_err("corrupt yaml");
        assert!(matches!(err, MergeError::Parse { .. }));
        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "id: [unterminated\n"
        );

        fs::write(&path, "- just\n- a list\n").expect("write");
        let err = engine
            .merge_and_write(&path, &aggregate(&sample_records()))
            .expect_err("not a mapping");
        assert!(matches!(err, MergeError::NotAMapping { .. }));
    }

    #[test]
    fn flow_mapping_falls_back_to_plain_rewrite() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("dandiset.yaml");
        let engine = SidecarEngine::new();
        fs::write(&path, "{id: test1, number_cells: 7}\n").expect("write");

        engine
            .merge_and_write(&path, &aggregate(&sample_records()))
            .expect("merge");

        let value = load(&path);
        assert_eq!(value["id"], Value::from("test1"));
        assert_eq!(value["number_cells"], Value::from(2));
    }

    #[test]
    fn keys_without_a_text_form_abort_the_merge() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("dandiset.yaml");
        let engine = SidecarEngine::new();
        let original = "identifier: x\n? [a, b]\n: c\n~: nullkey\n";
        fs::write(&path, original).expect("write");

        let err = engine
            .merge_and_write(&path, &aggregate(&sample_records()))
            .expect_err("complex keys cannot be rewritten");
        assert!(matches!(err, MergeError::UnsupportedKey { .. }));
        assert_eq!(fs::read_to_string(&path).expect("read"), original);

        fs::write(&path, "identifier: x\n~: nullkey\n").expect("write");
        let err = engine
            .merge_and_write(&path, &aggregate(&sample_records()))
            .expect_err("null key cannot be rewritten");
        assert!(matches!(err, MergeError::UnsupportedKey { .. }));
    }

    #[test]
    fn comment_only_sidecar_keeps_comments_first() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("dandiset.yaml");
        let engine = SidecarEngine::new();
        fs::write(&path, "# my leading note\n").expect("write");

        engine
            .merge_and_write(&path, &aggregate(&sample_records()))
            .expect("merge");

        let text = fs::read_to_string(&path).expect("read");
        let body = text.strip_prefix(DANDISET_HEADER).expect("header first");
        assert!(body.starts_with("# my leading note\nnumber_tissueSamples: 1\n"));
    }

    #[test]
    fn crlf_header_is_not_duplicated() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("dandiset.yaml");
        let engine = SidecarEngine::new();
        let crlf = format!("{}identifier: abc\n", DANDISET_HEADER).replace('\n', "\r\n");
        fs::write(&path, crlf).expect("write");

        engine
            .merge_and_write(&path, &aggregate(&sample_records()))
            .expect("merge");

        let text = fs::read_to_string(&path).expect("read");
        assert_eq!(text.matches("DO NOT EDIT").count(), 1);
        assert_eq!(load(&path)["identifier"], Value::from("abc"));
    }

    #[test]
    fn merged_document_exposes_its_mapping() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("dandiset.yaml");
        fs::write(&path, "identifier: abc\n").expect("write");

        let document = SidecarEngine::new()
            .merge_and_write(&path, &aggregate(&sample_records()))
            .expect("merge")
            .expect("summary was not empty");
        let mapping = document.to_mapping();
        assert_eq!(mapping.get("identifier"), Some(&Value::from("abc")));
        assert_eq!(mapping.get("number_cells"), Some(&Value::from(2)));
        assert_eq!(Value::Mapping(mapping), load(&path));
    }
}
