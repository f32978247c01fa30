use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::PlanError;
use crate::model::{DestinationCollision, FileRecord, InvalidMode, MetadataField, SkippedFile};
use crate::sanitize::{sanitize, sanitize_value, EXTENSION_FIELD};

/// Fields every file needs before it can be given a canonical name.
pub const REQUIRED_FIELDS: &[MetadataField] = &[MetadataField::SubjectId];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanOptions {
    #[serde(default)]
    pub invalid: InvalidMode,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    /// Accepted files in input order, each with its destination set.
    pub files: Vec<FileRecord>,
    pub skipped: Vec<SkippedFile>,
    pub warnings: Vec<String>,
}

/// Assigns a canonical relative destination to every record of the batch.
///
/// The whole batch is checked before anything is returned: missing required
/// fields abort in [`InvalidMode::Error`], and two records sharing a
/// destination always abort.
pub fn plan_batch(records: Vec<FileRecord>, options: &PlanOptions) -> Result<Plan, PlanError> {
    let mut accepted = Vec::with_capacity(records.len());
    let mut skipped = Vec::new();
    for record in records {
        let missing = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| !record.metadata.contains(*field))
            .collect::<Vec<_>>();
        if missing.is_empty() {
            accepted.push(record);
        } else {
            skipped.push(SkippedFile {
                path: record.source,
                missing,
            });
        }
    }

    let mut warnings = Vec::new();
    if !skipped.is_empty() {
        match options.invalid {
            InvalidMode::Error => return Err(PlanError::MissingRequiredField { files: skipped }),
            InvalidMode::Warn => {
                for file in &skipped {
                    let message = format!(
                        "skipping {}: missing required field(s) {}",
                        file.path.display(),
                        file.missing
                            .iter()
                            .map(|field| field.name())
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                    warn!("{message}");
                    warnings.push(message);
                }
            }
        }
    }

    let mut sources_by_destination: HashMap<PathBuf, Vec<PathBuf>> = HashMap::new();
    let mut files = Vec::with_capacity(accepted.len());
    for record in accepted {
        let Some(destination) = planned_path(&record) else {
            continue;
        };
        debug!(
            "planned {} -> {}",
            record.source.display(),
            destination.display()
        );
        sources_by_destination
            .entry(destination.clone())
            .or_default()
            .push(record.source.clone());
        files.push(record.with_destination(destination));
    }

    let mut collisions = sources_by_destination
        .into_iter()
        .filter(|(_, sources)| sources.len() > 1)
        .map(|(destination, sources)| DestinationCollision {
            destination,
            sources,
        })
        .collect::<Vec<_>>();
    if !collisions.is_empty() {
        collisions.sort_by(|a, b| a.destination.cmp(&b.destination));
        return Err(PlanError::Collision { collisions });
    }

    Ok(Plan {
        files,
        skipped,
        warnings,
    })
}

/// `sub-<subject>/sub-<subject>[_<entity>-<value>...]<ext>`, or `None` without a subject.
pub fn planned_path(record: &FileRecord) -> Option<PathBuf> {
    let subject = record.metadata.get(MetadataField::SubjectId)?;
    let folder = format!("sub-{}", sanitize_value(subject, MetadataField::SubjectId));

    let mut name = folder.clone();
    for field in MetadataField::ALL {
        if field == MetadataField::SubjectId {
            continue;
        }
        let (Some(entity), Some(value)) = (field.path_entity(), record.metadata.get(field)) else {
            continue;
        };
        name.push('_');
        name.push_str(entity);
        name.push('-');
        name.push_str(&sanitize_value(value, field));
    }
    name.push_str(&extension_of(&record.source));

    Some(PathBuf::from(folder).join(name))
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|extension| {
            sanitize(
                format!(".{}", extension.to_string_lossy()),
                EXTENSION_FIELD,
            )
        })
        .unwrap_or_default()
}
