use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::aggregate;
use crate::dandiset::Dandiset;
use crate::errors::OrganizeError;
use crate::model::{
    FileRecord, InvalidMode, OrganizeReport, PlacedFile, PlacementFailure, PlacementMode,
    REPORT_VERSION,
};
use crate::placement::{place, PlacementOptions};
use crate::planner::{plan_batch, PlanOptions};

#[derive(Debug, Clone)]
pub struct OrganizeOptions {
    pub dandiset_path: PathBuf,
    pub mode: PlacementMode,
    pub invalid: InvalidMode,
    pub overwrite: bool,
    pub verify: bool,
    pub run_id: Option<String>,
}

impl Default for OrganizeOptions {
    fn default() -> Self {
        Self {
            dandiset_path: PathBuf::from("."),
            mode: PlacementMode::Dry,
            invalid: InvalidMode::Error,
            overwrite: false,
            verify: false,
            run_id: None,
        }
    }
}

/// Plans, places and summarizes one batch of files.
///
/// Planning problems abort before anything is written. Placement failures
/// abort in [`InvalidMode::Error`] and are collected otherwise. The sidecar
/// is only updated by modes that change the filesystem.
pub fn organize(
    records: Vec<FileRecord>,
    options: &OrganizeOptions,
) -> Result<OrganizeReport, OrganizeError> {
    let run_id = options
        .run_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    info!(
        "organizing {} file(s) into {} (mode: {}, invalid: {})",
        records.len(),
        options.dandiset_path.display(),
        options.mode,
        options.invalid
    );

    let plan = plan_batch(
        records,
        &PlanOptions {
            invalid: options.invalid,
        },
    )?;
    let mut warnings = plan.warnings;

    let placement_options = PlacementOptions {
        overwrite: options.overwrite,
        verify: options.verify,
        relative: options.dandiset_path.is_relative(),
    };

    let mut placed = Vec::new();
    let mut failures = Vec::new();
    let mut accepted = Vec::new();
    for record in &plan.files {
        let Some(relative) = &record.destination else {
            continue;
        };
        let destination = options.dandiset_path.join(relative);
        match place(&record.source, &destination, options.mode, &placement_options) {
            Ok(outcome) => {
                placed.push(PlacedFile {
                    source: outcome.source,
                    destination: outcome.destination,
                    link_target: outcome.link_target,
                });
                accepted.push(&record.metadata);
            }
            Err(source) if options.invalid == InvalidMode::Error => {
                return Err(OrganizeError::Placement {
                    path: record.source.clone(),
                    source,
                });
            }
            Err(err) => {
                let message = format!("failed to place {}: {err}", record.source.display());
                warn!("{message}");
                warnings.push(message);
                failures.push(PlacementFailure {
                    source: record.source.clone(),
                    destination,
                    error: err.to_string(),
                });
            }
        }
    }

    let summary = aggregate(accepted);
    let sidecar_written = if options.mode.mutates_filesystem() {
        Dandiset::at(options.dandiset_path.clone()).update(&summary)?
    } else {
        false
    };

    info!(
        "organized {} file(s): {} skipped, {} failed",
        placed.len(),
        plan.skipped.len(),
        failures.len()
    );

    Ok(OrganizeReport {
        report_version: REPORT_VERSION.to_string(),
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        run_id,
        dandiset_path: options.dandiset_path.clone(),
        mode: options.mode,
        invalid: options.invalid,
        placed,
        skipped: plan.skipped,
        failures,
        summary,
        sidecar_written,
        warnings,
    })
}
