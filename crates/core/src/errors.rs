use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::{DestinationCollision, SkippedFile};

/// An option value that names no known mode.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {kind} '{value}'; expected one of: {expected}")]
pub struct ConfigurationError {
    pub kind: &'static str,
    pub value: String,
    pub expected: String,
}

impl ConfigurationError {
    pub fn new<'a>(
        kind: &'static str,
        value: &str,
        expected: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            kind,
            value: value.to_string(),
            expected: expected.into_iter().collect::<Vec<_>>().join(", "),
        }
    }
}

/// Failures detected while planning a batch. Nothing has been written when one is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error(
        "{} file(s) not containing all required fields: {}",
        .files.len(),
        describe_missing(.files)
    )]
    MissingRequiredField { files: Vec<SkippedFile> },
    #[error(
        "{} destination path(s) would receive more than one file: {}",
        .collisions.len(),
        describe_collisions(.collisions)
    )]
    Collision {
        collisions: Vec<DestinationCollision>,
    },
}

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("destination {} already exists", .0.display())]
    DestinationExists(PathBuf),
    #[error("source {} cannot be resolved: {source}", .path.display())]
    SourceUnresolvable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("symlink {} does not resolve to {}", .link.display(), .target.display())]
    BrokenLink { link: PathBuf, target: PathBuf },
    #[error(
        "content of {} does not match its source {}",
        .destination.display(),
        .source_path.display()
    )]
    VerificationFailed {
        source_path: PathBuf,
        destination: PathBuf,
    },
}

impl PlacementError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        PlacementError::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// The sidecar could not be read or written.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{} does not contain a YAML mapping", .path.display())]
    NotAMapping { path: PathBuf },
    #[error("{} has a top-level key {key} that cannot be rewritten", .path.display())]
    UnsupportedKey { path: PathBuf, key: String },
    #[error("failed to serialize sidecar entry '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum DandisetError {
    #[error("no dandiset at {}", .0.display())]
    NotADandiset(PathBuf),
    #[error("dandiset metadata at {} has no identifier", .0.display())]
    MissingIdentifier(PathBuf),
    #[error(transparent)]
    Merge(#[from] MergeError),
}

#[derive(Debug, Error)]
pub enum OrganizeError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("failed to place {}: {source}", .path.display())]
    Placement {
        path: PathBuf,
        #[source]
        source: PlacementError,
    },
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Dandiset(#[from] DandisetError),
}

fn describe_missing(files: &[SkippedFile]) -> String {
    files
        .iter()
        .map(|file| {
            let missing = file
                .missing
                .iter()
                .map(|field| field.name())
                .collect::<Vec<_>>()
                .join(", ");
            format!("{} (missing {missing})", file.path.display())
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_collisions(collisions: &[DestinationCollision]) -> String {
    collisions
        .iter()
        .map(|collision| {
            let sources = collision
                .sources
                .iter()
                .map(|source| source.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            format!("{} <- [{sources}]", collision.destination.display())
        })
        .collect::<Vec<_>>()
        .join("; ")
}
