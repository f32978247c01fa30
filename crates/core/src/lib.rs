pub mod aggregate;
pub mod dandiset;
pub mod discover;
pub mod errors;
pub mod manifest;
pub mod model;
pub mod organize;
pub mod paths;
pub mod placement;
pub mod planner;
pub mod sanitize;
pub mod sidecar;

pub use aggregate::aggregate;
pub use dandiset::Dandiset;
pub use discover::{discover_files, DiscoverOptions};
pub use errors::{
    ConfigurationError, DandisetError, MergeError, OrganizeError, PlacementError, PlanError,
};
pub use manifest::{load_manifest, MetadataManifest};
pub use model::{
    DatasetSummary, DestinationCollision, FieldKind, FileRecord, InvalidMode, MetadataField,
    MetadataRecord, MetadataValue, OrganizeReport, PlacedFile, PlacementFailure, PlacementMode,
    SkippedFile, SummaryEntry, SummaryValue, DANDISET_METADATA_FILE, REPORT_VERSION,
};
pub use organize::{organize, OrganizeOptions};
pub use placement::{place, PlacementOptions, PlacementOutcome};
pub use planner::{plan_batch, planned_path, Plan, PlanOptions, REQUIRED_FIELDS};
pub use sanitize::{sanitize, sanitize_value};
pub use sidecar::{SidecarDocument, SidecarEngine, DANDISET_HEADER, DEFAULT_UNITS, PLACEHOLDER};
