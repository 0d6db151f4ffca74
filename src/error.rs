use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum InatError {
    #[error("no active dataset: run an import first or pass a dataset source")]
    #[diagnostic(help("a dataset source looks like `iNat_circle_01_Ray=500m.geojson|layername=iNat_circle_01_Ray=500m`"))]
    NoActiveDataset,

    #[error("the selected dataset is not an iNaturalist observation import: {0}")]
    #[diagnostic(help("select a dataset produced by `inat-import import` and run again"))]
    NotObservationDataset(String),

    #[error("the dataset has already been processed, taxonomy fields are present and populated: {0}")]
    #[diagnostic(help("select another observation import that has not been enriched yet"))]
    AlreadyProcessed(String),

    #[error("the dataset looks corrupted by an aborted enrichment run: {0}")]
    #[diagnostic(help(
        "start again from a clean copy: delete this dataset and run a new import, \
         or remove every field from `kingdom` to `species` and run enrichment again"
    ))]
    CorruptedDataset(String),

    #[error("invalid dataset source (expected `<path>|layername=<name>`): {0}")]
    InvalidSource(String),

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("malformed dataset: {0}")]
    Dataset(String),

    #[error("invalid circle: {0}")]
    InvalidCircle(String),

    #[error("invalid date (expected YYYY-MM-DD): {0}")]
    InvalidDate(String),

    #[error("unknown output field: {0}")]
    InvalidField(String),

    #[error("invalid quality grade (expected research|needs_id|casual): {0}")]
    InvalidQualityGrade(String),

    #[error("invalid photo mode (expected none|one|all): {0}")]
    InvalidPhotoMode(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("iNaturalist request failed: {0}")]
    Http(String),

    #[error("iNaturalist returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("operation cancelled by user")]
    Cancelled,

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
