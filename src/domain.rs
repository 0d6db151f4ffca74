use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::NaiveDate;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::InatError;

/// The seven taxonomic levels written back onto enriched datasets, root first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Kingdom,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
}

impl Rank {
    pub const ALL: [Rank; 7] = [
        Rank::Kingdom,
        Rank::Phylum,
        Rank::Class,
        Rank::Order,
        Rank::Family,
        Rank::Genus,
        Rank::Species,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Rank::Kingdom => "kingdom",
            Rank::Phylum => "phylum",
            Rank::Class => "class",
            Rank::Order => "order",
            Rank::Family => "family",
            Rank::Genus => "genus",
            Rank::Species => "species",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Maps an API rank string onto a tracked rank. Intermediate ranks
    /// (`subfamily`, `tribe`, ...) are not tracked and yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        Rank::ALL
            .into_iter()
            .find(|rank| rank.as_str() == value.trim())
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum QualityGrade {
    Research,
    #[value(name = "needs_id")]
    NeedsId,
    Casual,
}

impl QualityGrade {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityGrade::Research => "research",
            QualityGrade::NeedsId => "needs_id",
            QualityGrade::Casual => "casual",
        }
    }
}

impl FromStr for QualityGrade {
    type Err = InatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "research" => Ok(QualityGrade::Research),
            "needs_id" => Ok(QualityGrade::NeedsId),
            "casual" => Ok(QualityGrade::Casual),
            _ => Err(InatError::InvalidQualityGrade(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PhotoMode {
    None,
    One,
    #[default]
    All,
}

impl fmt::Display for PhotoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhotoMode::None => write!(f, "none"),
            PhotoMode::One => write!(f, "one"),
            PhotoMode::All => write!(f, "all"),
        }
    }
}

impl FromStr for PhotoMode {
    type Err = InatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "none" => Ok(PhotoMode::None),
            "one" => Ok(PhotoMode::One),
            "all" => Ok(PhotoMode::All),
            _ => Err(InatError::InvalidPhotoMode(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Integer,
    Real,
    DateTime,
    String,
}

/// Candidate non-photo output fields, declared in output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OutputField {
    InatId,
    DateObs,
    ScientificName,
    VernacularName,
    Latitude,
    Longitude,
    PlaceGuess,
    TaxonId,
    TaxonRank,
    UrlObs,
    UrlTaxon,
    ObserverLogin,
    ObserverName,
    QualityGrade,
    Precision,
}

impl OutputField {
    pub const CATALOG: [OutputField; 15] = [
        OutputField::InatId,
        OutputField::DateObs,
        OutputField::ScientificName,
        OutputField::VernacularName,
        OutputField::Latitude,
        OutputField::Longitude,
        OutputField::PlaceGuess,
        OutputField::TaxonId,
        OutputField::TaxonRank,
        OutputField::UrlObs,
        OutputField::UrlTaxon,
        OutputField::ObserverLogin,
        OutputField::ObserverName,
        OutputField::QualityGrade,
        OutputField::Precision,
    ];

    /// Always written, whatever the user selects.
    pub const FORCED: [OutputField; 2] = [OutputField::InatId, OutputField::TaxonId];

    pub fn name(self) -> &'static str {
        match self {
            OutputField::InatId => "inat_id",
            OutputField::DateObs => "date_obs",
            OutputField::ScientificName => "scientific_name",
            OutputField::VernacularName => "vernacular_name",
            OutputField::Latitude => "latitude",
            OutputField::Longitude => "longitude",
            OutputField::PlaceGuess => "place_guess",
            OutputField::TaxonId => "taxon_id",
            OutputField::TaxonRank => "taxon_rank",
            OutputField::UrlObs => "url_obs",
            OutputField::UrlTaxon => "url_taxon",
            OutputField::ObserverLogin => "observer_login",
            OutputField::ObserverName => "observer_name",
            OutputField::QualityGrade => "quality_grade",
            OutputField::Precision => "precision",
        }
    }

    pub fn field_type(self) -> FieldType {
        match self {
            OutputField::InatId | OutputField::TaxonId | OutputField::Precision => {
                FieldType::Integer
            }
            OutputField::Latitude | OutputField::Longitude => FieldType::Real,
            OutputField::DateObs => FieldType::DateTime,
            _ => FieldType::String,
        }
    }

    pub fn length(self) -> Option<u32> {
        match self {
            OutputField::ScientificName | OutputField::ObserverName => Some(100),
            OutputField::VernacularName | OutputField::UrlTaxon => Some(150),
            OutputField::PlaceGuess | OutputField::UrlObs => Some(200),
            OutputField::TaxonRank => Some(30),
            OutputField::ObserverLogin => Some(50),
            OutputField::QualityGrade => Some(20),
            _ => None,
        }
    }
}

impl fmt::Display for OutputField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OutputField {
    type Err = InatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        OutputField::CATALOG
            .into_iter()
            .find(|field| field.name() == trimmed)
            .ok_or_else(|| InatError::InvalidField(value.to_string()))
    }
}

/// Optional observation filters. Blank strings count as "not set".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationFilters {
    /// Inclusive lower bound.
    pub date_from: Option<NaiveDate>,
    /// Exclusive upper bound.
    pub date_to: Option<NaiveDate>,
    pub user_login: Option<String>,
    pub taxon_name: Option<String>,
    pub quality_grade: Option<QualityGrade>,
}

impl ObservationFilters {
    pub fn parse_date(value: &str) -> Result<Option<NaiveDate>, InatError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| InatError::InvalidDate(value.to_string()))
    }

    pub fn non_blank(value: Option<String>) -> Option<String> {
        value
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

const LAYER_MARKER: &str = "|layername=";

/// A persisted dataset addressed by file path and internal layer name,
/// written as `<path>|layername=<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSource {
    pub path: Utf8PathBuf,
    pub layer_name: String,
}

impl DatasetSource {
    pub fn new(path: impl Into<Utf8PathBuf>, layer_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            layer_name: layer_name.into(),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn directory(&self) -> &Utf8Path {
        self.path.parent().unwrap_or_else(|| Utf8Path::new("."))
    }
}

impl fmt::Display for DatasetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{LAYER_MARKER}{}", self.path, self.layer_name)
    }
}

impl FromStr for DatasetSource {
    type Err = InatError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let parts = trimmed.split(LAYER_MARKER).collect::<Vec<_>>();
        match parts.as_slice() {
            [path, layer] if !path.is_empty() && !layer.is_empty() => {
                Ok(Self::new(*path, *layer))
            }
            _ => Err(InatError::InvalidSource(value.to_string())),
        }
    }
}
