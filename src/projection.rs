use chrono::{DateTime, Local, NaiveDate, SecondsFormat};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{FieldType, OutputField, PhotoMode};
use crate::inat::Observation;

const PHOTO_URL_LENGTH: u32 = 250;
const OBSERVATION_URL: &str = "https://www.inaturalist.org/observations";
const TAXON_URL: &str = "https://www.inaturalist.org/taxa";

/// One column of a persisted dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType, length: Option<u32>) -> Self {
        Self {
            name: name.into(),
            field_type,
            length,
        }
    }
}

impl From<OutputField> for FieldDef {
    fn from(field: OutputField) -> Self {
        FieldDef::new(field.name(), field.field_type(), field.length())
    }
}

/// Catalog fields to write, always including the forced identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSelection {
    fields: Vec<OutputField>,
}

impl FieldSelection {
    pub fn new(selected: &[OutputField]) -> Self {
        let fields = OutputField::CATALOG
            .into_iter()
            .filter(|field| OutputField::FORCED.contains(field) || selected.contains(field))
            .collect();
        Self { fields }
    }

    pub fn all() -> Self {
        Self::new(&OutputField::CATALOG)
    }

    pub fn fields(&self) -> &[OutputField] {
        &self.fields
    }

    pub fn contains(&self, field: OutputField) -> bool {
        self.fields.contains(&field)
    }
}

/// Swaps the thumbnail size token for the large rendition.
pub fn large_photo_url(url: &str) -> String {
    url.replace("square.jpg", "large.jpg")
        .replace("square.jpeg", "large.jpeg")
        .replace("square.png", "large.png")
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedRecord {
    pub lon: f64,
    pub lat: f64,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectedSet {
    pub schema: Vec<FieldDef>,
    pub records: Vec<ProjectedRecord>,
    pub max_photos: usize,
}

impl ProjectedSet {
    pub fn field_names(&self) -> Vec<&str> {
        self.schema.iter().map(|field| field.name.as_str()).collect()
    }
}

pub fn photo_field(index: usize) -> String {
    format!("url_photo{index}")
}

pub fn project(
    observations: &[Observation],
    selection: &FieldSelection,
    photo_mode: PhotoMode,
) -> ProjectedSet {
    let located = observations
        .iter()
        .filter_map(|obs| obs.coordinates().map(|(lon, lat)| (obs, lon, lat)))
        .collect::<Vec<_>>();
    let skipped = observations.len() - located.len();
    if skipped > 0 {
        tracing::debug!(skipped, "observations without coordinates dropped");
    }

    let max_photos = match photo_mode {
        PhotoMode::All => located
            .iter()
            .map(|(obs, _, _)| obs.photos.len())
            .max()
            .unwrap_or(0),
        _ => 0,
    };

    let mut schema = selection
        .fields()
        .iter()
        .copied()
        .map(FieldDef::from)
        .collect::<Vec<_>>();
    match photo_mode {
        PhotoMode::None => {}
        PhotoMode::One => schema.push(FieldDef::new(
            photo_field(1),
            FieldType::String,
            Some(PHOTO_URL_LENGTH),
        )),
        PhotoMode::All => {
            schema.push(FieldDef::new("nb_photos", FieldType::Integer, None));
            for index in 1..=max_photos {
                schema.push(FieldDef::new(
                    photo_field(index),
                    FieldType::String,
                    Some(PHOTO_URL_LENGTH),
                ));
            }
        }
    }

    let records = located
        .into_iter()
        .map(|(obs, lon, lat)| {
            let mut properties = Map::new();
            for field in selection.fields() {
                properties.insert(field.name().to_string(), field_value(*field, obs, lon, lat));
            }
            let photos = obs
                .photos
                .iter()
                .map(|photo| photo.url.as_deref().map(large_photo_url))
                .collect::<Vec<_>>();
            match photo_mode {
                PhotoMode::None => {}
                PhotoMode::One => {
                    let first = photos.first().cloned().flatten();
                    properties.insert(photo_field(1), opt_string(first));
                }
                PhotoMode::All => {
                    properties.insert("nb_photos".to_string(), Value::from(photos.len()));
                    for index in 1..=max_photos {
                        let url = photos.get(index - 1).cloned().flatten();
                        properties.insert(photo_field(index), opt_string(url));
                    }
                }
            }
            ProjectedRecord {
                lon,
                lat,
                properties,
            }
        })
        .collect();

    ProjectedSet {
        schema,
        records,
        max_photos,
    }
}

fn field_value(field: OutputField, obs: &Observation, lon: f64, lat: f64) -> Value {
    let taxon = obs.taxon.as_ref();
    let user = obs.user.as_ref();
    let taxon_id = taxon.and_then(|taxon| taxon.id);
    match field {
        OutputField::InatId => Value::from(obs.id),
        OutputField::DateObs => Value::String(observation_date(obs)),
        OutputField::ScientificName => opt_string(taxon.and_then(|taxon| taxon.name.clone())),
        OutputField::VernacularName => {
            opt_string(taxon.and_then(|taxon| taxon.preferred_common_name.clone()))
        }
        OutputField::Latitude => Value::from(lat),
        OutputField::Longitude => Value::from(lon),
        OutputField::PlaceGuess => opt_string(obs.place_guess.clone()),
        OutputField::TaxonId => taxon_id.map(Value::from).unwrap_or(Value::Null),
        OutputField::TaxonRank => opt_string(taxon.and_then(|taxon| taxon.rank.clone())),
        OutputField::UrlObs => Value::String(format!("{OBSERVATION_URL}/{}", obs.id)),
        OutputField::UrlTaxon => taxon_id
            .map(|id| Value::String(format!("{TAXON_URL}/{id}")))
            .unwrap_or(Value::Null),
        OutputField::ObserverLogin => opt_string(user.and_then(|user| user.login.clone())),
        OutputField::ObserverName => opt_string(user.and_then(|user| user.name.clone())),
        OutputField::QualityGrade => opt_string(obs.quality_grade.clone()),
        OutputField::Precision => obs
            .positional_accuracy
            .filter(|value| value.is_finite())
            .map(|value| Value::from(value.round() as i64))
            .unwrap_or(Value::Null),
    }
}

fn opt_string(value: Option<String>) -> Value {
    value.map(Value::String).unwrap_or(Value::Null)
}

/// `time_observed_at`, else `observed_on` at midnight, else now.
fn observation_date(obs: &Observation) -> String {
    if let Some(stamp) = obs
        .time_observed_at
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
    {
        return stamp.to_rfc3339_opts(SecondsFormat::Secs, false);
    }
    if let Some(day) = obs
        .observed_on
        .as_deref()
        .and_then(|raw| NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok())
    {
        return day.format("%Y-%m-%dT00:00:00").to_string();
    }
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inat::{ObservationTaxon, Photo, PointGeometry};

    fn observation(id: i64, photos: usize) -> Observation {
        Observation {
            id,
            geojson: Some(PointGeometry {
                coordinates: vec![2.0, 48.0],
            }),
            taxon: Some(ObservationTaxon {
                id: Some(100 + id),
                name: Some("Parus major".to_string()),
                ..ObservationTaxon::default()
            }),
            photos: (0..photos)
                .map(|n| Photo {
                    url: Some(format!("https://static.inaturalist.org/photos/{n}/square.jpg")),
                })
                .collect(),
            ..Observation::default()
        }
    }

    #[test]
    fn large_photo_url_rewrites_known_extensions() {
        assert_eq!(large_photo_url("a/square.jpeg"), "a/large.jpeg");
        assert_eq!(large_photo_url("a/square.png"), "a/large.png");
        assert_eq!(large_photo_url("a/medium.jpg"), "a/medium.jpg");
    }

    #[test]
    fn all_photos_pads_to_maximum() {
        let observations = vec![observation(1, 3), observation(2, 0)];
        let set = project(&observations, &FieldSelection::new(&[]), PhotoMode::All);
        assert_eq!(set.max_photos, 3);
        assert_eq!(
            set.field_names(),
            vec!["inat_id", "taxon_id", "nb_photos", "url_photo1", "url_photo2", "url_photo3"]
        );
        let second = &set.records[1].properties;
        assert_eq!(second["nb_photos"], Value::from(0));
        assert_eq!(second["url_photo3"], Value::Null);
        assert_eq!(
            set.records[0].properties["url_photo2"],
            Value::String("https://static.inaturalist.org/photos/1/large.jpg".to_string())
        );
    }

    #[test]
    fn date_falls_back_to_observed_on() {
        let mut obs = observation(5, 0);
        obs.observed_on = Some("2024-05-01".to_string());
        assert_eq!(observation_date(&obs), "2024-05-01T00:00:00");
        obs.time_observed_at = Some("2024-05-01T10:15:00+02:00".to_string());
        assert_eq!(observation_date(&obs), "2024-05-01T10:15:00+02:00");
    }

    #[test]
    fn url_taxon_is_null_without_taxon() {
        let mut obs = observation(9, 0);
        obs.taxon = None;
        let selection = FieldSelection::new(&[OutputField::UrlObs, OutputField::UrlTaxon]);
        let set = project(&[obs], &selection, PhotoMode::None);
        let record = &set.records[0].properties;
        assert_eq!(record["url_taxon"], Value::Null);
        assert_eq!(record["taxon_id"], Value::Null);
        assert_eq!(
            record["url_obs"],
            Value::String("https://www.inaturalist.org/observations/9".to_string())
        );
    }
}
