use std::fs;
use std::io::Write;

use camino::Utf8Path;
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value as GeometryValue};
use serde_json::Value;
use tempfile::Builder;

use crate::circle::{CIRCLE_SEGMENTS, Circle, circle_ring};
use crate::domain::{DatasetSource, FieldType};
use crate::error::InatError;
use crate::projection::{FieldDef, ProjectedSet};

const NAME_MEMBER: &str = "name";
const SCHEMA_MEMBER: &str = "schema";

/// A point layer of observations stored as a GeoJSON FeatureCollection.
///
/// Edits stay in memory until [`ObservationDataset::commit`]; dropping the
/// value without committing leaves the file as it was.
#[derive(Debug, Clone)]
pub struct ObservationDataset {
    source: DatasetSource,
    schema: Vec<FieldDef>,
    features: Vec<Feature>,
}

impl ObservationDataset {
    /// Writes a new dataset from projected records and returns it.
    pub fn create(
        path: &Utf8Path,
        layer_name: &str,
        set: &ProjectedSet,
    ) -> Result<Self, InatError> {
        let features = set
            .records
            .iter()
            .map(|record| Feature {
                bbox: None,
                geometry: Some(Geometry::new(GeometryValue::Point(vec![
                    record.lon, record.lat,
                ]))),
                id: None,
                properties: Some(record.properties.clone()),
                foreign_members: None,
            })
            .collect();
        let dataset = Self {
            source: DatasetSource::new(path, layer_name),
            schema: set.schema.clone(),
            features,
        };
        dataset.commit()?;
        tracing::info!(
            path = %path,
            layer = layer_name,
            records = dataset.len(),
            "observation dataset written"
        );
        Ok(dataset)
    }

    pub fn open(source: &DatasetSource) -> Result<Self, InatError> {
        let path = source.path();
        if !path.as_std_path().is_file() {
            return Err(InatError::DatasetNotFound(path.to_string()));
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| InatError::Filesystem(err.to_string()))?;
        let collection: FeatureCollection = serde_json::from_str(&content)
            .map_err(|err| InatError::Dataset(format!("{path}: {err}")))?;

        let members = collection.foreign_members.unwrap_or_default();
        if let Some(name) = members.get(NAME_MEMBER).and_then(Value::as_str) {
            if name != source.layer_name {
                return Err(InatError::Dataset(format!(
                    "{path} holds layer `{name}`, not `{}`",
                    source.layer_name
                )));
            }
        }
        let schema = match members.get(SCHEMA_MEMBER) {
            Some(schema) => serde_json::from_value(schema.clone())
                .map_err(|err| InatError::Dataset(format!("{path}: bad schema: {err}")))?,
            None => infer_schema(&collection.features),
        };

        Ok(Self {
            source: source.clone(),
            schema,
            features: collection.features,
        })
    }

    pub fn source(&self) -> &DatasetSource {
        &self.source
    }

    pub fn schema(&self) -> &[FieldDef] {
        &self.schema
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.schema.iter().map(|field| field.name.as_str()).collect()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.schema.iter().any(|field| field.name == name)
    }

    /// Appends a string column, null on every record. Returns `false` when
    /// the column already exists.
    pub fn add_string_field(&mut self, name: &str, length: u32) -> bool {
        if self.has_field(name) {
            return false;
        }
        self.schema
            .push(FieldDef::new(name, FieldType::String, Some(length)));
        for feature in &mut self.features {
            feature.set_property(name, Value::Null);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn records(&self) -> &[Feature] {
        &self.features
    }

    pub fn records_mut(&mut self) -> &mut [Feature] {
        &mut self.features
    }

    /// Counts records whose `field` is null, missing or blank, stopping at `limit`.
    pub fn probe_blank(&self, field: &str, limit: usize) -> usize {
        self.features
            .iter()
            .filter(|feature| is_blank(feature.property(field)))
            .take(limit)
            .count()
    }

    /// Replaces the file through a temp file in the same directory.
    pub fn commit(&self) -> Result<(), InatError> {
        let mut members = JsonObject::new();
        members.insert(
            NAME_MEMBER.to_string(),
            Value::String(self.source.layer_name.clone()),
        );
        members.insert(
            SCHEMA_MEMBER.to_string(),
            serde_json::to_value(&self.schema)
                .map_err(|err| InatError::Dataset(err.to_string()))?,
        );
        let collection = FeatureCollection {
            bbox: None,
            features: self.features.clone(),
            foreign_members: Some(members),
        };
        write_collection(self.source.path(), &collection)
    }
}

/// The capture circle persisted as a single polygon feature.
pub struct CircleDataset;

impl CircleDataset {
    pub fn write(path: &Utf8Path, layer_name: &str, circle: &Circle) -> Result<(), InatError> {
        let ring = circle_ring(circle, CIRCLE_SEGMENTS)
            .into_iter()
            .map(|point| vec![point.lon, point.lat])
            .collect::<Vec<_>>();

        let mut properties = JsonObject::new();
        properties.insert("lat".to_string(), Value::from(circle.lat()));
        properties.insert("lon".to_string(), Value::from(circle.lon()));
        properties.insert("radius_m".to_string(), Value::from(circle.radius_m()));

        let schema = vec![
            FieldDef::new("lat", FieldType::Real, None),
            FieldDef::new("lon", FieldType::Real, None),
            FieldDef::new("radius_m", FieldType::Real, None),
        ];
        let mut members = JsonObject::new();
        members.insert(
            NAME_MEMBER.to_string(),
            Value::String(layer_name.to_string()),
        );
        members.insert(
            SCHEMA_MEMBER.to_string(),
            serde_json::to_value(&schema).map_err(|err| InatError::Dataset(err.to_string()))?,
        );

        let collection = FeatureCollection {
            bbox: None,
            features: vec![Feature {
                bbox: None,
                geometry: Some(Geometry::new(GeometryValue::Polygon(vec![ring]))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }],
            foreign_members: Some(members),
        };
        write_collection(path, &collection)?;
        tracing::info!(path = %path, layer = layer_name, "circle dataset written");
        Ok(())
    }
}

pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.trim().is_empty(),
        Some(_) => false,
    }
}

fn infer_schema(features: &[Feature]) -> Vec<FieldDef> {
    let mut schema: Vec<FieldDef> = Vec::new();
    for feature in features {
        let Some(properties) = &feature.properties else {
            continue;
        };
        for (name, value) in properties {
            if schema.iter().any(|field| &field.name == name) {
                continue;
            }
            let field_type = match value {
                Value::Number(number) if number.is_i64() || number.is_u64() => FieldType::Integer,
                Value::Number(_) => FieldType::Real,
                _ => FieldType::String,
            };
            schema.push(FieldDef::new(name.clone(), field_type, None));
        }
    }
    schema
}

fn write_collection(path: &Utf8Path, collection: &FeatureCollection) -> Result<(), InatError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => parent,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| InatError::Filesystem(err.to_string()))?;
    let content = serde_json::to_vec_pretty(collection)
        .map_err(|err| InatError::Dataset(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".inat-import")
        .suffix(".geojson.tmp")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| InatError::Filesystem(err.to_string()))?;
    temp.write_all(&content)
        .map_err(|err| InatError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| InatError::Filesystem(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blank_detection() {
        assert!(is_blank(None));
        assert!(is_blank(Some(&Value::Null)));
        assert!(is_blank(Some(&json!("  "))));
        assert!(!is_blank(Some(&json!("Animalia"))));
        assert!(!is_blank(Some(&json!(0))));
    }

    #[test]
    fn schema_is_inferred_from_properties() {
        let mut feature = Feature::default();
        feature.set_property("taxon_id", 12);
        feature.set_property("latitude", 45.5);
        feature.set_property("scientific_name", "Parus major");
        let schema = infer_schema(&[feature]);
        let types = schema
            .iter()
            .map(|field| (field.name.as_str(), field.field_type))
            .collect::<Vec<_>>();
        assert!(types.contains(&("taxon_id", FieldType::Integer)));
        assert!(types.contains(&("latitude", FieldType::Real)));
        assert!(types.contains(&("scientific_name", FieldType::String)));
    }
}
