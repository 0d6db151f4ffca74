use serde_json::Value;

use inat_area_import::domain::{OutputField, PhotoMode};
use inat_area_import::inat::Observation;
use inat_area_import::projection::{FieldSelection, project};

fn observations() -> Vec<Observation> {
    serde_json::from_value(serde_json::json!([
        {
            "id": 101,
            "geojson": {"type": "Point", "coordinates": [4.85, 45.75]},
            "taxon": {"id": 13094, "name": "Parus major", "rank": "species", "preferred_common_name": "Mésange charbonnière"},
            "user": {"login": "naturalist", "name": "A. Naturalist"},
            "photos": [{"url": "https://static.inaturalist.org/photos/1/square.jpg"}],
            "quality_grade": "research",
            "positional_accuracy": 12.4,
            "time_observed_at": "2024-04-02T08:30:00+02:00"
        },
        {
            "id": 102,
            "geojson": null,
            "taxon": {"id": 47851, "name": "Quercus"}
        },
        {
            "id": 103,
            "geojson": {"type": "Point", "coordinates": [4.86, 45.76]},
            "taxon": null,
            "photos": null,
            "observed_on": "2024-04-03"
        }
    ]))
    .unwrap()
}

#[test]
fn forced_fields_are_always_present() {
    let selection = FieldSelection::new(&[OutputField::ScientificName]);
    let set = project(&observations(), &selection, PhotoMode::None);
    assert_eq!(set.field_names(), vec!["inat_id", "scientific_name", "taxon_id"]);
    for record in &set.records {
        assert_eq!(record.properties.len(), 3);
    }
}

#[test]
fn observations_without_coordinates_are_dropped() {
    let set = project(&observations(), &FieldSelection::all(), PhotoMode::One);
    let ids = set
        .records
        .iter()
        .map(|record| record.properties["inat_id"].clone())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec![Value::from(101), Value::from(103)]);
    assert_eq!(set.schema.len(), 16);
}

#[test]
fn catalog_values_are_projected() {
    let set = project(&observations(), &FieldSelection::all(), PhotoMode::One);
    let first = &set.records[0].properties;
    assert_eq!(first["vernacular_name"], Value::from("Mésange charbonnière"));
    assert_eq!(first["taxon_rank"], Value::from("species"));
    assert_eq!(first["observer_login"], Value::from("naturalist"));
    assert_eq!(first["precision"], Value::from(12));
    assert_eq!(first["latitude"], Value::from(45.75));
    assert_eq!(
        first["url_taxon"],
        Value::from("https://www.inaturalist.org/taxa/13094")
    );
    assert_eq!(
        first["url_photo1"],
        Value::from("https://static.inaturalist.org/photos/1/large.jpg")
    );
    assert_eq!(set.records[0].lon, 4.85);

    let second = &set.records[1].properties;
    assert_eq!(second["date_obs"], Value::from("2024-04-03T00:00:00"));
    assert_eq!(second["url_photo1"], Value::Null);
    assert_eq!(second["scientific_name"], Value::Null);
}
