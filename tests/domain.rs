use assert_matches::assert_matches;

use inat_area_import::domain::{
    DatasetSource, FieldType, OutputField, PhotoMode, QualityGrade, Rank,
};
use inat_area_import::error::InatError;

#[test]
fn parse_quality_grade() {
    let grade: QualityGrade = "needs_id".parse().unwrap();
    assert_eq!(grade, QualityGrade::NeedsId);
    assert_eq!(grade.as_str(), "needs_id");
}

#[test]
fn parse_quality_grade_invalid() {
    let err = "verifiable".parse::<QualityGrade>().unwrap_err();
    assert_matches!(err, InatError::InvalidQualityGrade(_));
}

#[test]
fn parse_photo_mode() {
    assert_eq!("one".parse::<PhotoMode>().unwrap(), PhotoMode::One);
    assert_eq!(PhotoMode::default(), PhotoMode::All);
    let err = "some".parse::<PhotoMode>().unwrap_err();
    assert_matches!(err, InatError::InvalidPhotoMode(_));
}

#[test]
fn ranks_are_ordered_root_first() {
    let names = Rank::ALL.iter().map(|rank| rank.as_str()).collect::<Vec<_>>();
    assert_eq!(
        names,
        vec!["kingdom", "phylum", "class", "order", "family", "genus", "species"]
    );
    assert_eq!(Rank::Species.index(), 6);
}

#[test]
fn catalog_types_and_lengths() {
    assert_eq!(OutputField::InatId.field_type(), FieldType::Integer);
    assert_eq!(OutputField::DateObs.field_type(), FieldType::DateTime);
    assert_eq!(OutputField::Latitude.field_type(), FieldType::Real);
    assert_eq!(OutputField::PlaceGuess.length(), Some(200));
    assert_eq!(OutputField::TaxonRank.length(), Some(30));
    assert_eq!(OutputField::Precision.length(), None);
}

#[test]
fn dataset_source_display_matches_parse() {
    let source = DatasetSource::new("out/iNat_circle_02_Ray=800m.geojson", "iNat_circle_02_Ray=800m");
    let printed = source.to_string();
    assert_eq!(
        printed,
        "out/iNat_circle_02_Ray=800m.geojson|layername=iNat_circle_02_Ray=800m"
    );
    let parsed: DatasetSource = printed.parse().unwrap();
    assert_eq!(parsed, source);
}

#[test]
fn dataset_source_with_empty_layer_is_invalid() {
    let err = "obs.geojson|layername=".parse::<DatasetSource>().unwrap_err();
    assert_matches!(err, InatError::InvalidSource(_));
}
