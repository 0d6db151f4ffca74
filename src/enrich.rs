use std::collections::BTreeMap;

use camino::Utf8Path;
use serde::Serialize;
use serde_json::Value;

use crate::app::{ProgressEvent, ProgressSink};
use crate::dataset::ObservationDataset;
use crate::domain::{OutputField, Rank};
use crate::error::InatError;
use crate::taxonomy::{TaxonomyRow, coerce_taxon_id};

pub const RANK_FIELD_LENGTH: u32 = 150;

/// Records probed for a blank rank value before calling a dataset corrupted.
const BLANK_PROBE_LIMIT: usize = 1;

/// Refuses datasets that are not observation imports or were already enriched.
pub fn inspect(dataset: &ObservationDataset) -> Result<(), InatError> {
    let source = dataset.source().to_string();
    if !dataset.has_field(OutputField::TaxonId.name()) {
        return Err(InatError::NotObservationDataset(source));
    }
    let kingdom = Rank::Kingdom.as_str();
    if dataset.has_field(kingdom) {
        if dataset.probe_blank(kingdom, BLANK_PROBE_LIMIT) > 0 {
            return Err(InatError::CorruptedDataset(source));
        }
        return Err(InatError::AlreadyProcessed(source));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateStats {
    pub updated: usize,
    pub not_found: usize,
    pub cancelled: bool,
}

/// Writes the seven rank columns onto every record, adding missing columns first.
pub fn apply_taxonomy(
    dataset: &mut ObservationDataset,
    rows: &BTreeMap<i64, TaxonomyRow>,
    sink: &dyn ProgressSink,
) -> UpdateStats {
    for rank in Rank::ALL {
        if dataset.add_string_field(rank.as_str(), RANK_FIELD_LENGTH) {
            tracing::debug!(field = rank.as_str(), "rank field added");
        }
    }

    let total = dataset.len();
    let taxon_field = OutputField::TaxonId.name();
    let mut stats = UpdateStats::default();
    for (index, record) in dataset.records_mut().iter_mut().enumerate() {
        if sink.is_cancelled() {
            stats.cancelled = true;
            break;
        }
        if index % 100 == 0 {
            sink.event(ProgressEvent::at("phase=Update", index, total));
        }
        let row = record
            .property(taxon_field)
            .and_then(coerce_taxon_id)
            .and_then(|id| rows.get(&id));
        let Some(row) = row else {
            stats.not_found += 1;
            continue;
        };
        for (rank, name) in row.iter() {
            record.set_property(rank.as_str(), Value::String(name.to_string()));
        }
        stats.updated += 1;
    }
    sink.event(ProgressEvent::at("phase=Update", total, total));
    stats
}

/// `taxon_id;scientific_name`, one line per distinct id.
pub fn write_taxa_ids(path: &Utf8Path, ids: &BTreeMap<i64, Option<String>>) -> Result<(), InatError> {
    let mut writer = semicolon_writer(path)?;
    writer
        .write_record(["taxon_id", "scientific_name"])
        .map_err(csv_error)?;
    for (id, name) in ids {
        writer
            .write_record([id.to_string(), name.clone().unwrap_or_default()])
            .map_err(csv_error)?;
    }
    writer
        .flush()
        .map_err(|err| InatError::Filesystem(err.to_string()))
}

/// `taxon_id;kingdom;...;species`, one line per resolved table row.
pub fn write_taxonomy_table(
    path: &Utf8Path,
    rows: &BTreeMap<i64, TaxonomyRow>,
) -> Result<(), InatError> {
    let mut writer = semicolon_writer(path)?;
    let header = std::iter::once("taxon_id").chain(Rank::ALL.iter().map(|rank| rank.as_str()));
    writer.write_record(header).map_err(csv_error)?;
    for (id, row) in rows {
        let record = std::iter::once(id.to_string())
            .chain(row.iter().map(|(_, name)| name.to_string()));
        writer.write_record(record).map_err(csv_error)?;
    }
    writer
        .flush()
        .map_err(|err| InatError::Filesystem(err.to_string()))
}

fn semicolon_writer(path: &Utf8Path) -> Result<csv::Writer<std::fs::File>, InatError> {
    csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path.as_std_path())
        .map_err(csv_error)
}

fn csv_error(err: csv::Error) -> InatError {
    InatError::Filesystem(err.to_string())
}
