use std::collections::HashMap;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use inat_area_import::app::{App, AppSettings, ImportOptions, ProgressEvent, ProgressSink};
use inat_area_import::circle::Circle;
use inat_area_import::dataset::ObservationDataset;
use inat_area_import::domain::{DatasetSource, PhotoMode};
use inat_area_import::error::InatError;
use inat_area_import::inat::{
    InatClient, LookupError, Observation, ObservationQuery, ObservationTaxon, PointGeometry,
    TaxonRecord,
};
use inat_area_import::output::JsonOutput;
use inat_area_import::taxonomy::RetryPolicy;
use inat_area_import::workspace::Workspace;

#[derive(Default)]
struct MockInat {
    pages: Vec<Vec<Observation>>,
    taxa: HashMap<i64, TaxonRecord>,
    observation_calls: Mutex<usize>,
    taxon_calls: Mutex<usize>,
}

impl InatClient for MockInat {
    fn fetch_observations(
        &self,
        _query: &ObservationQuery,
        page: u32,
    ) -> Result<Vec<Observation>, InatError> {
        let mut guard = self.observation_calls.lock().unwrap();
        *guard += 1;
        Ok(self
            .pages
            .get(page as usize - 1)
            .cloned()
            .unwrap_or_default())
    }

    fn fetch_taxon(&self, id: i64) -> Result<TaxonRecord, LookupError> {
        let mut guard = self.taxon_calls.lock().unwrap();
        *guard += 1;
        self.taxa.get(&id).cloned().ok_or(LookupError::NotFound)
    }
}

struct Cancelled;

/// Turns cancelled once `limit` record-update events have been seen.
struct CancelDuringUpdate {
    updates: Mutex<usize>,
    limit: usize,
}

impl ProgressSink for CancelDuringUpdate {
    fn event(&self, event: ProgressEvent) {
        if event.message.starts_with("phase=Update") {
            *self.updates.lock().unwrap() += 1;
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.updates.lock().unwrap() >= self.limit
    }
}

/// On the first record-update event, moves the dataset directory away and
/// leaves a plain file in its place so the commit has nowhere to write.
struct BreakDirectoryOnUpdate {
    root: Utf8PathBuf,
    moved: Utf8PathBuf,
    done: Mutex<bool>,
}

impl ProgressSink for BreakDirectoryOnUpdate {
    fn event(&self, event: ProgressEvent) {
        let mut done = self.done.lock().unwrap();
        if *done || !event.message.starts_with("phase=Update") {
            return;
        }
        std::fs::rename(self.root.as_std_path(), self.moved.as_std_path()).unwrap();
        std::fs::write(self.root.as_std_path(), b"not a directory").unwrap();
        *done = true;
    }
}

impl ProgressSink for Cancelled {
    fn event(&self, _event: ProgressEvent) {}

    fn is_cancelled(&self) -> bool {
        true
    }
}

fn observation(id: i64, taxon_id: Option<i64>) -> Observation {
    Observation {
        id,
        geojson: Some(PointGeometry {
            coordinates: vec![5.0 + id as f64 * 1e-4, 45.0],
        }),
        taxon: taxon_id.map(|taxon_id| ObservationTaxon {
            id: Some(taxon_id),
            name: Some(format!("taxon {taxon_id}")),
            ..ObservationTaxon::default()
        }),
        ..Observation::default()
    }
}

fn taxon(id: i64, rank: &str, name: &str, ancestors: &[i64]) -> (i64, TaxonRecord) {
    (
        id,
        TaxonRecord {
            id,
            rank: Some(rank.to_string()),
            name: Some(name.to_string()),
            ancestor_ids: ancestors.to_vec(),
        },
    )
}

fn tree() -> HashMap<i64, TaxonRecord> {
    HashMap::from([
        taxon(1, "kingdom", "Animalia", &[]),
        taxon(2, "class", "Aves", &[1]),
        taxon(3, "family", "Paridae", &[1, 2]),
        taxon(10, "species", "Parus major", &[1, 2, 3]),
        taxon(11, "species", "Cyanistes caeruleus", &[1, 2, 3]),
    ])
}

fn workspace() -> (tempfile::TempDir, Workspace) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, Workspace::new(root))
}

fn settings() -> AppSettings {
    AppSettings {
        retry: RetryPolicy::immediate(),
        ..AppSettings::default()
    }
}

fn circle() -> Circle {
    Circle::new(45.0, 5.0, 500.0).unwrap()
}

#[test]
fn import_pages_until_an_empty_page() {
    let (_temp, workspace) = workspace();
    let page = |start: i64, count: i64| {
        (start..start + count)
            .map(|id| observation(id, Some(10)))
            .collect::<Vec<_>>()
    };
    let client = MockInat {
        pages: vec![page(0, 200), page(200, 200), page(400, 37), Vec::new()],
        ..MockInat::default()
    };
    let app = App::new(workspace, client, settings());

    let result = app
        .import(&circle(), ImportOptions::default(), &JsonOutput)
        .unwrap();

    assert_eq!(result.fetched, 437);
    assert_eq!(result.written, 437);
    assert_eq!(*app.client().observation_calls.lock().unwrap(), 4);
    assert_eq!(result.circle_name, "circle_01");
    assert_eq!(result.layer_name, "iNat_circle_01_Ray=500m");
    assert_eq!(
        app.active().unwrap().source.as_deref(),
        Some(result.source.as_str())
    );
    assert!(app.workspace().circle_path("circle_01").as_std_path().exists());
}

#[test]
fn cancelled_import_writes_no_observations() {
    let (_temp, workspace) = workspace();
    let client = MockInat {
        pages: vec![vec![observation(1, Some(10))]],
        ..MockInat::default()
    };
    let app = App::new(workspace, client, settings());

    let err = app
        .import(&circle(), ImportOptions::default(), &Cancelled)
        .unwrap_err();

    assert_matches!(err, InatError::Cancelled);
    assert_eq!(*app.client().observation_calls.lock().unwrap(), 0);
    assert_eq!(app.active().unwrap().source, None);
}

#[test]
fn enrich_writes_ranks_and_diagnostics() {
    let (_temp, workspace) = workspace();
    let client = MockInat {
        pages: vec![vec![
            observation(1, Some(10)),
            observation(2, Some(10)),
            observation(3, Some(11)),
        ]],
        taxa: tree(),
        ..MockInat::default()
    };
    let app = App::new(workspace, client, settings());
    let imported = app
        .import(
            &circle(),
            ImportOptions {
                photo_mode: PhotoMode::None,
                ..ImportOptions::default()
            },
            &JsonOutput,
        )
        .unwrap();

    let result = app.enrich(None, &JsonOutput).unwrap();

    assert_eq!(result.source, imported.source);
    assert_eq!(result.distinct_taxa, 2);
    assert_eq!(result.updated, 3);
    assert_eq!(result.not_found, 0);
    assert_eq!(result.taxonomy_errors, 0);
    // 10 and 11 plus their three shared ancestors, one call each.
    assert_eq!(*app.client().taxon_calls.lock().unwrap(), 5);

    let source: DatasetSource = imported.source.parse().unwrap();
    let dataset = ObservationDataset::open(&source).unwrap();
    let first = &dataset.records()[0];
    assert_eq!(first.property("kingdom").and_then(|v| v.as_str()), Some("Animalia"));
    assert_eq!(first.property("class").and_then(|v| v.as_str()), Some("Aves"));
    assert_eq!(first.property("species").and_then(|v| v.as_str()), Some("Parus major"));
    assert_eq!(first.property("genus").and_then(|v| v.as_str()), Some(""));

    let taxonomy = std::fs::read_to_string(&result.taxonomy_csv).unwrap();
    assert!(taxonomy.contains("10;Animalia;;Aves;;Paridae;;Parus major"));
    let ids = std::fs::read_to_string(&result.taxa_ids_csv).unwrap();
    assert_eq!(ids, "taxon_id;scientific_name\n10;taxon 10\n11;taxon 11\n");
    let log = std::fs::read_to_string(&result.run_log).unwrap();
    assert!(log.lines().count() >= 4);
    assert!(log.lines().all(|line| line.starts_with('[')));
}

#[test]
fn second_enrich_is_refused_and_file_is_unchanged() {
    let (_temp, workspace) = workspace();
    let client = MockInat {
        pages: vec![vec![observation(1, Some(10)), observation(2, Some(11))]],
        taxa: tree(),
        ..MockInat::default()
    };
    let app = App::new(workspace, client, settings());
    let imported = app
        .import(&circle(), ImportOptions::default(), &JsonOutput)
        .unwrap();
    app.enrich(None, &JsonOutput).unwrap();

    let source: DatasetSource = imported.source.parse().unwrap();
    let before = std::fs::read(source.path().as_std_path()).unwrap();
    let calls_before = *app.client().taxon_calls.lock().unwrap();

    let err = app.enrich(Some(source.clone()), &JsonOutput).unwrap_err();

    assert_matches!(err, InatError::AlreadyProcessed(_));
    assert_eq!(std::fs::read(source.path().as_std_path()).unwrap(), before);
    assert_eq!(*app.client().taxon_calls.lock().unwrap(), calls_before);
}

#[test]
fn blank_rank_value_marks_dataset_corrupted() {
    let (_temp, workspace) = workspace();
    let client = MockInat {
        pages: vec![vec![observation(1, Some(10)), observation(2, None)]],
        taxa: tree(),
        ..MockInat::default()
    };
    let app = App::new(workspace, client, settings());
    app.import(&circle(), ImportOptions::default(), &JsonOutput)
        .unwrap();

    let result = app.enrich(None, &JsonOutput).unwrap();
    assert_eq!(result.updated, 1);
    assert_eq!(result.not_found, 1);

    let err = app.enrich(None, &JsonOutput).unwrap_err();
    assert_matches!(err, InatError::CorruptedDataset(_));
}

#[test]
fn cancelled_update_keeps_edits_and_rerun_reports_corruption() {
    let (_temp, workspace) = workspace();
    let client = MockInat {
        pages: vec![vec![
            observation(1, Some(10)),
            observation(2, Some(10)),
            observation(3, Some(11)),
        ]],
        taxa: tree(),
        ..MockInat::default()
    };
    let app = App::new(workspace, client, settings());
    let imported = app
        .import(&circle(), ImportOptions::default(), &JsonOutput)
        .unwrap();
    let sink = CancelDuringUpdate {
        updates: Mutex::new(0),
        limit: 1,
    };

    let result = app.enrich(None, &sink).unwrap();

    assert!(result.cancelled);
    assert_eq!(result.taxonomy_rows, 2);
    assert_eq!(result.updated, 1);

    let source: DatasetSource = imported.source.parse().unwrap();
    let dataset = ObservationDataset::open(&source).unwrap();
    let records = dataset.records();
    assert_eq!(
        records[0].property("kingdom").and_then(|v| v.as_str()),
        Some("Animalia")
    );
    for record in &records[1..] {
        assert_eq!(record.property("kingdom"), Some(&serde_json::Value::Null));
        assert_eq!(record.property("species"), Some(&serde_json::Value::Null));
    }

    let err = app.enrich(None, &JsonOutput).unwrap_err();
    assert_matches!(err, InatError::CorruptedDataset(_));
}

#[test]
fn failed_commit_returns_error_and_keeps_original_bytes() {
    let temp = tempfile::tempdir().unwrap();
    let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let root = base.join("project");
    let moved = base.join("moved");
    let client = MockInat {
        pages: vec![vec![observation(1, Some(10)), observation(2, Some(11))]],
        taxa: tree(),
        ..MockInat::default()
    };
    let app = App::new(Workspace::new(root.clone()), client, settings());
    let imported = app
        .import(&circle(), ImportOptions::default(), &JsonOutput)
        .unwrap();
    let source: DatasetSource = imported.source.parse().unwrap();
    let file_name = source.path().file_name().unwrap().to_string();
    let before = std::fs::read(source.path().as_std_path()).unwrap();
    let sink = BreakDirectoryOnUpdate {
        root,
        moved: moved.clone(),
        done: Mutex::new(false),
    };

    let err = app.enrich(Some(source), &sink).unwrap_err();

    assert_matches!(err, InatError::Filesystem(_));
    assert!(*sink.done.lock().unwrap());
    let after = std::fs::read(moved.join(&file_name).as_std_path()).unwrap();
    assert_eq!(after, before);
}

#[test]
fn enrich_guards_reject_missing_and_foreign_datasets() {
    let (_temp, workspace) = workspace();
    let circle_path = workspace.circle_path("circle_01");
    let app = App::new(workspace, MockInat::default(), settings());

    let err = app.enrich(None, &JsonOutput).unwrap_err();
    assert_matches!(err, InatError::NoActiveDataset);

    inat_area_import::dataset::CircleDataset::write(&circle_path, "circle_01", &circle()).unwrap();
    let err = app
        .enrich(Some(DatasetSource::new(circle_path, "circle_01")), &JsonOutput)
        .unwrap_err();
    assert_matches!(err, InatError::NotObservationDataset(_));
}

#[test]
fn presets_list_distinct_logins_and_names() {
    let (_temp, workspace) = workspace();
    let mut first = observation(1, Some(10));
    first.user = Some(inat_area_import::inat::ObservationUser {
        login: Some("zoe".to_string()),
        name: None,
    });
    let mut second = observation(2, Some(11));
    second.user = Some(inat_area_import::inat::ObservationUser {
        login: Some("alex".to_string()),
        name: None,
    });
    let client = MockInat {
        pages: vec![vec![first, second, observation(3, Some(10))]],
        ..MockInat::default()
    };
    let app = App::new(workspace, client, settings());

    let suggestions = app.presets(&circle(), Default::default());

    assert_eq!(suggestions.user_logins, vec!["alex", "zoe"]);
    assert_eq!(suggestions.taxon_names, vec!["taxon 10", "taxon 11"]);
    assert_eq!(*app.client().observation_calls.lock().unwrap(), 1);
}
