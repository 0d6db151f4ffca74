use chrono::{DateTime, Local};
use serde::Serialize;

use crate::circle::Circle;
use crate::config::ResolvedConfig;
use crate::dataset::{CircleDataset, ObservationDataset};
use crate::domain::{DatasetSource, ObservationFilters, OutputField, PhotoMode};
use crate::enrich::{apply_taxonomy, inspect, write_taxa_ids, write_taxonomy_table};
use crate::error::InatError;
use crate::fetch::{FilterSuggestions, fetch_all, prescan};
use crate::inat::{InatClient, ObservationQuery};
use crate::projection::{FieldSelection, project};
use crate::runlog::RunLog;
use crate::taxonomy::{RetryPolicy, TaxonResolver, build_taxonomy, distinct_taxon_ids};
use crate::workspace::Workspace;

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    /// `(current, total)` when the step is countable.
    pub position: Option<(usize, usize)>,
}

impl ProgressEvent {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            position: None,
        }
    }

    pub fn at(message: impl Into<String>, current: usize, total: usize) -> Self {
        Self {
            message: message.into(),
            position: Some((current, total)),
        }
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);

    /// Polled between units of work; long loops stop early when it turns true.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Request settings taken from the resolved configuration.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub per_page: u32,
    pub locale: Option<String>,
    pub preferred_place_id: Option<u64>,
    pub retry: RetryPolicy,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            per_page: 200,
            locale: Some("fr".to_string()),
            preferred_place_id: Some(6753),
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&ResolvedConfig> for AppSettings {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            per_page: config.per_page,
            locale: config.locale.clone(),
            preferred_place_id: config.preferred_place_id,
            retry: config.retry,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub filters: ObservationFilters,
    pub fields: Vec<OutputField>,
    pub photo_mode: PhotoMode,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            filters: ObservationFilters::default(),
            fields: OutputField::CATALOG.to_vec(),
            photo_mode: PhotoMode::All,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub circle_name: String,
    pub circle_path: String,
    pub circle: Circle,
    pub source: String,
    pub layer_name: String,
    pub fetched: usize,
    pub written: usize,
    pub fields: Vec<String>,
    pub max_photos: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichResult {
    pub source: String,
    pub distinct_taxa: usize,
    pub taxonomy_rows: usize,
    pub taxonomy_errors: usize,
    pub lookup_failures: usize,
    pub updated: usize,
    pub not_found: usize,
    pub cancelled: bool,
    pub started_at: String,
    pub finished_at: String,
    pub duration_secs: f64,
    pub taxa_ids_csv: String,
    pub taxonomy_csv: String,
    pub run_log: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveResult {
    pub source: Option<String>,
}

pub struct App<C: InatClient> {
    workspace: Workspace,
    client: C,
    settings: AppSettings,
}

impl<C: InatClient> App<C> {
    pub fn new(workspace: Workspace, client: C, settings: AppSettings) -> Self {
        Self {
            workspace,
            client,
            settings,
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn query(&self, circle: &Circle, filters: ObservationFilters) -> ObservationQuery {
        let mut query = ObservationQuery::new(circle, self.settings.per_page, filters);
        query.locale = self.settings.locale.clone();
        query.preferred_place_id = self.settings.preferred_place_id;
        query
    }

    /// Distinct logins and names from the first page inside the circle.
    pub fn presets(&self, circle: &Circle, filters: ObservationFilters) -> FilterSuggestions {
        prescan(&self.client, &self.query(circle, filters))
    }

    pub fn active(&self) -> Result<ActiveResult, InatError> {
        Ok(ActiveResult {
            source: self
                .workspace
                .active_source()?
                .map(|source| source.to_string()),
        })
    }

    pub fn import(
        &self,
        circle: &Circle,
        options: ImportOptions,
        sink: &dyn ProgressSink,
    ) -> Result<ImportResult, InatError> {
        self.workspace.ensure_root()?;
        let circle_name = self.workspace.next_circle_name();
        let circle_path = self.workspace.circle_path(&circle_name);
        CircleDataset::write(&circle_path, &circle_name, circle)?;
        sink.event(ProgressEvent::message(format!(
            "phase=Circle; {circle_name} at lat={:.6} lon={:.6}, radius {:.0} m",
            circle.lat(),
            circle.lon(),
            circle.radius_m()
        )));

        let query = self.query(circle, options.filters);
        let observations = fetch_all(&self.client, &query, sink)?;

        let selection = FieldSelection::new(&options.fields);
        let projected = project(&observations, &selection, options.photo_mode);
        sink.event(ProgressEvent::message(format!(
            "phase=Project; {} of {} observations located",
            projected.records.len(),
            observations.len()
        )));

        let layer_name = Workspace::observation_layer_name(&circle_name, circle.radius_m());
        let path = self.workspace.observation_path(&layer_name);
        let dataset = ObservationDataset::create(&path, &layer_name, &projected)?;
        self.workspace.set_active(dataset.source())?;
        sink.event(ProgressEvent::message(format!(
            "phase=Write; {} records in {path}",
            dataset.len()
        )));

        Ok(ImportResult {
            circle_name,
            circle_path: circle_path.to_string(),
            circle: *circle,
            source: dataset.source().to_string(),
            layer_name,
            fetched: observations.len(),
            written: dataset.len(),
            fields: projected
                .field_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            max_photos: projected.max_photos,
        })
    }

    pub fn enrich(
        &self,
        source: Option<DatasetSource>,
        sink: &dyn ProgressSink,
    ) -> Result<EnrichResult, InatError> {
        let source = self.workspace.select(source)?;
        let mut dataset = ObservationDataset::open(&source)?;
        inspect(&dataset)?;

        let started_at = Local::now();
        let log = RunLog::start(
            &Workspace::run_log_path(&source),
            &format!("=== taxonomy enrichment started: {source} ==="),
        );
        let logged = LoggedSink { inner: sink, log: &log };

        let ids = distinct_taxon_ids(&dataset);
        log.line(&format!(
            "{} records, {} distinct taxon ids",
            dataset.len(),
            ids.len()
        ));
        let taxa_ids_csv = Workspace::taxa_ids_path(&source);
        match write_taxa_ids(&taxa_ids_csv, &ids) {
            Ok(()) => log.line(&format!("taxon ids written to {taxa_ids_csv}")),
            Err(err) => log.line(&format!("unable to write {taxa_ids_csv}: {err}")),
        }

        let mut resolver = TaxonResolver::new(&self.client, self.settings.retry);
        let outcome = build_taxonomy(&mut resolver, ids.keys().copied(), &logged);
        if outcome.cancelled {
            log.line("taxonomy resolution cancelled by user, keeping partial results");
        }
        log.line(&format!(
            "taxonomy built: {} rows, {} errors, {} failed lookups",
            outcome.rows.len(),
            outcome.errors,
            resolver.failures()
        ));
        let taxonomy_csv = Workspace::taxonomy_path(&source);
        match write_taxonomy_table(&taxonomy_csv, &outcome.rows) {
            Ok(()) => log.line(&format!("taxonomy table written to {taxonomy_csv}")),
            Err(err) => log.line(&format!("unable to write {taxonomy_csv}: {err}")),
        }

        let stats = apply_taxonomy(&mut dataset, &outcome.rows, &logged);
        if stats.cancelled {
            log.line("record update cancelled by user");
        }
        if let Err(err) = dataset.commit() {
            log.line(&format!("commit failed, dataset left unchanged: {err}"));
            return Err(err);
        }
        log.line(&format!(
            "dataset updated: {} records with taxonomy, {} without",
            stats.updated, stats.not_found
        ));

        let finished_at = Local::now();
        let duration_secs = (finished_at - started_at).num_milliseconds() as f64 / 1000.0;
        log.line(&format!(
            "=== finished: start {}, end {}, duration {} ===",
            started_at.format("%H:%M:%S"),
            finished_at.format("%H:%M:%S"),
            format_duration(duration_secs)
        ));

        Ok(EnrichResult {
            source: source.to_string(),
            distinct_taxa: ids.len(),
            taxonomy_rows: outcome.rows.len(),
            taxonomy_errors: outcome.errors,
            lookup_failures: resolver.failures(),
            updated: stats.updated,
            not_found: stats.not_found,
            cancelled: outcome.cancelled || stats.cancelled,
            started_at: rfc3339(started_at),
            finished_at: rfc3339(finished_at),
            duration_secs,
            taxa_ids_csv: taxa_ids_csv.to_string(),
            taxonomy_csv: taxonomy_csv.to_string(),
            run_log: log.path().to_string(),
        })
    }
}

/// Forwards to the caller's sink and copies plain messages into the run log.
struct LoggedSink<'a> {
    inner: &'a dyn ProgressSink,
    log: &'a RunLog,
}

impl ProgressSink for LoggedSink<'_> {
    fn event(&self, event: ProgressEvent) {
        if event.position.is_none() {
            self.log.line(&event.message);
        }
        self.inner.event(event);
    }

    fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }
}

fn rfc3339(stamp: DateTime<Local>) -> String {
    stamp.to_rfc3339()
}

fn format_duration(seconds: f64) -> String {
    let whole = seconds.max(0.0).round() as u64;
    format!("{}m {:02}s", whole / 60, whole % 60)
}
