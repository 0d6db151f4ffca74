use std::collections::{BTreeMap, HashMap};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::app::{ProgressEvent, ProgressSink};
use crate::dataset::ObservationDataset;
use crate::domain::{OutputField, Rank};
use crate::inat::{InatClient, LookupError, TaxonRecord};

/// Pacing and rate-limit backoff for taxon lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause after every successful lookup.
    pub call_delay: Duration,
    /// Pause after an HTTP 429 before trying again.
    pub cooldown: Duration,
    /// Total calls allowed for one id, the first one included.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            call_delay: Duration::from_millis(500),
            cooldown: Duration::from_secs(60),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn immediate() -> Self {
        Self {
            call_delay: Duration::ZERO,
            cooldown: Duration::ZERO,
            ..Self::default()
        }
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaxonEntry {
    Resolved {
        rank: Option<String>,
        name: String,
        ancestor_ids: Vec<i64>,
    },
    /// Lookup failed for good during this run; never retried.
    Unresolved,
}

impl TaxonEntry {
    fn from_record(record: TaxonRecord) -> Self {
        TaxonEntry::Resolved {
            rank: record.rank,
            name: record.name.unwrap_or_default(),
            ancestor_ids: record.ancestor_ids,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, TaxonEntry::Resolved { .. })
    }

    /// The tracked rank this entry sits at, if any.
    pub fn tracked_rank(&self) -> Option<Rank> {
        match self {
            TaxonEntry::Resolved {
                rank: Some(rank), ..
            } => Rank::parse(rank),
            _ => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            TaxonEntry::Resolved { name, .. } => Some(name),
            TaxonEntry::Unresolved => None,
        }
    }
}

/// Memoized taxon lookups: each id gets at most one attempt sequence per run.
pub struct TaxonResolver<'a, C: InatClient + ?Sized> {
    client: &'a C,
    policy: RetryPolicy,
    cache: HashMap<i64, TaxonEntry>,
    attempts: HashMap<i64, u32>,
    failures: usize,
}

impl<'a, C: InatClient + ?Sized> TaxonResolver<'a, C> {
    pub fn new(client: &'a C, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            cache: HashMap::new(),
            attempts: HashMap::new(),
            failures: 0,
        }
    }

    pub fn resolve(&mut self, id: i64) -> &TaxonEntry {
        if !self.cache.contains_key(&id) {
            let entry = self.lookup(id);
            self.cache.insert(id, entry);
        }
        &self.cache[&id]
    }

    /// Calls made for `id` so far.
    pub fn attempts(&self, id: i64) -> u32 {
        self.attempts.get(&id).copied().unwrap_or(0)
    }

    /// Ids that ended up unresolved.
    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn lookup(&mut self, id: i64) -> TaxonEntry {
        loop {
            let attempt = {
                let counter = self.attempts.entry(id).or_insert(0);
                *counter += 1;
                *counter
            };
            match self.client.fetch_taxon(id) {
                Ok(record) => {
                    pause(self.policy.call_delay);
                    return TaxonEntry::from_record(record);
                }
                Err(LookupError::RateLimited) if attempt < self.policy.max_attempts => {
                    tracing::warn!(
                        taxon_id = id,
                        attempt,
                        cooldown_secs = self.policy.cooldown.as_secs(),
                        "rate limited, cooling down"
                    );
                    pause(self.policy.cooldown);
                }
                Err(LookupError::RateLimited) => {
                    tracing::warn!(taxon_id = id, attempt, "rate limit persists, giving up");
                    self.failures += 1;
                    return TaxonEntry::Unresolved;
                }
                Err(err) => {
                    tracing::warn!(taxon_id = id, error = %err, "taxon lookup failed");
                    self.failures += 1;
                    return TaxonEntry::Unresolved;
                }
            }
        }
    }
}

/// Seven rank names for one taxon id; empty strings where unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaxonomyRow {
    names: [String; 7],
}

impl TaxonomyRow {
    pub fn get(&self, rank: Rank) -> &str {
        &self.names[rank.index()]
    }

    pub fn set(&mut self, rank: Rank, name: impl Into<String>) {
        self.names[rank.index()] = name.into();
    }

    pub fn is_empty(&self) -> bool {
        self.names.iter().all(String::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Rank, &str)> {
        Rank::ALL
            .into_iter()
            .map(move |rank| (rank, self.get(rank)))
    }
}

/// Folds a subject and its ancestors (root first) into a row.
///
/// The first ancestor met at a rank keeps it; later ones at the same rank are
/// ignored. The subject's own rank, when named, is applied last and overrides.
pub fn reduce(subject: &TaxonEntry, ancestors: &[TaxonEntry]) -> TaxonomyRow {
    let mut row = TaxonomyRow::default();
    for ancestor in ancestors {
        if let (Some(rank), Some(name)) = (ancestor.tracked_rank(), ancestor.name()) {
            if row.get(rank).is_empty() {
                row.set(rank, name);
            }
        }
    }
    if let (Some(rank), Some(name)) = (subject.tracked_rank(), subject.name()) {
        if !name.is_empty() {
            row.set(rank, name);
        }
    }
    row
}

/// Reads a taxon id stored as an integer, an integral float or a numeric string.
pub fn coerce_taxon_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().and_then(integral)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    }
}

fn integral(value: f64) -> Option<i64> {
    (value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64)
        .then_some(value as i64)
}

/// Distinct taxon ids in ascending order, each with the first scientific name seen.
pub fn distinct_taxon_ids(dataset: &ObservationDataset) -> BTreeMap<i64, Option<String>> {
    let taxon_field = OutputField::TaxonId.name();
    let name_field = OutputField::ScientificName.name();
    let mut ids = BTreeMap::new();
    for record in dataset.records() {
        let Some(id) = record.property(taxon_field).and_then(coerce_taxon_id) else {
            continue;
        };
        let name = record
            .property(name_field)
            .and_then(Value::as_str)
            .map(str::to_string);
        ids.entry(id)
            .and_modify(|existing: &mut Option<String>| {
                if existing.is_none() {
                    *existing = name.clone();
                }
            })
            .or_insert(name);
    }
    ids
}

#[derive(Debug, Clone, Default)]
pub struct TaxonomyOutcome {
    pub rows: BTreeMap<i64, TaxonomyRow>,
    /// Subjects that could not be resolved.
    pub errors: usize,
    pub cancelled: bool,
}

pub fn build_taxonomy<C: InatClient + ?Sized>(
    resolver: &mut TaxonResolver<'_, C>,
    ids: impl IntoIterator<Item = i64>,
    sink: &dyn ProgressSink,
) -> TaxonomyOutcome {
    let ids = ids.into_iter().collect::<Vec<_>>();
    let total = ids.len();
    let mut outcome = TaxonomyOutcome::default();

    for (index, id) in ids.into_iter().enumerate() {
        if sink.is_cancelled() {
            tracing::warn!(processed = index, total, "taxonomy resolution cancelled");
            outcome.cancelled = true;
            break;
        }
        sink.event(ProgressEvent::at(
            format!("phase=Taxonomy; taxon {id}"),
            index + 1,
            total,
        ));

        let subject = resolver.resolve(id).clone();
        let TaxonEntry::Resolved { ancestor_ids, .. } = &subject else {
            sink.event(ProgressEvent::message(format!("taxon {id} not found")));
            outcome.errors += 1;
            outcome.rows.insert(id, TaxonomyRow::default());
            continue;
        };

        let ancestors = ancestor_ids
            .iter()
            .map(|ancestor| resolver.resolve(*ancestor).clone())
            .collect::<Vec<_>>();
        outcome.rows.insert(id, reduce(&subject, &ancestors));
    }

    tracing::info!(
        rows = outcome.rows.len(),
        errors = outcome.errors,
        cached = resolver.cached(),
        "taxonomy table built"
    );
    outcome
}
