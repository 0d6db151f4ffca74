use std::collections::BTreeSet;

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};
use crate::error::InatError;
use crate::inat::{InatClient, Observation, ObservationQuery};

/// Requests pages from 1 until the API returns an empty page.
///
/// There is no page cap: termination relies on the API eventually answering
/// with an empty page. Cancellation is observed between pages.
pub fn fetch_all<C: InatClient + ?Sized>(
    client: &C,
    query: &ObservationQuery,
    sink: &dyn ProgressSink,
) -> Result<Vec<Observation>, InatError> {
    let mut observations = Vec::new();
    let mut page = 1u32;
    loop {
        if sink.is_cancelled() {
            tracing::warn!(page, "observation download cancelled");
            return Err(InatError::Cancelled);
        }
        sink.event(ProgressEvent::message(format!(
            "phase=Fetch; page {page} ({} observations so far)",
            observations.len()
        )));

        let results = client.fetch_observations(query, page)?;
        if results.is_empty() {
            break;
        }
        tracing::debug!(page, count = results.len(), "observation page received");
        observations.extend(results);
        page += 1;
    }
    tracing::info!(
        total = observations.len(),
        pages = page,
        "observation download complete"
    );
    Ok(observations)
}

/// Distinct observer logins and scientific names seen on the first page,
/// offered as filter suggestions.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterSuggestions {
    pub user_logins: Vec<String>,
    pub taxon_names: Vec<String>,
}

pub fn prescan<C: InatClient + ?Sized>(client: &C, query: &ObservationQuery) -> FilterSuggestions {
    let results = match client.fetch_observations(query, 1) {
        Ok(results) => results,
        Err(err) => {
            tracing::warn!(error = %err, "unable to preload filter suggestions");
            return FilterSuggestions::default();
        }
    };

    let mut logins = BTreeSet::new();
    let mut names = BTreeSet::new();
    for obs in &results {
        if let Some(login) = obs.user.as_ref().and_then(|user| user.login.as_deref()) {
            if !login.is_empty() {
                logins.insert(login.to_string());
            }
        }
        if let Some(name) = obs.taxon.as_ref().and_then(|taxon| taxon.name.as_deref()) {
            if !name.is_empty() {
                names.insert(name.to_string());
            }
        }
    }

    FilterSuggestions {
        user_logins: logins.into_iter().collect(),
        taxon_names: names.into_iter().collect(),
    }
}
