use std::thread;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::circle::Circle;
use crate::domain::ObservationFilters;
use crate::error::InatError;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Observation {
    pub id: i64,
    #[serde(default)]
    pub geojson: Option<PointGeometry>,
    #[serde(default)]
    pub taxon: Option<ObservationTaxon>,
    #[serde(default)]
    pub user: Option<ObservationUser>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub photos: Vec<Photo>,
    #[serde(default)]
    pub quality_grade: Option<String>,
    #[serde(default)]
    pub place_guess: Option<String>,
    #[serde(default)]
    pub positional_accuracy: Option<f64>,
    #[serde(default)]
    pub time_observed_at: Option<String>,
    #[serde(default)]
    pub observed_on: Option<String>,
}

impl Observation {
    /// `(longitude, latitude)` when the record carries a usable point.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        let coordinates = &self.geojson.as_ref()?.coordinates;
        match coordinates.as_slice() {
            [lon, lat, ..] if lon.is_finite() && lat.is_finite() => Some((*lon, *lat)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PointGeometry {
    #[serde(default)]
    pub coordinates: Vec<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ObservationTaxon {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rank: Option<String>,
    #[serde(default)]
    pub preferred_common_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ObservationUser {
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Photo {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TaxonRecord {
    pub id: i64,
    #[serde(default)]
    pub rank: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ancestor_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct ResultsPage<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Failure of a single taxon lookup; rate limiting is kept apart so the
/// caller can cool down and retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("rate limited (HTTP 429)")]
    RateLimited,
    #[error("no result")]
    NotFound,
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObservationQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: f64,
    pub per_page: u32,
    pub filters: ObservationFilters,
    pub locale: Option<String>,
    pub preferred_place_id: Option<u64>,
}

impl ObservationQuery {
    pub fn new(circle: &Circle, per_page: u32, filters: ObservationFilters) -> Self {
        Self {
            lat: circle.lat(),
            lng: circle.lon(),
            radius_km: circle.radius_km(),
            per_page,
            filters,
            locale: None,
            preferred_place_id: None,
        }
    }

    pub fn params(&self, page: u32) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("lat", self.lat.to_string()),
            ("lng", self.lng.to_string()),
            ("radius", self.radius_km.to_string()),
            ("per_page", self.per_page.to_string()),
            ("page", page.to_string()),
            ("captive", "false".to_string()),
        ];
        if let Some(locale) = &self.locale {
            params.push(("locale", locale.clone()));
        }
        if let Some(place) = self.preferred_place_id {
            params.push(("preferred_place_id", place.to_string()));
        }
        let filters = &self.filters;
        if let Some(date) = filters.date_from {
            params.push(("d1", date.format("%Y-%m-%d").to_string()));
        }
        if let Some(date) = filters.date_to {
            params.push(("d2", date.format("%Y-%m-%d").to_string()));
        }
        if let Some(login) = ObservationFilters::non_blank(filters.user_login.clone()) {
            params.push(("user_login", login));
        }
        if let Some(name) = ObservationFilters::non_blank(filters.taxon_name.clone()) {
            params.push(("taxon_name", name));
        }
        if let Some(grade) = filters.quality_grade {
            params.push(("quality_grade", grade.as_str().to_string()));
        }
        params
    }
}

pub trait InatClient: Send + Sync {
    fn fetch_observations(
        &self,
        query: &ObservationQuery,
        page: u32,
    ) -> Result<Vec<Observation>, InatError>;
    fn fetch_taxon(&self, id: i64) -> Result<TaxonRecord, LookupError>;
}

#[derive(Clone)]
pub struct InatHttpClient {
    client: Client,
    base_url: String,
}

impl InatHttpClient {
    pub fn new(base_url: &str) -> Result<Self, InatError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("inat-import/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| InatError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| InatError::Http(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, InatError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "iNaturalist request failed".to_string());
        Err(InatError::Status { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, InatError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 500;
        let mut attempt = 0usize;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        tracing::warn!(status, attempt, "retrying observation page");
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(InatError::Http(err.to_string()));
                }
            }
        }
    }
}

impl InatClient for InatHttpClient {
    fn fetch_observations(
        &self,
        query: &ObservationQuery,
        page: u32,
    ) -> Result<Vec<Observation>, InatError> {
        let url = format!("{}/observations", self.base_url);
        let params = query.params(page);
        let response = self.send_with_retries(|| self.client.get(&url).query(&params))?;
        let response = Self::handle_status(response)?;
        let page: ResultsPage<Observation> = response
            .json()
            .map_err(|err| InatError::Http(err.to_string()))?;
        Ok(page.results)
    }

    fn fetch_taxon(&self, id: i64) -> Result<TaxonRecord, LookupError> {
        let url = format!("{}/taxa/{id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| LookupError::Other(err.to_string()))?;
        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => return Err(LookupError::RateLimited),
            StatusCode::NOT_FOUND => return Err(LookupError::NotFound),
            status if !status.is_success() => {
                return Err(LookupError::Other(format!("HTTP {}", status.as_u16())));
            }
            _ => {}
        }
        let page: ResultsPage<TaxonRecord> = response
            .json()
            .map_err(|err| LookupError::Other(err.to_string()))?;
        page.results.into_iter().next().ok_or(LookupError::NotFound)
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
