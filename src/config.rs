use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{OutputField, PhotoMode};
use crate::error::InatError;
use crate::taxonomy::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "inat-import.json";
pub const DEFAULT_API_BASE_URL: &str = "https://api.inaturalist.org/v1";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub per_page: Option<u32>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub preferred_place_id: Option<u64>,
    #[serde(default)]
    pub call_delay_ms: Option<u64>,
    #[serde(default)]
    pub rate_limit_cooldown_secs: Option<u64>,
    #[serde(default)]
    pub max_rate_limit_attempts: Option<u32>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub photo_mode: Option<PhotoMode>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub api_base_url: String,
    pub per_page: u32,
    pub locale: Option<String>,
    pub preferred_place_id: Option<u64>,
    pub retry: RetryPolicy,
    pub output_dir: Utf8PathBuf,
    pub fields: Vec<OutputField>,
    pub photo_mode: PhotoMode,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, InatError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| InatError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| InatError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, InatError> {
        let defaults = RetryPolicy::default();

        let api_base_url = std::env::var("INAT_API_BASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or(config.api_base_url)
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let per_page = config.per_page.unwrap_or(200);
        if per_page == 0 || per_page > 200 {
            return Err(InatError::ConfigParse(format!(
                "per_page must be between 1 and 200, got {per_page}"
            )));
        }

        let retry = RetryPolicy {
            call_delay: config
                .call_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.call_delay),
            cooldown: config
                .rate_limit_cooldown_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.cooldown),
            max_attempts: config
                .max_rate_limit_attempts
                .unwrap_or(defaults.max_attempts)
                .max(1),
        };

        let fields = match config.fields {
            Some(names) => names
                .iter()
                .map(|name| name.parse())
                .collect::<Result<Vec<OutputField>, InatError>>()?,
            None => OutputField::CATALOG.to_vec(),
        };

        Ok(ResolvedConfig {
            schema_version: config.schema_version.unwrap_or(1),
            api_base_url,
            per_page,
            locale: config
                .locale
                .or_else(|| Some("fr".to_string()))
                .filter(|value| !value.trim().is_empty()),
            preferred_place_id: config.preferred_place_id.or(Some(6753)),
            retry,
            output_dir: Utf8PathBuf::from(config.output_dir.unwrap_or_else(|| ".".to_string())),
            fields,
            photo_mode: config.photo_mode.unwrap_or_default(),
        })
    }
}
