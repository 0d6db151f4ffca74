use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::DatasetSource;
use crate::error::InatError;

const STATE_DIR: &str = ".inat-import";
const ACTIVE_FILE: &str = "active.json";
const CIRCLE_PREFIX: &str = "circle";

pub const TAXA_IDS_FILE: &str = "iNat_taxa_ids.csv";
pub const TAXONOMY_FILE: &str = "iNat_taxonomy.csv";
pub const RUN_LOG_FILE: &str = "iNat_taxonomy_run.log";

/// Output directory layout and the active dataset pointer.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: Utf8PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_current_dir() -> Result<Self, InatError> {
        let cwd = std::env::current_dir().map_err(|err| InatError::Filesystem(err.to_string()))?;
        let root = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|_| InatError::Filesystem("invalid working directory path".to_string()))?;
        Ok(Self::new(root))
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), InatError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| InatError::Filesystem(err.to_string()))
    }

    /// First `circle_NN` whose GeoJSON file does not exist yet.
    pub fn next_circle_name(&self) -> String {
        (1u32..)
            .map(|index| format!("{CIRCLE_PREFIX}_{index:02}"))
            .find(|name| !self.circle_path(name).as_std_path().exists())
            .unwrap_or_else(|| format!("{CIRCLE_PREFIX}_00"))
    }

    pub fn circle_path(&self, circle_name: &str) -> Utf8PathBuf {
        self.root.join(format!("{circle_name}.geojson"))
    }

    pub fn observation_layer_name(circle_name: &str, radius_m: f64) -> String {
        format!("iNat_{circle_name}_Ray={}m", radius_m.trunc() as i64)
    }

    pub fn observation_path(&self, layer_name: &str) -> Utf8PathBuf {
        self.root
            .join(format!("{}.geojson", layer_name.replace(' ', "_")))
    }

    pub fn taxa_ids_path(source: &DatasetSource) -> Utf8PathBuf {
        source.directory().join(TAXA_IDS_FILE)
    }

    pub fn taxonomy_path(source: &DatasetSource) -> Utf8PathBuf {
        source.directory().join(TAXONOMY_FILE)
    }

    pub fn run_log_path(source: &DatasetSource) -> Utf8PathBuf {
        source.directory().join(RUN_LOG_FILE)
    }

    fn active_path(&self) -> Utf8PathBuf {
        self.root.join(STATE_DIR).join(ACTIVE_FILE)
    }

    pub fn set_active(&self, source: &DatasetSource) -> Result<(), InatError> {
        let path = self.active_path();
        let parent = path
            .parent()
            .ok_or_else(|| InatError::Filesystem("invalid state path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| InatError::Filesystem(err.to_string()))?;
        let pointer = ActivePointer {
            source: source.to_string(),
            selected_at: chrono::Utc::now().to_rfc3339(),
        };
        let content = serde_json::to_vec_pretty(&pointer)
            .map_err(|err| InatError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("active")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| InatError::Filesystem(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| InatError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| InatError::Filesystem(err.to_string()))?;
        tracing::debug!(source = %source, "active dataset updated");
        Ok(())
    }

    pub fn active_source(&self) -> Result<Option<DatasetSource>, InatError> {
        let path = self.active_path();
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| InatError::Filesystem(err.to_string()))?;
        let pointer: ActivePointer = serde_json::from_str(&content)
            .map_err(|err| InatError::Filesystem(format!("{path}: {err}")))?;
        pointer.source.parse().map(Some)
    }

    /// The explicit source if given, else the active one.
    pub fn select(&self, explicit: Option<DatasetSource>) -> Result<DatasetSource, InatError> {
        match explicit {
            Some(source) => Ok(source),
            None => self.active_source()?.ok_or(InatError::NoActiveDataset),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ActivePointer {
    source: String,
    selected_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let workspace = Workspace::new("/data/project");
        let layer = Workspace::observation_layer_name("circle_03", 1250.7);
        assert_eq!(layer, "iNat_circle_03_Ray=1250m");
        assert_eq!(
            workspace.observation_path(&layer).as_str(),
            "/data/project/iNat_circle_03_Ray=1250m.geojson"
        );

        let source = DatasetSource::new("/data/project/obs.geojson", "obs");
        assert!(Workspace::run_log_path(&source).ends_with("iNat_taxonomy_run.log"));
        assert!(Workspace::taxa_ids_path(&source).starts_with("/data/project"));
    }

    #[test]
    fn circle_names_skip_existing_files() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let workspace = Workspace::new(root);
        assert_eq!(workspace.next_circle_name(), "circle_01");
        fs::write(workspace.circle_path("circle_01").as_std_path(), b"{}").unwrap();
        assert_eq!(workspace.next_circle_name(), "circle_02");
    }
}
