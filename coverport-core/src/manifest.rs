//! Durable record of a collection run (`metadata.json`).

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::domain::{CoverageFormat, ResolvedTarget};
use crate::error::{CoverportError, Result};

/// Manifest format version.
pub const MANIFEST_VERSION: &str = "1.0";
/// Manifest file name inside the output directory.
pub const MANIFEST_FILE: &str = "metadata.json";

/// Parameters a collection run was started with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionParams {
    /// Remote coverage port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_port: Option<u16>,
    /// Path filters applied during conversion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<String>,
    /// Coverage format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<CoverageFormat>,
    /// Namespace hint, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// One successfully collected component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRecord {
    /// Component name.
    pub name: String,
    /// Image the component ran.
    #[serde(default)]
    pub image: String,
    /// Coverage directory relative to the output directory.
    pub coverage_dir: String,
    /// Pod namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Pod name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,
    /// Container name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// RFC 3339 capture time.
    pub collected_at: String,
}

impl ComponentRecord {
    /// Record a collected target.
    pub fn from_target(target: &ResolvedTarget, coverage_dir: &str, at: DateTime<Utc>) -> Self {
        Self {
            name: target.component_name.clone(),
            image: target.image.clone().unwrap_or_default(),
            coverage_dir: coverage_dir.to_string(),
            namespace: target.namespace().map(str::to_string),
            pod_name: target.pod_name().map(str::to_string),
            container_name: target.container_name().map(str::to_string),
            collected_at: rfc3339(at),
        }
    }
}

/// Manifest of a collection run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionManifest {
    /// Format version.
    pub version: String,
    /// Test label the run was collected under.
    pub test_name: String,
    /// RFC 3339 start time.
    pub collected_at: String,
    /// Run parameters.
    #[serde(default)]
    pub collection_params: CollectionParams,
    /// Collected components.
    #[serde(default)]
    pub components: Vec<ComponentRecord>,
}

impl CollectionManifest {
    /// Create an empty manifest.
    pub fn new(test_name: impl Into<String>, params: CollectionParams) -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            test_name: test_name.into(),
            collected_at: rfc3339(Utc::now()),
            collection_params: params,
            components: Vec::new(),
        }
    }

    /// Append a component record.
    pub fn add_component(&mut self, component: ComponentRecord) {
        self.components.push(component);
    }

    /// Write `metadata.json` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = manifest_path(dir);
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        info!("collection manifest saved: {}", path.display());
        Ok(path)
    }

    /// Read `metadata.json` from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = manifest_path(dir);
        let contents = std::fs::read_to_string(&path).map_err(|err| {
            CoverportError::Configuration(format!("read manifest {}: {err}", path.display()))
        })?;
        serde_json::from_str(&contents).map_err(|err| {
            CoverportError::Configuration(format!("parse manifest {}: {err}", path.display()))
        })
    }

    /// Whether `dir` holds a manifest.
    pub fn exists(dir: &Path) -> bool {
        manifest_path(dir).is_file()
    }
}

/// Path of the manifest inside `dir`.
pub fn manifest_path(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILE)
}

/// Coverage directory of a component, relative to the output directory.
pub fn component_coverage_dir(test_name: &str, component: &str) -> String {
    format!("{component}/{test_name}-{component}")
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
