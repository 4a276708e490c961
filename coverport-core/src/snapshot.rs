//! Snapshot manifests listing the components of an application release.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{DeclaredComponent, TargetDescriptor};
use crate::error::{CoverportError, Result};

/// A set of components built together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Components in the snapshot.
    #[serde(default)]
    pub components: Vec<SnapshotComponent>,
}

/// One component entry in a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotComponent {
    /// Component name.
    pub name: String,
    /// Image the component was built into.
    pub container_image: String,
    /// Source the image was built from.
    #[serde(default)]
    pub source: SnapshotSource,
}

/// Source location of a snapshot component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSource {
    /// Git coordinates.
    #[serde(default)]
    pub git: GitSource,
}

/// Git coordinates for a snapshot component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSource {
    /// Repository URL.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    /// Commit the image was built from.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision: String,
}

impl Snapshot {
    /// Parse a snapshot from inline JSON.
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|err| CoverportError::Configuration(format!("parse snapshot JSON: {err}")))
    }

    /// Parse a snapshot stored in a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            CoverportError::Configuration(format!(
                "read snapshot file {}: {err}",
                path.display()
            ))
        })?;
        Self::parse(&contents)
    }

    /// Container images of every component.
    pub fn images(&self) -> Vec<String> {
        self.components
            .iter()
            .map(|component| component.container_image.clone())
            .collect()
    }

    /// Find the component built into exactly this image.
    pub fn component_by_image(&self, image: &str) -> Option<&SnapshotComponent> {
        self.components
            .iter()
            .find(|component| component.container_image == image)
    }

    /// Discovery request for the snapshot's components.
    pub fn descriptor(&self) -> Result<TargetDescriptor> {
        if self.components.is_empty() {
            return Err(CoverportError::Configuration(
                "snapshot contains no components".to_string(),
            ));
        }
        let components = self
            .components
            .iter()
            .map(|component| DeclaredComponent {
                name: component.name.clone(),
                image_ref: component.container_image.clone(),
            })
            .collect();
        Ok(TargetDescriptor::BySnapshot { components })
    }
}
